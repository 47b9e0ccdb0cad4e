//! BOH ("bunch of hosts"): no orchestrator, just provisioned hosts
//! with docker, reachable through the gateway. The baseline flavor.

use async_trait::async_trait;
use safescale_client::{
  entities::{
    cluster::{
      ClusterComplexity, ClusterFlavor, ClusterState, NodeType,
    },
    host::SizingRequirements,
  },
  error::Result,
};

use crate::cluster::flavor::{ClusterOps, Flavor, NodeCounts};

const NODE_INSTALL_SCRIPT: &str = r#"#!/bin/bash
set -e
mkdir -p /opt/safescale/etc /opt/safescale/var/log
cat > /opt/safescale/etc/cluster.env <<EOF
CLUSTER_NAME=[[ClusterName]]
CLUSTER_ROLE=[[NodeRole]]
CLUSTER_MASTERS=[[MasterIPs]]
EOF
hostnamectl set-hostname [[Hostname]] || exit 101
"#;

pub struct Boh {}

#[async_trait]
impl Flavor for Boh {
  fn kind(&self) -> ClusterFlavor {
    ClusterFlavor::Boh
  }

  fn minimum_required_servers(
    &self,
    complexity: ClusterComplexity,
  ) -> NodeCounts {
    match complexity {
      ClusterComplexity::Small => NodeCounts {
        masters: 1,
        private_nodes: 1,
        public_nodes: 0,
      },
      ClusterComplexity::Normal => NodeCounts {
        masters: 2,
        private_nodes: 3,
        public_nodes: 0,
      },
      ClusterComplexity::Large => NodeCounts {
        masters: 3,
        private_nodes: 7,
        public_nodes: 0,
      },
    }
  }

  fn default_gateway_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 1,
      min_ram_size: 1.0,
      min_disk_size: 16,
    }
  }

  fn default_master_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 2,
      min_ram_size: 4.0,
      min_disk_size: 60,
    }
  }

  fn default_node_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 2,
      min_ram_size: 4.0,
      min_disk_size: 60,
    }
  }

  fn default_image(&self) -> &'static str {
    "Ubuntu 20.04"
  }

  fn node_installation_script(
    &self,
    node_type: NodeType,
  ) -> (String, String) {
    let role = match node_type {
      NodeType::Master => "master",
      NodeType::PrivateNode => "node",
      NodeType::PublicNode => "public-node",
      NodeType::Gateway => "gateway",
    };
    (
      format!("boh_install_{role}.sh"),
      NODE_INSTALL_SCRIPT
        .replace("[[NodeRole]]", role),
    )
  }

  async fn state(
    &self,
    ops: &ClusterOps<'_>,
  ) -> Result<ClusterState> {
    // No orchestrator to ask: the cluster is as healthy as its
    // members.
    ops.probe_host_states().await
  }
}
