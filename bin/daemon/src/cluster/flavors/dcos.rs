//! DCOS: the gateway doubles as bootstrap node serving the DCOS
//! installer; masters and agents pull their configuration from it.

use async_trait::async_trait;
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    cluster::{
      ClusterComplexity, ClusterFlavor, ClusterState, NodeType,
    },
    host::{Host, SizingRequirements},
  },
  error::Result,
};

use crate::cluster::flavor::{ClusterOps, Flavor, NodeCounts};

const PREPARE_BOOTSTRAP_SCRIPT: &str = r#"#!/bin/bash
set -e
mkdir -p /usr/local/dcos/genconf
cat > /usr/local/dcos/genconf/config.yaml <<EOF
cluster_name: [[ClusterName]]
master_list: [[[MasterIPs]]]
bootstrap_url: http://[[GatewayIP]]:8085
EOF
cd /usr/local/dcos
curl -fsSL -o dcos_generate_config.sh \
  https://downloads.dcos.io/dcos/stable/dcos_generate_config.sh || exit 101
bash dcos_generate_config.sh || exit 102
docker run -d --name dcos-bootstrap -p 8085:80 \
  -v /usr/local/dcos/genconf/serve:/usr/share/nginx/html:ro \
  nginx:alpine || exit 103
"#;

const INSTALL_MEMBER_SCRIPT: &str = r#"#!/bin/bash
set -e
mkdir -p /tmp/dcos && cd /tmp/dcos
curl -fsSL -o dcos_install.sh http://[[GatewayIP]]:8085/dcos_install.sh || exit 101
bash dcos_install.sh [[DcosRole]] || exit 102
"#;

pub struct Dcos {}

#[async_trait]
impl Flavor for Dcos {
  fn kind(&self) -> ClusterFlavor {
    ClusterFlavor::Dcos
  }

  fn minimum_required_servers(
    &self,
    complexity: ClusterComplexity,
  ) -> NodeCounts {
    match complexity {
      ClusterComplexity::Small => NodeCounts {
        masters: 1,
        private_nodes: 2,
        public_nodes: 0,
      },
      ClusterComplexity::Normal => NodeCounts {
        masters: 3,
        private_nodes: 5,
        public_nodes: 1,
      },
      ClusterComplexity::Large => NodeCounts {
        masters: 5,
        private_nodes: 10,
        public_nodes: 2,
      },
    }
  }

  fn default_gateway_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 2,
      min_ram_size: 4.0,
      min_disk_size: 60,
    }
  }

  fn default_master_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 4,
      min_ram_size: 16.0,
      min_disk_size: 120,
    }
  }

  fn default_node_sizing(&self) -> SizingRequirements {
    SizingRequirements {
      min_cores: 4,
      min_ram_size: 16.0,
      min_disk_size: 120,
    }
  }

  fn default_image(&self) -> &'static str {
    "CentOS 7"
  }

  fn node_installation_script(
    &self,
    node_type: NodeType,
  ) -> (String, String) {
    let role = match node_type {
      NodeType::Master => "master",
      NodeType::PrivateNode => "slave",
      NodeType::PublicNode => "slave_public",
      NodeType::Gateway => "bootstrap",
    };
    (
      format!("dcos_install_{role}.sh"),
      INSTALL_MEMBER_SCRIPT.replace("[[DcosRole]]", role),
    )
  }

  /// The gateway becomes the bootstrap node; it needs docker first
  /// (the engine installed reverseproxy, which required it).
  async fn configure_gateway(
    &self,
    ops: &ClusterOps<'_>,
  ) -> Result<()> {
    let gateway = ops.gateway().await?;
    ops
      .execute_script(
        &gateway,
        "dcos_prepare_bootstrap.sh",
        PREPARE_BOOTSTRAP_SCRIPT,
        IndexMap::new(),
      )
      .await
  }

  async fn configure_master(
    &self,
    ops: &ClusterOps<'_>,
    master: &Host,
  ) -> Result<()> {
    let (name, script) =
      self.node_installation_script(NodeType::Master);
    ops
      .execute_script(master, &name, &script, IndexMap::new())
      .await
  }

  async fn configure_node(
    &self,
    ops: &ClusterOps<'_>,
    node: &Host,
  ) -> Result<()> {
    let (name, script) =
      self.node_installation_script(NodeType::PrivateNode);
    ops
      .execute_script(node, &name, &script, IndexMap::new())
      .await
  }

  async fn state(
    &self,
    ops: &ClusterOps<'_>,
  ) -> Result<ClusterState> {
    ops.probe_host_states().await
  }
}
