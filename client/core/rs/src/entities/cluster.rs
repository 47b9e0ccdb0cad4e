use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{
  host::{HostSize, KeyPair},
  properties::{Properties, Property},
};

/// The authoritative record of a cluster, persisted under
/// `clusters/<name>`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClusterIdentity {
  pub name: String,
  pub flavor: ClusterFlavor,
  pub complexity: ClusterComplexity,
  pub cidr: String,
  #[serde(default)]
  pub network_id: String,
  #[serde(default)]
  pub gateway_id: String,
  #[serde(default)]
  pub master_ids: Vec<String>,
  #[serde(default)]
  pub private_node_ids: Vec<String>,
  #[serde(default)]
  pub public_node_ids: Vec<String>,
  #[serde(default)]
  pub admin_password: String,
  #[serde(default)]
  pub key_pair: KeyPair,
  #[serde(default)]
  pub state: ClusterState,
  /// Features the requester opted out of (proxycache, ...).
  #[serde(default)]
  pub disabled_features: IndexSet<String>,
  /// Sizing applied to nodes added after creation.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nodes_def: Option<HostSize>,
  #[serde(default)]
  pub properties: Properties,
}

impl ClusterIdentity {
  pub fn node_ids(&self, public: bool) -> &[String] {
    if public {
      &self.public_node_ids
    } else {
      &self.private_node_ids
    }
  }

  pub fn count_nodes(&self, public: bool) -> usize {
    self.node_ids(public).len()
  }
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
pub enum ClusterFlavor {
  /// "Bunch of hosts": no orchestrator, docker on every node.
  #[default]
  Boh,
  Dcos,
  K8s,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
pub enum ClusterComplexity {
  #[default]
  Small,
  Normal,
  Large,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
)]
pub enum ClusterState {
  #[default]
  Creating,
  Created,
  Nominal,
  Degraded,
  Stopped,
  Removed,
  Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClusterRequest {
  pub name: String,
  #[serde(default)]
  pub flavor: ClusterFlavor,
  #[serde(default)]
  pub complexity: ClusterComplexity,
  pub cidr: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nodes_def: Option<HostSize>,
  #[serde(default)]
  pub disabled_features: IndexSet<String>,
  /// Leave partially-built resources in place when creation fails,
  /// for post-mortem.
  #[serde(default)]
  pub keep_on_failure: bool,
}

/// Flavor-specific extension data; the engine never interprets the
/// payload, only the flavor implementation does.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClusterCompositeV1 {
  #[serde(default)]
  pub payload: serde_json::Value,
}

impl Property for ClusterCompositeV1 {
  const KEY: &'static str = "CompositeV1";
  const VERSION: u32 = 1;
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Display,
)]
pub enum NodeType {
  Gateway,
  Master,
  PrivateNode,
  PublicNode,
}
