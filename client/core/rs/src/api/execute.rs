//! Long-running orchestrations: cluster builds and feature
//! operations. These can take minutes; the daemon still answers
//! synchronously, the CLI just waits.

use clap::Parser;
use indexmap::{IndexMap, IndexSet};
use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  NoData,
  cluster::{ClusterComplexity, ClusterFlavor, ClusterIdentity},
  feature::{FeatureSettings, Results},
};

// ===========
// = Cluster =
// ===========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ClusterIdentity)]
#[error(serror::Error)]
pub struct CreateCluster {
  pub name: String,
  #[serde(default)]
  #[arg(long, default_value_t = ClusterFlavor::Boh)]
  pub flavor: ClusterFlavor,
  #[serde(default)]
  #[arg(long, default_value_t = ClusterComplexity::Small)]
  pub complexity: ClusterComplexity,
  #[serde(default = "default_cluster_cidr")]
  #[arg(long, default_value = "192.168.0.0/16")]
  pub cidr: String,
  /// Node sizing override: cores.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[arg(long)]
  pub cpu: Option<u32>,
  /// Node sizing override: RAM, GB.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[arg(long)]
  pub ram: Option<f32>,
  /// Node sizing override: disk, GB.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[arg(long)]
  pub disk: Option<u32>,
  /// Features to skip (e.g. proxycache).
  #[serde(default)]
  #[arg(long)]
  pub disable: Vec<String>,
  /// Keep partially-built resources on failure.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub keep_on_failure: bool,
}

fn default_cluster_cidr() -> String {
  "192.168.0.0/16".to_string()
}

impl CreateCluster {
  pub fn disabled_features(&self) -> IndexSet<String> {
    self.disable.iter().cloned().collect()
  }
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteCluster {
  pub cluster: String,
}

/// Returns the ids of the created nodes.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<String>)]
#[error(serror::Error)]
pub struct AddClusterNodes {
  pub cluster: String,
  #[serde(default = "default_count")]
  #[arg(long, default_value_t = 1)]
  pub count: u32,
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub public: bool,
}

fn default_count() -> u32 {
  1
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteClusterNode {
  pub cluster: String,
  /// Node host name or id.
  pub node: String,
}

// ===========
// = Feature =
// ===========

/// What a feature operation applies to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FeatureTarget {
  Host(String),
  Cluster(String),
}

impl Default for FeatureTarget {
  fn default() -> FeatureTarget {
    FeatureTarget::Host(String::new())
  }
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve,
)]
#[response(Results)]
#[error(serror::Error)]
pub struct AddFeature {
  pub target: FeatureTarget,
  pub feature: String,
  #[serde(default)]
  pub params: IndexMap<String, String>,
  #[serde(default)]
  pub settings: FeatureSettings,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve,
)]
#[response(Results)]
#[error(serror::Error)]
pub struct CheckFeature {
  pub target: FeatureTarget,
  pub feature: String,
  #[serde(default)]
  pub params: IndexMap<String, String>,
  #[serde(default)]
  pub settings: FeatureSettings,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve,
)]
#[response(Results)]
#[error(serror::Error)]
pub struct RemoveFeature {
  pub target: FeatureTarget,
  pub feature: String,
  #[serde(default)]
  pub params: IndexMap<String, String>,
  #[serde(default)]
  pub settings: FeatureSettings,
}
