//! Read-only requests. Everything here answers from tenant metadata
//! (and the provider catalog for images / templates); nothing
//! mutates state.

use clap::Parser;
use indexmap::IndexMap;
use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  TenantSummary,
  cluster::{ClusterIdentity, ClusterState},
  host::{Host, HostState, HostTemplate, Image, SshAccess},
  network::Network,
  security_group::SecurityGroup,
  share::{HostShare, ShareDetail},
  volume::Volume,
};

// ==========
// = Tenant =
// ==========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ListTenantsResponse)]
#[error(serror::Error)]
pub struct ListTenants {}

pub type ListTenantsResponse = Vec<TenantSummary>;

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Option<TenantSummary>)]
#[error(serror::Error)]
pub struct GetCurrentTenant {}

// ========
// = Host =
// ========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<Host>)]
#[error(serror::Error)]
pub struct ListHosts {}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Host)]
#[error(serror::Error)]
pub struct InspectHost {
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(HostState)]
#[error(serror::Error)]
pub struct GetHostState {
  /// Name or id
  pub host: String,
}

/// Everything needed to `ssh` into the host.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SshAccess)]
#[error(serror::Error)]
pub struct GetHostSshAccess {
  /// Name or id
  pub host: String,
}

// ===========
// = Network =
// ===========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<Network>)]
#[error(serror::Error)]
pub struct ListNetworks {
  /// Include networks not managed by SafeScale.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub all: bool,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Network)]
#[error(serror::Error)]
pub struct InspectNetwork {
  /// Name or id
  pub network: String,
}

// ==========
// = Volume =
// ==========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<Volume>)]
#[error(serror::Error)]
pub struct ListVolumes {}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Volume)]
#[error(serror::Error)]
pub struct InspectVolume {
  /// Name or id
  pub volume: String,
}

// =========
// = Share =
// =========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ListSharesResponse)]
#[error(serror::Error)]
pub struct ListShares {}

/// server host name -> share id -> share
pub type ListSharesResponse =
  IndexMap<String, IndexMap<String, HostShare>>;

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ShareDetail)]
#[error(serror::Error)]
pub struct InspectShare {
  pub share: String,
}

// ==================
// = Security group =
// ==================

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<SecurityGroup>)]
#[error(serror::Error)]
pub struct ListSecurityGroups {}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct InspectSecurityGroup {
  /// Name or id
  pub group: String,
}

// ===========
// = Cluster =
// ===========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<ClusterIdentity>)]
#[error(serror::Error)]
pub struct ListClusters {}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ClusterIdentity)]
#[error(serror::Error)]
pub struct InspectCluster {
  pub cluster: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(ClusterState)]
#[error(serror::Error)]
pub struct GetClusterState {
  pub cluster: String,
}

// ===========
// = Catalog =
// ===========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<Image>)]
#[error(serror::Error)]
pub struct ListImages {}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<HostTemplate>)]
#[error(serror::Error)]
pub struct ListTemplates {}

/// Names of the feature manifests the daemon can install.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Vec<String>)]
#[error(serror::Error)]
pub struct ListFeatures {}
