//! Mutating requests on simple and composite resources. Each one
//! maps to a handler saga server-side; a success means metadata and
//! provider state agree.

use clap::Parser;
use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  NoData,
  host::Host,
  network::Network,
  security_group::{
    RuleDirection, SecurityGroup, SecurityGroupRule,
  },
  share::{HostRemoteMount, HostShare},
  volume::{Volume, VolumeAttachment, VolumeSpeed},
};

// ==========
// = Tenant =
// ==========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct SetCurrentTenant {
  pub tenant: String,
}

// ===========
// = Network =
// ===========

/// Creates the network AND its gateway host; the network is usable
/// only once this returns.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Network)]
#[error(serror::Error)]
pub struct CreateNetwork {
  pub name: String,
  /// e.g. 192.168.10.0/24
  pub cidr: String,
  /// Gateway sizing: minimum cores.
  #[serde(default = "default_cpu")]
  #[arg(long, default_value_t = default_cpu())]
  pub cpu: u32,
  /// Gateway sizing: minimum RAM, GB.
  #[serde(default = "default_ram")]
  #[arg(long, default_value_t = default_ram())]
  pub ram: f32,
  /// Gateway sizing: minimum disk, GB.
  #[serde(default = "default_disk")]
  #[arg(long, default_value_t = default_disk())]
  pub disk: u32,
  /// Image to search for the gateway.
  #[serde(default = "default_os")]
  #[arg(long, default_value = default_os_str())]
  pub os: String,
  /// Gateway host name; defaults to gw-<network>.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[arg(long)]
  pub gateway_name: Option<String>,
}

fn default_cpu() -> u32 {
  1
}

fn default_ram() -> f32 {
  1.0
}

fn default_disk() -> u32 {
  16
}

fn default_os() -> String {
  default_os_str().to_string()
}

fn default_os_str() -> &'static str {
  "Ubuntu 20.04"
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteNetwork {
  /// Name or id
  pub network: String,
}

// ========
// = Host =
// ========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Host)]
#[error(serror::Error)]
pub struct CreateHost {
  pub name: String,
  /// Network to attach the host to.
  pub network: String,
  #[serde(default = "default_cpu")]
  #[arg(long, default_value_t = default_cpu())]
  pub cpu: u32,
  #[serde(default = "default_ram")]
  #[arg(long, default_value_t = default_ram())]
  pub ram: f32,
  #[serde(default = "default_disk")]
  #[arg(long, default_value_t = default_disk())]
  pub disk: u32,
  #[serde(default = "default_os")]
  #[arg(long, default_value = default_os_str())]
  pub os: String,
  /// Give the host its own public address instead of routing through
  /// the gateway.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub public_ip: bool,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteHost {
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct StartHost {
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct StopHost {
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct RebootHost {
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Host)]
#[error(serror::Error)]
pub struct ResizeHost {
  /// Name or id
  pub host: String,
  #[arg(long)]
  pub cpu: u32,
  #[arg(long)]
  pub ram: f32,
  #[arg(long)]
  pub disk: u32,
}

// ==========
// = Volume =
// ==========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(Volume)]
#[error(serror::Error)]
pub struct CreateVolume {
  pub name: String,
  /// In GB.
  pub size: u32,
  #[serde(default)]
  #[arg(long, default_value_t = VolumeSpeed::Hdd)]
  pub speed: VolumeSpeed,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteVolume {
  /// Name or id
  pub volume: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(VolumeAttachment)]
#[error(serror::Error)]
pub struct AttachVolume {
  /// Name or id
  pub volume: String,
  /// Name or id
  pub host: String,
  /// Mount point; recorded in the host mounts when set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  #[arg(long)]
  pub path: Option<String>,
  #[serde(default = "default_fs")]
  #[arg(long, default_value = "ext4")]
  pub format: String,
}

fn default_fs() -> String {
  "ext4".to_string()
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DetachVolume {
  /// Name or id
  pub volume: String,
  /// Name or id
  pub host: String,
}

// =========
// = Share =
// =========

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(HostShare)]
#[error(serror::Error)]
pub struct CreateShare {
  pub name: String,
  /// Host serving the export.
  pub host: String,
  /// Absolute path to export.
  pub path: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteShare {
  pub share: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(HostRemoteMount)]
#[error(serror::Error)]
pub struct MountShare {
  pub share: String,
  /// Client host, name or id.
  pub host: String,
  /// Absolute mount point on the client.
  pub path: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct UnmountShare {
  pub share: String,
  /// Client host, name or id.
  pub host: String,
}

// ==================
// = Security group =
// ==================

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct CreateSecurityGroup {
  /// Network the group is scoped to, name or id.
  pub network: String,
  pub name: String,
  #[serde(default)]
  #[arg(long, default_value = "")]
  pub description: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct DeleteSecurityGroup {
  /// Name or id
  pub group: String,
  /// Delete even when still bound to hosts or subnets.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub force: bool,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct AddSecurityGroupRule {
  /// Name or id
  pub group: String,
  #[serde(default)]
  #[arg(long, default_value_t = RuleDirection::Ingress)]
  pub direction: RuleDirection,
  #[serde(default)]
  #[arg(long, default_value = "tcp")]
  pub protocol: String,
  #[arg(long)]
  pub port_from: u16,
  #[arg(long)]
  pub port_to: u16,
  /// CIDRs or group ids.
  #[arg(long)]
  pub involved: Vec<String>,
  #[serde(default)]
  #[arg(long, default_value = "")]
  pub description: String,
}

/// Bulk variant used by the handlers themselves.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct AddSecurityGroupRules {
  pub group: String,
  pub rules: Vec<SecurityGroupRule>,
}

/// Removes every rule, provider-side and in metadata.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct ClearSecurityGroup {
  /// Name or id
  pub group: String,
}

/// Re-applies the rules recorded in metadata to the provider.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(SecurityGroup)]
#[error(serror::Error)]
pub struct ResetSecurityGroup {
  /// Name or id
  pub group: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct BindSecurityGroupToHost {
  /// Name or id
  pub group: String,
  /// Name or id
  pub host: String,
  /// Bind without enforcing.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub disabled: bool,
  /// Mark as the host's default group.
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub mark_default: bool,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct UnbindSecurityGroupFromHost {
  /// Name or id
  pub group: String,
  /// Name or id
  pub host: String,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct BindSecurityGroupToSubnet {
  /// Name or id
  pub group: String,
  /// Name or id
  pub network: String,
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub disabled: bool,
  #[serde(default)]
  #[arg(long, default_value_t = false)]
  pub mark_default: bool,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Resolve, Parser,
)]
#[response(NoData)]
#[error(serror::Error)]
pub struct UnbindSecurityGroupFromSubnet {
  /// Name or id
  pub group: String,
  /// Name or id
  pub network: String,
}
