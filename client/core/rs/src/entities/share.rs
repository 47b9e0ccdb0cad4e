use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::properties::Property;

/// An NFS export served by a host. Lives inside the server host's
/// [`HostSharesV1`] property; the global share index only maps the
/// share name to its server.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostShare {
  pub id: String,
  pub name: String,
  /// Absolute, cleaned export path on the server.
  pub path: String,
  #[serde(default = "default_share_type")]
  pub share_type: String,
  /// client host id -> client host name
  #[serde(default)]
  pub clients_by_id: IndexMap<String, String>,
  /// client host name -> client host id
  #[serde(default)]
  pub clients_by_name: IndexMap<String, String>,
}

fn default_share_type() -> String {
  "nfs".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostSharesV1 {
  /// share id -> share
  #[serde(default)]
  pub by_id: IndexMap<String, HostShare>,
  /// share name -> share id
  #[serde(default)]
  pub by_name: IndexMap<String, String>,
}

impl Property for HostSharesV1 {
  const KEY: &'static str = "SharesV1";
  const VERSION: u32 = 1;
}

/// Mirror record of a mounted share, stored on the client host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostRemoteMount {
  pub share_id: String,
  /// `<server access ip>:<share path>`
  pub export: String,
  /// Absolute mount point on the client.
  pub path: String,
  #[serde(default = "default_share_type")]
  pub file_system: String,
}

/// A block-device mount (volume attachment).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostLocalMount {
  pub device: String,
  pub path: String,
  #[serde(default)]
  pub file_system: String,
}

/// Everything mounted on a host, local devices and remote shares,
/// indexed by the keys the collision checks need.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostMountsV1 {
  /// device -> mount path
  #[serde(default)]
  pub local_mounts_by_device: IndexMap<String, String>,
  /// mount path -> local mount
  #[serde(default)]
  pub local_mounts_by_path: IndexMap<String, HostLocalMount>,
  /// share id -> mount path
  #[serde(default)]
  pub remote_mounts_by_share_id: IndexMap<String, String>,
  /// export string -> mount path
  #[serde(default)]
  pub remote_mounts_by_export: IndexMap<String, String>,
  /// mount path -> remote mount
  #[serde(default)]
  pub remote_mounts_by_path: IndexMap<String, HostRemoteMount>,
}

impl Property for HostMountsV1 {
  const KEY: &'static str = "MountsV1";
  const VERSION: u32 = 1;
}

/// `Inspect` response: the share plus where it is served from.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ShareDetail {
  pub server_id: String,
  pub server_name: String,
  pub share: HostShare,
}
