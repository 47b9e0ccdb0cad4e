use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::properties::{Properties, Property};

/// A compute instance owned by a tenant. The metadata record is the
/// source of truth about it; the provider view is reconciled into it
/// on reload.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Host {
  /// Provider-assigned or generated opaque id.
  pub id: String,
  /// Unique within the tenant.
  pub name: String,
  /// PEM private key generated at creation, used for SSH access.
  #[serde(default)]
  pub private_key: String,
  /// Last observed power state.
  #[serde(default)]
  pub last_state: HostState,
  #[serde(default)]
  pub properties: Properties,
}

impl Host {
  pub fn new(name: impl Into<String>) -> Host {
    Host {
      name: name.into(),
      ..Default::default()
    }
  }

  /// The address other machines should use to reach the host:
  /// public IP when it has one, first private address otherwise.
  pub fn access_ip(&self) -> Option<String> {
    let network = self.properties.get::<HostNetworkV1>().ok()?;
    if !network.public_ipv4.is_empty() {
      return Some(network.public_ipv4);
    }
    network.ipv4_addresses.values().next().cloned()
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
)]
pub enum HostState {
  Starting,
  Started,
  Stopping,
  Stopped,
  Error,
  #[default]
  Unknown,
}

/// Resource dimensions of a host or template.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostSize {
  pub cores: u32,
  /// In GB.
  pub ram_size: f32,
  /// In GB.
  pub disk_size: u32,
  #[serde(default)]
  pub gpu_count: u32,
}

/// Lower bounds used to select a template.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SizingRequirements {
  pub min_cores: u32,
  pub min_ram_size: f32,
  pub min_disk_size: u32,
}

impl SizingRequirements {
  pub fn satisfied_by(&self, template: &HostTemplate) -> bool {
    template.cores >= self.min_cores
      && template.ram_size >= self.min_ram_size
      && template.disk_size >= self.min_disk_size
  }
}

/// A provider flavor (t2.micro, s1-4, ...).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostTemplate {
  pub id: String,
  pub name: String,
  pub cores: u32,
  pub ram_size: f32,
  pub disk_size: u32,
  #[serde(default)]
  pub gpu_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Image {
  pub id: String,
  pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KeyPair {
  pub id: String,
  pub name: String,
  pub private_key: String,
  pub public_key: String,
}

/// What the handlers ask the provider stack for.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HostRequest {
  pub resource_name: String,
  /// Networks the host is attached to; the first is the default one.
  pub network_ids: Vec<String>,
  pub template_id: String,
  pub image_id: String,
  pub key_pair: KeyPair,
  pub public_ip: bool,
  pub is_gateway: bool,
}

/// Everything the CLI / RPC caller needs to open an SSH session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SshAccess {
  pub host: String,
  pub ip: String,
  pub port: u16,
  pub user: String,
  pub private_key: String,
  /// Gateway hop, when the host has no public address.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gateway: Option<Box<SshAccess>>,
}

// ==============
// = Properties =
// ==============

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostDescriptionV1 {
  /// Unix seconds.
  pub created: i64,
  #[serde(default)]
  pub purpose: String,
}

impl Property for HostDescriptionV1 {
  const KEY: &'static str = "DescriptionV1";
  const VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostSizingV1 {
  /// What the user asked for, kept to re-create equivalent hosts.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub requested_size: Option<HostSize>,
  /// Template the provider matched the request to.
  #[serde(default)]
  pub template: String,
  /// What the provider actually allocated.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allocated_size: Option<HostSize>,
}

impl Property for HostSizingV1 {
  const KEY: &'static str = "SizingV1";
  const VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostNetworkV1 {
  /// Id of the network the host uses as default route.
  #[serde(default)]
  pub default_network_id: String,
  /// network id -> network name
  #[serde(default)]
  pub networks_by_id: IndexMap<String, String>,
  #[serde(default)]
  pub networks_by_name: IndexMap<String, String>,
  /// network id -> address of this host on it
  #[serde(default)]
  pub ipv4_addresses: IndexMap<String, String>,
  #[serde(default)]
  pub public_ipv4: String,
  #[serde(default)]
  pub is_gateway: bool,
  /// Id of the gateway of the default network, empty for gateways
  /// themselves.
  #[serde(default)]
  pub default_gateway_id: String,
}

impl Property for HostNetworkV1 {
  const KEY: &'static str = "NetworkV1";
  const VERSION: u32 = 1;
}

/// Volumes attached to the host, indexed both ways.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostVolumesV1 {
  /// volume id -> attachment detail
  #[serde(default)]
  pub by_id: IndexMap<String, HostVolume>,
  /// volume name -> volume id
  #[serde(default)]
  pub by_name: IndexMap<String, String>,
  /// device path -> volume id
  #[serde(default)]
  pub by_device: IndexMap<String, String>,
}

impl Property for HostVolumesV1 {
  const KEY: &'static str = "VolumesV1";
  const VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostVolume {
  pub attach_id: String,
  pub device: String,
}

/// Features installed on the host, with the requirement graph needed
/// to detect cascading removals.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostFeaturesV1 {
  #[serde(default)]
  pub installed: IndexMap<String, InstalledFeature>,
}

impl Property for HostFeaturesV1 {
  const KEY: &'static str = "FeaturesV1";
  const VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InstalledFeature {
  /// Features this one needed at install time.
  #[serde(default)]
  pub requires: IndexSet<String>,
  /// Features that declared a requirement on this one.
  #[serde(default)]
  pub required_by: IndexSet<String>,
}
