use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::properties::{Properties, Property};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Network {
  pub id: String,
  pub name: String,
  pub cidr: String,
  #[serde(default)]
  pub ip_version: IpVersion,
  /// Id of the gateway host, empty until the gateway is provisioned.
  #[serde(default)]
  pub gateway_id: String,
  #[serde(default)]
  pub properties: Properties,
}

impl Network {
  pub fn new(name: impl Into<String>, cidr: impl Into<String>) -> Network {
    Network {
      name: name.into(),
      cidr: cidr.into(),
      ..Default::default()
    }
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
pub enum IpVersion {
  #[default]
  V4,
  V6,
}

/// Parses and normalizes a CIDR, rejecting what the provider would.
pub fn validate_cidr(cidr: &str) -> crate::error::Result<ipnetwork::IpNetwork> {
  cidr.parse::<ipnetwork::IpNetwork>().map_err(|e| {
    crate::error::Error::invalid_parameter(
      "cidr",
      format!("'{cidr}' is not a valid CIDR: {e}"),
    )
  })
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NetworkRequest {
  pub name: String,
  pub cidr: String,
  pub ip_version: IpVersion,
}

/// Gateway creation request; the gateway is a host with `public_ip`
/// and routing duty on the network.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GatewayRequest {
  pub name: String,
  pub network_id: String,
  pub cidr: String,
  pub template_id: String,
  pub image_id: String,
  pub key_pair: super::host::KeyPair,
}

/// Hosts attached to the network. The gateway is deliberately NOT
/// tracked here: deleting a network requires this index empty, and
/// the gateway is destroyed by the network deletion itself.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NetworkHostsV1 {
  /// host id -> host name
  #[serde(default)]
  pub by_id: IndexMap<String, String>,
  /// host name -> host id
  #[serde(default)]
  pub by_name: IndexMap<String, String>,
}

impl NetworkHostsV1 {
  pub fn attach(&mut self, id: impl Into<String>, name: impl Into<String>) {
    let (id, name) = (id.into(), name.into());
    self.by_id.insert(id.clone(), name.clone());
    self.by_name.insert(name, id);
  }

  pub fn detach(&mut self, id: &str) {
    if let Some(name) = self.by_id.shift_remove(id) {
      self.by_name.shift_remove(&name);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }
}

impl Property for NetworkHostsV1 {
  const KEY: &'static str = "HostsV1";
  const VERSION: u32 = 1;
}
