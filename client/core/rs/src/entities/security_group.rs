use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::properties::{Properties, Property};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SecurityGroup {
  pub id: String,
  pub name: String,
  /// Network the group is scoped to.
  #[serde(default)]
  pub network_id: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub rules: Vec<SecurityGroupRule>,
  #[serde(default)]
  pub properties: Properties,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupRule {
  #[serde(default)]
  pub ids: Vec<String>,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub direction: RuleDirection,
  /// "tcp", "udp", "icmp" or empty for all.
  #[serde(default)]
  pub protocol: String,
  #[serde(default)]
  pub port_from: u16,
  #[serde(default)]
  pub port_to: u16,
  /// CIDRs or security-group ids the rule involves.
  #[serde(default)]
  pub involved: Vec<String>,
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
pub enum RuleDirection {
  #[default]
  Ingress,
  Egress,
}

/// A host or subnet the group is bound to.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupBond {
  pub id: String,
  pub name: String,
  /// Bound but not enforced.
  #[serde(default)]
  pub disabled: bool,
  /// Marked as the default group of the host / subnet.
  #[serde(default)]
  pub mark_default: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupBondsV1 {
  /// host id -> bond
  #[serde(default)]
  pub hosts: IndexMap<String, SecurityGroupBond>,
  /// subnet (network) id -> bond
  #[serde(default)]
  pub subnets: IndexMap<String, SecurityGroupBond>,
}

impl SecurityGroupBondsV1 {
  pub fn is_empty(&self) -> bool {
    self.hosts.is_empty() && self.subnets.is_empty()
  }
}

impl Property for SecurityGroupBondsV1 {
  const KEY: &'static str = "BondsV1";
  const VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SecurityGroupRequest {
  pub name: String,
  pub network_id: String,
  pub description: String,
  pub rules: Vec<SecurityGroupRule>,
}
