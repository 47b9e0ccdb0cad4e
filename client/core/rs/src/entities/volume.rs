use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::properties::{Properties, Property};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Volume {
  pub id: String,
  pub name: String,
  /// In GB.
  pub size: u32,
  #[serde(default)]
  pub speed: VolumeSpeed,
  #[serde(default)]
  pub state: VolumeState,
  #[serde(default)]
  pub properties: Properties,
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
pub enum VolumeSpeed {
  Cold,
  #[default]
  Hdd,
  Ssd,
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
pub enum VolumeState {
  Creating,
  #[default]
  Available,
  Attaching,
  Attached,
  Detaching,
  Deleting,
  Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct VolumeRequest {
  pub name: String,
  pub size: u32,
  pub speed: VolumeSpeed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VolumeAttachment {
  pub id: String,
  pub volume_id: String,
  pub host_id: String,
  /// Device path on the host (/dev/vdb, ...).
  pub device: String,
}

/// Hosts the volume is attached to. One host at most for now, kept
/// as a map so multi-attach volumes don't need a schema bump.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VolumeAttachmentsV1 {
  /// host id -> attachment id
  #[serde(default)]
  pub hosts: IndexMap<String, String>,
}

impl Property for VolumeAttachmentsV1 {
  const KEY: &'static str = "AttachmentsV1";
  const VERSION: u32 = 1;
}
