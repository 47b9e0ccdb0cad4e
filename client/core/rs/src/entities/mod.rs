pub mod cluster;
pub mod config;
pub mod feature;
pub mod host;
pub mod network;
pub mod properties;
pub mod security_group;
pub mod share;
pub mod volume;

use serde::{Deserialize, Serialize};

/// Unix seconds.
pub fn safescale_timestamp() -> i64 {
  chrono::Utc::now().timestamp()
}

/// Empty response body for requests that only succeed or fail.
#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub struct NoData {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TenantSummary {
  pub name: String,
  pub provider: String,
  /// Whether this is the tenant current operations run against.
  pub current: bool,
}

/// Resource names become object-storage paths and hostnames; keep
/// them to a safe alphabet.
pub fn validate_resource_name(name: &str) -> bool {
  !name.is_empty()
    && name.len() <= 63
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    && !name.starts_with('-')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resource_names() {
    assert!(validate_resource_name("gw-net-1"));
    assert!(validate_resource_name("host_2"));
    assert!(!validate_resource_name(""));
    assert!(!validate_resource_name("-leading"));
    assert!(!validate_resource_name("has space"));
    assert!(!validate_resource_name("has/slash"));
  }
}
