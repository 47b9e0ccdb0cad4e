//! Versioned extension properties.
//!
//! Every abstract carries a bag of independently versioned
//! sub-records keyed by a stable string tag. At rest the bag is a
//! JSON map of `tag -> { version, payload }`; tags a daemon does not
//! know about are preserved untouched and re-emitted verbatim, so
//! mixed daemon versions can share a tenant bucket without data
//! loss.
//!
//! Access is read-clone / write-replace: [`Properties::get`] decodes
//! a fresh copy, [`Properties::set`] replaces the stored payload
//! atomically. Serialization of concurrent writers happens above
//! this layer, at the resource lock keyed by task identity.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// A typed extension property. `KEY` must be unique per resource
/// kind, `VERSION` bumps on schema changes.
pub trait Property:
  Default + Clone + Serialize + DeserializeOwned
{
  const KEY: &'static str;
  const VERSION: u32;
}

#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
pub struct VersionedPayload {
  pub version: u32,
  pub payload: serde_json::Value,
}

#[derive(
  Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
#[serde(transparent)]
pub struct Properties(IndexMap<String, VersionedPayload>);

impl Properties {
  pub fn new() -> Properties {
    Properties::default()
  }

  pub fn contains<P: Property>(&self) -> bool {
    self.0.contains_key(P::KEY)
  }

  /// Decodes a clone of the stored property, or its default when the
  /// tag was never written. A payload written by a newer schema
  /// fails with `Inconsistent` instead of being silently dropped.
  pub fn get<P: Property>(&self) -> Result<P> {
    let Some(stored) = self.0.get(P::KEY) else {
      return Ok(P::default());
    };
    if stored.version > P::VERSION {
      return Err(Error::inconsistent(format!(
        "property '{}' has version {}, this daemon understands up to {}",
        P::KEY,
        stored.version,
        P::VERSION,
      )));
    }
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
      Error::inconsistent(format!(
        "failed to decode property '{}': {e}",
        P::KEY
      ))
    })
  }

  pub fn set<P: Property>(&mut self, value: &P) -> Result<()> {
    let payload = serde_json::to_value(value).map_err(|e| {
      Error::inconsistent(format!(
        "failed to encode property '{}': {e}",
        P::KEY
      ))
    })?;
    self.0.insert(
      P::KEY.to_string(),
      VersionedPayload {
        version: P::VERSION,
        payload,
      },
    );
    Ok(())
  }

  /// Read-copy-update in one call: decode, let the closure mutate the
  /// copy, write the copy back. The closure's return value is
  /// forwarded; an Err leaves the stored payload untouched.
  pub fn alter<P: Property, R>(
    &mut self,
    f: impl FnOnce(&mut P) -> Result<R>,
  ) -> Result<R> {
    let mut value = self.get::<P>()?;
    let out = f(&mut value)?;
    self.set(&value)?;
    Ok(out)
  }

  pub fn tags(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(
    Serialize, Deserialize, Debug, Clone, Default, PartialEq,
  )]
  struct Counters {
    count: u32,
  }

  impl Property for Counters {
    const KEY: &'static str = "CountersV1";
    const VERSION: u32 = 1;
  }

  #[test]
  fn get_returns_default_when_absent() {
    let props = Properties::new();
    assert_eq!(props.get::<Counters>().unwrap(), Counters::default());
  }

  #[test]
  fn alter_round_trips() {
    let mut props = Properties::new();
    props
      .alter::<Counters, _>(|c| {
        c.count += 3;
        Ok(())
      })
      .unwrap();
    assert_eq!(props.get::<Counters>().unwrap().count, 3);
  }

  #[test]
  fn newer_schema_is_inconsistent() {
    let mut props = Properties::new();
    props.0.insert(
      Counters::KEY.to_string(),
      VersionedPayload {
        version: 2,
        payload: serde_json::json!({ "count": 1, "extra": true }),
      },
    );
    assert!(props.get::<Counters>().is_err());
  }

  #[test]
  fn unknown_tags_survive_round_trip() {
    let raw = serde_json::json!({
      "SomethingV9": { "version": 9, "payload": { "a": 1 } },
    });
    let props: Properties =
      serde_json::from_value(raw.clone()).unwrap();
    let back = serde_json::to_value(&props).unwrap();
    assert_eq!(raw, back);
  }
}
