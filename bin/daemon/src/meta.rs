//! Typed access to the tenant bucket, one wrapper per resource kind,
//! all following the same path conventions:
//!
//! ```text
//! hosts/byID/<id>        full host record
//! hosts/byName/<name>    id of the host (pointer, not a copy)
//! networks/byID/<id>     + byName pointer
//! volumes/byID/<id>      + byName pointer
//! security-groups/byID/  + byName pointer
//! shares/<name>          share index entry -> serving host
//! clusters/<name>        full cluster record
//! ```
//!
//! Records reference each other by id only; anything richer is
//! resolved back through these wrappers.

use std::sync::Arc;

use metadata::Item;
use safescale_client::{
  entities::{
    cluster::ClusterIdentity, host::Host, network::Network,
    security_group::SecurityGroup, volume::Volume,
  },
  error::{Error, Result},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::iaas::Service;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
  serde_json::to_vec_pretty(value).map_err(|e| {
    Error::inconsistent(format!("failed to encode record: {e}"))
  })
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
  serde_json::from_slice(data).map_err(|e| {
    Error::inconsistent(format!("failed to decode record: {e}"))
  })
}

macro_rules! indexed_metadata {
  ($wrapper:ident, $entity:ty, $kind:literal, $root:literal) => {
    pub struct $wrapper {
      service: Arc<Service>,
    }

    impl $wrapper {
      const BY_ID: &'static str = concat!($root, "/byID");
      const BY_NAME: &'static str = concat!($root, "/byName");

      pub fn new(service: Arc<Service>) -> $wrapper {
        $wrapper { service }
      }

      /// The shared item of one record, for acquire/release around
      /// read-modify-write cycles.
      pub fn item(&self, id: &str) -> Arc<Item> {
        self.service.item(Self::BY_ID, id)
      }

      /// Writes the record and its name pointer.
      pub async fn save(&self, entity: &$entity) -> Result<()> {
        self
          .service
          .folder(Self::BY_ID)
          .write(&entity.id, encode(entity)?)
          .await?;
        self
          .service
          .folder(Self::BY_NAME)
          .write(&entity.name, entity.id.clone().into_bytes())
          .await
      }

      /// Removes record and pointer; absent entries are fine.
      pub async fn delete(&self, entity: &$entity) -> Result<()> {
        self
          .service
          .folder(Self::BY_NAME)
          .delete(&entity.name)
          .await?;
        self
          .service
          .folder(Self::BY_ID)
          .delete(&entity.id)
          .await
      }

      /// Loads by id or name, in that order.
      pub async fn load(&self, reference: &str) -> Result<$entity> {
        let by_id = self.service.folder(Self::BY_ID);
        match by_id.read(reference, decode).await {
          Ok(entity) => return Ok(entity),
          Err(e) if e.is_not_found() => {}
          Err(e) => return Err(e),
        }
        let id = self
          .service
          .folder(Self::BY_NAME)
          .read(reference, |data| {
            String::from_utf8(data.to_vec()).map_err(|e| {
              Error::inconsistent(format!(
                "corrupted name pointer: {e}"
              ))
            })
          })
          .await
          .map_err(|e| {
            if e.is_not_found() {
              Error::not_found($kind, reference)
            } else {
              e
            }
          })?;
        by_id.read(&id, decode).await
      }

      pub async fn exists(&self, reference: &str) -> Result<bool> {
        match self.load(reference).await {
          Ok(_) => Ok(true),
          Err(e) if e.is_not_found() => Ok(false),
          Err(e) => Err(e),
        }
      }

      pub async fn browse(&self) -> Result<Vec<$entity>> {
        let mut entities = Vec::new();
        self
          .service
          .folder(Self::BY_ID)
          .browse(|data| {
            entities.push(decode(data)?);
            Ok(())
          })
          .await?;
        Ok(entities)
      }
    }
  };
}

indexed_metadata!(HostMetadata, Host, "host", "hosts");
indexed_metadata!(NetworkMetadata, Network, "network", "networks");
indexed_metadata!(VolumeMetadata, Volume, "volume", "volumes");
indexed_metadata!(
  SecurityGroupMetadata,
  SecurityGroup,
  "security group",
  "security-groups"
);

/// Global share index: share name -> where it is served from. The
/// share itself lives in the serving host's properties.
pub struct ShareIndex {
  service: Arc<Service>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShareIndexEntry {
  pub share_id: String,
  pub share_name: String,
  pub host_id: String,
  pub host_name: String,
}

impl ShareIndex {
  const PATH: &'static str = "shares";

  pub fn new(service: Arc<Service>) -> ShareIndex {
    ShareIndex { service }
  }

  pub async fn save(&self, entry: &ShareIndexEntry) -> Result<()> {
    self
      .service
      .folder(Self::PATH)
      .write(&entry.share_name, encode(entry)?)
      .await
  }

  pub async fn delete(&self, share_name: &str) -> Result<()> {
    self.service.folder(Self::PATH).delete(share_name).await
  }

  pub async fn load(
    &self,
    share_name: &str,
  ) -> Result<ShareIndexEntry> {
    self
      .service
      .folder(Self::PATH)
      .read(share_name, decode)
      .await
      .map_err(|e| {
        if e.is_not_found() {
          Error::not_found("share", share_name)
        } else {
          e
        }
      })
  }

  pub async fn exists(&self, share_name: &str) -> Result<bool> {
    self.service.folder(Self::PATH).contains(share_name).await
  }

  pub async fn browse(&self) -> Result<Vec<ShareIndexEntry>> {
    let mut entries = Vec::new();
    self
      .service
      .folder(Self::PATH)
      .browse(|data| {
        entries.push(decode(data)?);
        Ok(())
      })
      .await?;
    Ok(entries)
  }
}

/// Clusters are keyed by name; they have no provider-side id.
pub struct ClusterMetadata {
  service: Arc<Service>,
}

impl ClusterMetadata {
  const PATH: &'static str = "clusters";

  pub fn new(service: Arc<Service>) -> ClusterMetadata {
    ClusterMetadata { service }
  }

  pub fn item(&self, name: &str) -> Arc<Item> {
    self.service.item(Self::PATH, name)
  }

  pub async fn save(&self, cluster: &ClusterIdentity) -> Result<()> {
    self
      .service
      .folder(Self::PATH)
      .write(&cluster.name, encode(cluster)?)
      .await
  }

  pub async fn delete(&self, name: &str) -> Result<()> {
    self.service.folder(Self::PATH).delete(name).await
  }

  pub async fn load(&self, name: &str) -> Result<ClusterIdentity> {
    self
      .service
      .folder(Self::PATH)
      .read(name, decode)
      .await
      .map_err(|e| {
        if e.is_not_found() {
          Error::not_found("cluster", name)
        } else {
          e
        }
      })
  }

  pub async fn exists(&self, name: &str) -> Result<bool> {
    self.service.folder(Self::PATH).contains(name).await
  }

  pub async fn browse(&self) -> Result<Vec<ClusterIdentity>> {
    let mut clusters = Vec::new();
    self
      .service
      .folder(Self::PATH)
      .browse(|data| {
        clusters.push(decode(data)?);
        Ok(())
      })
      .await?;
    Ok(clusters)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handlers::test_service;

  #[tokio::test]
  async fn host_record_and_pointer() {
    let (service, _, _) = test_service();
    let hosts = HostMetadata::new(service);

    let mut host = Host::new("h1");
    host.id = "id-1".to_string();
    hosts.save(&host).await.unwrap();

    assert_eq!(hosts.load("id-1").await.unwrap().name, "h1");
    assert_eq!(hosts.load("h1").await.unwrap().id, "id-1");
    assert!(hosts.exists("h1").await.unwrap());

    hosts.delete(&host).await.unwrap();
    assert!(hosts.load("h1").await.unwrap_err().is_not_found());
    assert!(!hosts.exists("id-1").await.unwrap());
  }
}
