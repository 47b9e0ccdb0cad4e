use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use safescale_client::error::{Error, Result};
use tokio::sync::RwLock;

/// The slice of an object-storage SDK the metadata layer needs.
/// Keys are `/`-separated paths relative to the bucket root.
#[async_trait]
pub trait Bucket: Send + Sync {
  /// Fails with `NotFound` when the object does not exist.
  async fn read(&self, key: &str) -> Result<Vec<u8>>;
  async fn write(&self, key: &str, data: Vec<u8>) -> Result<()>;
  /// Fails with `NotFound` when the object does not exist.
  async fn delete(&self, key: &str) -> Result<()>;
  /// Keys under `prefix`, lexicographic order.
  async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory bucket, for tests and the emulated provider.
#[derive(Default)]
pub struct MemBucket {
  objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemBucket {
  pub fn new() -> MemBucket {
    MemBucket::default()
  }
}

#[async_trait]
impl Bucket for MemBucket {
  async fn read(&self, key: &str) -> Result<Vec<u8>> {
    self
      .objects
      .read()
      .await
      .get(key)
      .cloned()
      .ok_or_else(|| Error::not_found("object", key))
  }

  async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
    self.objects.write().await.insert(key.to_string(), data);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self
      .objects
      .write()
      .await
      .remove(key)
      .map(|_| ())
      .ok_or_else(|| Error::not_found("object", key))
  }

  async fn list(&self, prefix: &str) -> Result<Vec<String>> {
    Ok(
      self
        .objects
        .read()
        .await
        .keys()
        .filter(|key| key.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }
}

/// Bucket persisted as files under a root directory. Good enough for
/// a single-machine tenant; real deployments plug a provider SDK
/// behind [`Bucket`] instead.
pub struct DirBucket {
  root: PathBuf,
}

impl DirBucket {
  pub fn new(root: impl Into<PathBuf>) -> DirBucket {
    DirBucket { root: root.into() }
  }

  fn path_of(&self, key: &str) -> Result<PathBuf> {
    if key.split('/').any(|part| part == "..") {
      return Err(Error::invalid_parameter(
        "key",
        format!("'{key}' escapes the bucket root"),
      ));
    }
    Ok(self.root.join(key))
  }
}

#[async_trait]
impl Bucket for DirBucket {
  async fn read(&self, key: &str) -> Result<Vec<u8>> {
    let path = self.path_of(key)?;
    match tokio::fs::read(&path).await {
      Ok(data) => Ok(data),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(Error::not_found("object", key))
      }
      Err(e) => {
        Err(Error::other(format!("failed to read '{key}': {e}")))
      }
    }
  }

  async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
    let path = self.path_of(key)?;
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(|e| {
        Error::other(format!("failed to prepare '{key}': {e}"))
      })?;
    }
    tokio::fs::write(&path, data).await.map_err(|e| {
      Error::other(format!("failed to write '{key}': {e}"))
    })
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let path = self.path_of(key)?;
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(Error::not_found("object", key))
      }
      Err(e) => {
        Err(Error::other(format!("failed to delete '{key}': {e}")))
      }
    }
  }

  async fn list(&self, prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut pending = vec![self.root.clone()];
    while let Some(dir) = pending.pop() {
      let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
          continue;
        }
        Err(e) => {
          return Err(Error::other(format!(
            "failed to list bucket: {e}"
          )));
        }
      };
      while let Some(entry) = entries.next_entry().await.map_err(
        |e| Error::other(format!("failed to list bucket: {e}")),
      )? {
        let path = entry.path();
        if path.is_dir() {
          pending.push(path);
        } else if let Ok(rel) = path.strip_prefix(&self.root) {
          let key = rel.to_string_lossy().replace('\\', "/");
          if key.starts_with(prefix) {
            keys.push(key);
          }
        }
      }
    }
    keys.sort();
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn mem_bucket_round_trip() {
    let bucket = MemBucket::new();
    bucket.write("networks/n1", b"abc".to_vec()).await.unwrap();
    assert_eq!(bucket.read("networks/n1").await.unwrap(), b"abc");
    assert_eq!(
      bucket.list("networks/").await.unwrap(),
      vec!["networks/n1".to_string()]
    );
    bucket.delete("networks/n1").await.unwrap();
    assert!(
      bucket.read("networks/n1").await.unwrap_err().is_not_found()
    );
    assert!(
      bucket
        .delete("networks/n1")
        .await
        .unwrap_err()
        .is_not_found()
    );
  }

  #[tokio::test]
  async fn dir_bucket_rejects_escapes() {
    let bucket = DirBucket::new("/tmp/safescale-test-bucket");
    assert!(bucket.read("../etc/passwd").await.is_err());
  }
}
