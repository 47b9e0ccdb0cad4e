use std::sync::Arc;

use safescale_client::error::{Error, Result};

use crate::bucket::Bucket;

/// A path prefix inside a bucket; entries under it are serialized
/// resources of one kind (`networks/`, `hosts/byID/`, ...).
#[derive(Clone)]
pub struct Folder {
  bucket: Arc<dyn Bucket>,
  path: String,
}

impl Folder {
  pub fn new(
    bucket: Arc<dyn Bucket>,
    path: impl Into<String>,
  ) -> Folder {
    let mut path = path.into();
    if !path.is_empty() && !path.ends_with('/') {
      path.push('/');
    }
    Folder { bucket, path }
  }

  pub fn bucket(&self) -> &Arc<dyn Bucket> {
    &self.bucket
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  fn key_of(&self, name: &str) -> String {
    format!("{}{name}", self.path)
  }

  /// Reads one entry and hands the raw payload to `decode`. Not
  /// finding the entry is `NotFound`; a decoder failure bubbles as
  /// is (usually `Inconsistent`).
  pub async fn read<T>(
    &self,
    name: &str,
    decode: impl FnOnce(&[u8]) -> Result<T>,
  ) -> Result<T> {
    let data = self.bucket.read(&self.key_of(name)).await?;
    decode(&data)
  }

  pub async fn write(&self, name: &str, data: Vec<u8>) -> Result<()> {
    self.bucket.write(&self.key_of(name), data).await
  }

  /// Idempotent: deleting an absent entry succeeds.
  pub async fn delete(&self, name: &str) -> Result<()> {
    match self.bucket.delete(&self.key_of(name)).await {
      Ok(()) => Ok(()),
      Err(e) if e.is_not_found() => Ok(()),
      Err(e) => Err(e),
    }
  }

  pub async fn contains(&self, name: &str) -> Result<bool> {
    match self.bucket.read(&self.key_of(name)).await {
      Ok(_) => Ok(true),
      Err(e) if e.is_not_found() => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Walks every entry of the folder, decoding each payload with
  /// `callback`. The walk stops at the first callback error.
  pub async fn browse(
    &self,
    mut callback: impl FnMut(&[u8]) -> Result<()>,
  ) -> Result<()> {
    for key in self.bucket.list(&self.path).await? {
      let data = match self.bucket.read(&key).await {
        Ok(data) => data,
        // Entry deleted between list and read; skip it.
        Err(e) if e.is_not_found() => continue,
        Err(e) => return Err(e),
      };
      callback(&data)?;
    }
    Ok(())
  }

  /// Names (not full keys) of the folder's direct entries.
  pub async fn entries(&self) -> Result<Vec<String>> {
    Ok(
      self
        .bucket
        .list(&self.path)
        .await?
        .into_iter()
        .filter_map(|key| {
          key
            .strip_prefix(&self.path)
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(String::from)
        })
        .collect(),
    )
  }
}

/// Serializes a value for storage; kept here so every folder user
/// writes the same JSON shape.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
  serde_json::to_vec_pretty(value)
    .map_err(|e| Error::inconsistent(format!("failed to encode: {e}")))
}

/// Dual of [`encode`]; a payload that does not parse is a schema
/// mismatch, not a missing resource.
pub fn decode<T: serde::de::DeserializeOwned>(
  data: &[u8],
) -> Result<T> {
  serde_json::from_slice(data)
    .map_err(|e| Error::inconsistent(format!("failed to decode: {e}")))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bucket::MemBucket;

  #[tokio::test]
  async fn browse_and_entries() {
    let bucket = Arc::new(MemBucket::new());
    let folder = Folder::new(bucket, "networks");
    folder.write("a", b"1".to_vec()).await.unwrap();
    folder.write("b", b"2".to_vec()).await.unwrap();

    let mut seen = Vec::new();
    folder
      .browse(|data| {
        seen.push(data.to_vec());
        Ok(())
      })
      .await
      .unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(
      folder.entries().await.unwrap(),
      vec!["a".to_string(), "b".to_string()]
    );
  }

  #[tokio::test]
  async fn delete_is_idempotent() {
    let bucket = Arc::new(MemBucket::new());
    let folder = Folder::new(bucket, "hosts");
    folder.delete("missing").await.unwrap();
  }
}
