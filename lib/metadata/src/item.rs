use std::sync::Arc;

use safescale_client::error::Result;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::folder::{Folder, decode, encode};

/// One named entry of a folder, with an internal mutex serializing
/// read-modify-write cycles within this daemon process.
///
/// The item does not know its schema: callers pick the payload type
/// per call, exactly like the decoder-callback contract of
/// [`Folder::read`].
pub struct Item {
  folder: Folder,
  name: String,
  lock: Arc<Mutex<()>>,
}

impl Item {
  pub fn new(folder: Folder, name: impl Into<String>) -> Item {
    Item {
      folder,
      name: name.into(),
      lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn folder(&self) -> &Folder {
    &self.folder
  }

  /// Blocks until this process's other users of the item released
  /// it. Hold the guard across the read-modify-write.
  pub async fn acquire(&self) -> OwnedMutexGuard<()> {
    self.lock.clone().lock_owned().await
  }

  pub async fn read<T: DeserializeOwned>(&self) -> Result<T> {
    self.folder.read(&self.name, decode).await
  }

  pub async fn write<T: Serialize>(&self, payload: &T) -> Result<()> {
    self.folder.write(&self.name, encode(payload)?).await
  }

  /// Idempotent, like folder deletion.
  pub async fn delete(&self) -> Result<()> {
    self.folder.delete(&self.name).await
  }

  pub async fn exists(&self) -> Result<bool> {
    self.folder.contains(&self.name).await
  }
}

#[cfg(test)]
mod tests {
  use serde::{Deserialize, Serialize};

  use super::*;
  use crate::bucket::MemBucket;

  #[derive(Serialize, Deserialize, PartialEq, Debug)]
  struct Payload {
    value: u32,
  }

  #[tokio::test]
  async fn read_write_delete() {
    let folder =
      Folder::new(Arc::new(MemBucket::new()), "clusters");
    let item = Item::new(folder, "c1");
    assert!(!item.exists().await.unwrap());
    assert!(
      item.read::<Payload>().await.unwrap_err().is_not_found()
    );

    item.write(&Payload { value: 3 }).await.unwrap();
    assert_eq!(
      item.read::<Payload>().await.unwrap(),
      Payload { value: 3 }
    );

    item.delete().await.unwrap();
    item.delete().await.unwrap();
    assert!(!item.exists().await.unwrap());
  }

  #[tokio::test]
  async fn acquire_serializes_updates() {
    let folder = Folder::new(Arc::new(MemBucket::new()), "hosts");
    let item = Arc::new(Item::new(folder, "h1"));
    item.write(&Payload { value: 0 }).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
      let item = item.clone();
      handles.push(tokio::spawn(async move {
        let _guard = item.acquire().await;
        let current: Payload = item.read().await.unwrap();
        tokio::task::yield_now().await;
        item
          .write(&Payload {
            value: current.value + 1,
          })
          .await
          .unwrap();
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }
    assert_eq!(item.read::<Payload>().await.unwrap().value, 8);
  }
}
