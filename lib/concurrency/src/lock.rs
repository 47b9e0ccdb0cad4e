use std::{collections::HashMap, sync::Arc};

use safescale_client::error::{Error, Result};
use tokio::sync::{
  OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

use crate::task::{TaskCtx, TaskId};

struct ReadHold {
  count: u64,
  /// None when the task already holds the write lock: its reads
  /// piggyback on the exclusive access.
  guard: Option<OwnedRwLockReadGuard<()>>,
}

struct WriteHold {
  count: u64,
  guard: Option<OwnedRwLockWriteGuard<()>>,
}

#[derive(Default)]
struct LockState {
  read: HashMap<TaskId, ReadHold>,
  write: HashMap<TaskId, WriteHold>,
}

/// Reader/writer lock keyed by task identity.
///
/// Reentrant per task for both kinds; a writer may stack reads on
/// top of its write, a reader may NOT escalate to write. Releases
/// must balance acquisitions exactly, reads before the write.
///
/// The real RW primitive is only touched when a task's count crosses
/// 0<->1, so reentrant acquisitions are just counter bumps.
pub struct TaskedLock {
  state: std::sync::Mutex<LockState>,
  rw: Arc<RwLock<()>>,
}

impl Default for TaskedLock {
  fn default() -> TaskedLock {
    TaskedLock::new()
  }
}

impl TaskedLock {
  pub fn new() -> TaskedLock {
    TaskedLock {
      state: std::sync::Mutex::new(LockState::default()),
      rw: Arc::new(RwLock::new(())),
    }
  }

  pub async fn rlock(&self, task: &TaskCtx) -> Result<()> {
    let tid = task.id().to_string();
    {
      let mut state = self.state.lock().unwrap();
      if let Some(hold) = state.read.get_mut(&tid) {
        hold.count += 1;
        return Ok(());
      }
      if state.write.contains_key(&tid) {
        // Already exclusive; record the read without touching rw.
        state
          .read
          .insert(tid, ReadHold { count: 1, guard: None });
        return Ok(());
      }
    }
    // First read of this task: acquire outside the state mutex so a
    // pending writer can still release.
    let guard = self.rw.clone().read_owned().await;
    let mut state = self.state.lock().unwrap();
    match state.read.get_mut(&tid) {
      Some(hold) => hold.count += 1,
      None => {
        state.read.insert(
          tid,
          ReadHold {
            count: 1,
            guard: Some(guard),
          },
        );
      }
    }
    Ok(())
  }

  pub async fn runlock(&self, task: &TaskCtx) -> Result<()> {
    let tid = task.id();
    let mut state = self.state.lock().unwrap();
    let Some(hold) = state.read.get_mut(tid) else {
      return Err(Error::forbidden(format!(
        "cannot RUnlock task '{tid}': not RLocked"
      )));
    };
    hold.count -= 1;
    if hold.count == 0 {
      state.read.remove(tid);
    }
    Ok(())
  }

  pub async fn lock(&self, task: &TaskCtx) -> Result<()> {
    let tid = task.id().to_string();
    {
      let mut state = self.state.lock().unwrap();
      if let Some(hold) = state.write.get_mut(&tid) {
        hold.count += 1;
        return Ok(());
      }
      if state.read.contains_key(&tid) {
        return Err(Error::forbidden(format!(
          "cannot Lock task '{tid}': already RLocked"
        )));
      }
    }
    let guard = self.rw.clone().write_owned().await;
    let mut state = self.state.lock().unwrap();
    state.write.insert(
      tid,
      WriteHold {
        count: 1,
        guard: Some(guard),
      },
    );
    Ok(())
  }

  pub async fn unlock(&self, task: &TaskCtx) -> Result<()> {
    let tid = task.id();
    let mut state = self.state.lock().unwrap();
    if let Some(hold) = state.read.get(tid) {
      return Err(Error::forbidden(format!(
        "cannot Unlock task '{tid}': {} remaining RLock inside",
        hold.count
      )));
    }
    let Some(hold) = state.write.get_mut(tid) else {
      return Err(Error::forbidden(format!(
        "cannot Unlock task '{tid}': not Locked"
      )));
    };
    hold.count -= 1;
    if hold.count == 0 {
      state.write.remove(tid);
    }
    Ok(())
  }

  pub fn is_rlocked(&self, task: &TaskCtx) -> bool {
    self.state.lock().unwrap().read.contains_key(task.id())
  }

  pub fn is_locked(&self, task: &TaskCtx) -> bool {
    self.state.lock().unwrap().write.contains_key(task.id())
  }

  // Safe variants, for paths where instance and task are notoriously
  // valid: failures are logged and swallowed.

  pub async fn safe_rlock(&self, task: &TaskCtx) {
    if let Err(e) = self.rlock(task).await {
      tracing::error!("SafeRLock used when obviously unsafe | {e:#}");
    }
  }

  pub async fn safe_runlock(&self, task: &TaskCtx) {
    if let Err(e) = self.runlock(task).await {
      tracing::error!(
        "SafeRUnlock used when obviously unsafe | {e:#}"
      );
    }
  }

  pub async fn safe_lock(&self, task: &TaskCtx) {
    if let Err(e) = self.lock(task).await {
      tracing::error!("SafeLock used when obviously unsafe | {e:#}");
    }
  }

  pub async fn safe_unlock(&self, task: &TaskCtx) {
    if let Err(e) = self.unlock(task).await {
      tracing::error!(
        "SafeUnlock used when obviously unsafe | {e:#}"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use safescale_client::error::ErrorKind;

  use super::*;

  fn ctx() -> TaskCtx {
    TaskCtx::root()
  }

  #[tokio::test]
  async fn read_reentrancy_balances() {
    let lock = TaskedLock::new();
    let t = ctx();
    lock.rlock(&t).await.unwrap();
    lock.rlock(&t).await.unwrap();
    assert!(lock.is_rlocked(&t));
    lock.runlock(&t).await.unwrap();
    lock.runlock(&t).await.unwrap();
    assert!(!lock.is_rlocked(&t));
    // One release too many.
    let err = lock.runlock(&t).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden(_)));
  }

  #[tokio::test]
  async fn write_then_reads_then_release() {
    let lock = Arc::new(TaskedLock::new());
    let t = ctx();
    lock.lock(&t).await.unwrap();
    lock.rlock(&t).await.unwrap();
    lock.rlock(&t).await.unwrap();

    // Unlock with reads outstanding is refused, naming the count.
    let err = lock.unlock(&t).await.unwrap_err();
    match err.kind() {
      ErrorKind::Forbidden(message) => {
        assert!(message.contains("2 remaining RLock inside"))
      }
      other => panic!("expected Forbidden, got {other:?}"),
    }

    lock.runlock(&t).await.unwrap();
    lock.runlock(&t).await.unwrap();

    // Another task's write blocks until the release.
    let t2 = ctx();
    let contender = {
      let lock = lock.clone();
      let t2 = t2.clone();
      tokio::spawn(async move {
        lock.lock(&t2).await.unwrap();
        lock.unlock(&t2).await.unwrap();
      })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    lock.unlock(&t).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), contender)
      .await
      .expect("contender should acquire after release")
      .unwrap();
  }

  #[tokio::test]
  async fn no_escalation_from_read() {
    let lock = TaskedLock::new();
    let t = ctx();
    lock.rlock(&t).await.unwrap();
    let err = lock.lock(&t).await.unwrap_err();
    match err.kind() {
      ErrorKind::Forbidden(message) => {
        assert!(message.contains("already RLocked"))
      }
      other => panic!("expected Forbidden, got {other:?}"),
    }
    lock.runlock(&t).await.unwrap();
  }

  #[tokio::test]
  async fn write_reentrancy() {
    let lock = TaskedLock::new();
    let t = ctx();
    lock.lock(&t).await.unwrap();
    lock.lock(&t).await.unwrap();
    lock.unlock(&t).await.unwrap();
    assert!(lock.is_locked(&t));
    lock.unlock(&t).await.unwrap();
    assert!(!lock.is_locked(&t));
    let err = lock.unlock(&t).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden(_)));
  }

  #[tokio::test]
  async fn readers_share() {
    let lock = Arc::new(TaskedLock::new());
    let (t1, t2) = (ctx(), ctx());
    lock.rlock(&t1).await.unwrap();
    // A second task's read proceeds immediately.
    tokio::time::timeout(
      Duration::from_millis(100),
      lock.rlock(&t2),
    )
    .await
    .expect("concurrent read must not block")
    .unwrap();
    lock.runlock(&t1).await.unwrap();
    lock.runlock(&t2).await.unwrap();
  }
}
