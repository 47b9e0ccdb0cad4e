use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use safescale_client::error::{Error, ErrorList, Result};

use crate::task::{Task, TaskCtx, TaskId, TaskOptions, TaskStatus};

/// A task composed of child tasks.
///
/// The aggregate wait contract is strict: [`TaskGroup::wait_group`]
/// returns only once every started child reached a terminal state,
/// abort included. Callers may therefore free resources the children
/// were using (channels, files) as soon as it returns.
pub struct TaskGroup<R> {
  ctx: TaskCtx,
  children: tokio::sync::Mutex<Vec<Arc<Task<R>>>>,
}

impl<R: Clone + Send + 'static> TaskGroup<R> {
  pub fn new(parent: Option<&TaskCtx>) -> TaskGroup<R> {
    let ctx = match parent {
      Some(parent) => parent.child(&TaskOptions::default()),
      None => TaskCtx::root(),
    };
    TaskGroup {
      ctx,
      children: tokio::sync::Mutex::new(Vec::new()),
    }
  }

  pub fn ctx(&self) -> &TaskCtx {
    &self.ctx
  }

  pub fn id(&self) -> &str {
    self.ctx.id()
  }

  /// Starts a child task running `action` and attaches it to the
  /// group. On a group already aborted this fails fast with
  /// `Aborted` so stragglers don't race the teardown.
  pub async fn start<F, Fut>(
    &self,
    action: F,
  ) -> Result<Arc<Task<R>>>
  where
    F: FnOnce(TaskCtx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
  {
    self.start_with_timeout(action, None).await
  }

  pub async fn start_with_timeout<F, Fut>(
    &self,
    action: F,
    timeout: Option<Duration>,
  ) -> Result<Arc<Task<R>>>
  where
    F: FnOnce(TaskCtx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
  {
    if self.ctx.aborted() {
      return Err(Error::aborted(None));
    }
    let mut children = self.children.lock().await;
    let task = Arc::new(Task::with_options(
      Some(&self.ctx),
      TaskOptions {
        amend_id: Some(children.len().to_string()),
        timeout,
        ..Default::default()
      },
    ));
    task.start(action).await?;
    children.push(task.clone());
    Ok(task)
  }

  /// Propagates the abort request to every child.
  pub fn abort(&self) {
    self.ctx.token().cancel();
  }

  pub fn aborted(&self) -> bool {
    self.ctx.aborted()
  }

  /// Waits until ALL children are terminal, then returns the results
  /// of the successful ones keyed by child task id, and the
  /// aggregated error of the failed ones.
  pub async fn wait_group(
    &self,
  ) -> (HashMap<TaskId, R>, Option<Error>) {
    let children = self.children.lock().await.clone();
    let mut results = HashMap::new();
    let mut errors = ErrorList::default();
    for child in children {
      match child.wait().await {
        Ok(result) => {
          results.insert(child.id().to_string(), result);
        }
        Err(e) => errors.push(e),
      }
    }
    (results, aggregate(errors))
  }

  /// Non-blocking poll; None while any child is still running.
  pub async fn try_wait_group(
    &self,
  ) -> Option<(HashMap<TaskId, R>, Option<Error>)> {
    let children = self.children.lock().await.clone();
    for child in children {
      if !child.status().is_terminal() {
        return None;
      }
    }
    Some(self.wait_group().await)
  }

  /// Bounded aggregate wait; `Timeout` when the delay elapses with
  /// children still running (they keep running).
  pub async fn wait_group_for(
    &self,
    delay: Duration,
  ) -> Result<(HashMap<TaskId, R>, Option<Error>)> {
    match tokio::time::timeout(delay, self.wait_group()).await {
      Ok(out) => Ok(out),
      Err(_) => Err(Error::timeout(
        format!("timeout waiting for task group '{}'", self.id()),
        delay,
      )),
    }
  }

  pub async fn started_count(&self) -> usize {
    self.children.lock().await.len()
  }

  pub async fn statuses(&self) -> Vec<(TaskId, TaskStatus)> {
    self
      .children
      .lock()
      .await
      .iter()
      .map(|child| (child.id().to_string(), child.status()))
      .collect()
  }
}

/// Collapses child errors, keeping the strongest classification
/// visible: any abort makes the aggregate Aborted, else any panic
/// surfaces as the panic; other errors become consequences.
fn aggregate(errors: ErrorList) -> Option<Error> {
  if errors.is_empty() {
    return None;
  }
  let mut errors: Vec<Error> = errors.into_iter().collect();
  if let Some(idx) = errors.iter().position(Error::is_aborted) {
    let mut primary = errors.remove(idx);
    for e in errors {
      primary = primary.with_consequence(e);
    }
    return Some(primary);
  }
  if let Some(idx) = errors.iter().position(|e| {
    matches!(
      e.kind(),
      safescale_client::error::ErrorKind::RuntimePanic(_)
    )
  }) {
    let mut primary = errors.remove(idx);
    for e in errors {
      primary = primary.with_consequence(e);
    }
    return Some(primary);
  }
  ErrorList(errors).into_result().err()
}

#[cfg(test)]
mod tests {
  use safescale_client::error::ErrorKind;

  use super::*;

  #[tokio::test]
  async fn collects_all_results() {
    let group: TaskGroup<u32> = TaskGroup::new(None);
    for i in 0..5u32 {
      group.start(move |_| async move { Ok(i * 10) }).await.unwrap();
    }
    let (results, error) = group.wait_group().await;
    assert!(error.is_none());
    assert_eq!(results.len(), 5);
    let mut values: Vec<u32> = results.into_values().collect();
    values.sort();
    assert_eq!(values, vec![0, 10, 20, 30, 40]);
  }

  /// Aborting the group must not let `wait_group` return before
  /// every child observed the abort and finished publishing: the
  /// buffered channel ends up complete, no child outlives the wait.
  #[tokio::test]
  async fn wait_group_outlives_all_children_on_abort() {
    let group: TaskGroup<()> = TaskGroup::new(None);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<u32>(10);

    for i in 0..10u32 {
      let tx = tx.clone();
      group
        .start(move |ctx| async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          // Publish whether aborted or not; the group contract is
          // that the channel is still open here.
          tx.send(i).await.expect("receiver closed too early");
          if ctx.aborted() {
            return Err(Error::aborted(None));
          }
          Ok(())
        })
        .await
        .unwrap();
    }
    drop(tx);

    tokio::time::sleep(Duration::from_millis(15)).await;
    group.abort();
    let (_, error) = group.wait_group().await;
    assert!(error.expect("children saw the abort").is_aborted());

    for status in group.statuses().await {
      assert!(status.1.is_terminal());
    }

    // All ten messages made it before the channel was dropped.
    let mut received = 0;
    while rx.recv().await.is_some() {
      received += 1;
    }
    assert_eq!(received, 10);
  }

  #[tokio::test]
  async fn start_after_abort_fails_fast() {
    let group: TaskGroup<()> = TaskGroup::new(None);
    group.abort();
    let err =
      group.start(|_| async { Ok(()) }).await.unwrap_err();
    assert!(err.is_aborted());
  }

  #[tokio::test]
  async fn aggregates_plain_failures() {
    let group: TaskGroup<()> = TaskGroup::new(None);
    for _ in 0..2 {
      group
        .start(|_| async { Err(Error::forbidden("bad state")) })
        .await
        .unwrap();
    }
    group.start(|_| async { Ok(()) }).await.unwrap();
    let (results, error) = group.wait_group().await;
    assert_eq!(results.len(), 1);
    match error.unwrap().kind() {
      ErrorKind::List(list) => assert_eq!(list.0.len(), 2),
      other => panic!("expected ErrorList, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn child_panic_classifies_the_aggregate() {
    let group: TaskGroup<()> = TaskGroup::new(None);
    group
      .start(|_| async { panic!("child exploded") })
      .await
      .unwrap();
    group
      .start(|_| async { Err(Error::forbidden("unrelated")) })
      .await
      .unwrap();
    let (_, error) = group.wait_group().await;
    let error = error.unwrap();
    assert!(matches!(error.kind(), ErrorKind::RuntimePanic(_)));
    assert_eq!(error.consequences().len(), 1);
  }

  #[tokio::test]
  async fn abort_reaches_running_children() {
    let parent = TaskCtx::root();
    let group: TaskGroup<bool> = TaskGroup::new(Some(&parent));
    group
      .start(|ctx| async move {
        loop {
          if ctx.aborted() {
            return Ok(true);
          }
          tokio::time::sleep(Duration::from_millis(2)).await;
        }
      })
      .await
      .unwrap();
    group.abort();
    let (_, error) = group.wait_group().await;
    // The child returned Ok but the abort classification wins.
    assert!(error.unwrap().is_aborted());
  }
}
