use std::{future::Future, time::Duration};

use safescale_client::error::{Error, Result};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
  Ready,
  Running,
  Done,
  Aborted,
  Timeout,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TaskStatus::Done | TaskStatus::Aborted | TaskStatus::Timeout
    )
  }
}

/// The identity a running action sees: its task id and the abort
/// signal. Cheap to clone; cloning does not duplicate the task.
#[derive(Debug, Clone)]
pub struct TaskCtx {
  id: TaskId,
  generation: u32,
  token: CancellationToken,
}

impl TaskCtx {
  /// A parentless context, for the top of a request.
  pub fn root() -> TaskCtx {
    TaskCtx {
      id: Uuid::new_v4().to_string(),
      generation: 0,
      token: CancellationToken::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// `{task <id>}`, for log lines.
  pub fn signature(&self) -> String {
    format!("{{task {}}}", self.id)
  }

  pub fn generation(&self) -> u32 {
    self.generation
  }

  /// True once an abort was requested on this task or an ancestor.
  /// Actions must poll this at safe points.
  pub fn aborted(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Await point that resolves when an abort is requested.
  pub async fn cancelled(&self) {
    self.token.cancelled().await
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) fn child(&self, options: &TaskOptions) -> TaskCtx {
    let id = if options.inherit_parent_id {
      self.id.clone()
    } else {
      match &options.amend_id {
        Some(suffix) => format!("{}-{suffix}", self.id),
        None => Uuid::new_v4().to_string(),
      }
    };
    TaskCtx {
      id,
      generation: self.generation + 1,
      token: self.token.child_token(),
    }
  }
}

/// Knobs for [`Task::with_options`].
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
  /// Reuse the parent's id instead of allocating one.
  pub inherit_parent_id: bool,
  /// Derive the id as `<parent id>-<suffix>`.
  pub amend_id: Option<String>,
  /// Wall-time budget of the action; exceeding it concludes the
  /// task in Timeout.
  pub timeout: Option<Duration>,
}

enum TaskState<R> {
  Ready,
  Running { handle: JoinHandle<Result<R>> },
  Finished { status: TaskStatus, outcome: Result<R> },
}

/// An identified unit of cooperative work producing an `R`.
///
/// READY -> RUNNING -> { DONE | ABORTED | TIMEOUT }.
pub struct Task<R> {
  ctx: TaskCtx,
  timeout: Option<Duration>,
  state: tokio::sync::Mutex<TaskState<R>>,
}

impl<R: Send + 'static> Task<R> {
  pub fn new(parent: Option<&TaskCtx>) -> Task<R> {
    Task::with_options(parent, TaskOptions::default())
  }

  pub fn with_options(
    parent: Option<&TaskCtx>,
    options: TaskOptions,
  ) -> Task<R> {
    let ctx = match parent {
      Some(parent) => parent.child(&options),
      None => TaskCtx::root(),
    };
    Task {
      ctx,
      timeout: options.timeout,
      state: tokio::sync::Mutex::new(TaskState::Ready),
    }
  }

  pub fn ctx(&self) -> &TaskCtx {
    &self.ctx
  }

  pub fn id(&self) -> &str {
    self.ctx.id()
  }

  /// Requests termination: raises the abort flag and cancels the
  /// token tree. The action is NOT killed; it is expected to notice
  /// and return.
  pub fn abort(&self) {
    self.ctx.token().cancel();
  }

  pub fn aborted(&self) -> bool {
    self.ctx.aborted()
  }

  /// Best-effort status without blocking: a task whose state is
  /// currently being concluded by a waiter reports Running.
  pub fn status(&self) -> TaskStatus {
    match self.state.try_lock() {
      Ok(state) => match &*state {
        TaskState::Ready => TaskStatus::Ready,
        TaskState::Running { .. } => {
          if self.ctx.aborted() {
            TaskStatus::Aborted
          } else {
            TaskStatus::Running
          }
        }
        TaskState::Finished { status, .. } => *status,
      },
      Err(_) => TaskStatus::Running,
    }
  }

  /// Launches the action. Fails with `Forbidden` unless READY, and
  /// with `Aborted` if an abort was already requested.
  pub async fn start<F, Fut>(&self, action: F) -> Result<()>
  where
    F: FnOnce(TaskCtx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
  {
    if self.ctx.aborted() {
      return Err(Error::aborted(None));
    }
    let mut state = self.state.lock().await;
    if !matches!(&*state, TaskState::Ready) {
      return Err(Error::forbidden(format!(
        "cannot start task '{}': not ready",
        self.ctx.id()
      )));
    }
    let ctx = self.ctx.clone();
    let timeout = self.timeout;
    let handle = tokio::spawn(async move {
      match timeout {
        Some(budget) => {
          match tokio::time::timeout(budget, action(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(
              "task exceeded its wall-time budget",
              budget,
            )),
          }
        }
        None => action(ctx).await,
      }
    });
    *state = TaskState::Running { handle };
    Ok(())
  }

  /// Blocks until the action reaches a terminal state and returns
  /// its outcome. Repeated waits return the stored outcome.
  pub async fn wait(&self) -> Result<R>
  where
    R: Clone,
  {
    let mut state = self.state.lock().await;
    if let TaskState::Running { handle } = &mut *state {
      let joined = handle.await;
      let (status, outcome) = self.conclude(joined);
      *state = TaskState::Finished { status, outcome };
    }
    match &*state {
      TaskState::Ready => Err(Error::forbidden(format!(
        "cannot wait task '{}': not started",
        self.ctx.id()
      ))),
      TaskState::Finished { outcome, .. } => outcome.clone(),
      TaskState::Running { .. } => unreachable!(),
    }
  }

  /// Non-blocking poll: Ok(None) while the action is still running.
  pub async fn try_wait(&self) -> Result<Option<R>>
  where
    R: Clone,
  {
    let Ok(state) = self.state.try_lock() else {
      // A waiter is concluding the task right now.
      return Ok(None);
    };
    match &*state {
      TaskState::Ready => Err(Error::forbidden(format!(
        "cannot wait task '{}': not started",
        self.ctx.id()
      ))),
      TaskState::Running { handle } => {
        if !handle.is_finished() {
          return Ok(None);
        }
        drop(state);
        self.wait().await.map(Some)
      }
      TaskState::Finished { outcome, .. } => {
        outcome.clone().map(Some)
      }
    }
  }

  /// Bounded wait. The task keeps running if the delay elapses; the
  /// returned error is then `Timeout`.
  pub async fn wait_for(&self, delay: Duration) -> Result<R>
  where
    R: Clone,
  {
    match tokio::time::timeout(delay, self.wait()).await {
      Ok(outcome) => outcome,
      Err(_) => Err(Error::timeout(
        format!("timeout waiting for task '{}'", self.ctx.id()),
        delay,
      )),
    }
  }

  /// Returns the task to READY for reuse. Forbidden while RUNNING.
  /// A task reset after an abort stays unstartable: the abort flag
  /// survives, and `start` keeps failing with `Aborted`.
  pub async fn reset(&self) -> Result<()> {
    let mut state = self.state.lock().await;
    if let TaskState::Running { handle } = &*state {
      if !handle.is_finished() {
        return Err(Error::forbidden(format!(
          "cannot reset task '{}': task running",
          self.ctx.id()
        )));
      }
    }
    *state = TaskState::Ready;
    Ok(())
  }

  fn conclude(
    &self,
    joined: std::result::Result<Result<R>, JoinError>,
  ) -> (TaskStatus, Result<R>) {
    match joined {
      Err(e) if e.is_panic() => (
        TaskStatus::Done,
        Err(Error::runtime_panic(panic_message(e.into_panic()))),
      ),
      Err(_) => (TaskStatus::Aborted, Err(Error::aborted(None))),
      Ok(outcome) => {
        if self.ctx.aborted() {
          let error = match outcome {
            Err(e) if e.is_aborted() => e,
            Err(e) => Error::aborted(Some(e)),
            Ok(_) => Error::aborted(None),
          };
          (TaskStatus::Aborted, Err(error))
        } else {
          match outcome {
            Ok(result) => (TaskStatus::Done, Ok(result)),
            Err(e) if e.is_timeout() => (TaskStatus::Timeout, Err(e)),
            Err(e) => (TaskStatus::Done, Err(e)),
          }
        }
      }
    }
  }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
  match payload.downcast::<String>() {
    Ok(message) => *message,
    Err(payload) => match payload.downcast::<&'static str>() {
      Ok(message) => (*message).to_string(),
      Err(_) => "panic with non-string payload".to_string(),
    },
  }
}

#[cfg(test)]
mod tests {
  use safescale_client::error::ErrorKind;

  use super::*;

  #[tokio::test]
  async fn run_to_done() {
    let task: Task<u32> = Task::new(None);
    assert_eq!(task.status(), TaskStatus::Ready);
    task.start(|_| async { Ok(21 * 2) }).await.unwrap();
    assert_eq!(task.wait().await.unwrap(), 42);
    assert_eq!(task.status(), TaskStatus::Done);
    // A second wait returns the stored result.
    assert_eq!(task.wait().await.unwrap(), 42);
  }

  #[tokio::test]
  async fn start_twice_is_forbidden() {
    let task: Task<()> = Task::new(None);
    task.start(|_| async { Ok(()) }).await.unwrap();
    let err = task.start(|_| async { Ok(()) }).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden(_)));
  }

  #[tokio::test]
  async fn abort_is_cooperative() {
    let task: Task<&'static str> = Task::new(None);
    task
      .start(|ctx| async move {
        loop {
          if ctx.aborted() {
            return Ok("noticed");
          }
          tokio::time::sleep(Duration::from_millis(5)).await;
        }
      })
      .await
      .unwrap();
    task.abort();
    let err = task.wait().await.unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(task.status(), TaskStatus::Aborted);
    // Invariant: once aborted, start never works again.
    let err = task.start(|_| async { Ok("again") }).await.unwrap_err();
    assert!(err.is_aborted());
  }

  #[tokio::test]
  async fn panic_is_captured() {
    let task: Task<()> = Task::new(None);
    task
      .start(|_| async { panic!("broken invariant") })
      .await
      .unwrap();
    let err = task.wait().await.unwrap_err();
    match err.kind() {
      ErrorKind::RuntimePanic(message) => {
        assert!(message.contains("broken invariant"))
      }
      other => panic!("expected RuntimePanic, got {other:?}"),
    }
    assert_eq!(task.status(), TaskStatus::Done);
  }

  #[tokio::test]
  async fn wall_time_budget() {
    let task: Task<()> = Task::with_options(
      None,
      TaskOptions {
        timeout: Some(Duration::from_millis(20)),
        ..Default::default()
      },
    );
    task
      .start(|_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
      })
      .await
      .unwrap();
    let err = task.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(task.status(), TaskStatus::Timeout);
  }

  #[tokio::test]
  async fn wait_for_leaves_task_running() {
    let task: Task<u8> = Task::new(None);
    task
      .start(|_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(7)
      })
      .await
      .unwrap();
    let err =
      task.wait_for(Duration::from_millis(5)).await.unwrap_err();
    assert!(err.is_timeout());
    // The action was not cancelled by the bounded wait.
    assert_eq!(task.wait().await.unwrap(), 7);
  }

  #[tokio::test]
  async fn try_wait_polls() {
    let task: Task<u8> = Task::new(None);
    task
      .start(|_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(9)
      })
      .await
      .unwrap();
    assert_eq!(task.try_wait().await.unwrap(), None);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(task.try_wait().await.unwrap(), Some(9));
  }

  #[tokio::test]
  async fn reset_only_from_terminal() {
    let task: Task<()> = Task::new(None);
    task
      .start(|_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
      })
      .await
      .unwrap();
    let err = task.reset().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Forbidden(_)));
    task.wait().await.unwrap();
    task.reset().await.unwrap();
    assert_eq!(task.status(), TaskStatus::Ready);
    task.start(|_| async { Ok(()) }).await.unwrap();
    task.wait().await.unwrap();
  }

  #[tokio::test]
  async fn child_id_amending() {
    let parent = TaskCtx::root();
    let task: Task<()> = Task::with_options(
      Some(&parent),
      TaskOptions {
        amend_id: Some("gw".to_string()),
        ..Default::default()
      },
    );
    assert_eq!(task.id(), format!("{}-gw", parent.id()));
    assert_eq!(task.ctx().generation(), 1);

    let inherited: Task<()> = Task::with_options(
      Some(&parent),
      TaskOptions {
        inherit_parent_id: true,
        ..Default::default()
      },
    );
    assert_eq!(inherited.id(), parent.id());
  }
}
