//! SSH plumbing for the daemon: an object-safe session contract, a
//! process-based OpenSSH implementation, a scriptable double for
//! tests, and the bounded-retry helper the handlers share.
//!
//! Handlers open their own sessions; there is no pooling here.

use std::time::Duration;

use async_trait::async_trait;
use safescale_client::{
  entities::host::SshAccess,
  error::{Error, Result},
};

mod openssh;
mod scripted;

pub use openssh::OpenSsh;
pub use scripted::{RecordedCall, ScriptedSsh};

/// Exit code conventionally reported when the connection itself was
/// lost rather than the remote command failing.
pub const CONNECTION_LOST: i32 = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  pub retcode: i32,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.retcode == 0
  }

  /// stdout + stderr, for result reporting.
  pub fn combined(&self) -> String {
    let mut out = self.stdout.clone();
    if !self.stderr.is_empty() {
      if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
      }
      out.push_str(&self.stderr);
    }
    out
  }
}

/// One SSH hop to a host. `run` resolving with a non-zero exit code
/// is an Ok([`CommandOutput`]); Err is reserved for not reaching the
/// host or exceeding `wall_time`.
#[async_trait]
pub trait SshSession: Send + Sync {
  async fn run(
    &self,
    access: &SshAccess,
    command: &str,
    wall_time: Duration,
  ) -> Result<CommandOutput>;

  /// Uploads `content` to `remote_path` on the host.
  async fn copy(
    &self,
    access: &SshAccess,
    content: &[u8],
    remote_path: &str,
  ) -> Result<()>;

  /// Blocks until the SSH service answers, bounded by `timeout`.
  /// A host claimed ready by a provider is not necessarily usable
  /// until this returns.
  async fn wait_ready(
    &self,
    access: &SshAccess,
    timeout: Duration,
  ) -> Result<()>;
}

/// Retries `action` with a fixed delay until it succeeds, it fails
/// with a non-transient error, or the overall budget runs out.
pub async fn retry_while_unsuccessful<T, F, Fut>(
  mut action: F,
  delay: Duration,
  budget: Duration,
) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let started = tokio::time::Instant::now();
  loop {
    let error = match action().await {
      Ok(out) => return Ok(out),
      Err(e) if e.is_transient() => e,
      Err(e) => return Err(e),
    };
    if started.elapsed() + delay > budget {
      return Err(
        Error::timeout("retry budget exhausted", budget)
          .with_consequence(error),
      );
    }
    tracing::debug!(
      "transient failure, retrying in {delay:?} | {error:#}"
    );
    tokio::time::sleep(delay).await;
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  #[tokio::test]
  async fn retry_eventually_succeeds() {
    let attempts = AtomicU32::new(0);
    let out = retry_while_unsuccessful(
      || async {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
          Err(Error::other("flaky"))
        } else {
          Ok(7u32)
        }
      },
      Duration::from_millis(1),
      Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert_eq!(out, 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn retry_stops_on_terminal_errors() {
    let attempts = AtomicU32::new(0);
    let err: Result<()> = retry_while_unsuccessful(
      || async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::forbidden("never retry this"))
      },
      Duration::from_millis(1),
      Duration::from_secs(1),
    )
    .await;
    assert!(err.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn retry_budget_is_bounded() {
    let err: Result<()> = retry_while_unsuccessful(
      || async { Err(Error::other("always transient")) },
      Duration::from_millis(5),
      Duration::from_millis(12),
    )
    .await;
    let err = err.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.consequences().is_empty());
  }
}
