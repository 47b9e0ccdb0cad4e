//! The transactional operations on composite resources. Every
//! handler is a saga: before each step that creates external state
//! it arms a compensating action on a [`Scope`]; on success the
//! scope is dropped disarmed, on failure the armed compensations run
//! in reverse order and their failures are attached to the primary
//! error as consequences.
//!
//! Mandatory abort checks: on entry, before each provider mutation,
//! before each SSH wait or remote execution, before the final
//! metadata commit.

use std::{pin::Pin, sync::Arc};

use concurrency::TaskCtx;
use safescale_client::{
  entities::host::{Host, HostNetworkV1, SshAccess},
  error::{Error, Result},
};

use crate::{iaas::Service, meta::HostMetadata};

pub mod feature;
pub mod host;
pub mod network;
pub mod security_group;
pub mod share;
pub mod volume;

type Compensation =
  Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Stack of armed compensations. Dropping the scope disarms
/// everything; [`settle`] runs it when the saga failed.
#[derive(Default)]
pub struct Scope {
  armed: Vec<(String, Compensation)>,
}

impl Scope {
  pub fn new() -> Scope {
    Scope::default()
  }

  pub fn arm(
    &mut self,
    label: impl Into<String>,
    compensation: impl Future<Output = Result<()>> + Send + 'static,
  ) {
    self.armed.push((label.into(), Box::pin(compensation)));
  }

  /// Runs every armed compensation, newest first. Rollback failures
  /// are logged and attached to `primary`; they never mask it.
  pub async fn compensate(mut self, primary: Error) -> Error {
    let mut primary = primary;
    while let Some((label, compensation)) = self.armed.pop() {
      warn!("rolling back: {label}");
      if let Err(e) = compensation.await {
        error!("rollback '{label}' failed | {e:#}");
        primary = primary.with_consequence(e);
      }
    }
    primary
  }
}

/// Resolves a saga body against its scope: success drops the scope
/// disarmed, failure triggers the compensations.
pub async fn settle<T>(
  scope: Scope,
  outcome: Result<T>,
) -> Result<T> {
  match outcome {
    Ok(value) => Ok(value),
    Err(e) => Err(scope.compensate(e).await),
  }
}

/// The cooperative cancellation checkpoint used at every yield
/// point.
pub fn bail_if_aborted(task: &TaskCtx) -> Result<()> {
  if task.aborted() {
    return Err(Error::aborted(None));
  }
  Ok(())
}

/// Remote user provisioned on every SafeScale host.
pub const REMOTE_USER: &str = "safescale";

/// Builds the SSH route to a host: direct when it has a public
/// address, hopping through its network gateway otherwise.
pub async fn ssh_access(
  service: &Arc<Service>,
  host: &Host,
) -> Result<SshAccess> {
  let network = host.properties.get::<HostNetworkV1>()?;
  let mut access = SshAccess {
    host: host.name.clone(),
    ip: host
      .access_ip()
      .ok_or_else(|| Error::not_available("host", &host.name))?,
    port: 22,
    user: REMOTE_USER.to_string(),
    private_key: host.private_key.clone(),
    gateway: None,
  };
  if network.public_ipv4.is_empty()
    && !network.default_gateway_id.is_empty()
  {
    let gateway = HostMetadata::new(service.clone())
      .load(&network.default_gateway_id)
      .await?;
    let gateway_network =
      gateway.properties.get::<HostNetworkV1>()?;
    access.gateway = Some(Box::new(SshAccess {
      host: gateway.name.clone(),
      ip: gateway_network.public_ipv4.clone(),
      port: 22,
      user: REMOTE_USER.to_string(),
      private_key: gateway.private_key.clone(),
      gateway: None,
    }));
  }
  Ok(access)
}

/// 16 chars, guaranteed to mix lower, upper, digit and punctuation.
pub fn generate_password() -> String {
  use rand::{Rng, seq::IndexedRandom};

  const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
  const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
  const DIGITS: &[u8] = b"23456789";
  const PUNCT: &[u8] = b"-+_=.";

  let mut rng = rand::rng();
  let mut password: Vec<u8> = Vec::with_capacity(16);
  for class in [LOWER, UPPER, DIGITS, PUNCT] {
    password.push(*class.choose(&mut rng).unwrap());
  }
  let all: Vec<u8> = [LOWER, UPPER, DIGITS, PUNCT].concat();
  while password.len() < 16 {
    password.push(*all.choose(&mut rng).unwrap());
  }
  // Shuffle so the class-guaranteeing chars aren't predictable.
  for i in (1..password.len()).rev() {
    let j = rng.random_range(0..=i);
    password.swap(i, j);
  }
  String::from_utf8(password).unwrap()
}

#[cfg(test)]
pub(crate) fn test_service() -> (
  Arc<Service>,
  Arc<crate::iaas::emulated::EmulatedStack>,
  Arc<sshx::ScriptedSsh>,
) {
  use safescale_client::entities::config::TimeoutConfig;

  let stack = Arc::new(crate::iaas::emulated::EmulatedStack::new());
  let ssh = Arc::new(sshx::ScriptedSsh::new());
  let bucket = Arc::new(metadata::MemBucket::new());
  let service = Arc::new(Service::new(
    "test",
    stack.clone(),
    bucket,
    ssh.clone(),
    TimeoutConfig {
      execution_sec: 5,
      connection_sec: 1,
      host_up_sec: 1,
      ssh_up_sec: 1,
    },
  ));
  (service, stack, ssh)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn passwords_mix_classes() {
    for _ in 0..50 {
      let password = generate_password();
      assert_eq!(password.len(), 16);
      assert!(password.chars().any(|c| c.is_ascii_lowercase()));
      assert!(password.chars().any(|c| c.is_ascii_uppercase()));
      assert!(password.chars().any(|c| c.is_ascii_digit()));
      assert!(password.chars().any(|c| !c.is_ascii_alphanumeric()));
    }
  }

  #[tokio::test]
  async fn scope_compensates_in_reverse() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut scope = Scope::new();
    for label in ["first", "second", "third"] {
      let log = log.clone();
      scope.arm(label, async move {
        log.lock().unwrap().push(label);
        Ok(())
      });
    }
    let primary = scope.compensate(Error::other("boom")).await;
    assert_eq!(
      *log.lock().unwrap(),
      vec!["third", "second", "first"]
    );
    assert!(primary.consequences().is_empty());
  }

  #[tokio::test]
  async fn rollback_failures_become_consequences() {
    let mut scope = Scope::new();
    scope.arm("doomed", async {
      Err(Error::other("rollback broke too"))
    });
    let primary = scope
      .compensate(Error::not_found("network", "n1"))
      .await;
    assert!(primary.is_not_found());
    assert_eq!(primary.consequences().len(), 1);
  }

  #[tokio::test]
  async fn settle_disarms_on_success() {
    let fired = Arc::new(std::sync::Mutex::new(false));
    let mut scope = Scope::new();
    {
      let fired = fired.clone();
      scope.arm("never", async move {
        *fired.lock().unwrap() = true;
        Ok(())
      });
    }
    let out = settle(scope, Ok(42)).await.unwrap();
    assert_eq!(out, 42);
    assert!(!*fired.lock().unwrap());
  }
}
