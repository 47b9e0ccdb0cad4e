use std::{
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use async_trait::async_trait;
use safescale_client::{
  entities::host::SshAccess,
  error::{Error, Result},
};

use crate::{CommandOutput, SshSession};

/// What a [`ScriptedSsh`] session was asked to do, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
  Run {
    host: String,
    command: String,
  },
  Copy {
    host: String,
    remote_path: String,
    content: String,
  },
  WaitReady {
    host: String,
  },
}

struct Rule {
  needle: String,
  output: CommandOutput,
}

/// Test double: every command succeeds with empty output unless a
/// rule keyed on a command substring says otherwise.
#[derive(Default)]
pub struct ScriptedSsh {
  calls: std::sync::Mutex<Vec<RecordedCall>>,
  rules: std::sync::Mutex<Vec<Rule>>,
  refuse_ready: AtomicBool,
}

impl ScriptedSsh {
  pub fn new() -> ScriptedSsh {
    ScriptedSsh::default()
  }

  /// Commands containing `needle` respond with `retcode`/`stdout`.
  pub fn respond(
    &self,
    needle: impl Into<String>,
    retcode: i32,
    stdout: impl Into<String>,
  ) {
    self.rules.lock().unwrap().push(Rule {
      needle: needle.into(),
      output: CommandOutput {
        retcode,
        stdout: stdout.into(),
        stderr: String::new(),
      },
    });
  }

  /// Makes `wait_ready` time out, to exercise rollbacks.
  pub fn refuse_ready(&self, refuse: bool) {
    self.refuse_ready.store(refuse, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn ran_command_containing(&self, needle: &str) -> bool {
    self.calls().iter().any(|call| {
      matches!(call, RecordedCall::Run { command, .. } if command.contains(needle))
    })
  }
}

#[async_trait]
impl SshSession for ScriptedSsh {
  async fn run(
    &self,
    access: &SshAccess,
    command: &str,
    _wall_time: Duration,
  ) -> Result<CommandOutput> {
    self.calls.lock().unwrap().push(RecordedCall::Run {
      host: access.host.clone(),
      command: command.to_string(),
    });
    let rules = self.rules.lock().unwrap();
    for rule in rules.iter() {
      if command.contains(&rule.needle) {
        return Ok(rule.output.clone());
      }
    }
    Ok(CommandOutput::default())
  }

  async fn copy(
    &self,
    access: &SshAccess,
    content: &[u8],
    remote_path: &str,
  ) -> Result<()> {
    self.calls.lock().unwrap().push(RecordedCall::Copy {
      host: access.host.clone(),
      remote_path: remote_path.to_string(),
      content: String::from_utf8_lossy(content).to_string(),
    });
    Ok(())
  }

  async fn wait_ready(
    &self,
    access: &SshAccess,
    timeout: Duration,
  ) -> Result<()> {
    self.calls.lock().unwrap().push(RecordedCall::WaitReady {
      host: access.host.clone(),
    });
    if self.refuse_ready.load(Ordering::SeqCst) {
      return Err(Error::timeout(
        format!(
          "gave up waiting for SSH on host '{}'",
          access.host
        ),
        timeout,
      ));
    }
    Ok(())
  }
}
