use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use safescale_client::{
  entities::host::SshAccess,
  error::{Error, Result},
};
use tokio::{io::AsyncWriteExt, process::Command};
use uuid::Uuid;

use crate::{CONNECTION_LOST, CommandOutput, SshSession};

/// Session implementation shelling out to the OpenSSH client
/// binaries (`ssh` / `scp`), one process per call.
#[derive(Default)]
pub struct OpenSsh {}

impl OpenSsh {
  pub fn new() -> OpenSsh {
    OpenSsh::default()
  }

  /// The key never touches the command line; it is written 0600 to a
  /// throwaway file removed when the call ends.
  async fn write_key_file(
    &self,
    access: &SshAccess,
  ) -> Result<KeyFile> {
    let path = std::env::temp_dir()
      .join(format!("safescale-key-{}", Uuid::new_v4()));
    tokio::fs::write(&path, &access.private_key)
      .await
      .map_err(|e| {
        Error::other(format!("failed to stage ssh key: {e}"))
      })?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      tokio::fs::set_permissions(
        &path,
        std::fs::Permissions::from_mode(0o600),
      )
      .await
      .map_err(|e| {
        Error::other(format!("failed to protect ssh key: {e}"))
      })?;
    }
    Ok(KeyFile { path })
  }

  fn common_args(
    access: &SshAccess,
    key_path: &std::path::Path,
  ) -> Vec<String> {
    let mut args = vec![
      "-i".to_string(),
      key_path.display().to_string(),
      "-o".to_string(),
      "StrictHostKeyChecking=no".to_string(),
      "-o".to_string(),
      "UserKnownHostsFile=/dev/null".to_string(),
      "-o".to_string(),
      "LogLevel=ERROR".to_string(),
    ];
    if let Some(gateway) = &access.gateway {
      // Hop through the network gateway for hosts without a public
      // address. The gateway key is expected alongside.
      args.push("-o".to_string());
      args.push(format!(
        "ProxyJump={}@{}:{}",
        gateway.user, gateway.ip, gateway.port
      ));
    }
    args
  }
}

struct KeyFile {
  path: PathBuf,
}

impl Drop for KeyFile {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
  }
}

#[async_trait]
impl SshSession for OpenSsh {
  async fn run(
    &self,
    access: &SshAccess,
    command: &str,
    wall_time: Duration,
  ) -> Result<CommandOutput> {
    let key = self.write_key_file(access).await?;
    let mut ssh = Command::new("ssh");
    ssh
      .args(Self::common_args(access, &key.path))
      .arg("-p")
      .arg(access.port.to_string())
      .arg(format!("{}@{}", access.user, access.ip))
      .arg(command)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let output =
      match tokio::time::timeout(wall_time, ssh.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
          return Err(Error::other(format!(
            "failed to spawn ssh: {e}"
          )));
        }
        Err(_) => {
          return Err(Error::timeout(
            format!(
              "remote command on '{}' exceeded its wall-time",
              access.host
            ),
            wall_time,
          ));
        }
      };

    Ok(CommandOutput {
      retcode: output.status.code().unwrap_or(CONNECTION_LOST),
      stdout: String::from_utf8_lossy(&output.stdout).to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
  }

  async fn copy(
    &self,
    access: &SshAccess,
    content: &[u8],
    remote_path: &str,
  ) -> Result<()> {
    let key = self.write_key_file(access).await?;
    // Stream through stdin instead of staging a second temp file.
    let mut ssh = Command::new("ssh");
    ssh
      .args(Self::common_args(access, &key.path))
      .arg("-p")
      .arg(access.port.to_string())
      .arg(format!("{}@{}", access.user, access.ip))
      .arg(format!("cat > '{remote_path}'"))
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let mut child = ssh
      .spawn()
      .map_err(|e| Error::other(format!("failed to spawn ssh: {e}")))?;
    if let Some(stdin) = child.stdin.as_mut() {
      stdin.write_all(content).await.map_err(|e| {
        Error::other(format!("failed to stream upload: {e}"))
      })?;
    }
    drop(child.stdin.take());

    let output = child.wait_with_output().await.map_err(|e| {
      Error::other(format!("failed to finish upload: {e}"))
    })?;
    if !output.status.success() {
      return Err(Error::execution(
        output.status.code().unwrap_or(CONNECTION_LOST),
        format!(
          "upload to '{remote_path}' failed: {}",
          String::from_utf8_lossy(&output.stderr)
        ),
      ));
    }
    Ok(())
  }

  async fn wait_ready(
    &self,
    access: &SshAccess,
    timeout: Duration,
  ) -> Result<()> {
    let probe_wall_time = Duration::from_secs(10);
    crate::retry_while_unsuccessful(
      || async {
        let out = self
          .run(access, "echo ready", probe_wall_time)
          .await?;
        if out.success() {
          Ok(())
        } else {
          Err(Error::other(format!(
            "ssh on '{}' not ready yet (code {})",
            access.host, out.retcode
          )))
        }
      },
      Duration::from_secs(5),
      timeout,
    )
    .await
    .map_err(|e| {
      Error::timeout(
        format!(
          "gave up waiting for SSH on host '{}'",
          access.host
        ),
        timeout,
      )
      .with_consequence(e)
    })
  }
}
