use std::sync::OnceLock;

use anyhow::Context;
use safescale_client::entities::config::{DaemonConfig, Env};

static CONFIG: OnceLock<DaemonConfig> = OnceLock::new();

/// Loads the TOML config (flag path, else `SAFESCALED_CONFIG`, else
/// the default path, else built-in defaults) and applies the
/// environment overrides. Called once at startup.
pub fn init_config(
  cli_path: Option<String>,
) -> anyhow::Result<&'static DaemonConfig> {
  let env = envy::from_env::<Env>()
    .context("failed to parse environment overrides")?;

  let path = cli_path
    .or_else(|| env.safescaled_config.clone())
    .unwrap_or_else(|| {
      "/etc/safescale/safescaled.toml".to_string()
    });

  let mut config = match std::fs::read_to_string(&path) {
    Ok(raw) => toml::from_str::<DaemonConfig>(&raw)
      .with_context(|| format!("failed to parse config at {path}"))?,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      DaemonConfig::default()
    }
    Err(e) => {
      return Err(e)
        .with_context(|| format!("failed to read config at {path}"));
    }
  };

  if let Some(listen) = env.safescaled_listen {
    config.listen = listen;
  }
  if let Some(port) = env.safescaled_port {
    config.port = port;
  }
  // SSH_TIMEOUT is in minutes, the way operators have always set it.
  if let Some(minutes) = env.ssh_timeout {
    config.timeouts.ssh_up_sec = minutes * 60;
  }

  CONFIG
    .set(config)
    .map_err(|_| anyhow::anyhow!("config initialized twice"))?;
  Ok(daemon_config())
}

pub fn daemon_config() -> &'static DaemonConfig {
  CONFIG.get().unwrap_or_else(|| {
    error!(
      "FATAL: config accessed before initialized | Ensure init_config() is called during startup | Exiting..."
    );
    std::process::exit(1)
  })
}

pub fn try_daemon_config() -> Option<&'static DaemonConfig> {
  CONFIG.get()
}
