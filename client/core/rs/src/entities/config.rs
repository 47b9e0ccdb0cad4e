use serde::{Deserialize, Serialize};
use strum::Display;

/// Daemon configuration, loaded from TOML and overridden by
/// environment (see [`Env`]).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DaemonConfig {
  /// Bind address of the RPC surface.
  #[serde(default = "default_listen")]
  pub listen: String,
  #[serde(default = "default_port")]
  pub port: u16,
  /// Extra directory of feature manifests, on top of the embedded
  /// ones.
  #[serde(default)]
  pub features_dir: String,
  #[serde(default)]
  pub tenants: Vec<TenantConfig>,
  #[serde(default)]
  pub logging: LogConfig,
  #[serde(default)]
  pub timeouts: TimeoutConfig,
}

impl Default for DaemonConfig {
  fn default() -> DaemonConfig {
    DaemonConfig {
      listen: default_listen(),
      port: default_port(),
      features_dir: String::new(),
      tenants: Vec::new(),
      logging: LogConfig::default(),
      timeouts: TimeoutConfig::default(),
    }
  }
}

fn default_listen() -> String {
  "localhost".to_string()
}

fn default_port() -> u16 {
  50051
}

impl DaemonConfig {
  pub fn address(&self) -> String {
    format!("{}:{}", self.listen, self.port)
  }
}

/// Environment overrides, parsed with envy. Field names match the
/// variables: `SAFESCALED_LISTEN`, `SSH_TIMEOUT`, ...
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Env {
  pub safescaled_config: Option<String>,
  pub safescaled_listen: Option<String>,
  pub safescaled_port: Option<u16>,
  /// Minutes to wait for SSH to come up on a fresh host.
  pub ssh_timeout: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TenantConfig {
  pub name: String,
  #[serde(default)]
  pub provider: ProviderKind,
  /// Directory backing the metadata bucket; in-memory when empty.
  #[serde(default)]
  pub metadata_root: String,
  /// Tenant selected at startup when none was chosen yet.
  #[serde(default)]
  pub default: bool,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
  /// In-process provider, for development and tests.
  #[default]
  Emulated,
}

/// Wall-clock budgets per call family, seconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
  #[serde(default = "default_execution_sec")]
  pub execution_sec: u64,
  #[serde(default = "default_connection_sec")]
  pub connection_sec: u64,
  #[serde(default = "default_host_up_sec")]
  pub host_up_sec: u64,
  #[serde(default = "default_ssh_up_sec")]
  pub ssh_up_sec: u64,
}

impl Default for TimeoutConfig {
  fn default() -> TimeoutConfig {
    TimeoutConfig {
      execution_sec: default_execution_sec(),
      connection_sec: default_connection_sec(),
      host_up_sec: default_host_up_sec(),
      ssh_up_sec: default_ssh_up_sec(),
    }
  }
}

fn default_execution_sec() -> u64 {
  480
}

fn default_connection_sec() -> u64 {
  30
}

fn default_host_up_sec() -> u64 {
  300
}

fn default_ssh_up_sec() -> u64 {
  300
}

impl TimeoutConfig {
  pub fn execution(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.execution_sec)
  }

  pub fn connection(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.connection_sec)
  }

  pub fn host_up(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.host_up_sec)
  }

  pub fn ssh_up(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.ssh_up_sec)
  }
}

// ===========
// = Logging =
// ===========

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct LogConfig {
  #[serde(default)]
  pub level: LogLevel,
  #[serde(default)]
  pub stdio: StdioLogMode,
  #[serde(default)]
  pub pretty: bool,
  #[serde(default)]
  pub ansi: bool,
  /// Include the emitting module in log lines.
  #[serde(default)]
  pub location: bool,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> tracing::Level {
    match level {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}
