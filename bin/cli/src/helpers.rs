use colored::Colorize;
use safescale_client::{RequestError, StatusCode};

/// The fixed exit-code map of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
  Ok = 0,
  /// General failure reported by the daemon.
  Run = 1,
  InvalidArgument = 2,
  NotFound = 3,
  /// Could not talk to the daemon at all.
  Rpc = 4,
}

impl From<ExitStatus> for std::process::ExitCode {
  fn from(status: ExitStatus) -> std::process::ExitCode {
    std::process::ExitCode::from(status as u8)
  }
}

pub fn exit_status_of(error: &RequestError) -> ExitStatus {
  match error.status() {
    None => ExitStatus::Rpc,
    Some(StatusCode::NOT_FOUND) => ExitStatus::NotFound,
    Some(StatusCode::BAD_REQUEST) => ExitStatus::InvalidArgument,
    Some(_) => ExitStatus::Run,
  }
}

/// Outermost message always; the cause chain only with --verbose.
pub fn report_error(error: &RequestError, verbose: bool) {
  eprintln!("{}: {error}", "error".red().bold());
  if verbose {
    if let RequestError::Api { trace, .. } = error {
      for cause in trace {
        eprintln!("  {}: {cause}", "caused by".dimmed());
      }
    }
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) {
  match serde_json::to_string_pretty(value) {
    Ok(json) => println!("{json}"),
    Err(e) => eprintln!("failed to render response: {e}"),
  }
}

pub fn table(headers: &[&str]) -> comfy_table::Table {
  let mut table = comfy_table::Table::new();
  table
    .load_preset(comfy_table::presets::UTF8_BORDERS_ONLY)
    .set_header(headers.to_vec());
  table
}
