//! Error taxonomy shared by every SafeScale layer.
//!
//! An [`Error`] is a classified kind plus the consequences collected
//! while unwinding (rollback failures, cleanup failures). The
//! consequences never mask the primary kind: `Display` shows the
//! primary message, [`Error::full_message`] renders the whole story
//! for verbose output.

use std::time::Duration;

use reqwest::StatusCode;
use serror::AddStatusCodeError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
  /// Method called on a nil / moved-out / never-initialized value.
  #[error("invalid instance: method called on an uninitialized value")]
  InvalidInstance,
  #[error("invalid parameter '{name}': {reason}")]
  InvalidParameter { name: String, reason: String },
  #[error("invalid instance content: {0}")]
  InvalidInstanceContent(String),
  #[error("failed to find {resource} '{name}'")]
  NotFound { resource: String, name: String },
  #[error("{resource} '{name}' already exists")]
  AlreadyExists { resource: String, name: String },
  #[error("{resource} '{name}' is unavailable")]
  NotAvailable { resource: String, name: String },
  /// Illegal state transition: wrong task, wrong status, lock misuse.
  #[error("forbidden: {0}")]
  Forbidden(String),
  /// The call cannot proceed until the caller fixes its session
  /// state (typically: no tenant selected).
  #[error("{0}")]
  Precondition(String),
  #[error("{message} (timeout: {after:?})")]
  Timeout { message: String, after: Duration },
  #[error("aborted{}", fmt_cause(.cause))]
  Aborted { cause: Option<Box<Error>> },
  #[error("runtime panic: {0}")]
  RuntimePanic(String),
  /// Metadata schema mismatch. Data-preserving: callers must not
  /// rewrite the payload that produced it.
  #[error("inconsistent metadata: {0}")]
  Inconsistent(String),
  /// Remote command ran to completion with a non-zero exit code.
  #[error("command exited with code {retcode}: {message}")]
  Execution { retcode: i32, message: String },
  #[error("{0}")]
  List(ErrorList),
  /// Provider / transport plumbing failure, possibly transient.
  #[error("{0}")]
  Other(String),
}

fn fmt_cause(cause: &Option<Box<Error>>) -> String {
  match cause {
    Some(cause) => format!(": {cause}"),
    None => String::new(),
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList(pub Vec<Error>);

impl std::fmt::Display for ErrorList {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let messages = self
      .0
      .iter()
      .map(Error::to_string)
      .collect::<Vec<_>>()
      .join(" + ");
    write!(f, "[{messages}]")
  }
}

impl ErrorList {
  pub fn push(&mut self, e: Error) {
    self.0.push(e)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Collapses the list: no error => Ok, a single error => that
  /// error, otherwise the aggregate.
  pub fn into_result(mut self) -> Result<()> {
    match self.0.len() {
      0 => Ok(()),
      1 => Err(self.0.remove(0)),
      _ => Err(Error::from_kind(ErrorKind::List(self))),
    }
  }
}

impl IntoIterator for ErrorList {
  type Item = Error;
  type IntoIter = std::vec::IntoIter<Error>;
  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
  kind: ErrorKind,
  consequences: Vec<Error>,
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}", self.kind)
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match &self.kind {
      ErrorKind::Aborted { cause: Some(cause) } => {
        Some(cause.as_ref())
      }
      _ => None,
    }
  }
}

impl From<ErrorKind> for Error {
  fn from(kind: ErrorKind) -> Error {
    Error::from_kind(kind)
  }
}

impl Error {
  pub fn from_kind(kind: ErrorKind) -> Error {
    Error {
      kind,
      consequences: Vec::new(),
    }
  }

  pub fn kind(&self) -> &ErrorKind {
    &self.kind
  }

  pub fn invalid_instance() -> Error {
    ErrorKind::InvalidInstance.into()
  }

  pub fn invalid_parameter(
    name: impl Into<String>,
    reason: impl Into<String>,
  ) -> Error {
    ErrorKind::InvalidParameter {
      name: name.into(),
      reason: reason.into(),
    }
    .into()
  }

  pub fn not_found(
    resource: impl Into<String>,
    name: impl Into<String>,
  ) -> Error {
    ErrorKind::NotFound {
      resource: resource.into(),
      name: name.into(),
    }
    .into()
  }

  pub fn already_exists(
    resource: impl Into<String>,
    name: impl Into<String>,
  ) -> Error {
    ErrorKind::AlreadyExists {
      resource: resource.into(),
      name: name.into(),
    }
    .into()
  }

  pub fn not_available(
    resource: impl Into<String>,
    name: impl Into<String>,
  ) -> Error {
    ErrorKind::NotAvailable {
      resource: resource.into(),
      name: name.into(),
    }
    .into()
  }

  pub fn forbidden(message: impl Into<String>) -> Error {
    ErrorKind::Forbidden(message.into()).into()
  }

  pub fn precondition(message: impl Into<String>) -> Error {
    ErrorKind::Precondition(message.into()).into()
  }

  pub fn timeout(
    message: impl Into<String>,
    after: Duration,
  ) -> Error {
    ErrorKind::Timeout {
      message: message.into(),
      after,
    }
    .into()
  }

  pub fn aborted(cause: Option<Error>) -> Error {
    ErrorKind::Aborted {
      cause: cause.map(Box::new),
    }
    .into()
  }

  pub fn runtime_panic(message: impl Into<String>) -> Error {
    ErrorKind::RuntimePanic(message.into()).into()
  }

  pub fn inconsistent(message: impl Into<String>) -> Error {
    ErrorKind::Inconsistent(message.into()).into()
  }

  pub fn execution(retcode: i32, message: impl Into<String>) -> Error {
    ErrorKind::Execution {
      retcode,
      message: message.into(),
    }
    .into()
  }

  pub fn other(message: impl std::fmt::Display) -> Error {
    ErrorKind::Other(message.to_string()).into()
  }

  /// Attaches a rollback / cleanup failure to self without changing
  /// the primary classification.
  pub fn with_consequence(mut self, consequence: Error) -> Error {
    self.consequences.push(consequence);
    self
  }

  pub fn consequences(&self) -> &[Error] {
    &self.consequences
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self.kind, ErrorKind::NotFound { .. })
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self.kind, ErrorKind::Aborted { .. })
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self.kind, ErrorKind::Timeout { .. })
  }

  /// Whether a bounded retry may clear the condition.
  pub fn is_transient(&self) -> bool {
    matches!(
      self.kind,
      ErrorKind::Timeout { .. }
        | ErrorKind::NotAvailable { .. }
        | ErrorKind::Other(_)
    )
  }

  /// Primary message, cause chain and consequences, for verbose
  /// reporting.
  pub fn full_message(&self) -> String {
    let mut out = self.to_string();
    for consequence in &self.consequences {
      out.push_str("\n  consequence: ");
      out.push_str(&consequence.full_message().replace('\n', "\n  "));
    }
    out
  }

  pub fn status_code(&self) -> StatusCode {
    match &self.kind {
      ErrorKind::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
      ErrorKind::NotFound { .. } => StatusCode::NOT_FOUND,
      ErrorKind::AlreadyExists { .. } => StatusCode::CONFLICT,
      ErrorKind::NotAvailable { .. } => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      ErrorKind::Forbidden(_) => StatusCode::FORBIDDEN,
      ErrorKind::Precondition(_) => {
        StatusCode::PRECONDITION_FAILED
      }
      ErrorKind::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
      ErrorKind::List(list) => list
        .0
        .first()
        .map(Error::status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl Error {
  /// Converts to a `serror::Error`, preserving the HTTP status
  /// mapping from [`Error::status_code`]. Named conversion (rather
  /// than `From`) because `serror::Error` already provides a blanket
  /// `From<E: Into<anyhow::Error>>` which would conflict.
  pub fn into_serror(self) -> serror::Error {
    let status = Error::status_code(&self);
    self.status_code(status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn consequences_do_not_mask_primary() {
    let e = Error::not_found("network", "n1")
      .with_consequence(Error::other("failed to delete keypair"));
    assert!(e.is_not_found());
    assert_eq!(e.to_string(), "failed to find network 'n1'");
    assert!(e.full_message().contains("failed to delete keypair"));
  }

  #[test]
  fn error_list_collapses() {
    assert!(ErrorList::default().into_result().is_ok());

    let single = ErrorList(vec![Error::forbidden("nope")])
      .into_result()
      .unwrap_err();
    assert!(matches!(single.kind(), ErrorKind::Forbidden(_)));

    let several = ErrorList(vec![
      Error::forbidden("nope"),
      Error::timeout("too slow", Duration::from_secs(1)),
    ])
    .into_result()
    .unwrap_err();
    assert!(matches!(several.kind(), ErrorKind::List(l) if l.0.len() == 2));
  }

  #[test]
  fn status_codes() {
    assert_eq!(
      Error::not_found("host", "h").status_code(),
      StatusCode::NOT_FOUND
    );
    assert_eq!(
      Error::already_exists("share", "s").status_code(),
      StatusCode::CONFLICT
    );
    assert_eq!(
      Error::runtime_panic("boom").status_code(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }
}
