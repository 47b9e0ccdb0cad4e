//! Client for the SafeScale daemon, plus the entities and error
//! taxonomy shared by daemon, CLI and libraries.

pub mod api;
pub mod entities;
pub mod error;

use resolver_api::HasResponse;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;

pub use reqwest::StatusCode;

#[derive(Debug, Clone)]
pub struct SafeScaleClient {
  address: String,
  reqwest: reqwest::Client,
}

/// What a request against the daemon can fail with, split so callers
/// can tell transport trouble from daemon-reported errors.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
  #[error("failed to reach daemon: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("{error}")]
  Api {
    status: StatusCode,
    error: String,
    /// Cause chain, outermost first.
    trace: Vec<String>,
  },
}

impl RequestError {
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      RequestError::Transport(_) => None,
      RequestError::Api { status, .. } => Some(*status),
    }
  }
}

impl SafeScaleClient {
  /// `address` is `host:port` of a running safescaled.
  pub fn new(address: impl std::fmt::Display) -> SafeScaleClient {
    SafeScaleClient {
      address: format!("http://{address}"),
      reqwest: Default::default(),
    }
  }

  pub async fn read<T>(
    &self,
    request: T,
  ) -> Result<T::Response, RequestError>
  where
    T: Serialize + HasResponse,
    T::Response: DeserializeOwned,
  {
    self.request("/read", request).await
  }

  pub async fn write<T>(
    &self,
    request: T,
  ) -> Result<T::Response, RequestError>
  where
    T: Serialize + HasResponse,
    T::Response: DeserializeOwned,
  {
    self.request("/write", request).await
  }

  pub async fn execute<T>(
    &self,
    request: T,
  ) -> Result<T::Response, RequestError>
  where
    T: Serialize + HasResponse,
    T::Response: DeserializeOwned,
  {
    self.request("/execute", request).await
  }

  async fn request<T>(
    &self,
    endpoint: &str,
    request: T,
  ) -> Result<T::Response, RequestError>
  where
    T: Serialize + HasResponse,
    T::Response: DeserializeOwned,
  {
    let response = self
      .reqwest
      .post(format!("{}{endpoint}", self.address))
      .json(&json!({
        "type": T::req_type(),
        "params": request
      }))
      .send()
      .await?;

    let status = response.status();
    if status.is_success() {
      return Ok(response.json().await?);
    }

    // The daemon reports errors as serialized serror payloads, but
    // a proxy in between may answer with plain text.
    let body = response.text().await?;
    let (error, trace) = match serde_json::from_str::<
      serde_json::Value,
    >(&body)
    {
      Ok(value) => {
        let error = value
          .get("error")
          .and_then(|e| e.as_str())
          .unwrap_or(&body)
          .to_string();
        let trace = value
          .get("trace")
          .and_then(|t| t.as_array())
          .map(|entries| {
            entries
              .iter()
              .filter_map(|e| e.as_str())
              .map(String::from)
              .collect()
          })
          .unwrap_or_default();
        (error, trace)
      }
      Err(_) => (body, Vec::new()),
    };

    Err(RequestError::Api {
      status,
      error,
      trace,
    })
  }
}
