//! The RPC surface: `/read`, `/write` and `/execute` each accept
//! `{"type": <request>, "params": {...}}` and dispatch to the
//! matching `Resolve` impl. Listeners hold no state: every call
//! dereferences the current tenant, builds a tenant-bound handler,
//! and maps errors to status codes through `serror`.

use axum::{Router, routing::get};
use concurrency::TaskCtx;

pub mod execute;
pub mod read;
pub mod write;

/// Per-request context of a read listener call.
pub struct ReadArgs {
  pub task: TaskCtx,
}

pub struct WriteArgs {
  pub task: TaskCtx,
}

pub struct ExecuteArgs {
  pub task: TaskCtx,
}

pub fn app() -> Router {
  Router::new()
    .route("/version", get(|| async { env!("CARGO_PKG_VERSION") }))
    .nest("/read", read::router())
    .nest("/write", write::router())
    .nest("/execute", execute::router())
}

/// Dispatches a request enum to the per-variant resolvers,
/// serializing each typed response to JSON.
macro_rules! dispatch {
  ($enum:ident, $request:expr, $args:expr, [$($variant:ident),* $(,)?]) => {{
    use anyhow::Context as _;
    match $request {
      $(
        $enum::$variant(inner) => {
          serde_json::to_value(
            resolver_api::Resolve::resolve(inner, $args).await?,
          )
          .context("failed to serialize response")?
        }
      )*
    }
  }};
}

pub(crate) use dispatch;
