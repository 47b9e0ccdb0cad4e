use clap::Parser;

#[macro_use]
extern crate tracing;

mod api;
mod cluster;
mod config;
mod features;
mod handlers;
mod iaas;
mod meta;
mod startup;
mod state;

#[derive(Parser)]
#[command(
  name = "safescaled",
  about = "SafeScale daemon: provisions and manages infrastructure across IaaS providers"
)]
struct Args {
  /// Path to the TOML configuration.
  #[arg(long, short)]
  config: Option<String>,
}

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let args = Args::parse();

  let config = config::init_config(args.config)?;
  logger::init(&config.logging)?;

  info!("SafeScale daemon version: v{}", env!("CARGO_PKG_VERSION"));

  startup::init_tenants(config)?;
  // Fail fast on a broken manifests directory instead of at first
  // feature call.
  let features = features::available_features();
  debug!("{} feature manifests loaded", features.len());

  let address = config.address();
  info!("safescaled listening on {address}");
  let listener = tokio::net::TcpListener::bind(&address).await?;
  axum::serve(listener, api::app()).await?;
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;

  tokio::select! {
    res = tokio::spawn(app()) => return res?,
    _ = term_signal.recv() => {},
  }

  Ok(())
}
