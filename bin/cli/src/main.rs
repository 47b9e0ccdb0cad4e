use clap::{Parser, Subcommand};
use safescale_client::{SafeScaleClient, api::read};

mod command;
mod helpers;

use helpers::{ExitStatus, exit_status_of, report_error, table};

#[derive(Parser, Debug)]
#[command(
  name = "safescale",
  about = "SafeScale: provision and manage infrastructure across IaaS providers",
  version
)]
struct Cli {
  /// Daemon address, `host:port`. Defaults to SAFESCALED_LISTEN /
  /// SAFESCALED_PORT, then localhost:50051.
  #[arg(long, global = true)]
  server: Option<String>,
  /// Show the full error cause chain
  #[arg(long, short, global = true, default_value_t = false)]
  verbose: bool,
  /// Debug output
  #[arg(long, global = true, default_value_t = false)]
  debug: bool,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage tenants (provider accounts)
  #[command(subcommand)]
  Tenant(command::tenant::TenantCommand),
  /// Manage networks and their gateways
  #[command(subcommand)]
  Network(command::network::NetworkCommand),
  /// Manage hosts
  #[command(subcommand)]
  Host(command::host::HostCommand),
  /// Manage block volumes
  #[command(subcommand)]
  Volume(command::volume::VolumeCommand),
  /// Manage NFS shares
  #[command(subcommand)]
  Share(command::share::ShareCommand),
  /// Manage security groups
  #[command(subcommand, name = "security-group", alias = "sg")]
  SecurityGroup(command::security_group::SecurityGroupCommand),
  /// Manage clusters
  #[command(subcommand)]
  Cluster(command::cluster::ClusterCommand),
  /// Install, check and remove features
  #[command(subcommand)]
  Feature(command::feature::FeatureCommand),
  /// List the images of the current tenant
  Images(read::ListImages),
  /// List the host templates of the current tenant
  Templates(read::ListTemplates),
}

fn server_address(cli: &Cli) -> String {
  if let Some(server) = &cli.server {
    return server.clone();
  }
  let host = std::env::var("SAFESCALED_LISTEN")
    .unwrap_or_else(|_| "localhost".to_string());
  let port = std::env::var("SAFESCALED_PORT")
    .unwrap_or_else(|_| "50051".to_string());
  format!("{host}:{port}")
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
  dotenvy::dotenv().ok();
  let cli = Cli::parse();

  let address = server_address(&cli);
  if cli.debug {
    eprintln!("using daemon at {address}");
  }
  let client = SafeScaleClient::new(&address);

  let out = match cli.command {
    Command::Tenant(cmd) => {
      command::tenant::run(&client, cmd).await
    }
    Command::Network(cmd) => {
      command::network::run(&client, cmd).await
    }
    Command::Host(cmd) => command::host::run(&client, cmd).await,
    Command::Volume(cmd) => {
      command::volume::run(&client, cmd).await
    }
    Command::Share(cmd) => command::share::run(&client, cmd).await,
    Command::SecurityGroup(cmd) => {
      command::security_group::run(&client, cmd).await
    }
    Command::Cluster(cmd) => {
      command::cluster::run(&client, cmd).await
    }
    Command::Feature(cmd) => {
      command::feature::run(&client, cmd).await
    }
    Command::Images(request) => {
      match client.read(request).await {
        Ok(images) => {
          let mut table = table(&["NAME", "ID"]);
          for image in images {
            table.add_row(vec![image.name, image.id]);
          }
          println!("{table}");
          Ok(())
        }
        Err(e) => Err(e),
      }
    }
    Command::Templates(request) => {
      match client.read(request).await {
        Ok(templates) => {
          let mut table = table(&[
            "NAME",
            "CORES",
            "RAM (GB)",
            "DISK (GB)",
            "ID",
          ]);
          for template in templates {
            table.add_row(vec![
              template.name,
              template.cores.to_string(),
              template.ram_size.to_string(),
              template.disk_size.to_string(),
              template.id,
            ]);
          }
          println!("{table}");
          Ok(())
        }
        Err(e) => Err(e),
      }
    }
  };

  match out {
    Ok(()) => ExitStatus::Ok.into(),
    Err(e) => {
      report_error(&e, cli.verbose);
      exit_status_of(&e).into()
    }
  }
}
