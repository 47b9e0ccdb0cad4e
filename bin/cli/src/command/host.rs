use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum HostCommand {
  /// Create a host on a network
  Create(write::CreateHost),
  /// List hosts of the current tenant
  List(read::ListHosts),
  /// Show a host by name or id
  Inspect(read::InspectHost),
  /// Delete a host (fails while it serves shares or volumes)
  Delete(write::DeleteHost),
  Start(write::StartHost),
  Stop(write::StopHost),
  Reboot(write::RebootHost),
  /// Ask the provider for more resources
  Resize(write::ResizeHost),
  /// Current power state as seen by the provider
  State(read::GetHostState),
  /// SSH connection settings for the host
  Ssh(read::GetHostSshAccess),
}

pub async fn run(
  client: &SafeScaleClient,
  command: HostCommand,
) -> Result<(), RequestError> {
  match command {
    HostCommand::Create(request) => {
      print_json(&client.write(request).await?);
    }
    HostCommand::List(request) => {
      let hosts = client.read(request).await?;
      let mut table = table(&["NAME", "STATE", "ID"]);
      for host in hosts {
        table.add_row(vec![
          host.name,
          host.last_state.to_string(),
          host.id,
        ]);
      }
      println!("{table}");
    }
    HostCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    HostCommand::Delete(request) => {
      let name = request.host.clone();
      client.write(request).await?;
      println!("host '{name}' deleted");
    }
    HostCommand::Start(request) => {
      let name = request.host.clone();
      client.write(request).await?;
      println!("host '{name}' started");
    }
    HostCommand::Stop(request) => {
      let name = request.host.clone();
      client.write(request).await?;
      println!("host '{name}' stopped");
    }
    HostCommand::Reboot(request) => {
      let name = request.host.clone();
      client.write(request).await?;
      println!("host '{name}' rebooted");
    }
    HostCommand::Resize(request) => {
      print_json(&client.write(request).await?);
    }
    HostCommand::State(request) => {
      println!("{}", client.read(request).await?);
    }
    HostCommand::Ssh(request) => {
      print_json(&client.read(request).await?);
    }
  }
  Ok(())
}
