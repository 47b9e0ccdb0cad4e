use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
  /// Create a network and its gateway host
  Create(write::CreateNetwork),
  /// List networks managed by SafeScale
  List(read::ListNetworks),
  /// Show a network by name or id
  Inspect(read::InspectNetwork),
  /// Delete a network (fails while hosts are attached)
  Delete(write::DeleteNetwork),
}

pub async fn run(
  client: &SafeScaleClient,
  command: NetworkCommand,
) -> Result<(), RequestError> {
  match command {
    NetworkCommand::Create(request) => {
      let network = client.write(request).await?;
      print_json(&network);
    }
    NetworkCommand::List(request) => {
      let networks = client.read(request).await?;
      let mut table = table(&["NAME", "CIDR", "GATEWAY", "ID"]);
      for network in networks {
        table.add_row(vec![
          network.name,
          network.cidr,
          network.gateway_id,
          network.id,
        ]);
      }
      println!("{table}");
    }
    NetworkCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    NetworkCommand::Delete(request) => {
      let name = request.network.clone();
      client.write(request).await?;
      println!("network '{name}' deleted");
    }
  }
  Ok(())
}
