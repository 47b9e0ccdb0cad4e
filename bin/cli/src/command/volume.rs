use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum VolumeCommand {
  Create(write::CreateVolume),
  List(read::ListVolumes),
  Inspect(read::InspectVolume),
  /// Delete a volume (fails while attached)
  Delete(write::DeleteVolume),
  /// Attach to a host, optionally formatting and mounting it
  Attach(write::AttachVolume),
  Detach(write::DetachVolume),
}

pub async fn run(
  client: &SafeScaleClient,
  command: VolumeCommand,
) -> Result<(), RequestError> {
  match command {
    VolumeCommand::Create(request) => {
      print_json(&client.write(request).await?);
    }
    VolumeCommand::List(request) => {
      let volumes = client.read(request).await?;
      let mut table =
        table(&["NAME", "SIZE (GB)", "SPEED", "STATE", "ID"]);
      for volume in volumes {
        table.add_row(vec![
          volume.name,
          volume.size.to_string(),
          volume.speed.to_string(),
          volume.state.to_string(),
          volume.id,
        ]);
      }
      println!("{table}");
    }
    VolumeCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    VolumeCommand::Delete(request) => {
      let name = request.volume.clone();
      client.write(request).await?;
      println!("volume '{name}' deleted");
    }
    VolumeCommand::Attach(request) => {
      print_json(&client.write(request).await?);
    }
    VolumeCommand::Detach(request) => {
      let name = request.volume.clone();
      client.write(request).await?;
      println!("volume '{name}' detached");
    }
  }
  Ok(())
}
