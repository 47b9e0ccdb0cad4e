use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum ShareCommand {
  /// Export a path of a host over NFS
  Create(write::CreateShare),
  List(read::ListShares),
  Inspect(read::InspectShare),
  /// Delete a share (fails while clients still mount it)
  Delete(write::DeleteShare),
  /// Mount a share on another host
  Mount(write::MountShare),
  Unmount(write::UnmountShare),
}

pub async fn run(
  client: &SafeScaleClient,
  command: ShareCommand,
) -> Result<(), RequestError> {
  match command {
    ShareCommand::Create(request) => {
      print_json(&client.write(request).await?);
    }
    ShareCommand::List(request) => {
      let servers = client.read(request).await?;
      let mut table =
        table(&["SERVER", "SHARE", "PATH", "CLIENTS"]);
      for (server, shares) in servers {
        for share in shares.values() {
          table.add_row(vec![
            server.clone(),
            share.name.clone(),
            share.path.clone(),
            share.clients_by_name.len().to_string(),
          ]);
        }
      }
      println!("{table}");
    }
    ShareCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    ShareCommand::Delete(request) => {
      let name = request.share.clone();
      client.write(request).await?;
      println!("share '{name}' deleted");
    }
    ShareCommand::Mount(request) => {
      print_json(&client.write(request).await?);
    }
    ShareCommand::Unmount(request) => {
      let name = request.share.clone();
      client.write(request).await?;
      println!("share '{name}' unmounted");
    }
  }
  Ok(())
}
