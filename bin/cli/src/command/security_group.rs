use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum SecurityGroupCommand {
  Create(write::CreateSecurityGroup),
  List(read::ListSecurityGroups),
  Inspect(read::InspectSecurityGroup),
  /// Delete a group; --force bypasses the binding checks
  Delete(write::DeleteSecurityGroup),
  AddRule(write::AddSecurityGroupRule),
  /// Remove every rule
  Clear(write::ClearSecurityGroup),
  /// Re-apply the rules recorded in metadata to the provider
  Reset(write::ResetSecurityGroup),
  Bind(write::BindSecurityGroupToHost),
  Unbind(write::UnbindSecurityGroupFromHost),
  BindSubnet(write::BindSecurityGroupToSubnet),
  UnbindSubnet(write::UnbindSecurityGroupFromSubnet),
}

pub async fn run(
  client: &SafeScaleClient,
  command: SecurityGroupCommand,
) -> Result<(), RequestError> {
  match command {
    SecurityGroupCommand::Create(request) => {
      print_json(&client.write(request).await?);
    }
    SecurityGroupCommand::List(request) => {
      let groups = client.read(request).await?;
      let mut table = table(&["NAME", "NETWORK", "RULES", "ID"]);
      for group in groups {
        table.add_row(vec![
          group.name,
          group.network_id,
          group.rules.len().to_string(),
          group.id,
        ]);
      }
      println!("{table}");
    }
    SecurityGroupCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    SecurityGroupCommand::Delete(request) => {
      let name = request.group.clone();
      client.write(request).await?;
      println!("security group '{name}' deleted");
    }
    SecurityGroupCommand::AddRule(request) => {
      print_json(&client.write(request).await?);
    }
    SecurityGroupCommand::Clear(request) => {
      print_json(&client.write(request).await?);
    }
    SecurityGroupCommand::Reset(request) => {
      print_json(&client.write(request).await?);
    }
    SecurityGroupCommand::Bind(request) => {
      let (group, host) =
        (request.group.clone(), request.host.clone());
      client.write(request).await?;
      println!("security group '{group}' bound to host '{host}'");
    }
    SecurityGroupCommand::Unbind(request) => {
      let (group, host) =
        (request.group.clone(), request.host.clone());
      client.write(request).await?;
      println!(
        "security group '{group}' unbound from host '{host}'"
      );
    }
    SecurityGroupCommand::BindSubnet(request) => {
      let (group, network) =
        (request.group.clone(), request.network.clone());
      client.write(request).await?;
      println!(
        "security group '{group}' bound to subnet '{network}'"
      );
    }
    SecurityGroupCommand::UnbindSubnet(request) => {
      let (group, network) =
        (request.group.clone(), request.network.clone());
      client.write(request).await?;
      println!(
        "security group '{group}' unbound from subnet '{network}'"
      );
    }
  }
  Ok(())
}
