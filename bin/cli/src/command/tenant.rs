use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{read, write},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum TenantCommand {
  /// List the tenants the daemon knows
  List(read::ListTenants),
  /// Show the tenant operations currently run against
  Get(read::GetCurrentTenant),
  /// Select the tenant for subsequent operations
  Set(write::SetCurrentTenant),
}

pub async fn run(
  client: &SafeScaleClient,
  command: TenantCommand,
) -> Result<(), RequestError> {
  match command {
    TenantCommand::List(request) => {
      let tenants = client.read(request).await?;
      let mut table = table(&["NAME", "PROVIDER", "CURRENT"]);
      for tenant in tenants {
        table.add_row(vec![
          tenant.name,
          tenant.provider,
          if tenant.current { "*".to_string() } else { String::new() },
        ]);
      }
      println!("{table}");
    }
    TenantCommand::Get(request) => {
      match client.read(request).await? {
        Some(tenant) => print_json(&tenant),
        None => println!("no tenant set"),
      }
    }
    TenantCommand::Set(request) => {
      let name = request.tenant.clone();
      client.write(request).await?;
      println!("tenant '{name}' set");
    }
  }
  Ok(())
}
