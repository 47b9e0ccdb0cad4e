use clap::Subcommand;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{execute, read},
};

use crate::helpers::{print_json, table};

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
  /// Build a cluster: network, gateway, masters, nodes, features
  Create(execute::CreateCluster),
  List(read::ListClusters),
  Inspect(read::InspectCluster),
  /// Tear the whole cluster down
  Delete(execute::DeleteCluster),
  /// Probe the flavor for the current cluster state
  State(read::GetClusterState),
  /// Add nodes to an existing cluster
  Expand(execute::AddClusterNodes),
  /// Remove one node from the cluster
  DeleteNode(execute::DeleteClusterNode),
}

pub async fn run(
  client: &SafeScaleClient,
  command: ClusterCommand,
) -> Result<(), RequestError> {
  match command {
    ClusterCommand::Create(request) => {
      print_json(&client.execute(request).await?);
    }
    ClusterCommand::List(request) => {
      let clusters = client.read(request).await?;
      let mut table = table(&[
        "NAME",
        "FLAVOR",
        "COMPLEXITY",
        "STATE",
        "MASTERS",
        "NODES",
      ]);
      for cluster in clusters {
        table.add_row(vec![
          cluster.name.clone(),
          cluster.flavor.to_string(),
          cluster.complexity.to_string(),
          cluster.state.to_string(),
          cluster.master_ids.len().to_string(),
          (cluster.private_node_ids.len()
            + cluster.public_node_ids.len())
          .to_string(),
        ]);
      }
      println!("{table}");
    }
    ClusterCommand::Inspect(request) => {
      print_json(&client.read(request).await?);
    }
    ClusterCommand::Delete(request) => {
      let name = request.cluster.clone();
      client.execute(request).await?;
      println!("cluster '{name}' deleted");
    }
    ClusterCommand::State(request) => {
      println!("{}", client.read(request).await?);
    }
    ClusterCommand::Expand(request) => {
      let created = client.execute(request).await?;
      println!("{} node(s) created:", created.len());
      for id in created {
        println!("  {id}");
      }
    }
    ClusterCommand::DeleteNode(request) => {
      let node = request.node.clone();
      client.execute(request).await?;
      println!("node '{node}' deleted");
    }
  }
  Ok(())
}
