use clap::{Args, Subcommand};
use indexmap::IndexMap;
use safescale_client::{
  RequestError, SafeScaleClient,
  api::{
    execute::{
      AddFeature, CheckFeature, FeatureTarget, RemoveFeature,
    },
    read,
  },
  entities::feature::FeatureSettings,
};

use crate::helpers::{print_json, table};

/// Shared arguments of add/check/remove.
#[derive(Args, Debug, Clone)]
pub struct FeatureOpArgs {
  /// Feature manifest name (e.g. docker)
  pub feature: String,
  /// Target host, name or id
  #[arg(long, conflicts_with = "cluster")]
  pub host: Option<String>,
  /// Target cluster name
  #[arg(long)]
  pub cluster: Option<String>,
  /// Feature parameters, `Name=value`, repeatable
  #[arg(long, short)]
  pub param: Vec<String>,
  /// Run steps sequentially even when parallel-safe
  #[arg(long, default_value_t = false)]
  pub serialize: bool,
}

impl FeatureOpArgs {
  fn target(&self) -> Result<FeatureTarget, String> {
    match (&self.host, &self.cluster) {
      (Some(host), None) => {
        Ok(FeatureTarget::Host(host.clone()))
      }
      (None, Some(cluster)) => {
        Ok(FeatureTarget::Cluster(cluster.clone()))
      }
      _ => Err(
        "exactly one of --host or --cluster is required"
          .to_string(),
      ),
    }
  }

  fn params(&self) -> IndexMap<String, String> {
    self
      .param
      .iter()
      .filter_map(|entry| {
        entry
          .split_once('=')
          .map(|(k, v)| (k.to_string(), v.to_string()))
      })
      .collect()
  }

  fn settings(&self) -> FeatureSettings {
    FeatureSettings {
      serialize: self.serialize,
      ..Default::default()
    }
  }
}

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
  /// List the feature manifests the daemon can install
  List(read::ListFeatures),
  /// Install a feature on a host or cluster
  Add(FeatureOpArgs),
  /// Probe whether a feature is installed
  Check(FeatureOpArgs),
  /// Uninstall a feature
  Remove(FeatureOpArgs),
}

pub async fn run(
  client: &SafeScaleClient,
  command: FeatureCommand,
) -> Result<(), RequestError> {
  match command {
    FeatureCommand::List(request) => {
      let features = client.read(request).await?;
      let mut table = table(&["FEATURE"]);
      for feature in features {
        table.add_row(vec![feature]);
      }
      println!("{table}");
    }
    FeatureCommand::Add(args) => {
      let target = target_or_exit(&args);
      let results = client
        .execute(AddFeature {
          target,
          feature: args.feature.clone(),
          params: args.params(),
          settings: args.settings(),
        })
        .await?;
      print_json(&results);
    }
    FeatureCommand::Check(args) => {
      let target = target_or_exit(&args);
      let results = client
        .execute(CheckFeature {
          target,
          feature: args.feature.clone(),
          params: args.params(),
          settings: args.settings(),
        })
        .await?;
      if results.successful() {
        println!("feature '{}' is installed", args.feature);
      } else {
        println!("feature '{}' is NOT installed", args.feature);
      }
    }
    FeatureCommand::Remove(args) => {
      let target = target_or_exit(&args);
      let results = client
        .execute(RemoveFeature {
          target,
          feature: args.feature.clone(),
          params: args.params(),
          settings: args.settings(),
        })
        .await?;
      print_json(&results);
    }
  }
  Ok(())
}

fn target_or_exit(args: &FeatureOpArgs) -> FeatureTarget {
  match args.target() {
    Ok(target) => target,
    Err(message) => {
      // Argument validation, reported the way clap reports its own.
      eprintln!("error: {message}");
      std::process::exit(
        crate::helpers::ExitStatus::InvalidArgument as i32,
      );
    }
  }
}
