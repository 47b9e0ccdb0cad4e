use std::sync::Arc;

use axum::{Router, routing::post};
use concurrency::TaskCtx;
use resolver_api::Resolve;
use safescale_client::{
  api::execute::*,
  entities::{
    NoData,
    cluster::{ClusterIdentity, ClusterRequest},
    feature::Results,
    host::HostSize,
  },
  error::Error,
};
use serde::Deserialize;

use super::{ExecuteArgs, dispatch};
use crate::{
  cluster::ClusterHandler,
  handlers::feature::HostFeatureHandler,
  iaas::Service,
  state,
};

#[derive(Deserialize, Debug)]
#[serde(tag = "type", content = "params")]
enum ExecuteRequest {
  CreateCluster(CreateCluster),
  DeleteCluster(DeleteCluster),
  AddClusterNodes(AddClusterNodes),
  DeleteClusterNode(DeleteClusterNode),
  AddFeature(AddFeature),
  CheckFeature(CheckFeature),
  RemoveFeature(RemoveFeature),
}

pub fn router() -> Router {
  Router::new().route("/", post(handler))
}

async fn handler(
  serror::Json(request): serror::Json<ExecuteRequest>,
) -> serror::Result<axum::Json<serde_json::Value>> {
  let args = ExecuteArgs {
    task: TaskCtx::root(),
  };
  let response = dispatch!(ExecuteRequest, request, &args, [
    CreateCluster,
    DeleteCluster,
    AddClusterNodes,
    DeleteClusterNode,
    AddFeature,
    CheckFeature,
    RemoveFeature,
  ]);
  Ok(axum::Json(response))
}

fn service() -> serror::Result<Arc<Service>> {
  Ok(state::current_service()?)
}

// ===========
// = Cluster =
// ===========

impl Resolve<ExecuteArgs> for CreateCluster {
  #[instrument(
    "CreateCluster",
    skip_all,
    fields(
      cluster = self.name,
      flavor = self.flavor.to_string(),
      complexity = self.complexity.to_string(),
    )
  )]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<ClusterIdentity> {
    let nodes_def = match (self.cpu, self.ram, self.disk) {
      (None, None, None) => None,
      (cpu, ram, disk) => Some(HostSize {
        cores: cpu.unwrap_or(2),
        ram_size: ram.unwrap_or(4.0),
        disk_size: disk.unwrap_or(60),
        gpu_count: 0,
      }),
    };
    let request = ClusterRequest {
      name: self.name.clone(),
      flavor: self.flavor,
      complexity: self.complexity,
      cidr: self.cidr.clone(),
      nodes_def,
      disabled_features: self.disabled_features(),
      keep_on_failure: self.keep_on_failure,
    };
    Ok(
      ClusterHandler::new(service()?)
        .create(task, request)
        .await?,
    )
  }
}

impl Resolve<ExecuteArgs> for DeleteCluster {
  #[instrument("DeleteCluster", skip_all, fields(cluster = self.cluster))]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<NoData> {
    ClusterHandler::new(service()?)
      .delete(task, &self.cluster)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<ExecuteArgs> for AddClusterNodes {
  #[instrument(
    "AddClusterNodes",
    skip_all,
    fields(cluster = self.cluster, count = self.count)
  )]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<Vec<String>> {
    Ok(
      ClusterHandler::new(service()?)
        .add_nodes(task, &self.cluster, self.count, self.public)
        .await?,
    )
  }
}

impl Resolve<ExecuteArgs> for DeleteClusterNode {
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<NoData> {
    ClusterHandler::new(service()?)
      .delete_node(task, &self.cluster, &self.node)
      .await?;
    Ok(NoData {})
  }
}

// ===========
// = Feature =
// ===========

impl Resolve<ExecuteArgs> for AddFeature {
  #[instrument("AddFeature", skip_all, fields(feature = self.feature))]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<Results> {
    match &self.target {
      FeatureTarget::Host(host) => Ok(
        HostFeatureHandler::new(service()?)
          .add(task, host, &self.feature, &self.params, &self.settings)
          .await?,
      ),
      FeatureTarget::Cluster(cluster) => {
        cluster_feature_op(
          task,
          cluster,
          &self.feature,
          &self.params,
          &self.settings,
          FeatureOp::Add,
        )
        .await
      }
    }
  }
}

impl Resolve<ExecuteArgs> for CheckFeature {
  #[instrument("CheckFeature", skip_all, fields(feature = self.feature))]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<Results> {
    match &self.target {
      FeatureTarget::Host(host) => Ok(
        HostFeatureHandler::new(service()?)
          .check(
            task, host, &self.feature, &self.params, &self.settings,
          )
          .await?,
      ),
      FeatureTarget::Cluster(cluster) => {
        cluster_feature_op(
          task,
          cluster,
          &self.feature,
          &self.params,
          &self.settings,
          FeatureOp::Check,
        )
        .await
      }
    }
  }
}

impl Resolve<ExecuteArgs> for RemoveFeature {
  #[instrument("RemoveFeature", skip_all, fields(feature = self.feature))]
  async fn resolve(
    self,
    ExecuteArgs { task }: &ExecuteArgs,
  ) -> serror::Result<Results> {
    match &self.target {
      FeatureTarget::Host(host) => Ok(
        HostFeatureHandler::new(service()?)
          .remove(
            task, host, &self.feature, &self.params, &self.settings,
          )
          .await?,
      ),
      FeatureTarget::Cluster(cluster) => {
        cluster_feature_op(
          task,
          cluster,
          &self.feature,
          &self.params,
          &self.settings,
          FeatureOp::Remove,
        )
        .await
      }
    }
  }
}

enum FeatureOp {
  Check,
  Add,
  Remove,
}

async fn cluster_feature_op(
  task: &TaskCtx,
  cluster_name: &str,
  feature_name: &str,
  params: &indexmap::IndexMap<String, String>,
  settings: &safescale_client::entities::feature::FeatureSettings,
  op: FeatureOp,
) -> serror::Result<Results> {
  let service = service()?;
  let identity = crate::meta::ClusterMetadata::new(service.clone())
    .load(cluster_name)
    .await?;
  let target =
    crate::features::ClusterTarget::new(service, identity);
  let feature = crate::features::Feature::load(feature_name)?;
  let results = match op {
    FeatureOp::Check => {
      feature.check(task, &target, params, settings).await?
    }
    FeatureOp::Add => {
      let results =
        feature.add(task, &target, params, settings).await?;
      if !results.successful() {
        return Err(
          Error::execution(
            1,
            format!(
              "failed to install feature '{feature_name}' on cluster '{cluster_name}':\n{}",
              results.error_messages()
            ),
          )
          .into(),
        );
      }
      results
    }
    FeatureOp::Remove => {
      feature.remove(task, &target, params, settings).await?
    }
  };
  Ok(results)
}
