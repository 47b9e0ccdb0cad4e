use std::sync::Arc;

use axum::{Router, routing::post};
use concurrency::TaskCtx;
use resolver_api::Resolve;
use safescale_client::{
  api::read::*,
  entities::{
    TenantSummary,
    cluster::{ClusterIdentity, ClusterState},
    host::{Host, HostState, HostTemplate, Image, SshAccess},
    network::Network,
    security_group::SecurityGroup,
    share::ShareDetail,
    volume::Volume,
  },
};
use serde::Deserialize;

use super::{ReadArgs, dispatch};
use crate::{
  cluster::ClusterHandler,
  handlers::{
    host::HostHandler, network::NetworkHandler,
    security_group::SecurityGroupHandler, share::ShareHandler,
    volume::VolumeHandler,
  },
  iaas::{Service, Stack as _},
  state,
};

#[derive(Deserialize, Debug)]
#[serde(tag = "type", content = "params")]
enum ReadRequest {
  ListTenants(ListTenants),
  GetCurrentTenant(GetCurrentTenant),
  ListHosts(ListHosts),
  InspectHost(InspectHost),
  GetHostState(GetHostState),
  GetHostSshAccess(GetHostSshAccess),
  ListNetworks(ListNetworks),
  InspectNetwork(InspectNetwork),
  ListVolumes(ListVolumes),
  InspectVolume(InspectVolume),
  ListShares(ListShares),
  InspectShare(InspectShare),
  ListSecurityGroups(ListSecurityGroups),
  InspectSecurityGroup(InspectSecurityGroup),
  ListClusters(ListClusters),
  InspectCluster(InspectCluster),
  GetClusterState(GetClusterState),
  ListImages(ListImages),
  ListTemplates(ListTemplates),
  ListFeatures(ListFeatures),
}

pub fn router() -> Router {
  Router::new().route("/", post(handler))
}

async fn handler(
  serror::Json(request): serror::Json<ReadRequest>,
) -> serror::Result<axum::Json<serde_json::Value>> {
  let args = ReadArgs {
    task: TaskCtx::root(),
  };
  let response = dispatch!(ReadRequest, request, &args, [
    ListTenants,
    GetCurrentTenant,
    ListHosts,
    InspectHost,
    GetHostState,
    GetHostSshAccess,
    ListNetworks,
    InspectNetwork,
    ListVolumes,
    InspectVolume,
    ListShares,
    InspectShare,
    ListSecurityGroups,
    InspectSecurityGroup,
    ListClusters,
    InspectCluster,
    GetClusterState,
    ListImages,
    ListTemplates,
    ListFeatures,
  ]);
  Ok(axum::Json(response))
}

fn service() -> serror::Result<Arc<Service>> {
  Ok(state::current_service()?)
}

// ==========
// = Tenant =
// ==========

impl Resolve<ReadArgs> for ListTenants {
  async fn resolve(
    self,
    _: &ReadArgs,
  ) -> serror::Result<Vec<TenantSummary>> {
    Ok(state::tenant_summaries())
  }
}

impl Resolve<ReadArgs> for GetCurrentTenant {
  async fn resolve(
    self,
    _: &ReadArgs,
  ) -> serror::Result<Option<TenantSummary>> {
    Ok(state::current_tenant_summary())
  }
}

// ========
// = Host =
// ========

impl Resolve<ReadArgs> for ListHosts {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Vec<Host>> {
    Ok(HostHandler::new(service()?).list(task).await?)
  }
}

impl Resolve<ReadArgs> for InspectHost {
  #[instrument("InspectHost", skip_all, fields(host = self.host))]
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Host> {
    Ok(
      HostHandler::new(service()?)
        .inspect(task, &self.host)
        .await?,
    )
  }
}

impl Resolve<ReadArgs> for GetHostState {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<HostState> {
    Ok(
      HostHandler::new(service()?)
        .state(task, &self.host)
        .await?,
    )
  }
}

impl Resolve<ReadArgs> for GetHostSshAccess {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<SshAccess> {
    Ok(
      HostHandler::new(service()?)
        .ssh_config(task, &self.host)
        .await?,
    )
  }
}

// ===========
// = Network =
// ===========

impl Resolve<ReadArgs> for ListNetworks {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Vec<Network>> {
    Ok(
      NetworkHandler::new(service()?)
        .list(task, self.all)
        .await?,
    )
  }
}

impl Resolve<ReadArgs> for InspectNetwork {
  #[instrument(
    "InspectNetwork",
    skip_all,
    fields(network = self.network)
  )]
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Network> {
    Ok(
      NetworkHandler::new(service()?)
        .inspect(task, &self.network)
        .await?,
    )
  }
}

// ==========
// = Volume =
// ==========

impl Resolve<ReadArgs> for ListVolumes {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Vec<Volume>> {
    Ok(VolumeHandler::new(service()?).list(task).await?)
  }
}

impl Resolve<ReadArgs> for InspectVolume {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Volume> {
    Ok(
      VolumeHandler::new(service()?)
        .inspect(task, &self.volume)
        .await?,
    )
  }
}

// =========
// = Share =
// =========

impl Resolve<ReadArgs> for ListShares {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<ListSharesResponse> {
    Ok(ShareHandler::new(service()?).list(task).await?)
  }
}

impl Resolve<ReadArgs> for InspectShare {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<ShareDetail> {
    Ok(
      ShareHandler::new(service()?)
        .inspect(task, &self.share)
        .await?,
    )
  }
}

// ==================
// = Security group =
// ==================

impl Resolve<ReadArgs> for ListSecurityGroups {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Vec<SecurityGroup>> {
    Ok(
      SecurityGroupHandler::new(service()?).list(task).await?,
    )
  }
}

impl Resolve<ReadArgs> for InspectSecurityGroup {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<SecurityGroup> {
    Ok(
      SecurityGroupHandler::new(service()?)
        .inspect(task, &self.group)
        .await?,
    )
  }
}

// ===========
// = Cluster =
// ===========

impl Resolve<ReadArgs> for ListClusters {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<Vec<ClusterIdentity>> {
    Ok(ClusterHandler::new(service()?).list(task).await?)
  }
}

impl Resolve<ReadArgs> for InspectCluster {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<ClusterIdentity> {
    Ok(
      ClusterHandler::new(service()?)
        .inspect(task, &self.cluster)
        .await?,
    )
  }
}

impl Resolve<ReadArgs> for GetClusterState {
  async fn resolve(
    self,
    ReadArgs { task }: &ReadArgs,
  ) -> serror::Result<ClusterState> {
    Ok(
      ClusterHandler::new(service()?)
        .state(task, &self.cluster)
        .await?,
    )
  }
}

// ===========
// = Catalog =
// ===========

impl Resolve<ReadArgs> for ListImages {
  async fn resolve(
    self,
    _: &ReadArgs,
  ) -> serror::Result<Vec<Image>> {
    Ok(service()?.stack.list_images().await?)
  }
}

impl Resolve<ReadArgs> for ListTemplates {
  async fn resolve(
    self,
    _: &ReadArgs,
  ) -> serror::Result<Vec<HostTemplate>> {
    Ok(service()?.stack.list_templates().await?)
  }
}

impl Resolve<ReadArgs> for ListFeatures {
  async fn resolve(
    self,
    _: &ReadArgs,
  ) -> serror::Result<Vec<String>> {
    Ok(crate::features::available_features())
  }
}
