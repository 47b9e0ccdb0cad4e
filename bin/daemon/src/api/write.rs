use std::sync::Arc;

use axum::{Router, routing::post};
use concurrency::TaskCtx;
use resolver_api::Resolve;
use safescale_client::{
  api::write::*,
  entities::{
    NoData,
    host::{Host, SizingRequirements},
    network::Network,
    security_group::{SecurityGroup, SecurityGroupRule},
    share::{HostRemoteMount, HostShare},
    volume::{Volume, VolumeAttachment},
  },
};
use serde::Deserialize;

use super::{WriteArgs, dispatch};
use crate::{
  handlers::{
    host::HostHandler, network::NetworkHandler,
    security_group::SecurityGroupHandler, share::ShareHandler,
    volume::VolumeHandler,
  },
  iaas::Service,
  state,
};

#[derive(Deserialize, Debug)]
#[serde(tag = "type", content = "params")]
enum WriteRequest {
  SetCurrentTenant(SetCurrentTenant),
  CreateNetwork(CreateNetwork),
  DeleteNetwork(DeleteNetwork),
  CreateHost(CreateHost),
  DeleteHost(DeleteHost),
  StartHost(StartHost),
  StopHost(StopHost),
  RebootHost(RebootHost),
  ResizeHost(ResizeHost),
  CreateVolume(CreateVolume),
  DeleteVolume(DeleteVolume),
  AttachVolume(AttachVolume),
  DetachVolume(DetachVolume),
  CreateShare(CreateShare),
  DeleteShare(DeleteShare),
  MountShare(MountShare),
  UnmountShare(UnmountShare),
  CreateSecurityGroup(CreateSecurityGroup),
  DeleteSecurityGroup(DeleteSecurityGroup),
  AddSecurityGroupRule(AddSecurityGroupRule),
  AddSecurityGroupRules(AddSecurityGroupRules),
  ClearSecurityGroup(ClearSecurityGroup),
  ResetSecurityGroup(ResetSecurityGroup),
  BindSecurityGroupToHost(BindSecurityGroupToHost),
  UnbindSecurityGroupFromHost(UnbindSecurityGroupFromHost),
  BindSecurityGroupToSubnet(BindSecurityGroupToSubnet),
  UnbindSecurityGroupFromSubnet(UnbindSecurityGroupFromSubnet),
}

pub fn router() -> Router {
  Router::new().route("/", post(handler))
}

async fn handler(
  serror::Json(request): serror::Json<WriteRequest>,
) -> serror::Result<axum::Json<serde_json::Value>> {
  let args = WriteArgs {
    task: TaskCtx::root(),
  };
  let response = dispatch!(WriteRequest, request, &args, [
    SetCurrentTenant,
    CreateNetwork,
    DeleteNetwork,
    CreateHost,
    DeleteHost,
    StartHost,
    StopHost,
    RebootHost,
    ResizeHost,
    CreateVolume,
    DeleteVolume,
    AttachVolume,
    DetachVolume,
    CreateShare,
    DeleteShare,
    MountShare,
    UnmountShare,
    CreateSecurityGroup,
    DeleteSecurityGroup,
    AddSecurityGroupRule,
    AddSecurityGroupRules,
    ClearSecurityGroup,
    ResetSecurityGroup,
    BindSecurityGroupToHost,
    UnbindSecurityGroupFromHost,
    BindSecurityGroupToSubnet,
    UnbindSecurityGroupFromSubnet,
  ]);
  Ok(axum::Json(response))
}

fn service() -> serror::Result<Arc<Service>> {
  Ok(state::current_service()?)
}

// ==========
// = Tenant =
// ==========

impl Resolve<WriteArgs> for SetCurrentTenant {
  #[instrument("SetCurrentTenant", skip_all, fields(tenant = self.tenant))]
  async fn resolve(
    self,
    _: &WriteArgs,
  ) -> serror::Result<NoData> {
    state::set_current_tenant(&self.tenant)?;
    Ok(NoData {})
  }
}

// ===========
// = Network =
// ===========

impl Resolve<WriteArgs> for CreateNetwork {
  #[instrument(
    "CreateNetwork",
    skip_all,
    fields(network = self.name, cidr = self.cidr)
  )]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<Network> {
    Ok(
      NetworkHandler::new(service()?)
        .create(
          task,
          &self.name,
          &self.cidr,
          SizingRequirements {
            min_cores: self.cpu,
            min_ram_size: self.ram,
            min_disk_size: self.disk,
          },
          &self.os,
          self.gateway_name,
        )
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DeleteNetwork {
  #[instrument("DeleteNetwork", skip_all, fields(network = self.network))]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    NetworkHandler::new(service()?)
      .delete(task, &self.network)
      .await?;
    Ok(NoData {})
  }
}

// ========
// = Host =
// ========

impl Resolve<WriteArgs> for CreateHost {
  #[instrument(
    "CreateHost",
    skip_all,
    fields(host = self.name, network = self.network)
  )]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<Host> {
    Ok(
      HostHandler::new(service()?)
        .create(
          task,
          &self.name,
          &self.network,
          SizingRequirements {
            min_cores: self.cpu,
            min_ram_size: self.ram,
            min_disk_size: self.disk,
          },
          &self.os,
          self.public_ip,
        )
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DeleteHost {
  #[instrument("DeleteHost", skip_all, fields(host = self.host))]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    HostHandler::new(service()?)
      .delete(task, &self.host)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for StartHost {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    HostHandler::new(service()?)
      .start(task, &self.host)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for StopHost {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    HostHandler::new(service()?)
      .stop(task, &self.host)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for RebootHost {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    HostHandler::new(service()?)
      .reboot(task, &self.host)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for ResizeHost {
  #[instrument("ResizeHost", skip_all, fields(host = self.host))]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<Host> {
    Ok(
      HostHandler::new(service()?)
        .resize(
          task,
          &self.host,
          SizingRequirements {
            min_cores: self.cpu,
            min_ram_size: self.ram,
            min_disk_size: self.disk,
          },
        )
        .await?,
    )
  }
}

// ==========
// = Volume =
// ==========

impl Resolve<WriteArgs> for CreateVolume {
  #[instrument("CreateVolume", skip_all, fields(volume = self.name))]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<Volume> {
    Ok(
      VolumeHandler::new(service()?)
        .create(task, &self.name, self.size, self.speed)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DeleteVolume {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    VolumeHandler::new(service()?)
      .delete(task, &self.volume)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for AttachVolume {
  #[instrument(
    "AttachVolume",
    skip_all,
    fields(volume = self.volume, host = self.host)
  )]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<VolumeAttachment> {
    Ok(
      VolumeHandler::new(service()?)
        .attach(
          task,
          &self.volume,
          &self.host,
          self.path,
          &self.format,
        )
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DetachVolume {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    VolumeHandler::new(service()?)
      .detach(task, &self.volume, &self.host)
      .await?;
    Ok(NoData {})
  }
}

// =========
// = Share =
// =========

impl Resolve<WriteArgs> for CreateShare {
  #[instrument(
    "CreateShare",
    skip_all,
    fields(share = self.name, host = self.host)
  )]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<HostShare> {
    Ok(
      ShareHandler::new(service()?)
        .create(task, &self.name, &self.host, &self.path)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DeleteShare {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    ShareHandler::new(service()?)
      .delete(task, &self.share)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for MountShare {
  #[instrument(
    "MountShare",
    skip_all,
    fields(share = self.share, host = self.host)
  )]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<HostRemoteMount> {
    Ok(
      ShareHandler::new(service()?)
        .mount(task, &self.share, &self.host, &self.path)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for UnmountShare {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    ShareHandler::new(service()?)
      .unmount(task, &self.share, &self.host)
      .await?;
    Ok(NoData {})
  }
}

// ==================
// = Security group =
// ==================

impl Resolve<WriteArgs> for CreateSecurityGroup {
  #[instrument("CreateSecurityGroup", skip_all, fields(group = self.name))]
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<SecurityGroup> {
    Ok(
      SecurityGroupHandler::new(service()?)
        .create(
          task,
          &self.network,
          &self.name,
          &self.description,
          Vec::new(),
        )
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for DeleteSecurityGroup {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    SecurityGroupHandler::new(service()?)
      .delete(task, &self.group, self.force)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for AddSecurityGroupRule {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<SecurityGroup> {
    let rule = SecurityGroupRule {
      direction: self.direction,
      protocol: self.protocol.clone(),
      port_from: self.port_from,
      port_to: self.port_to,
      involved: self.involved.clone(),
      description: self.description.clone(),
      ..Default::default()
    };
    Ok(
      SecurityGroupHandler::new(service()?)
        .add_rules(task, &self.group, vec![rule])
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for AddSecurityGroupRules {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<SecurityGroup> {
    Ok(
      SecurityGroupHandler::new(service()?)
        .add_rules(task, &self.group, self.rules)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for ClearSecurityGroup {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<SecurityGroup> {
    Ok(
      SecurityGroupHandler::new(service()?)
        .clear(task, &self.group)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for ResetSecurityGroup {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<SecurityGroup> {
    Ok(
      SecurityGroupHandler::new(service()?)
        .reset(task, &self.group)
        .await?,
    )
  }
}

impl Resolve<WriteArgs> for BindSecurityGroupToHost {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    SecurityGroupHandler::new(service()?)
      .bind_to_host(
        task,
        &self.group,
        &self.host,
        self.disabled,
        self.mark_default,
      )
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for UnbindSecurityGroupFromHost {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    SecurityGroupHandler::new(service()?)
      .unbind_from_host(task, &self.group, &self.host)
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for BindSecurityGroupToSubnet {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    SecurityGroupHandler::new(service()?)
      .bind_to_subnet(
        task,
        &self.group,
        &self.network,
        self.disabled,
        self.mark_default,
      )
      .await?;
    Ok(NoData {})
  }
}

impl Resolve<WriteArgs> for UnbindSecurityGroupFromSubnet {
  async fn resolve(
    self,
    WriteArgs { task }: &WriteArgs,
  ) -> serror::Result<NoData> {
    SecurityGroupHandler::new(service()?)
      .unbind_from_subnet(task, &self.group, &self.network)
      .await?;
    Ok(NoData {})
  }
}
