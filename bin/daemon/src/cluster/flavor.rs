//! The capability contract a cluster flavor implements, and the
//! registry resolving a requested flavor to its implementation.
//! Shared behavior lives in [`ClusterOps`] helpers; a flavor only
//! implements what it does differently.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use concurrency::TaskCtx;
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    cluster::{
      ClusterComplexity, ClusterFlavor, ClusterIdentity,
      ClusterState, NodeType,
    },
    feature::FeatureSettings,
    host::{Host, SizingRequirements},
  },
  error::{Error, Result},
};
use sshx::SshSession as _;

use crate::{
  features::{Feature, HostTarget, step},
  handlers::ssh_access,
  iaas::Service,
  meta::HostMetadata,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounts {
  pub masters: u32,
  pub private_nodes: u32,
  pub public_nodes: u32,
}

/// What the engine hands a flavor: the tenant service, the calling
/// task, the cluster record, and the shared plumbing (script
/// execution, feature installation).
pub struct ClusterOps<'a> {
  pub service: Arc<Service>,
  pub task: &'a TaskCtx,
  pub identity: ClusterIdentity,
}

impl ClusterOps<'_> {
  pub async fn gateway(&self) -> Result<Host> {
    HostMetadata::new(self.service.clone())
      .load(&self.identity.gateway_id)
      .await
  }

  pub async fn master_hosts(&self) -> Result<Vec<Host>> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut out = Vec::new();
    for id in &self.identity.master_ids {
      out.push(hosts.load(id).await?);
    }
    Ok(out)
  }

  /// Renders a script with the cluster variable bag plus `extra`,
  /// uploads it and runs it to completion on the host.
  pub async fn execute_script(
    &self,
    host: &Host,
    script_name: &str,
    template: &str,
    extra: IndexMap<String, String>,
  ) -> Result<()> {
    let mut vars = self.variables().await?;
    vars.extend(extra);
    if let Some(ip) = host.access_ip() {
      vars.insert("HostIP".to_string(), ip);
    }
    vars.insert("Hostname".to_string(), host.name.clone());
    let script = step::render(template, &vars);

    let access = ssh_access(&self.service, host).await?;
    let remote_path = format!("/var/tmp/{script_name}");
    step::upload_with_retry(
      &self.service,
      &access,
      script.as_bytes(),
      &remote_path,
    )
    .await?;
    let command = format!(
      "chmod u+rwx '{remote_path}' && sudo bash '{remote_path}'; \
       rc=$?; rm -f '{remote_path}'; exit $rc"
    );
    let out = self
      .service
      .ssh
      .run(&access, &command, self.service.timeouts.execution())
      .await?;
    if !out.success() {
      return Err(Error::execution(
        out.retcode,
        format!(
          "script '{script_name}' failed on '{}': {}",
          host.name,
          out.combined()
        ),
      ));
    }
    Ok(())
  }

  pub async fn install_feature(
    &self,
    host: &Host,
    feature_name: &str,
    params: IndexMap<String, String>,
  ) -> Result<()> {
    let feature = Feature::load(feature_name)?;
    let target =
      HostTarget::new(self.service.clone(), host.clone());
    let results = feature
      .add(self.task, &target, &params, &FeatureSettings::default())
      .await?;
    if !results.successful() {
      return Err(Error::execution(
        1,
        format!(
          "failed to install feature '{feature_name}' on '{}':\n{}",
          host.name,
          results.error_messages()
        ),
      ));
    }
    Ok(())
  }

  /// The variable bag shared by every cluster script.
  pub async fn variables(
    &self,
  ) -> Result<IndexMap<String, String>> {
    let mut vars = IndexMap::new();
    vars.insert(
      "ClusterName".to_string(),
      self.identity.name.clone(),
    );
    vars.insert(
      "ClusterAdminPassword".to_string(),
      self.identity.admin_password.clone(),
    );
    vars.insert(
      "Username".to_string(),
      crate::handlers::REMOTE_USER.to_string(),
    );
    let hosts = HostMetadata::new(self.service.clone());
    let mut master_ips = Vec::new();
    for id in &self.identity.master_ids {
      if let Ok(master) = hosts.load(id).await {
        if let Some(ip) = master.access_ip() {
          master_ips.push(ip);
        }
      }
    }
    vars.insert("MasterIPs".to_string(), master_ips.join(","));
    if !self.identity.gateway_id.is_empty() {
      if let Ok(gateway) =
        hosts.load(&self.identity.gateway_id).await
      {
        if let Some(ip) = gateway.access_ip() {
          vars.insert("GatewayIP".to_string(), ip);
        }
      }
    }
    Ok(vars)
  }

  /// All hosts started -> Nominal; any stopped or in error ->
  /// Degraded. The default probe flavors build on.
  pub async fn probe_host_states(&self) -> Result<ClusterState> {
    use safescale_client::entities::host::HostState;
    use crate::iaas::Stack as _;

    let mut ids: Vec<&String> =
      self.identity.master_ids.iter().collect();
    ids.extend(self.identity.private_node_ids.iter());
    ids.extend(self.identity.public_node_ids.iter());
    if !self.identity.gateway_id.is_empty() {
      ids.push(&self.identity.gateway_id);
    }
    let hosts = HostMetadata::new(self.service.clone());
    for id in ids {
      let host = hosts.load(id).await?;
      match self.service.stack.get_host_state(&host.id).await? {
        HostState::Started => {}
        _ => return Ok(ClusterState::Degraded),
      }
    }
    Ok(ClusterState::Nominal)
  }
}

#[async_trait]
pub trait Flavor: Send + Sync {
  fn kind(&self) -> ClusterFlavor;

  fn minimum_required_servers(
    &self,
    complexity: ClusterComplexity,
  ) -> NodeCounts;

  fn default_gateway_sizing(&self) -> SizingRequirements;
  fn default_master_sizing(&self) -> SizingRequirements;
  fn default_node_sizing(&self) -> SizingRequirements;
  fn default_image(&self) -> &'static str;

  /// Script run on every fresh member before its role script.
  fn global_system_requirements(&self) -> &'static str {
    ""
  }

  /// (script name, script template) installing the given role.
  fn node_installation_script(
    &self,
    node_type: NodeType,
  ) -> (String, String);

  async fn configure_gateway(
    &self,
    _ops: &ClusterOps<'_>,
  ) -> Result<()> {
    Ok(())
  }

  async fn configure_master(
    &self,
    _ops: &ClusterOps<'_>,
    _master: &Host,
  ) -> Result<()> {
    Ok(())
  }

  async fn configure_node(
    &self,
    _ops: &ClusterOps<'_>,
    _node: &Host,
  ) -> Result<()> {
    Ok(())
  }

  async fn state(&self, ops: &ClusterOps<'_>)
  -> Result<ClusterState>;

  /// Flavors without an orchestrator-level stop keep the default:
  /// hosts stay up, nothing to quiesce.
  async fn stop(&self, _ops: &ClusterOps<'_>) -> Result<()> {
    Ok(())
  }

  /// How long to keep polling for Nominal after a build.
  fn nominal_budget(&self) -> Duration {
    Duration::from_secs(300)
  }
}

pub fn flavor_for(
  kind: ClusterFlavor,
) -> Result<&'static dyn Flavor> {
  static BOH: super::flavors::boh::Boh =
    super::flavors::boh::Boh {};
  static DCOS: super::flavors::dcos::Dcos =
    super::flavors::dcos::Dcos {};
  match kind {
    ClusterFlavor::Boh => Ok(&BOH),
    ClusterFlavor::Dcos => Ok(&DCOS),
    other => Err(Error::not_available(
      "cluster flavor",
      other.to_string(),
    )),
  }
}
