//! The feature installer: YAML-declared capabilities (docker,
//! reverseproxy, nfs-server, ...) installed on host or cluster
//! targets through per-method installers. The manifest catalog is
//! embedded in the binary and can be extended with a directory of
//! tenant manifests; it is loaded once and immutable afterwards.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use concurrency::TaskCtx;
use futures_util::{FutureExt, future::BoxFuture};
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    cluster::ClusterIdentity,
    feature::{
      FeatureFile, FeatureSettings, FeatureSpec, InstallAction,
      InstallMethod, Results,
    },
    host::Host,
  },
  error::{Error, Result},
};

use crate::{
  handlers::REMOTE_USER,
  iaas::Service,
  meta::HostMetadata,
};

pub mod installer;
pub mod step;

use installer::{BashInstaller, GenericPackager, Installer};
use step::StepTargets;

const EMBEDDED_MANIFESTS: &[(&str, &str)] = &[
  ("docker", include_str!("manifests/docker.yaml")),
  ("reverseproxy", include_str!("manifests/reverseproxy.yaml")),
  (
    "proxycache-server",
    include_str!("manifests/proxycache-server.yaml"),
  ),
  (
    "proxycache-client",
    include_str!("manifests/proxycache-client.yaml"),
  ),
  ("nfs-server", include_str!("manifests/nfs-server.yaml")),
  ("nfs-client", include_str!("manifests/nfs-client.yaml")),
  ("ntpclient", include_str!("manifests/ntpclient.yaml")),
];

/// Embedded manifests plus the configured manifests directory,
/// parsed once.
pub fn catalog() -> &'static IndexMap<String, FeatureSpec> {
  static CATALOG: OnceLock<IndexMap<String, FeatureSpec>> =
    OnceLock::new();
  CATALOG.get_or_init(|| {
    let mut catalog = IndexMap::new();
    for (name, raw) in EMBEDDED_MANIFESTS {
      match serde_yaml_ng::from_str::<FeatureFile>(raw) {
        Ok(file) => {
          catalog.insert(name.to_string(), file.feature);
        }
        Err(e) => {
          error!("embedded manifest '{name}' is invalid | {e:#}")
        }
      }
    }
    let dir = crate::config::try_daemon_config()
      .map(|c| c.features_dir.clone())
      .unwrap_or_default();
    if !dir.is_empty() {
      match std::fs::read_dir(&dir) {
        Ok(entries) => {
          for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "yaml") {
              continue;
            }
            let Some(name) =
              path.file_stem().map(|s| s.to_string_lossy())
            else {
              continue;
            };
            match std::fs::read_to_string(&path)
              .map_err(|e| e.to_string())
              .and_then(|raw| {
                serde_yaml_ng::from_str::<FeatureFile>(&raw)
                  .map_err(|e| e.to_string())
              }) {
              Ok(file) => {
                catalog.insert(name.to_string(), file.feature);
              }
              Err(e) => {
                warn!("skipping manifest '{name}' | {e}")
              }
            }
          }
        }
        Err(e) => {
          warn!("cannot read features dir '{dir}' | {e:#}")
        }
      }
    }
    catalog
  })
}

pub fn available_features() -> Vec<String> {
  catalog().keys().cloned().collect()
}

/// What a feature operation applies to: a single host, or the host
/// sets of a cluster.
#[async_trait]
pub trait Targetable: Send + Sync {
  fn target_name(&self) -> &str;
  fn service(&self) -> &Arc<Service>;
  /// Methods the target supports, preference order.
  fn install_methods(&self) -> Vec<InstallMethod>;
  /// Concrete hosts selected by a step's target quadruple.
  async fn hosts_for(
    &self,
    targets: &StepTargets,
  ) -> Result<Vec<Host>>;
  /// Variables every step on this target starts from.
  async fn base_variables(
    &self,
  ) -> Result<IndexMap<String, String>>;
}

pub struct HostTarget {
  service: Arc<Service>,
  host: Host,
}

impl HostTarget {
  pub fn new(service: Arc<Service>, host: Host) -> HostTarget {
    HostTarget { service, host }
  }
}

#[async_trait]
impl Targetable for HostTarget {
  fn target_name(&self) -> &str {
    &self.host.name
  }

  fn service(&self) -> &Arc<Service> {
    &self.service
  }

  fn install_methods(&self) -> Vec<InstallMethod> {
    vec![InstallMethod::Bash, InstallMethod::Apt]
  }

  async fn hosts_for(
    &self,
    targets: &StepTargets,
  ) -> Result<Vec<Host>> {
    if targets.hosts == "0" {
      return Ok(Vec::new());
    }
    Ok(vec![self.host.clone()])
  }

  async fn base_variables(
    &self,
  ) -> Result<IndexMap<String, String>> {
    let mut vars = IndexMap::new();
    vars.insert(
      "Username".to_string(),
      REMOTE_USER.to_string(),
    );
    Ok(vars)
  }
}

pub struct ClusterTarget {
  service: Arc<Service>,
  cluster: ClusterIdentity,
}

impl ClusterTarget {
  pub fn new(
    service: Arc<Service>,
    cluster: ClusterIdentity,
  ) -> ClusterTarget {
    ClusterTarget { service, cluster }
  }

  async fn load_hosts(&self, ids: &[String]) -> Result<Vec<Host>> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
      out.push(hosts.load(id).await?);
    }
    Ok(out)
  }

  fn pick(selector: &str, mut hosts: Vec<Host>) -> Vec<Host> {
    match selector {
      "1" => {
        hosts.truncate(1);
        hosts
      }
      "*" => hosts,
      _ => Vec::new(),
    }
  }
}

#[async_trait]
impl Targetable for ClusterTarget {
  fn target_name(&self) -> &str {
    &self.cluster.name
  }

  fn service(&self) -> &Arc<Service> {
    &self.service
  }

  fn install_methods(&self) -> Vec<InstallMethod> {
    vec![InstallMethod::Bash, InstallMethod::Apt]
  }

  async fn hosts_for(
    &self,
    targets: &StepTargets,
  ) -> Result<Vec<Host>> {
    let mut selected = Vec::new();
    if targets.gateways != "0"
      && !self.cluster.gateway_id.is_empty()
    {
      let gateways = self
        .load_hosts(std::slice::from_ref(&self.cluster.gateway_id))
        .await?;
      selected.extend(Self::pick(&targets.gateways, gateways));
    }
    if targets.masters != "0" {
      let masters =
        self.load_hosts(&self.cluster.master_ids).await?;
      selected.extend(Self::pick(&targets.masters, masters));
    }
    if targets.nodes != "0" {
      let mut nodes =
        self.load_hosts(&self.cluster.private_node_ids).await?;
      nodes.extend(
        self.load_hosts(&self.cluster.public_node_ids).await?,
      );
      selected.extend(Self::pick(&targets.nodes, nodes));
    }
    if targets.hosts != "0" && selected.is_empty() {
      // "hosts" on a cluster means every member.
      let mut all =
        self.load_hosts(&self.cluster.master_ids).await?;
      all.extend(
        self.load_hosts(&self.cluster.private_node_ids).await?,
      );
      all.extend(
        self.load_hosts(&self.cluster.public_node_ids).await?,
      );
      selected.extend(Self::pick(&targets.hosts, all));
    }
    Ok(selected)
  }

  async fn base_variables(
    &self,
  ) -> Result<IndexMap<String, String>> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut master_ips = Vec::new();
    for id in &self.cluster.master_ids {
      let master = hosts.load(id).await?;
      if let Some(ip) = master.access_ip() {
        master_ips.push(ip);
      }
    }
    let mut vars = IndexMap::new();
    vars.insert(
      "Username".to_string(),
      REMOTE_USER.to_string(),
    );
    vars.insert(
      "ClusterName".to_string(),
      self.cluster.name.clone(),
    );
    vars.insert(
      "ClusterAdminPassword".to_string(),
      self.cluster.admin_password.clone(),
    );
    vars.insert("MasterIPs".to_string(), master_ips.join(","));
    if !self.cluster.gateway_id.is_empty() {
      let gateway =
        hosts.load(&self.cluster.gateway_id).await?;
      if let Some(ip) = gateway.access_ip() {
        vars.insert("GatewayIP".to_string(), ip);
      }
    }
    Ok(vars)
  }
}

/// A loaded manifest, ready to run against targets.
#[derive(Clone)]
pub struct Feature {
  name: String,
  spec: FeatureSpec,
}

impl Feature {
  pub fn load(name: &str) -> Result<Feature> {
    let spec = catalog()
      .get(name)
      .cloned()
      .ok_or_else(|| Error::not_found("feature", name))?;
    Ok(Feature {
      name: name.to_string(),
      spec,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn spec(&self) -> &FeatureSpec {
    &self.spec
  }

  pub fn requirements(&self) -> &[String] {
    &self.spec.requirements.features
  }

  /// Declared parameters merged with the caller's values; a
  /// parameter without default nor value is an error.
  fn resolve_variables(
    &self,
    provided: &IndexMap<String, String>,
  ) -> Result<IndexMap<String, String>> {
    let mut vars = IndexMap::new();
    for declaration in &self.spec.parameters {
      match declaration.split_once('=') {
        Some((name, default)) => {
          vars.insert(name.to_string(), default.to_string());
        }
        None => {
          if !provided.contains_key(declaration) {
            return Err(Error::invalid_parameter(
              declaration,
              format!(
                "required by feature '{}' and not provided",
                self.name
              ),
            ));
          }
        }
      }
    }
    for (name, value) in provided {
      vars.insert(name.clone(), value.clone());
    }
    Ok(vars)
  }

  fn installer_for(
    &self,
    target: &dyn Targetable,
  ) -> Result<(InstallMethod, Box<dyn Installer>)> {
    for method in target.install_methods() {
      if self.spec.install.contains_key(&method.to_string()) {
        let installer: Box<dyn Installer> = match method {
          InstallMethod::Bash => Box::new(BashInstaller {}),
          InstallMethod::Apt => Box::new(GenericPackager::apt()),
          InstallMethod::Yum => Box::new(GenericPackager::yum()),
          InstallMethod::Dnf => Box::new(GenericPackager::dnf()),
        };
        return Ok((method, installer));
      }
    }
    Err(Error::not_available("feature", &self.name))
  }

  pub async fn check(
    &self,
    task: &TaskCtx,
    target: &dyn Targetable,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    self
      .perform(InstallAction::Check, task, target, params, settings)
      .await
  }

  /// Installs the feature, recursively ensuring its requirements
  /// first (unless the settings opt out).
  pub async fn add(
    &self,
    task: &TaskCtx,
    target: &dyn Targetable,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    if !settings.ignore_requirements {
      for required in self.requirements() {
        let requirement = Feature::load(required)?;
        let checked = requirement
          .check(task, target, params, settings)
          .await?;
        if !checked.successful() {
          info!(
            "installing '{required}', required by '{}'",
            self.name
          );
          let added = requirement
            .add_boxed(task, target, params, settings)
            .await?;
          if !added.successful() {
            return Err(Error::not_available(
              "feature requirement",
              required,
            ));
          }
        }
      }
    }
    self
      .perform(InstallAction::Add, task, target, params, settings)
      .await
  }

  // Requirement chains recurse; boxing breaks the future cycle.
  fn add_boxed<'a>(
    &'a self,
    task: &'a TaskCtx,
    target: &'a dyn Targetable,
    params: &'a IndexMap<String, String>,
    settings: &'a FeatureSettings,
  ) -> BoxFuture<'a, Result<Results>> {
    self.add(task, target, params, settings).boxed()
  }

  pub async fn remove(
    &self,
    task: &TaskCtx,
    target: &dyn Targetable,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    self
      .perform(InstallAction::Remove, task, target, params, settings)
      .await
  }

  async fn perform(
    &self,
    action: InstallAction,
    task: &TaskCtx,
    target: &dyn Targetable,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let (method, installer) = self.installer_for(target)?;
    let mut vars = target.base_variables().await?;
    vars.extend(self.resolve_variables(params)?);
    debug!(
      "{action} feature '{}' on '{}' via {method}",
      self.name,
      target.target_name(),
    );
    match action {
      InstallAction::Check => {
        installer.check(self, task, target, &vars, settings).await
      }
      InstallAction::Add => {
        installer.add(self, task, target, &vars, settings).await
      }
      InstallAction::Remove => {
        installer.remove(self, task, target, &vars, settings).await
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use concurrency::TaskCtx;
  use safescale_client::entities::host::SizingRequirements;

  use super::*;
  use crate::handlers::{
    host::HostHandler, network::NetworkHandler, test_service,
  };

  #[test]
  fn embedded_manifests_parse() {
    let catalog = catalog();
    for (name, _) in EMBEDDED_MANIFESTS {
      assert!(
        catalog.contains_key(*name),
        "manifest '{name}' failed to parse"
      );
    }
    let docker = &catalog["docker"];
    let bash = &docker.install["bash"];
    assert!(bash.add.is_some());
    assert!(bash.check.is_some());
    assert!(bash.remove.is_some());
    assert_eq!(
      docker.parameters,
      vec!["DockerComposeVersion=2.24.5".to_string()]
    );
    // reverseproxy declares its docker requirement.
    assert_eq!(
      catalog["reverseproxy"].requirements.features,
      vec!["docker".to_string()]
    );
  }

  async fn host_target() -> (HostTarget, Arc<sshx::ScriptedSsh>) {
    let (service, _, ssh) = test_service();
    let task = TaskCtx::root();
    NetworkHandler::new(service.clone())
      .create(
        &task,
        "net",
        "10.0.0.0/24",
        SizingRequirements::default(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap();
    let host = HostHandler::new(service.clone())
      .create(
        &task,
        "h1",
        "net",
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap();
    (HostTarget::new(service, host), ssh)
  }

  /// add then check reports success; remove then check reports
  /// not-installed.
  #[tokio::test]
  async fn add_check_remove_cycle() {
    let (target, ssh) = host_target().await;
    let task = TaskCtx::root();
    let feature = Feature::load("docker").unwrap();
    let settings = FeatureSettings::default();
    let params = IndexMap::new();

    let added =
      feature.add(&task, &target, &params, &settings).await.unwrap();
    assert!(added.successful());

    let checked = feature
      .check(&task, &target, &params, &settings)
      .await
      .unwrap();
    assert!(checked.successful());

    let removed = feature
      .remove(&task, &target, &params, &settings)
      .await
      .unwrap();
    assert!(removed.successful());

    // Now make the check probe fail: not installed anymore.
    ssh.respond("sudo bash '/var/tmp/docker.installed", 1, "");
    let checked = feature
      .check(&task, &target, &params, &settings)
      .await
      .unwrap();
    assert!(!checked.successful());
  }

  #[tokio::test]
  async fn parameters_without_default_are_required() {
    let feature = Feature {
      name: "needy".to_string(),
      spec: FeatureSpec {
        parameters: vec![
          "WithDefault=x".to_string(),
          "Required".to_string(),
        ],
        ..Default::default()
      },
    };

    let err =
      feature.resolve_variables(&IndexMap::new()).unwrap_err();
    assert!(err.to_string().contains("Required"));

    let mut provided = IndexMap::new();
    provided
      .insert("Required".to_string(), "value".to_string());
    let vars = feature.resolve_variables(&provided).unwrap();
    assert_eq!(vars["WithDefault"], "x");
    assert_eq!(vars["Required"], "value");
  }

  #[tokio::test]
  async fn script_variables_reach_the_rendered_script() {
    let (target, ssh) = host_target().await;
    let task = TaskCtx::root();
    let feature = Feature::load("docker").unwrap();
    let mut params = IndexMap::new();
    params.insert(
      "DockerComposeVersion".to_string(),
      "9.9.9".to_string(),
    );
    feature
      .add(&task, &target, &params, &FeatureSettings::default())
      .await
      .unwrap();
    // Rendering happens before upload: the compose step's uploaded
    // script carries the overridden version, placeholders resolved.
    let compose_script = ssh
      .calls()
      .into_iter()
      .find_map(|call| match call {
        sshx::RecordedCall::Copy {
          remote_path,
          content,
          ..
        } if remote_path.contains("docker.compose") => {
          Some(content)
        }
        _ => None,
      })
      .expect("compose script was uploaded");
    assert!(compose_script.contains("v9.9.9"));
    assert!(!compose_script.contains("[["));
  }
}
