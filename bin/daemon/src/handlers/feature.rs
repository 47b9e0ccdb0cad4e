use std::sync::Arc;

use concurrency::TaskCtx;
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    feature::{FeatureSettings, Results},
    host::{HostFeaturesV1, InstalledFeature},
  },
  error::{Error, Result},
};

use super::bail_if_aborted;
use crate::{
  features::{Feature, HostTarget},
  iaas::Service,
  meta::HostMetadata,
};

/// Feature operations on a single host, with the bookkeeping that
/// makes cascading removals detectable: every install records what
/// it required, and marks itself on its requirements' `required_by`.
pub struct HostFeatureHandler {
  service: Arc<Service>,
}

impl HostFeatureHandler {
  pub fn new(service: Arc<Service>) -> HostFeatureHandler {
    HostFeatureHandler { service }
  }

  pub async fn add(
    &self,
    task: &TaskCtx,
    host_ref: &str,
    feature_name: &str,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let feature = Feature::load(feature_name)?;
    let hosts = HostMetadata::new(self.service.clone());
    let host = hosts.load(host_ref).await?;

    bail_if_aborted(task)?;
    let target =
      HostTarget::new(self.service.clone(), host.clone());
    let results =
      feature.add(task, &target, params, settings).await?;
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

    // Record the installation and the requirement edges, under the
    // host's task-keyed lock.
    let lock =
      self.service.tasked_lock(&format!("hosts/{}", host.id));
    lock.lock(task).await?;
    let out = self
      .register(&hosts, &host.id, feature_name, &feature)
      .await;
    lock.unlock(task).await?;
    out?;
    Ok(results)
  }

  async fn register(
    &self,
    hosts: &HostMetadata,
    host_id: &str,
    feature_name: &str,
    feature: &Feature,
  ) -> Result<()> {
    let item = hosts.item(host_id);
    let _guard = item.acquire().await;
    let mut host = hosts.load(host_id).await?;
    host.properties.alter::<HostFeaturesV1, _>(|installed| {
      let record = installed
        .installed
        .entry(feature_name.to_string())
        .or_insert_with(InstalledFeature::default);
      for required in feature.requirements() {
        record.requires.insert(required.clone());
      }
      for required in feature.requirements() {
        installed
          .installed
          .entry(required.clone())
          .or_insert_with(InstalledFeature::default)
          .required_by
          .insert(feature_name.to_string());
      }
      Ok(())
    })?;
    hosts.save(&host).await
  }

  pub async fn check(
    &self,
    task: &TaskCtx,
    host_ref: &str,
    feature_name: &str,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let feature = Feature::load(feature_name)?;
    let host = HostMetadata::new(self.service.clone())
      .load(host_ref)
      .await?;
    bail_if_aborted(task)?;
    let target = HostTarget::new(self.service.clone(), host);
    feature.check(task, &target, params, settings).await
  }

  /// Refuses to remove a feature something else still requires.
  pub async fn remove(
    &self,
    task: &TaskCtx,
    host_ref: &str,
    feature_name: &str,
    params: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let feature = Feature::load(feature_name)?;
    let hosts = HostMetadata::new(self.service.clone());
    let host = hosts.load(host_ref).await?;

    let installed = host.properties.get::<HostFeaturesV1>()?;
    if let Some(record) = installed.installed.get(feature_name) {
      if !record.required_by.is_empty() {
        let names: Vec<&str> = record
          .required_by
          .iter()
          .map(String::as_str)
          .collect();
        return Err(Error::forbidden(format!(
          "cannot remove feature '{feature_name}' from '{}': still required by {}",
          host.name,
          names.join(", ")
        )));
      }
    }

    bail_if_aborted(task)?;
    let target =
      HostTarget::new(self.service.clone(), host.clone());
    let results =
      feature.remove(task, &target, params, settings).await?;
    if !results.successful() {
      return Err(Error::execution(
        1,
        format!(
          "failed to remove feature '{feature_name}' from '{}':\n{}",
          host.name,
          results.error_messages()
        ),
      ));
    }

    let lock =
      self.service.tasked_lock(&format!("hosts/{}", host.id));
    lock.lock(task).await?;
    let out = self
      .unregister(&hosts, &host.id, feature_name)
      .await;
    lock.unlock(task).await?;
    out?;
    Ok(results)
  }

  async fn unregister(
    &self,
    hosts: &HostMetadata,
    host_id: &str,
    feature_name: &str,
  ) -> Result<()> {
    let item = hosts.item(host_id);
    let _guard = item.acquire().await;
    let mut host = hosts.load(host_id).await?;
    host.properties.alter::<HostFeaturesV1, _>(|installed| {
      installed.installed.shift_remove(feature_name);
      for record in installed.installed.values_mut() {
        record.required_by.shift_remove(feature_name);
      }
      Ok(())
    })?;
    hosts.save(&host).await
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

  async fn host(service: &Arc<Service>) -> String {
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
    HostHandler::new(service.clone())
      .create(
        &task,
        "h1",
        "net",
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap()
      .name
  }

  #[tokio::test]
  async fn add_records_requirement_graph() {
    let (service, _, _) = test_service();
    let host_name = host(&service).await;
    let handler = HostFeatureHandler::new(service.clone());
    let task = TaskCtx::root();

    // reverseproxy requires docker; the scripted SSH double lets
    // every remote step succeed.
    let results = handler
      .add(
        &task,
        &host_name,
        "reverseproxy",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap();
    assert!(results.successful());

    let stored = HostMetadata::new(service.clone())
      .load(&host_name)
      .await
      .unwrap();
    let installed =
      stored.properties.get::<HostFeaturesV1>().unwrap();
    let record = &installed.installed["reverseproxy"];
    assert!(record.requires.contains("docker"));
    assert!(
      installed.installed["docker"]
        .required_by
        .contains("reverseproxy")
    );

    // Removing docker is refused while reverseproxy needs it.
    let err = handler
      .remove(
        &task,
        &host_name,
        "docker",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap_err();
    assert!(err.to_string().contains("reverseproxy"));

    // Removing reverseproxy first unblocks docker.
    handler
      .remove(
        &task,
        &host_name,
        "reverseproxy",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap();
    handler
      .remove(
        &task,
        &host_name,
        "docker",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap();

    let stored = HostMetadata::new(service)
      .load(&host_name)
      .await
      .unwrap();
    assert!(
      stored
        .properties
        .get::<HostFeaturesV1>()
        .unwrap()
        .installed
        .is_empty()
    );
  }

  #[tokio::test]
  async fn check_reports_not_installed() {
    let (service, _, ssh) = test_service();
    let host_name = host(&service).await;
    let handler = HostFeatureHandler::new(service.clone());
    let task = TaskCtx::root();

    // The check script exits 1: feature absent, which is a normal
    // outcome for check, not an error.
    ssh.respond("sudo bash '/var/tmp/docker.installed", 1, "");
    let results = handler
      .check(
        &task,
        &host_name,
        "docker",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap();
    assert!(!results.successful());

    let err = handler
      .check(
        &task,
        &host_name,
        "no-such-feature",
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }
}
