use std::sync::Arc;

use concurrency::TaskCtx;
use safescale_client::{
  entities::{
    host::{
      Host, HostDescriptionV1, HostRequest, HostSize, HostSizingV1,
      HostState, HostVolumesV1, SizingRequirements, SshAccess,
    },
    network::NetworkHostsV1,
    safescale_timestamp,
    share::HostSharesV1,
    validate_resource_name,
  },
  error::{Error, Result},
};

use super::{Scope, bail_if_aborted, settle, ssh_access};
use crate::{
  iaas::{Service, Stack as _},
  meta::{HostMetadata, NetworkMetadata},
};
use sshx::SshSession as _;

pub struct HostHandler {
  service: Arc<Service>,
}

impl HostHandler {
  pub fn new(service: Arc<Service>) -> HostHandler {
    HostHandler { service }
  }

  pub async fn create(
    &self,
    task: &TaskCtx,
    name: &str,
    network_ref: &str,
    sizing: SizingRequirements,
    os_name: &str,
    public_ip: bool,
  ) -> Result<Host> {
    if !validate_resource_name(name) {
      return Err(Error::invalid_parameter(
        "name",
        format!("'{name}' is not a usable resource name"),
      ));
    }
    bail_if_aborted(task)?;

    let hosts = HostMetadata::new(self.service.clone());
    if hosts.exists(name).await? {
      return Err(Error::already_exists("host", name));
    }

    let networks = NetworkMetadata::new(self.service.clone());
    let network = networks.load(network_ref).await?;

    let mut scope = Scope::new();
    let out = self
      .create_inner(
        task, &mut scope, name, &network, sizing, os_name,
        public_ip, &hosts, &networks,
      )
      .await;
    settle(scope, out).await
  }

  #[allow(clippy::too_many_arguments)]
  async fn create_inner(
    &self,
    task: &TaskCtx,
    scope: &mut Scope,
    name: &str,
    network: &safescale_client::entities::network::Network,
    sizing: SizingRequirements,
    os_name: &str,
    public_ip: bool,
    hosts: &HostMetadata,
    networks: &NetworkMetadata,
  ) -> Result<Host> {
    let service = &self.service;

    let templates =
      service.stack.select_templates_by_size(&sizing).await?;
    let Some(template) = templates.first() else {
      return Err(Error::invalid_parameter(
        "sizing",
        format!(
          "no template matches {} cores, {} GB ram, {} GB disk",
          sizing.min_cores, sizing.min_ram_size, sizing.min_disk_size
        ),
      ));
    };
    let image = service.stack.search_image(os_name).await?;

    let key_pair = service
      .stack
      .create_key_pair(&format!("kp_{name}"))
      .await?;
    {
      let (stack, id) =
        (service.stack.clone(), key_pair.id.clone());
      scope.arm(format!("delete key pair 'kp_{name}'"), async move {
        stack.delete_key_pair(&id).await
      });
    }

    bail_if_aborted(task)?;
    info!(
      "creating host '{name}' on network '{}'",
      network.name
    );
    let created = service
      .stack
      .create_host(&HostRequest {
        resource_name: name.to_string(),
        network_ids: vec![network.id.clone()],
        template_id: template.id.clone(),
        image_id: image.id.clone(),
        key_pair: key_pair.clone(),
        public_ip,
        is_gateway: false,
      })
      .await?;
    {
      let (stack, id) =
        (service.stack.clone(), created.id.clone());
      scope.arm(format!("delete host '{name}'"), async move {
        stack.delete_host(&id).await
      });
    }

    let mut host = service.stack.get_host(&created.id).await?;
    host.private_key = key_pair.private_key.clone();
    let mut host_sizing =
      host.properties.get::<HostSizingV1>()?;
    host_sizing.requested_size = Some(HostSize {
      cores: sizing.min_cores,
      ram_size: sizing.min_ram_size,
      disk_size: sizing.min_disk_size,
      gpu_count: 0,
    });
    host.properties.set(&host_sizing)?;
    host.properties.set(&HostDescriptionV1 {
      created: safescale_timestamp(),
      purpose: String::new(),
    })?;

    hosts.save(&host).await?;
    {
      let (hosts, record) =
        (HostMetadata::new(service.clone()), host.clone());
      scope.arm(format!("delete host '{name}' metadata"), async move {
        hosts.delete(&record).await
      });
    }

    // Register the host on its network, under the network item's
    // process lock.
    {
      let item = networks.item(&network.id);
      let _guard = item.acquire().await;
      let mut stored = networks.load(&network.id).await?;
      stored.properties.alter::<NetworkHostsV1, _>(|attached| {
        attached.attach(&host.id, &host.name);
        Ok(())
      })?;
      networks.save(&stored).await?;
    }
    {
      let (networks, network_id, host_id) = (
        NetworkMetadata::new(service.clone()),
        network.id.clone(),
        host.id.clone(),
      );
      scope.arm(
        format!("detach host '{name}' from network"),
        async move {
          let item = networks.item(&network_id);
          let _guard = item.acquire().await;
          let mut stored = networks.load(&network_id).await?;
          stored
            .properties
            .alter::<NetworkHostsV1, _>(|attached| {
              attached.detach(&host_id);
              Ok(())
            })?;
          networks.save(&stored).await
        },
      );
    }

    bail_if_aborted(task)?;
    service
      .stack
      .wait_host_ready(&host.id, service.timeouts.host_up())
      .await?;
    let access = ssh_access(service, &host).await?;
    service
      .ssh
      .wait_ready(&access, service.timeouts.ssh_up())
      .await?;

    bail_if_aborted(task)?;
    Ok(host)
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<Host> {
    HostMetadata::new(self.service.clone()).load(reference).await
  }

  pub async fn list(&self, _task: &TaskCtx) -> Result<Vec<Host>> {
    HostMetadata::new(self.service.clone()).browse().await
  }

  pub async fn ssh_config(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<SshAccess> {
    let host = self.inspect(task, reference).await?;
    ssh_access(&self.service, &host).await
  }

  /// Refuses while the host serves shares or has volumes attached;
  /// then provider delete (NotFound tolerated), network index
  /// detach, metadata delete.
  pub async fn delete(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let hosts = HostMetadata::new(self.service.clone());
    let host = hosts.load(reference).await?;

    let shares = host.properties.get::<HostSharesV1>()?;
    if !shares.by_name.is_empty() {
      let names: Vec<&str> =
        shares.by_name.keys().map(String::as_str).collect();
      return Err(Error::not_available(
        "host",
        format!(
          "{}: still serving share{} {}",
          host.name,
          if names.len() > 1 { "s" } else { "" },
          names.join(", ")
        ),
      ));
    }
    let volumes = host.properties.get::<HostVolumesV1>()?;
    if !volumes.by_name.is_empty() {
      let names: Vec<&str> =
        volumes.by_name.keys().map(String::as_str).collect();
      return Err(Error::not_available(
        "host",
        format!(
          "{}: still has attached volume{} {}",
          host.name,
          if names.len() > 1 { "s" } else { "" },
          names.join(", ")
        ),
      ));
    }

    bail_if_aborted(task)?;
    match self.service.stack.delete_host(&host.id).await {
      Ok(()) => {}
      Err(e) if e.is_not_found() => {
        warn!(
          "host '{}' already gone provider-side | {e:#}",
          host.name
        );
      }
      Err(e) => return Err(e),
    }

    // Unregister from its networks.
    let networks = NetworkMetadata::new(self.service.clone());
    let attached = host
      .properties
      .get::<safescale_client::entities::host::HostNetworkV1>()?;
    for network_id in attached.networks_by_id.keys() {
      let item = networks.item(network_id);
      let _guard = item.acquire().await;
      match networks.load(network_id).await {
        Ok(mut network) => {
          network
            .properties
            .alter::<NetworkHostsV1, _>(|index| {
              index.detach(&host.id);
              Ok(())
            })?;
          networks.save(&network).await?;
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
      }
    }

    hosts.delete(&host).await
  }

  pub async fn start(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut host = hosts.load(reference).await?;
    self.service.stack.start_host(&host.id).await?;
    host.last_state = HostState::Started;
    hosts.save(&host).await
  }

  pub async fn stop(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut host = hosts.load(reference).await?;
    self.service.stack.stop_host(&host.id).await?;
    host.last_state = HostState::Stopped;
    hosts.save(&host).await
  }

  pub async fn reboot(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let host = HostMetadata::new(self.service.clone())
      .load(reference)
      .await?;
    self.service.stack.reboot_host(&host.id).await
  }

  pub async fn state(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<HostState> {
    let hosts = HostMetadata::new(self.service.clone());
    let mut host = hosts.load(reference).await?;
    let state =
      self.service.stack.get_host_state(&host.id).await?;
    if state != host.last_state {
      host.last_state = state;
      hosts.save(&host).await?;
    }
    Ok(state)
  }

  pub async fn resize(
    &self,
    task: &TaskCtx,
    reference: &str,
    sizing: SizingRequirements,
  ) -> Result<Host> {
    bail_if_aborted(task)?;
    let hosts = HostMetadata::new(self.service.clone());
    let stored = hosts.load(reference).await?;
    let resized = self
      .service
      .stack
      .resize_host(&stored.id, &sizing)
      .await?;
    let mut host = stored;
    let mut host_sizing =
      resized.properties.get::<HostSizingV1>()?;
    host_sizing.requested_size = Some(HostSize {
      cores: sizing.min_cores,
      ram_size: sizing.min_ram_size,
      disk_size: sizing.min_disk_size,
      gpu_count: 0,
    });
    host.properties.set(&host_sizing)?;
    hosts.save(&host).await?;
    Ok(host)
  }
}

#[cfg(test)]
mod tests {
  use concurrency::TaskCtx;

  use super::*;
  use crate::handlers::{network::NetworkHandler, test_service};

  async fn with_network(
    service: &Arc<Service>,
  ) -> safescale_client::entities::network::Network {
    NetworkHandler::new(service.clone())
      .create(
        &TaskCtx::root(),
        "net",
        "10.0.0.0/24",
        SizingRequirements {
          min_cores: 1,
          min_ram_size: 1.0,
          min_disk_size: 10,
        },
        "Ubuntu",
        None,
      )
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn create_inspect_delete_round_trip() {
    let (service, stack, _) = test_service();
    let network = with_network(&service).await;
    let handler = HostHandler::new(service.clone());
    let task = TaskCtx::root();

    let host = handler
      .create(
        &task,
        "worker",
        &network.name,
        SizingRequirements {
          min_cores: 2,
          min_ram_size: 4.0,
          min_disk_size: 20,
        },
        "Ubuntu",
        false,
      )
      .await
      .unwrap();
    assert_eq!(stack.host_count(), 2); // gateway + worker

    // Inspect by name and by id give the same record.
    let by_name =
      handler.inspect(&task, "worker").await.unwrap();
    let by_id =
      handler.inspect(&task, &host.id).await.unwrap();
    assert_eq!(by_name.id, by_id.id);

    // The network index now knows the host.
    let networks = NetworkMetadata::new(service.clone());
    let stored = networks.load(&network.id).await.unwrap();
    let index =
      stored.properties.get::<NetworkHostsV1>().unwrap();
    assert!(index.by_id.contains_key(&host.id));

    handler.delete(&task, "worker").await.unwrap();
    assert_eq!(stack.host_count(), 1);
    assert!(
      handler
        .inspect(&task, "worker")
        .await
        .unwrap_err()
        .is_not_found()
    );
    let stored = networks.load(&network.id).await.unwrap();
    assert!(
      stored
        .properties
        .get::<NetworkHostsV1>()
        .unwrap()
        .is_empty()
    );
  }

  #[tokio::test]
  async fn create_failure_detaches_and_cleans() {
    let (service, stack, ssh) = test_service();
    let network = with_network(&service).await;
    ssh.refuse_ready(true);
    let handler = HostHandler::new(service.clone());

    handler
      .create(
        &TaskCtx::root(),
        "broken",
        &network.name,
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap_err();

    assert_eq!(stack.host_count(), 1); // only the gateway survived
    let networks = NetworkMetadata::new(service.clone());
    let stored = networks.load(&network.id).await.unwrap();
    assert!(
      stored
        .properties
        .get::<NetworkHostsV1>()
        .unwrap()
        .is_empty()
    );
    assert!(
      !HostMetadata::new(service)
        .exists("broken")
        .await
        .unwrap()
    );
  }

  #[tokio::test]
  async fn lifecycle_updates_state() {
    let (service, _, _) = test_service();
    let network = with_network(&service).await;
    let handler = HostHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(
        &task,
        "h",
        &network.name,
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap();

    handler.stop(&task, "h").await.unwrap();
    assert_eq!(
      handler.state(&task, "h").await.unwrap(),
      HostState::Stopped
    );
    handler.start(&task, "h").await.unwrap();
    assert_eq!(
      handler.state(&task, "h").await.unwrap(),
      HostState::Started
    );
  }
}
