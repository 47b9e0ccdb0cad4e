use std::sync::Arc;

use concurrency::TaskCtx;
use safescale_client::{
  entities::{
    host::{
      HostSize, HostSizingV1, SizingRequirements,
    },
    network::{
      GatewayRequest, Network, NetworkHostsV1, NetworkRequest,
      validate_cidr,
    },
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

pub struct NetworkHandler {
  service: Arc<Service>,
}

impl NetworkHandler {
  pub fn new(service: Arc<Service>) -> NetworkHandler {
    NetworkHandler { service }
  }

  /// Creates the network AND its gateway; on any failure the armed
  /// compensations tear down whatever was built, so provider state
  /// and metadata stay in lockstep.
  pub async fn create(
    &self,
    task: &TaskCtx,
    name: &str,
    cidr: &str,
    sizing: SizingRequirements,
    os_name: &str,
    gateway_name: Option<String>,
  ) -> Result<Network> {
    if !validate_resource_name(name) {
      return Err(Error::invalid_parameter(
        "name",
        format!("'{name}' is not a usable resource name"),
      ));
    }
    validate_cidr(cidr)?;
    bail_if_aborted(task)?;

    let networks = NetworkMetadata::new(self.service.clone());
    let hosts = HostMetadata::new(self.service.clone());
    if networks.exists(name).await? {
      return Err(Error::already_exists("network", name));
    }
    // The provider may know a network metadata lost track of.
    match self.service.stack.get_network_by_name(name).await {
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e),
      Ok(_) => {
        return Err(Error::already_exists("network", name));
      }
    }

    let mut scope = Scope::new();
    let out = self
      .create_inner(
        task,
        &mut scope,
        name,
        cidr,
        sizing,
        os_name,
        gateway_name,
        &networks,
        &hosts,
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
    cidr: &str,
    sizing: SizingRequirements,
    os_name: &str,
    gateway_name: Option<String>,
    networks: &NetworkMetadata,
    hosts: &HostMetadata,
  ) -> Result<Network> {
    let service = &self.service;

    debug!("creating network '{name}' ({cidr})");
    let mut network = service
      .stack
      .create_network(&NetworkRequest {
        name: name.to_string(),
        cidr: cidr.to_string(),
        ip_version: Default::default(),
      })
      .await?;
    {
      let (stack, id) =
        (service.stack.clone(), network.id.clone());
      scope.arm(format!("delete network '{name}'"), async move {
        stack.delete_network(&id).await
      });
    }

    networks.save(&network).await?;
    {
      let (networks, record) =
        (NetworkMetadata::new(service.clone()), network.clone());
      scope.arm(
        format!("delete network '{name}' metadata"),
        async move { networks.delete(&record).await },
      );
    }

    let gateway_name =
      gateway_name.unwrap_or_else(|| format!("gw-{name}"));
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
      "creating gateway '{gateway_name}' with image '{}'",
      image.name
    );
    let gateway = service
      .stack
      .create_gateway(&GatewayRequest {
        name: gateway_name.clone(),
        network_id: network.id.clone(),
        cidr: network.cidr.clone(),
        template_id: template.id.clone(),
        image_id: image.id.clone(),
        key_pair: key_pair.clone(),
      })
      .await?;
    {
      let (stack, id) =
        (service.stack.clone(), gateway.id.clone());
      scope.arm(
        format!("delete gateway '{gateway_name}'"),
        async move { stack.delete_host(&id).await },
      );
    }

    // Reload so every provider-filled property is in the record.
    let mut gateway = service.stack.get_host(&gateway.id).await?;
    gateway.private_key = key_pair.private_key.clone();
    let mut gw_sizing =
      gateway.properties.get::<HostSizingV1>()?;
    gw_sizing.requested_size = Some(HostSize {
      cores: sizing.min_cores,
      ram_size: sizing.min_ram_size,
      disk_size: sizing.min_disk_size,
      gpu_count: 0,
    });
    gateway.properties.set(&gw_sizing)?;

    hosts.save(&gateway).await?;
    {
      let (hosts, record) =
        (HostMetadata::new(service.clone()), gateway.clone());
      scope.arm(
        format!("delete gateway '{gateway_name}' metadata"),
        async move { hosts.delete(&record).await },
      );
    }

    bail_if_aborted(task)?;
    // A host claimed ready by the provider is not necessarily
    // usable until SSH answers; wait for both, in order.
    service
      .stack
      .wait_host_ready(&gateway.id, service.timeouts.host_up())
      .await?;
    info!(
      "waiting until gateway '{gateway_name}' is reachable over SSH"
    );
    let access = ssh_access(service, &gateway).await?;
    service
      .ssh
      .wait_ready(&access, service.timeouts.ssh_up())
      .await?;

    network.gateway_id = gateway.id.clone();
    networks.save(&network).await?;

    bail_if_aborted(task)?;
    Ok(network)
  }

  pub async fn list(
    &self,
    _task: &TaskCtx,
    all: bool,
  ) -> Result<Vec<Network>> {
    if all {
      return self.service.stack.list_networks().await;
    }
    NetworkMetadata::new(self.service.clone()).browse().await
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<Network> {
    NetworkMetadata::new(self.service.clone())
      .load(reference)
      .await
  }

  /// Refuses while hosts beyond the gateway are attached; deletes
  /// gateway first, then the provider network, then metadata. Once
  /// destruction started it runs to its end: an abort observed
  /// afterwards reports what was already destroyed instead of
  /// recreating anything.
  pub async fn delete(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let networks = NetworkMetadata::new(self.service.clone());
    let network = networks.load(reference).await?;

    let attached =
      network.properties.get::<NetworkHostsV1>()?;
    if !attached.is_empty() {
      let names: Vec<&str> =
        attached.by_name.keys().map(String::as_str).collect();
      return Err(Error::not_available(
        "network",
        format!(
          "{}: still has attached hosts: {}",
          network.name,
          names.join(", ")
        ),
      ));
    }

    // Last chance to give up cleanly; past this point the delete
    // is not interruptible.
    bail_if_aborted(task)?;

    let hosts = HostMetadata::new(self.service.clone());
    if !network.gateway_id.is_empty() {
      match hosts.load(&network.gateway_id).await {
        Ok(gateway) => {
          if let Err(e) = self
            .service
            .stack
            .delete_gateway(&gateway.id)
            .await
          {
            if !e.is_not_found() {
              return Err(e);
            }
            warn!(
              "gateway '{}' already gone provider-side | {e:#}",
              gateway.name
            );
          }
          hosts.delete(&gateway).await?;
        }
        Err(e) if e.is_not_found() => {
          warn!(
            "network '{}' references a gateway without metadata",
            network.name
          );
        }
        Err(e) => return Err(e),
      }
    }

    match self.service.stack.delete_network(&network.id).await {
      Ok(()) => {}
      Err(e) if e.is_not_found() => {
        warn!(
          "network '{}' was not found provider-side, removing metadata only",
          network.name
        );
      }
      Err(e) => return Err(e),
    }

    networks.delete(&network).await?;

    if task.aborted() {
      return Err(Error::aborted(None).with_consequence(
        Error::other(format!(
          "network '{}' and its gateway were already deleted when the abort was observed",
          network.name
        )),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use concurrency::TaskCtx;
  use safescale_client::error::ErrorKind;

  use super::*;
  use crate::{handlers::test_service, iaas::Stack as _};

  fn sizing() -> SizingRequirements {
    SizingRequirements {
      min_cores: 2,
      min_ram_size: 4.0,
      min_disk_size: 60,
    }
  }

  #[tokio::test]
  async fn create_provisions_network_and_gateway() {
    let (service, stack, ssh) = test_service();
    let handler = NetworkHandler::new(service.clone());
    let task = TaskCtx::root();

    let network = handler
      .create(
        &task,
        "n1",
        "10.0.0.0/24",
        sizing(),
        "Ubuntu 18.04",
        None,
      )
      .await
      .unwrap();

    assert!(!network.gateway_id.is_empty());
    assert_eq!(stack.network_count(), 1);
    assert_eq!(stack.host_count(), 1);
    assert!(matches!(
      ssh.calls().as_slice(),
      [sshx::RecordedCall::WaitReady { host }] if host == "gw-n1"
    ));

    // Metadata agrees with the provider.
    let loaded =
      handler.inspect(&task, "n1").await.unwrap();
    assert_eq!(loaded.id, network.id);
    assert_eq!(loaded.gateway_id, network.gateway_id);
    let gateway = HostMetadata::new(service)
      .load(&network.gateway_id)
      .await
      .unwrap();
    assert_eq!(gateway.name, "gw-n1");
    let gw_sizing =
      gateway.properties.get::<HostSizingV1>().unwrap();
    assert_eq!(gw_sizing.requested_size.unwrap().cores, 2);
  }

  #[tokio::test]
  async fn create_rejects_duplicate_names() {
    let (service, _, _) = test_service();
    let handler = NetworkHandler::new(service);
    let task = TaskCtx::root();
    handler
      .create(
        &task,
        "dup",
        "10.1.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap();
    let err = handler
      .create(
        &task,
        "dup",
        "10.2.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap_err();
    assert!(matches!(
      err.kind(),
      ErrorKind::AlreadyExists { .. }
    ));
  }

  /// Gateway never reachable: everything built before the SSH wait
  /// must be compensated away, metadata included.
  #[tokio::test]
  async fn ssh_timeout_rolls_back_everything() {
    let (service, stack, ssh) = test_service();
    ssh.refuse_ready(true);
    let handler = NetworkHandler::new(service.clone());
    let task = TaskCtx::root();

    let err = handler
      .create(
        &task,
        "doomed",
        "10.3.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap_err();
    assert!(err.is_timeout());

    assert_eq!(stack.network_count(), 0);
    assert_eq!(stack.host_count(), 0);
    assert_eq!(stack.key_pair_count(), 0);
    let networks = NetworkMetadata::new(service.clone());
    assert!(!networks.exists("doomed").await.unwrap());
    assert!(
      !HostMetadata::new(service)
        .exists("gw-doomed")
        .await
        .unwrap()
    );
  }

  #[tokio::test]
  async fn gateway_failure_rolls_back_network() {
    let (service, stack, _) = test_service();
    stack.fail_once("create_gateway");
    let handler = NetworkHandler::new(service.clone());
    let task = TaskCtx::root();

    handler
      .create(
        &task,
        "half",
        "10.4.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap_err();
    assert_eq!(stack.network_count(), 0);
    assert!(
      !NetworkMetadata::new(service)
        .exists("half")
        .await
        .unwrap()
    );
  }

  #[tokio::test]
  async fn delete_refuses_with_attached_hosts() {
    let (service, _, _) = test_service();
    let handler = NetworkHandler::new(service.clone());
    let task = TaskCtx::root();
    let network = handler
      .create(
        &task,
        "busy",
        "10.5.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap();

    // Attach a host record, as the host handler would.
    let networks = NetworkMetadata::new(service.clone());
    let mut stored = networks.load(&network.id).await.unwrap();
    stored
      .properties
      .alter::<NetworkHostsV1, _>(|hosts| {
        hosts.attach("host-1", "worker-1");
        Ok(())
      })
      .unwrap();
    networks.save(&stored).await.unwrap();

    let err =
      handler.delete(&task, "busy").await.unwrap_err();
    assert!(err.to_string().contains("worker-1"));

    // Detach and the delete goes through.
    stored
      .properties
      .alter::<NetworkHostsV1, _>(|hosts| {
        hosts.detach("host-1");
        Ok(())
      })
      .unwrap();
    networks.save(&stored).await.unwrap();
    handler.delete(&task, "busy").await.unwrap();
    assert!(!networks.exists("busy").await.unwrap());
  }

  #[tokio::test]
  async fn delete_tolerates_missing_provider_network() {
    let (service, stack, _) = test_service();
    let handler = NetworkHandler::new(service.clone());
    let task = TaskCtx::root();
    let network = handler
      .create(
        &task,
        "ghost",
        "10.6.0.0/24",
        sizing(),
        "Ubuntu",
        None,
      )
      .await
      .unwrap();

    // Someone deleted it behind our back.
    stack.delete_network(&network.id).await.unwrap();

    handler.delete(&task, "ghost").await.unwrap();
    assert!(
      !NetworkMetadata::new(service)
        .exists("ghost")
        .await
        .unwrap()
    );
  }
}
