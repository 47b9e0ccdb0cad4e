//! Multi-node orchestration: the flavor-agnostic engine that builds
//! and tears down clusters, fanning the per-node work out through
//! task groups and delegating role specifics to the flavor.

use std::{sync::Arc, time::Duration};

use concurrency::{Task, TaskCtx, TaskGroup};
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    cluster::{
      ClusterIdentity, ClusterRequest, ClusterState, NodeType,
    },
    host::SizingRequirements,
    validate_resource_name,
  },
  error::{Error, ErrorList, Result},
};

use crate::{
  handlers::{
    bail_if_aborted, generate_password, host::HostHandler,
    network::NetworkHandler,
  },
  iaas::{Service, Stack as _},
  meta::{ClusterMetadata, HostMetadata},
};

pub mod flavor;
pub mod flavors;

use flavor::{ClusterOps, Flavor, flavor_for};

pub struct ClusterHandler {
  service: Arc<Service>,
}

impl ClusterHandler {
  pub fn new(service: Arc<Service>) -> ClusterHandler {
    ClusterHandler { service }
  }

  pub async fn create(
    &self,
    task: &TaskCtx,
    request: ClusterRequest,
  ) -> Result<ClusterIdentity> {
    if !validate_resource_name(&request.name) {
      return Err(Error::invalid_parameter(
        "name",
        format!("'{}' is not a usable cluster name", request.name),
      ));
    }
    let flavor = flavor_for(request.flavor)?;
    let clusters = ClusterMetadata::new(self.service.clone());
    if clusters.exists(&request.name).await? {
      return Err(Error::already_exists(
        "cluster",
        &request.name,
      ));
    }

    bail_if_aborted(task)?;
    let counts =
      flavor.minimum_required_servers(request.complexity);
    info!(
      "creating cluster '{}' ({} flavor, {} complexity): {} master{}, {} node{}",
      request.name,
      request.flavor,
      request.complexity,
      counts.masters,
      if counts.masters > 1 { "s" } else { "" },
      counts.private_nodes + counts.public_nodes,
      if counts.private_nodes + counts.public_nodes > 1 {
        "s"
      } else {
        ""
      },
    );

    // The network plus its gateway, through the network saga.
    let network_name = format!("net-{}", request.name);
    let network = NetworkHandler::new(self.service.clone())
      .create(
        task,
        &network_name,
        &request.cidr,
        flavor.default_gateway_sizing(),
        flavor.default_image(),
        Some(format!("gw-{}", request.name)),
      )
      .await?;

    let key_pair = match self
      .service
      .stack
      .create_key_pair(&format!("kp_cluster_{}", request.name))
      .await
    {
      Ok(key_pair) => key_pair,
      Err(e) => {
        return Err(
          self
            .cleanup_network(task, &network_name, e)
            .await,
        );
      }
    };

    let mut identity = ClusterIdentity {
      name: request.name.clone(),
      flavor: request.flavor,
      complexity: request.complexity,
      cidr: request.cidr.clone(),
      network_id: network.id.clone(),
      gateway_id: network.gateway_id.clone(),
      admin_password: generate_password(),
      key_pair,
      state: ClusterState::Creating,
      disabled_features: request.disabled_features.clone(),
      nodes_def: request.nodes_def.clone(),
      ..Default::default()
    };
    if let Err(e) = clusters.save(&identity).await {
      return Err(
        self.cleanup_network(task, &network_name, e).await,
      );
    }

    let built = self
      .build_members(task, flavor, &mut identity, counts)
      .await;
    // Whatever happened, persist the ids of what exists now.
    clusters.save(&identity).await?;

    if let Err(e) = built {
      if request.keep_on_failure {
        warn!(
          "cluster '{}' build failed, keeping partial resources for inspection | {e:#}",
          identity.name
        );
        identity.state = ClusterState::Error;
        clusters.save(&identity).await?;
        return Err(e);
      }
      let e = self.teardown(task, &identity, e).await;
      return Err(e);
    }

    identity.state = ClusterState::Created;
    // Flavor-specific payload; the engine only stores it.
    identity.properties.set(
      &safescale_client::entities::cluster::ClusterCompositeV1 {
        payload: serde_json::json!({
          "flavor": identity.flavor.to_string(),
          "built": safescale_client::entities::safescale_timestamp(),
        }),
      },
    )?;
    clusters.save(&identity).await?;

    // Drive to Nominal.
    let ops = ClusterOps {
      service: self.service.clone(),
      task,
      identity: identity.clone(),
    };
    let deadline =
      tokio::time::Instant::now() + flavor.nominal_budget();
    loop {
      bail_if_aborted(task)?;
      match flavor.state(&ops).await? {
        ClusterState::Nominal => {
          identity.state = ClusterState::Nominal;
          break;
        }
        state if tokio::time::Instant::now() >= deadline => {
          warn!(
            "cluster '{}' did not reach Nominal in time (still {state})",
            identity.name
          );
          identity.state = ClusterState::Degraded;
          break;
        }
        _ => tokio::time::sleep(Duration::from_secs(5)).await,
      }
    }
    clusters.save(&identity).await?;
    Ok(identity)
  }

  /// The parallel middle of the build: reverseproxy on the gateway,
  /// masters and nodes each in their own subtask, then the flavor
  /// configuration hooks.
  async fn build_members(
    &self,
    task: &TaskCtx,
    flavor: &'static dyn Flavor,
    identity: &mut ClusterIdentity,
    counts: flavor::NodeCounts,
  ) -> Result<()> {
    let hosts = HostMetadata::new(self.service.clone());

    let proxy_task: Task<()> = Task::new(Some(task));
    {
      let service = self.service.clone();
      let identity = identity.clone();
      proxy_task
        .start(move |ctx| async move {
          let ops = ClusterOps {
            service: service.clone(),
            task: &ctx,
            identity,
          };
          let gateway = ops.gateway().await?;
          ops
            .install_feature(
              &gateway,
              "reverseproxy",
              IndexMap::new(),
            )
            .await
        })
        .await?;
    }

    if !identity.disabled_features.contains("proxycache") {
      let ops = ClusterOps {
        service: self.service.clone(),
        task,
        identity: identity.clone(),
      };
      let gateway = ops.gateway().await?;
      ops
        .install_feature(
          &gateway,
          "proxycache-server",
          IndexMap::new(),
        )
        .await?;
    }

    let group: TaskGroup<(NodeType, String)> =
      TaskGroup::new(Some(task));
    for index in 1..=counts.masters {
      self
        .start_member_task(
          &group,
          flavor,
          identity,
          NodeType::Master,
          index,
        )
        .await?;
    }
    for index in 1..=counts.private_nodes {
      self
        .start_member_task(
          &group,
          flavor,
          identity,
          NodeType::PrivateNode,
          index,
        )
        .await?;
    }
    for index in 1..=counts.public_nodes {
      self
        .start_member_task(
          &group,
          flavor,
          identity,
          NodeType::PublicNode,
          index,
        )
        .await?;
    }

    let (results, members_error) = group.wait_group().await;
    for (_, (node_type, host_id)) in results {
      match node_type {
        NodeType::Master => identity.master_ids.push(host_id),
        NodeType::PrivateNode => {
          identity.private_node_ids.push(host_id)
        }
        NodeType::PublicNode => {
          identity.public_node_ids.push(host_id)
        }
        NodeType::Gateway => {}
      }
    }

    let proxy_error = proxy_task.wait().await.err();

    let mut errors = ErrorList::default();
    if let Some(e) = members_error {
      errors.push(e);
    }
    if let Some(e) = proxy_error {
      errors.push(
        Error::other("reverseproxy installation failed")
          .with_consequence(e),
      );
    }
    errors.into_result()?;

    // Flavor hooks, gateway first.
    let ops = ClusterOps {
      service: self.service.clone(),
      task,
      identity: identity.clone(),
    };
    flavor.configure_gateway(&ops).await?;
    for id in &identity.master_ids {
      let master = hosts.load(id).await?;
      flavor.configure_master(&ops, &master).await?;
    }
    for id in identity
      .private_node_ids
      .iter()
      .chain(identity.public_node_ids.iter())
    {
      let node = hosts.load(id).await?;
      flavor.configure_node(&ops, &node).await?;
    }
    Ok(())
  }

  async fn start_member_task(
    &self,
    group: &TaskGroup<(NodeType, String)>,
    flavor: &'static dyn Flavor,
    identity: &ClusterIdentity,
    node_type: NodeType,
    index: u32,
  ) -> Result<()> {
    let service = self.service.clone();
    let identity = identity.clone();
    group
      .start(move |ctx| async move {
        let host_id = create_member(
          service, &ctx, flavor, &identity, node_type, index,
        )
        .await?;
        Ok((node_type, host_id))
      })
      .await?;
    Ok(())
  }

  async fn cleanup_network(
    &self,
    task: &TaskCtx,
    network_name: &str,
    primary: Error,
  ) -> Error {
    match NetworkHandler::new(self.service.clone())
      .delete(task, network_name)
      .await
    {
      Ok(()) => primary,
      Err(e) => primary.with_consequence(e),
    }
  }

  /// Best-effort cascade removal of everything a failed build left
  /// behind; every cleanup failure is attached to the primary.
  async fn teardown(
    &self,
    task: &TaskCtx,
    identity: &ClusterIdentity,
    primary: Error,
  ) -> Error {
    warn!(
      "cluster '{}' build failed, tearing down | {primary:#}",
      identity.name
    );
    let mut primary = primary;
    let host_handler = HostHandler::new(self.service.clone());
    for id in identity
      .private_node_ids
      .iter()
      .chain(identity.public_node_ids.iter())
      .chain(identity.master_ids.iter())
    {
      match host_handler.delete(task, id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => primary = primary.with_consequence(e),
      }
    }
    primary = self
      .cleanup_network(
        task,
        &format!("net-{}", identity.name),
        primary,
      )
      .await;
    if let Err(e) = self
      .service
      .stack
      .delete_key_pair(&identity.key_pair.id)
      .await
    {
      if !e.is_not_found() {
        primary = primary.with_consequence(e);
      }
    }
    if let Err(e) = ClusterMetadata::new(self.service.clone())
      .delete(&identity.name)
      .await
    {
      primary = primary.with_consequence(e);
    }
    primary
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    name: &str,
  ) -> Result<ClusterIdentity> {
    ClusterMetadata::new(self.service.clone()).load(name).await
  }

  pub async fn list(
    &self,
    _task: &TaskCtx,
  ) -> Result<Vec<ClusterIdentity>> {
    ClusterMetadata::new(self.service.clone()).browse().await
  }

  pub async fn state(
    &self,
    task: &TaskCtx,
    name: &str,
  ) -> Result<ClusterState> {
    let clusters = ClusterMetadata::new(self.service.clone());
    let mut identity = clusters.load(name).await?;
    let flavor = flavor_for(identity.flavor)?;
    let ops = ClusterOps {
      service: self.service.clone(),
      task,
      identity: identity.clone(),
    };
    let state = match identity.state {
      // Terminal or in-flight states are authoritative.
      ClusterState::Creating
      | ClusterState::Removed
      | ClusterState::Stopped => identity.state,
      _ => flavor.state(&ops).await?,
    };
    if state != identity.state {
      identity.state = state;
      clusters.save(&identity).await?;
    }
    Ok(state)
  }

  /// Adds `count` nodes, each in its own subtask with a wall-time
  /// proportional to the batch size. On any failure the successful
  /// newcomers are deleted again.
  pub async fn add_nodes(
    &self,
    task: &TaskCtx,
    name: &str,
    count: u32,
    public: bool,
  ) -> Result<Vec<String>> {
    if count == 0 {
      return Err(Error::invalid_parameter(
        "count",
        "cannot be zero",
      ));
    }
    let clusters = ClusterMetadata::new(self.service.clone());
    let item = clusters.item(name);
    let _item_guard = item.acquire().await;
    let mut identity = clusters.load(name).await?;
    let flavor = flavor_for(identity.flavor)?;

    let node_type = if public {
      NodeType::PublicNode
    } else {
      NodeType::PrivateNode
    };
    let existing = identity.node_ids(public).len() as u32;
    let per_task_budget =
      self.service.timeouts.execution() * count;

    let group: TaskGroup<(NodeType, String)> =
      TaskGroup::new(Some(task));
    for offset in 1..=count {
      let service = self.service.clone();
      let identity_snapshot = identity.clone();
      group
        .start_with_timeout(
          move |ctx| async move {
            let host_id = create_member(
              service,
              &ctx,
              flavor,
              &identity_snapshot,
              node_type,
              existing + offset,
            )
            .await?;
            Ok((node_type, host_id))
          },
          Some(per_task_budget),
        )
        .await?;
    }

    let (results, error) = group.wait_group().await;
    let created: Vec<String> = results
      .into_values()
      .map(|(_, host_id)| host_id)
      .collect();

    if let Some(primary) = error {
      let mut primary = primary;
      let host_handler = HostHandler::new(self.service.clone());
      for host_id in &created {
        if let Err(e) = host_handler.delete(task, host_id).await {
          primary = primary.with_consequence(e);
        }
      }
      return Err(primary);
    }

    if public {
      identity.public_node_ids.extend(created.clone());
    } else {
      identity.private_node_ids.extend(created.clone());
    }
    clusters.save(&identity).await?;
    Ok(created)
  }

  pub async fn delete_node(
    &self,
    task: &TaskCtx,
    name: &str,
    node_ref: &str,
  ) -> Result<()> {
    let clusters = ClusterMetadata::new(self.service.clone());
    let item = clusters.item(name);
    let _item_guard = item.acquire().await;
    let mut identity = clusters.load(name).await?;
    let host = HostMetadata::new(self.service.clone())
      .load(node_ref)
      .await?;

    let in_private =
      identity.private_node_ids.contains(&host.id);
    let in_public = identity.public_node_ids.contains(&host.id);
    if !in_private && !in_public {
      return Err(Error::not_found(
        "cluster node",
        format!("{node_ref} in cluster {name}"),
      ));
    }

    bail_if_aborted(task)?;
    HostHandler::new(self.service.clone())
      .delete(task, &host.id)
      .await?;
    identity.private_node_ids.retain(|id| id != &host.id);
    identity.public_node_ids.retain(|id| id != &host.id);
    clusters.save(&identity).await
  }

  /// Marks the cluster Removed, then deletes nodes, masters,
  /// gateway, network, key pair and finally the metadata record.
  pub async fn delete(
    &self,
    task: &TaskCtx,
    name: &str,
  ) -> Result<()> {
    let clusters = ClusterMetadata::new(self.service.clone());
    let mut identity = clusters.load(name).await?;

    bail_if_aborted(task)?;
    identity.state = ClusterState::Removed;
    clusters.save(&identity).await?;

    let host_handler = HostHandler::new(self.service.clone());
    let mut errors = ErrorList::default();
    for id in identity
      .private_node_ids
      .iter()
      .chain(identity.public_node_ids.iter())
      .chain(identity.master_ids.iter())
    {
      match host_handler.delete(task, id).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => errors.push(e),
      }
    }
    errors.into_result()?;

    NetworkHandler::new(self.service.clone())
      .delete(task, &format!("net-{name}"))
      .await?;

    match self
      .service
      .stack
      .delete_key_pair(&identity.key_pair.id)
      .await
    {
      Ok(()) => {}
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e),
    }

    clusters.delete(name).await
  }
}

/// Creates one cluster member and brings it to its role: host,
/// proxycache client (unless disabled), flavor install script,
/// docker.
async fn create_member(
  service: Arc<Service>,
  task: &TaskCtx,
  flavor: &'static dyn Flavor,
  identity: &ClusterIdentity,
  node_type: NodeType,
  index: u32,
) -> Result<String> {
  let role = match node_type {
    NodeType::Master => "master",
    NodeType::PrivateNode => "node",
    NodeType::PublicNode => "pubnode",
    NodeType::Gateway => {
      return Err(Error::invalid_parameter(
        "node_type",
        "gateways are built with the network",
      ));
    }
  };
  let host_name =
    format!("{}-{role}-{index}", identity.name);

  let mut sizing = match node_type {
    NodeType::Master => flavor.default_master_sizing(),
    _ => flavor.default_node_sizing(),
  };
  if let Some(def) = &identity.nodes_def {
    sizing = SizingRequirements {
      min_cores: def.cores,
      min_ram_size: def.ram_size,
      min_disk_size: def.disk_size,
    };
  }

  info!(
    "[{}] creating {role} #{index} '{host_name}'",
    identity.name
  );
  let host = HostHandler::new(service.clone())
    .create(
      task,
      &host_name,
      &format!("net-{}", identity.name),
      sizing,
      flavor.default_image(),
      node_type == NodeType::PublicNode,
    )
    .await?;

  let ops = ClusterOps {
    service: service.clone(),
    task,
    identity: identity.clone(),
  };

  if !identity.disabled_features.contains("proxycache") {
    let mut params = IndexMap::new();
    if let Some(ip) = ops.variables().await?.get("GatewayIP") {
      params.insert("GatewayIP".to_string(), ip.clone());
    }
    ops
      .install_feature(&host, "proxycache-client", params)
      .await?;
  }

  let prelude = flavor.global_system_requirements();
  let (script_name, mut script) =
    flavor.node_installation_script(node_type);
  if !prelude.is_empty() {
    script = format!("{prelude}\n{script}");
  }
  ops
    .execute_script(&host, &script_name, &script, IndexMap::new())
    .await?;

  ops
    .install_feature(&host, "docker", IndexMap::new())
    .await?;

  info!(
    "[{}] {role} #{index} '{host_name}' ready",
    identity.name
  );
  Ok(host.id)
}

#[cfg(test)]
mod tests {
  use safescale_client::entities::cluster::{
    ClusterComplexity, ClusterFlavor,
  };

  use super::*;
  use crate::handlers::test_service;

  fn request(name: &str) -> ClusterRequest {
    ClusterRequest {
      name: name.to_string(),
      flavor: ClusterFlavor::Boh,
      complexity: ClusterComplexity::Small,
      cidr: "192.168.0.0/16".to_string(),
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn boh_small_builds_and_deletes() {
    let (service, stack, _) = test_service();
    let handler = ClusterHandler::new(service.clone());
    let task = TaskCtx::root();

    let identity =
      handler.create(&task, request("c1")).await.unwrap();
    assert_eq!(identity.state, ClusterState::Nominal);
    assert_eq!(identity.master_ids.len(), 1);
    assert_eq!(identity.private_node_ids.len(), 1);
    assert!(identity.public_node_ids.is_empty());
    assert_eq!(identity.admin_password.len(), 16);

    // gateway + master + node
    assert_eq!(stack.host_count(), 3);
    assert_eq!(stack.network_count(), 1);

    assert_eq!(
      handler.state(&task, "c1").await.unwrap(),
      ClusterState::Nominal
    );

    handler.delete(&task, "c1").await.unwrap();
    assert_eq!(stack.host_count(), 0);
    assert_eq!(stack.network_count(), 0);
    assert!(
      handler
        .inspect(&task, "c1")
        .await
        .unwrap_err()
        .is_not_found()
    );
  }

  #[tokio::test]
  async fn build_failure_cascades_cleanup() {
    let (service, stack, ssh) = test_service();
    let handler = ClusterHandler::new(service.clone());
    let task = TaskCtx::root();

    // The master's host creation will fail provider-side.
    stack.fail_once("create_host");
    let err = handler
      .create(&task, request("broken"))
      .await
      .unwrap_err();
    assert!(!err.to_string().is_empty());

    assert_eq!(stack.host_count(), 0);
    assert_eq!(stack.network_count(), 0);
    assert!(
      !ClusterMetadata::new(service.clone())
        .exists("broken")
        .await
        .unwrap()
    );
    drop(ssh);
  }

  #[tokio::test]
  async fn keep_on_failure_preserves_partial_build() {
    let (service, stack, _) = test_service();
    let handler = ClusterHandler::new(service.clone());
    let task = TaskCtx::root();

    stack.fail_once("create_host");
    let mut req = request("kept");
    req.keep_on_failure = true;
    handler.create(&task, req).await.unwrap_err();

    // The network and gateway survive for post-mortem.
    assert_eq!(stack.network_count(), 1);
    assert!(stack.host_count() >= 1);
    let identity = handler.inspect(&task, "kept").await.unwrap();
    assert_eq!(identity.state, ClusterState::Error);
  }

  #[tokio::test]
  async fn add_and_delete_nodes() {
    let (service, stack, _) = test_service();
    let handler = ClusterHandler::new(service.clone());
    let task = TaskCtx::root();
    handler.create(&task, request("c2")).await.unwrap();

    let added = handler
      .add_nodes(&task, "c2", 2, false)
      .await
      .unwrap();
    assert_eq!(added.len(), 2);
    let identity = handler.inspect(&task, "c2").await.unwrap();
    assert_eq!(identity.private_node_ids.len(), 3);
    assert_eq!(stack.host_count(), 5);

    handler
      .delete_node(&task, "c2", &added[0])
      .await
      .unwrap();
    let identity = handler.inspect(&task, "c2").await.unwrap();
    assert_eq!(identity.private_node_ids.len(), 2);
    assert_eq!(stack.host_count(), 4);

    handler.delete(&task, "c2").await.unwrap();
    assert_eq!(stack.host_count(), 0);
  }

  #[tokio::test]
  async fn unknown_flavor_is_refused() {
    let (service, _, _) = test_service();
    let handler = ClusterHandler::new(service);
    let mut req = request("k");
    req.flavor = ClusterFlavor::K8s;
    let err = handler
      .create(&TaskCtx::root(), req)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("cluster flavor"));
  }
}
