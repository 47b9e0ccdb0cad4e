use std::sync::Arc;

use concurrency::TaskCtx;
use safescale_client::{
  entities::{
    security_group::{
      SecurityGroup, SecurityGroupBond, SecurityGroupBondsV1,
      SecurityGroupRequest, SecurityGroupRule,
    },
    validate_resource_name,
  },
  error::{Error, Result},
};

use super::{Scope, bail_if_aborted, settle};
use crate::{
  iaas::{Service, Stack as _},
  meta::{
    HostMetadata, NetworkMetadata, SecurityGroupMetadata,
  },
};

pub struct SecurityGroupHandler {
  service: Arc<Service>,
}

impl SecurityGroupHandler {
  pub fn new(service: Arc<Service>) -> SecurityGroupHandler {
    SecurityGroupHandler { service }
  }

  pub async fn create(
    &self,
    task: &TaskCtx,
    network_ref: &str,
    name: &str,
    description: &str,
    rules: Vec<SecurityGroupRule>,
  ) -> Result<SecurityGroup> {
    if !validate_resource_name(name) {
      return Err(Error::invalid_parameter(
        "name",
        format!("'{name}' is not a usable resource name"),
      ));
    }
    let groups = SecurityGroupMetadata::new(self.service.clone());
    if groups.exists(name).await? {
      return Err(Error::already_exists("security group", name));
    }
    let network = NetworkMetadata::new(self.service.clone())
      .load(network_ref)
      .await?;

    bail_if_aborted(task)?;
    let group = self
      .service
      .stack
      .create_security_group(&SecurityGroupRequest {
        name: name.to_string(),
        network_id: network.id.clone(),
        description: description.to_string(),
        rules,
      })
      .await?;

    let mut scope = Scope::new();
    {
      let (stack, id) =
        (self.service.stack.clone(), group.id.clone());
      scope.arm(
        format!("delete security group '{name}'"),
        async move { stack.delete_security_group(&id).await },
      );
    }
    let out = groups.save(&group).await.map(|()| group);
    settle(scope, out).await
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<SecurityGroup> {
    SecurityGroupMetadata::new(self.service.clone())
      .load(reference)
      .await
  }

  pub async fn list(
    &self,
    _task: &TaskCtx,
  ) -> Result<Vec<SecurityGroup>> {
    SecurityGroupMetadata::new(self.service.clone())
      .browse()
      .await
  }

  /// Without `force`, refuses while bound; with it, unbinds
  /// everything first.
  pub async fn delete(
    &self,
    task: &TaskCtx,
    reference: &str,
    force: bool,
  ) -> Result<()> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let group = groups.load(reference).await?;

    let bonds =
      group.properties.get::<SecurityGroupBondsV1>()?;
    if !bonds.is_empty() {
      if !force {
        let mut names: Vec<String> = bonds
          .hosts
          .values()
          .map(|b| format!("host '{}'", b.name))
          .collect();
        names.extend(
          bonds
            .subnets
            .values()
            .map(|b| format!("subnet '{}'", b.name)),
        );
        return Err(Error::not_available(
          "security group",
          format!(
            "{}: still bound to {}",
            group.name,
            names.join(", ")
          ),
        ));
      }
      for host_id in bonds.hosts.keys() {
        self
          .service
          .stack
          .unbind_security_group_from_host(&group.id, host_id)
          .await?;
      }
      for subnet_id in bonds.subnets.keys() {
        self
          .service
          .stack
          .unbind_security_group_from_subnet(&group.id, subnet_id)
          .await?;
      }
    }

    bail_if_aborted(task)?;
    match self
      .service
      .stack
      .delete_security_group(&group.id)
      .await
    {
      Ok(()) => {}
      Err(e) if e.is_not_found() => {
        warn!(
          "security group '{}' already gone provider-side | {e:#}",
          group.name
        );
      }
      Err(e) => return Err(e),
    }
    groups.delete(&group).await
  }

  pub async fn add_rules(
    &self,
    task: &TaskCtx,
    reference: &str,
    rules: Vec<SecurityGroupRule>,
  ) -> Result<SecurityGroup> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let resolved = groups.load(reference).await?;
    let item = groups.item(&resolved.id);
    let _guard = item.acquire().await;
    let mut group = groups.load(&resolved.id).await?;

    bail_if_aborted(task)?;
    for rule in &rules {
      self
        .service
        .stack
        .add_security_group_rule(&group.id, rule)
        .await?;
      group.rules.push(rule.clone());
    }
    groups.save(&group).await?;
    Ok(group)
  }

  /// Drops every rule, provider-side and in metadata.
  pub async fn clear(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<SecurityGroup> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let mut group = groups.load(reference).await?;
    bail_if_aborted(task)?;
    self
      .service
      .stack
      .clear_security_group(&group.id)
      .await?;
    group.rules.clear();
    groups.save(&group).await?;
    Ok(group)
  }

  /// Re-applies the rules recorded in metadata: clears the provider
  /// side, then replays each stored rule. Heals provider drift.
  pub async fn reset(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<SecurityGroup> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let group = groups.load(reference).await?;
    bail_if_aborted(task)?;
    self
      .service
      .stack
      .clear_security_group(&group.id)
      .await?;
    for rule in &group.rules {
      self
        .service
        .stack
        .add_security_group_rule(&group.id, rule)
        .await?;
    }
    Ok(group)
  }

  pub async fn bind_to_host(
    &self,
    task: &TaskCtx,
    reference: &str,
    host_ref: &str,
    disabled: bool,
    mark_default: bool,
  ) -> Result<()> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let mut group = groups.load(reference).await?;
    let host = HostMetadata::new(self.service.clone())
      .load(host_ref)
      .await?;

    bail_if_aborted(task)?;
    if !disabled {
      self
        .service
        .stack
        .bind_security_group_to_host(&group.id, &host.id)
        .await?;
    }
    group
      .properties
      .alter::<SecurityGroupBondsV1, _>(|bonds| {
        bonds.hosts.insert(
          host.id.clone(),
          SecurityGroupBond {
            id: host.id.clone(),
            name: host.name.clone(),
            disabled,
            mark_default,
          },
        );
        Ok(())
      })?;
    groups.save(&group).await
  }

  pub async fn unbind_from_host(
    &self,
    task: &TaskCtx,
    reference: &str,
    host_ref: &str,
  ) -> Result<()> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let mut group = groups.load(reference).await?;
    let host = HostMetadata::new(self.service.clone())
      .load(host_ref)
      .await?;

    bail_if_aborted(task)?;
    self
      .service
      .stack
      .unbind_security_group_from_host(&group.id, &host.id)
      .await?;
    group
      .properties
      .alter::<SecurityGroupBondsV1, _>(|bonds| {
        bonds.hosts.shift_remove(&host.id);
        Ok(())
      })?;
    groups.save(&group).await
  }

  pub async fn bind_to_subnet(
    &self,
    task: &TaskCtx,
    reference: &str,
    network_ref: &str,
    disabled: bool,
    mark_default: bool,
  ) -> Result<()> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let mut group = groups.load(reference).await?;
    let network = NetworkMetadata::new(self.service.clone())
      .load(network_ref)
      .await?;

    bail_if_aborted(task)?;
    if !disabled {
      self
        .service
        .stack
        .bind_security_group_to_subnet(&group.id, &network.id)
        .await?;
    }
    group
      .properties
      .alter::<SecurityGroupBondsV1, _>(|bonds| {
        bonds.subnets.insert(
          network.id.clone(),
          SecurityGroupBond {
            id: network.id.clone(),
            name: network.name.clone(),
            disabled,
            mark_default,
          },
        );
        Ok(())
      })?;
    groups.save(&group).await
  }

  pub async fn unbind_from_subnet(
    &self,
    task: &TaskCtx,
    reference: &str,
    network_ref: &str,
  ) -> Result<()> {
    let groups = SecurityGroupMetadata::new(self.service.clone());
    let mut group = groups.load(reference).await?;
    let network = NetworkMetadata::new(self.service.clone())
      .load(network_ref)
      .await?;

    bail_if_aborted(task)?;
    self
      .service
      .stack
      .unbind_security_group_from_subnet(&group.id, &network.id)
      .await?;
    group
      .properties
      .alter::<SecurityGroupBondsV1, _>(|bonds| {
        bonds.subnets.shift_remove(&network.id);
        Ok(())
      })?;
    groups.save(&group).await
  }
}

#[cfg(test)]
mod tests {
  use concurrency::TaskCtx;
  use safescale_client::entities::{
    host::SizingRequirements,
    security_group::RuleDirection,
  };

  use super::*;
  use crate::{
    handlers::{
      host::HostHandler, network::NetworkHandler, test_service,
    },
    iaas::Stack as _,
  };

  fn rule(port: u16) -> SecurityGroupRule {
    SecurityGroupRule {
      direction: RuleDirection::Ingress,
      protocol: "tcp".to_string(),
      port_from: port,
      port_to: port,
      involved: vec!["0.0.0.0/0".to_string()],
      ..Default::default()
    }
  }

  async fn base(service: &Arc<Service>) -> String {
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
  async fn rules_lifecycle() {
    let (service, _, _) = test_service();
    base(&service).await;
    let handler = SecurityGroupHandler::new(service.clone());
    let task = TaskCtx::root();

    let group = handler
      .create(&task, "net", "web", "web traffic", vec![rule(80)])
      .await
      .unwrap();
    assert_eq!(group.rules.len(), 1);

    let group = handler
      .add_rules(&task, "web", vec![rule(443)])
      .await
      .unwrap();
    assert_eq!(group.rules.len(), 2);

    // Reset replays metadata rules onto the provider.
    let replayed = handler.reset(&task, "web").await.unwrap();
    assert_eq!(replayed.rules.len(), 2);
    let provider_side = service
      .stack
      .get_security_group(&group.id)
      .await
      .unwrap();
    assert_eq!(provider_side.rules.len(), 2);

    let cleared = handler.clear(&task, "web").await.unwrap();
    assert!(cleared.rules.is_empty());
  }

  #[tokio::test]
  async fn binds_block_delete_until_forced() {
    let (service, stack, _) = test_service();
    let host_name = base(&service).await;
    let handler = SecurityGroupHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "net", "sg", "", Vec::new())
      .await
      .unwrap();

    handler
      .bind_to_host(&task, "sg", &host_name, false, true)
      .await
      .unwrap();
    handler
      .bind_to_subnet(&task, "sg", "net", false, false)
      .await
      .unwrap();

    let err =
      handler.delete(&task, "sg", false).await.unwrap_err();
    assert!(err.to_string().contains("host 'h1'"));
    assert!(err.to_string().contains("subnet 'net'"));

    // Unbinding the host is not enough, the subnet bond remains.
    handler
      .unbind_from_host(&task, "sg", &host_name)
      .await
      .unwrap();
    assert!(handler.delete(&task, "sg", false).await.is_err());

    // ForceDelete bypasses the remaining bonds.
    handler.delete(&task, "sg", true).await.unwrap();
    assert!(
      handler
        .inspect(&task, "sg")
        .await
        .unwrap_err()
        .is_not_found()
    );
    assert!(
      stack.list_security_groups().await.unwrap().is_empty()
    );
  }
}
