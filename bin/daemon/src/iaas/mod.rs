//! The provider-facing side of the daemon: the [`Stack`] capability
//! contract every driver satisfies, and the [`Service`] binding a
//! stack to a tenant's metadata bucket and SSH plumbing.
//!
//! Driver families share behavior by composing helper functions and
//! embedding partial implementations, never by inheritance; a driver
//! implements only what it does differently.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use concurrency::TaskedLock;
use dashmap::DashMap;
use metadata::{Bucket, Folder, Item};
use safescale_client::{
  entities::{
    config::TimeoutConfig,
    host::{
      Host, HostRequest, HostState, HostTemplate, Image, KeyPair,
      SizingRequirements,
    },
    network::{GatewayRequest, Network, NetworkRequest},
    security_group::{
      SecurityGroup, SecurityGroupRequest, SecurityGroupRule,
    },
    volume::{Volume, VolumeAttachment, VolumeRequest},
  },
  error::Result,
};
use sshx::SshSession;

pub mod emulated;

/// Uniform façade over provider primitives. Errors come back
/// classified (`NotFound`, `AlreadyExists`, `NotAvailable`,
/// `Timeout`, transport-`Other`) so handlers can tell terminal logic
/// errors from retriable transport trouble.
#[async_trait]
pub trait Stack: Send + Sync {
  // Compute catalog
  async fn list_images(&self) -> Result<Vec<Image>>;
  async fn get_image(&self, id: &str) -> Result<Image>;
  /// Fuzzy match on the OS name ("Ubuntu 20.04").
  async fn search_image(&self, os_name: &str) -> Result<Image>;
  async fn list_templates(&self) -> Result<Vec<HostTemplate>>;
  async fn get_template(&self, id: &str) -> Result<HostTemplate>;
  /// Templates whose specs are at least the requirements, cheapest
  /// (smallest) first.
  async fn select_templates_by_size(
    &self,
    requirements: &SizingRequirements,
  ) -> Result<Vec<HostTemplate>>;

  // Key pairs
  async fn create_key_pair(&self, name: &str) -> Result<KeyPair>;
  async fn get_key_pair(&self, id: &str) -> Result<KeyPair>;
  async fn delete_key_pair(&self, id: &str) -> Result<()>;
  async fn list_key_pairs(&self) -> Result<Vec<KeyPair>>;

  // Hosts
  async fn create_host(&self, request: &HostRequest) -> Result<Host>;
  async fn get_host(&self, id: &str) -> Result<Host>;
  async fn get_host_by_name(&self, name: &str) -> Result<Host>;
  async fn list_hosts(&self) -> Result<Vec<Host>>;
  async fn delete_host(&self, id: &str) -> Result<()>;
  async fn start_host(&self, id: &str) -> Result<()>;
  async fn stop_host(&self, id: &str) -> Result<()>;
  async fn reboot_host(&self, id: &str) -> Result<()>;
  async fn get_host_state(&self, id: &str) -> Result<HostState>;
  /// Blocks until the provider reports the host usable. SSH
  /// readiness is a separate, later wait.
  async fn wait_host_ready(
    &self,
    id: &str,
    timeout: Duration,
  ) -> Result<Host>;
  async fn resize_host(
    &self,
    id: &str,
    requirements: &SizingRequirements,
  ) -> Result<Host>;

  // Networks
  async fn create_network(
    &self,
    request: &NetworkRequest,
  ) -> Result<Network>;
  async fn get_network(&self, id: &str) -> Result<Network>;
  async fn get_network_by_name(&self, name: &str) -> Result<Network>;
  async fn list_networks(&self) -> Result<Vec<Network>>;
  async fn delete_network(&self, id: &str) -> Result<()>;
  async fn create_gateway(
    &self,
    request: &GatewayRequest,
  ) -> Result<Host>;
  async fn delete_gateway(&self, id: &str) -> Result<()>;

  // Volumes
  async fn create_volume(
    &self,
    request: &VolumeRequest,
  ) -> Result<Volume>;
  async fn get_volume(&self, id: &str) -> Result<Volume>;
  async fn list_volumes(&self) -> Result<Vec<Volume>>;
  async fn delete_volume(&self, id: &str) -> Result<()>;
  async fn create_volume_attachment(
    &self,
    volume_id: &str,
    host_id: &str,
  ) -> Result<VolumeAttachment>;
  async fn delete_volume_attachment(
    &self,
    volume_id: &str,
    attachment_id: &str,
  ) -> Result<()>;

  // Security groups
  async fn create_security_group(
    &self,
    request: &SecurityGroupRequest,
  ) -> Result<SecurityGroup>;
  async fn get_security_group(
    &self,
    id: &str,
  ) -> Result<SecurityGroup>;
  async fn list_security_groups(&self)
  -> Result<Vec<SecurityGroup>>;
  async fn delete_security_group(&self, id: &str) -> Result<()>;
  async fn add_security_group_rule(
    &self,
    id: &str,
    rule: &SecurityGroupRule,
  ) -> Result<()>;
  async fn delete_security_group_rule(
    &self,
    id: &str,
    rule: &SecurityGroupRule,
  ) -> Result<()>;
  /// Drops every rule of the group, provider-side.
  async fn clear_security_group(&self, id: &str) -> Result<()>;
  async fn bind_security_group_to_host(
    &self,
    id: &str,
    host_id: &str,
  ) -> Result<()>;
  async fn unbind_security_group_from_host(
    &self,
    id: &str,
    host_id: &str,
  ) -> Result<()>;
  async fn bind_security_group_to_subnet(
    &self,
    id: &str,
    network_id: &str,
  ) -> Result<()>;
  async fn unbind_security_group_from_subnet(
    &self,
    id: &str,
    network_id: &str,
  ) -> Result<()>;
}

/// Everything a handler needs about one tenant, read-mostly and
/// shared. The item and lock tables make metadata serialization
/// effective across concurrent handlers of this process.
pub struct Service {
  pub tenant: String,
  pub stack: Arc<dyn Stack>,
  pub bucket: Arc<dyn Bucket>,
  pub ssh: Arc<dyn SshSession>,
  pub timeouts: TimeoutConfig,
  items: DashMap<String, Arc<Item>>,
  locks: DashMap<String, Arc<TaskedLock>>,
}

impl Service {
  pub fn new(
    tenant: impl Into<String>,
    stack: Arc<dyn Stack>,
    bucket: Arc<dyn Bucket>,
    ssh: Arc<dyn SshSession>,
    timeouts: TimeoutConfig,
  ) -> Service {
    Service {
      tenant: tenant.into(),
      stack,
      bucket,
      ssh,
      timeouts,
      items: DashMap::new(),
      locks: DashMap::new(),
    }
  }

  pub fn folder(&self, path: &str) -> Folder {
    Folder::new(self.bucket.clone(), path)
  }

  /// The process-wide instance of an item, so acquire/release
  /// actually serializes every user of the same path.
  pub fn item(&self, path: &str, name: &str) -> Arc<Item> {
    self
      .items
      .entry(format!("{path}/{name}"))
      .or_insert_with(|| {
        Arc::new(Item::new(self.folder(path), name))
      })
      .clone()
  }

  /// The task-keyed lock guarding a resource's critical sections.
  pub fn tasked_lock(&self, resource: &str) -> Arc<TaskedLock> {
    self
      .locks
      .entry(resource.to_string())
      .or_insert_with(|| Arc::new(TaskedLock::new()))
      .clone()
  }
}
