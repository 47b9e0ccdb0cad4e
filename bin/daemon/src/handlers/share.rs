use std::sync::Arc;

use concurrency::TaskCtx;
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    feature::FeatureSettings,
    host::Host,
    share::{
      HostMountsV1, HostRemoteMount, HostShare, HostSharesV1,
      ShareDetail,
    },
  },
  error::{Error, Result},
};
use uuid::Uuid;

use super::{bail_if_aborted, ssh_access};
use crate::{
  features::{Feature, HostTarget},
  iaas::Service,
  meta::{HostMetadata, ShareIndex, ShareIndexEntry},
};
use sshx::SshSession as _;

/// A share and its client mounts always change together: the server
/// host's `SharesV1` and each client's `MountsV1` are persisted in
/// the same operation, under the task-keyed lock of the server
/// host.
pub struct ShareHandler {
  service: Arc<Service>,
}

impl ShareHandler {
  pub fn new(service: Arc<Service>) -> ShareHandler {
    ShareHandler { service }
  }

  fn sanitize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
      return Err(Error::invalid_parameter(
        "path",
        format!("'{path}' must be absolute"),
      ));
    }
    let mut cleaned: Vec<&str> = Vec::new();
    for part in path.split('/') {
      match part {
        "" | "." => {}
        ".." => {
          if cleaned.pop().is_none() {
            return Err(Error::invalid_parameter(
              "path",
              format!("'{path}' escapes the filesystem root"),
            ));
          }
        }
        part => cleaned.push(part),
      }
    }
    Ok(format!("/{}", cleaned.join("/")))
  }

  pub async fn create(
    &self,
    task: &TaskCtx,
    share_name: &str,
    host_ref: &str,
    path: &str,
  ) -> Result<HostShare> {
    let index = ShareIndex::new(self.service.clone());
    if index.exists(share_name).await? {
      return Err(Error::already_exists("share", share_name));
    }
    let share_path = Self::sanitize(path)?;

    let hosts = HostMetadata::new(self.service.clone());
    let server = hosts.load(host_ref).await?;

    let lock =
      self.service.tasked_lock(&format!("hosts/{}", server.id));
    lock.lock(task).await?;
    let out = self
      .create_locked(task, share_name, &share_path, &server, &hosts, &index)
      .await;
    lock.unlock(task).await?;
    out
  }

  async fn create_locked(
    &self,
    task: &TaskCtx,
    share_name: &str,
    share_path: &str,
    server: &Host,
    hosts: &HostMetadata,
    index: &ShareIndex,
  ) -> Result<HostShare> {
    let mut server = hosts.load(&server.id).await?;
    let mut shares = server.properties.get::<HostSharesV1>()?;

    bail_if_aborted(task)?;
    if shares.by_id.is_empty() {
      // First share on this host: make it an NFS server.
      Feature::load("nfs-server")?
        .add(
          task,
          &HostTarget::new(self.service.clone(), server.clone()),
          &IndexMap::new(),
          &FeatureSettings::default(),
        )
        .await?;
    }

    bail_if_aborted(task)?;
    let access = ssh_access(&self.service, &server).await?;
    let export = format!(
      "mkdir -p '{share_path}' && \
       printf '%s *(rw,sync,no_subtree_check)\\n' '{share_path}' >> /etc/exports && \
       exportfs -ra"
    );
    let out = self
      .service
      .ssh
      .run(&access, &export, self.service.timeouts.execution())
      .await?;
    if !out.success() {
      return Err(Error::execution(
        out.retcode,
        format!(
          "failed to export '{share_path}' on '{}': {}",
          server.name,
          out.combined()
        ),
      ));
    }

    let share = HostShare {
      id: Uuid::new_v4().to_string(),
      name: share_name.to_string(),
      path: share_path.to_string(),
      share_type: "nfs".to_string(),
      ..Default::default()
    };
    shares.by_id.insert(share.id.clone(), share.clone());
    shares
      .by_name
      .insert(share.name.clone(), share.id.clone());
    server.properties.set(&shares)?;

    hosts.save(&server).await?;
    index
      .save(&ShareIndexEntry {
        share_id: share.id.clone(),
        share_name: share.name.clone(),
        host_id: server.id.clone(),
        host_name: server.name.clone(),
      })
      .await?;
    Ok(share)
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    share_name: &str,
  ) -> Result<ShareDetail> {
    let entry = ShareIndex::new(self.service.clone())
      .load(share_name)
      .await?;
    let server = HostMetadata::new(self.service.clone())
      .load(&entry.host_id)
      .await?;
    let shares = server.properties.get::<HostSharesV1>()?;
    let share = shares
      .by_id
      .get(&entry.share_id)
      .cloned()
      .ok_or_else(|| {
        Error::inconsistent(format!(
          "share '{share_name}' is indexed but missing from host '{}'",
          server.name
        ))
      })?;
    Ok(ShareDetail {
      server_id: server.id,
      server_name: server.name,
      share,
    })
  }

  /// Never null: no shares means an empty map.
  pub async fn list(
    &self,
    _task: &TaskCtx,
  ) -> Result<IndexMap<String, IndexMap<String, HostShare>>> {
    let mut out = IndexMap::new();
    let hosts = HostMetadata::new(self.service.clone());
    for entry in
      ShareIndex::new(self.service.clone()).browse().await?
    {
      if out.contains_key(&entry.host_name) {
        continue;
      }
      let server = hosts.load(&entry.host_id).await?;
      let shares = server.properties.get::<HostSharesV1>()?;
      out.insert(entry.host_name.clone(), shares.by_id);
    }
    Ok(out)
  }

  pub async fn mount(
    &self,
    task: &TaskCtx,
    share_name: &str,
    host_ref: &str,
    path: &str,
  ) -> Result<HostRemoteMount> {
    let mount_path = Self::sanitize(path)?;
    let detail = self.inspect(task, share_name).await?;

    let hosts = HostMetadata::new(self.service.clone());
    let target = hosts.load(host_ref).await?;

    let lock = self
      .service
      .tasked_lock(&format!("hosts/{}", detail.server_id));
    lock.lock(task).await?;
    let out = self
      .mount_locked(task, &detail, &target, &mount_path, &hosts)
      .await;
    lock.unlock(task).await?;
    out
  }

  async fn mount_locked(
    &self,
    task: &TaskCtx,
    detail: &ShareDetail,
    target: &Host,
    mount_path: &str,
    hosts: &HostMetadata,
  ) -> Result<HostRemoteMount> {
    let mut target = hosts.load(&target.id).await?;
    let mut server = hosts.load(&detail.server_id).await?;
    let mut mounts =
      target.properties.get::<HostMountsV1>()?;

    // Collision rules: nothing already mounted at the path, and no
    // nesting inside an existing remote mount either way.
    for local in mounts.local_mounts_by_path.keys() {
      if local == mount_path {
        return Err(Error::invalid_parameter(
          "path",
          format!(
            "cannot mount share '{}' on '{}': a volume is already mounted at '{mount_path}'",
            detail.share.name, target.name
          ),
        ));
      }
    }
    for remote in mounts.remote_mounts_by_path.keys() {
      let nested = mount_path
        .strip_prefix(remote.as_str())
        .is_some_and(|rest| {
          rest.is_empty() || rest.starts_with('/')
        });
      let wraps = remote
        .strip_prefix(mount_path)
        .is_some_and(|rest| {
          rest.is_empty() || rest.starts_with('/')
        });
      if nested || wraps {
        return Err(Error::invalid_parameter(
          "path",
          format!(
            "cannot mount share '{}' on '{}': another share is mounted at '{remote}'",
            detail.share.name, target.name
          ),
        ));
      }
    }

    bail_if_aborted(task)?;
    Feature::load("nfs-client")?
      .add(
        task,
        &HostTarget::new(self.service.clone(), target.clone()),
        &IndexMap::new(),
        &FeatureSettings::default(),
      )
      .await?;

    let server_ip = server
      .access_ip()
      .ok_or_else(|| {
        Error::not_available("host", &server.name)
      })?;
    let export = format!("{server_ip}:{}", detail.share.path);

    bail_if_aborted(task)?;
    let access = ssh_access(&self.service, &target).await?;
    let command = format!(
      "mkdir -p '{mount_path}' && mount -t nfs '{export}' '{mount_path}'"
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
          "failed to mount '{export}' on '{}': {}",
          target.name,
          out.combined()
        ),
      ));
    }

    // Record on both sides, then persist both records.
    let mut shares = server.properties.get::<HostSharesV1>()?;
    if let Some(share) = shares.by_id.get_mut(&detail.share.id) {
      share
        .clients_by_id
        .insert(target.id.clone(), target.name.clone());
      share
        .clients_by_name
        .insert(target.name.clone(), target.id.clone());
    }
    server.properties.set(&shares)?;

    let mount = HostRemoteMount {
      share_id: detail.share.id.clone(),
      export: export.clone(),
      path: mount_path.to_string(),
      file_system: "nfs".to_string(),
    };
    mounts
      .remote_mounts_by_path
      .insert(mount.path.clone(), mount.clone());
    mounts
      .remote_mounts_by_share_id
      .insert(mount.share_id.clone(), mount.path.clone());
    mounts
      .remote_mounts_by_export
      .insert(mount.export.clone(), mount.path.clone());
    target.properties.set(&mounts)?;

    hosts.save(&target).await?;
    hosts.save(&server).await?;
    Ok(mount)
  }

  pub async fn unmount(
    &self,
    task: &TaskCtx,
    share_name: &str,
    host_ref: &str,
  ) -> Result<()> {
    let detail = self.inspect(task, share_name).await?;
    let hosts = HostMetadata::new(self.service.clone());
    let target = hosts.load(host_ref).await?;

    let lock = self
      .service
      .tasked_lock(&format!("hosts/{}", detail.server_id));
    lock.lock(task).await?;
    let out = self
      .unmount_locked(task, &detail, &target, &hosts)
      .await;
    lock.unlock(task).await?;
    out
  }

  async fn unmount_locked(
    &self,
    task: &TaskCtx,
    detail: &ShareDetail,
    target: &Host,
    hosts: &HostMetadata,
  ) -> Result<()> {
    let mut target = hosts.load(&target.id).await?;
    let mut server = hosts.load(&detail.server_id).await?;

    let mut mounts =
      target.properties.get::<HostMountsV1>()?;
    let Some(mount_path) = mounts
      .remote_mounts_by_share_id
      .get(&detail.share.id)
      .cloned()
    else {
      return Err(Error::not_found(
        "mount",
        format!(
          "share '{}' on host '{}'",
          detail.share.name, target.name
        ),
      ));
    };

    bail_if_aborted(task)?;
    let access = ssh_access(&self.service, &target).await?;
    let out = self
      .service
      .ssh
      .run(
        &access,
        &format!("umount '{mount_path}'"),
        self.service.timeouts.execution(),
      )
      .await?;
    if !out.success() {
      return Err(Error::execution(
        out.retcode,
        format!(
          "failed to unmount '{mount_path}' on '{}': {}",
          target.name,
          out.combined()
        ),
      ));
    }

    if let Some(mount) =
      mounts.remote_mounts_by_path.shift_remove(&mount_path)
    {
      mounts
        .remote_mounts_by_share_id
        .shift_remove(&mount.share_id);
      mounts.remote_mounts_by_export.shift_remove(&mount.export);
    }
    target.properties.set(&mounts)?;

    let mut shares = server.properties.get::<HostSharesV1>()?;
    if let Some(share) = shares.by_id.get_mut(&detail.share.id) {
      share.clients_by_id.shift_remove(&target.id);
      share.clients_by_name.shift_remove(&target.name);
    }
    server.properties.set(&shares)?;

    hosts.save(&target).await?;
    hosts.save(&server).await?;
    Ok(())
  }

  /// Refuses while any client still mounts the share, naming them.
  pub async fn delete(
    &self,
    task: &TaskCtx,
    share_name: &str,
  ) -> Result<()> {
    let detail = self.inspect(task, share_name).await?;
    if !detail.share.clients_by_name.is_empty() {
      let names: Vec<&str> = detail
        .share
        .clients_by_name
        .keys()
        .map(String::as_str)
        .collect();
      return Err(Error::not_available(
        "share",
        format!(
          "{share_name}: still mounted by host{} {}",
          if names.len() > 1 { "s" } else { "" },
          names.join(", ")
        ),
      ));
    }

    let hosts = HostMetadata::new(self.service.clone());
    let lock = self
      .service
      .tasked_lock(&format!("hosts/{}", detail.server_id));
    lock.lock(task).await?;
    let out = self
      .delete_locked(task, &detail, share_name, &hosts)
      .await;
    lock.unlock(task).await?;
    out
  }

  async fn delete_locked(
    &self,
    task: &TaskCtx,
    detail: &ShareDetail,
    share_name: &str,
    hosts: &HostMetadata,
  ) -> Result<()> {
    let mut server = hosts.load(&detail.server_id).await?;

    bail_if_aborted(task)?;
    let access = ssh_access(&self.service, &server).await?;
    let command = format!(
      "sed -i '\\#^{}[[:space:]]#d' /etc/exports && exportfs -ra",
      detail.share.path
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
          "failed to unexport '{}' on '{}': {}",
          detail.share.path,
          server.name,
          out.combined()
        ),
      ));
    }

    let mut shares = server.properties.get::<HostSharesV1>()?;
    shares.by_id.shift_remove(&detail.share.id);
    shares.by_name.shift_remove(&detail.share.name);
    server.properties.set(&shares)?;

    hosts.save(&server).await?;
    ShareIndex::new(self.service.clone())
      .delete(share_name)
      .await
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

  async fn two_hosts(
    service: &Arc<Service>,
  ) -> (Host, Host) {
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
    let hosts = HostHandler::new(service.clone());
    let server = hosts
      .create(
        &task,
        "server",
        "net",
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap();
    let client = hosts
      .create(
        &task,
        "client",
        "net",
        SizingRequirements::default(),
        "Ubuntu",
        false,
      )
      .await
      .unwrap();
    (server, client)
  }

  #[tokio::test]
  async fn create_installs_nfs_once_and_records() {
    let (service, _, ssh) = test_service();
    let (server, _) = two_hosts(&service).await;
    let handler = ShareHandler::new(service.clone());
    let task = TaskCtx::root();

    let nfs_installs = |ssh: &sshx::ScriptedSsh| {
      ssh
        .calls()
        .iter()
        .filter(|c| {
          matches!(c, sshx::RecordedCall::Copy { remote_path, .. } if remote_path.contains("nfs-server."))
        })
        .count()
    };

    let share = handler
      .create(&task, "data", &server.name, "/exports/data/")
      .await
      .unwrap();
    assert_eq!(share.path, "/exports/data");
    // The NFS server feature ran: its script was uploaded and
    // executed on the serving host.
    assert_eq!(nfs_installs(&ssh), 1);
    assert!(ssh.ran_command_containing("exportfs -ra"));

    // Second share on the same host: no second NFS install.
    handler
      .create(&task, "logs", &server.name, "/exports/logs")
      .await
      .unwrap();
    assert_eq!(nfs_installs(&ssh), 1);

    let detail =
      handler.inspect(&task, "data").await.unwrap();
    assert_eq!(detail.server_name, "server");

    let listed = handler.list(&task).await.unwrap();
    assert_eq!(listed["server"].len(), 2);
  }

  #[tokio::test]
  async fn sanitize_rejects_relative_paths() {
    assert!(ShareHandler::sanitize("relative/path").is_err());
    assert!(ShareHandler::sanitize("/a/../../etc").is_err());
    assert_eq!(
      ShareHandler::sanitize("/a/b/../c/.").unwrap(),
      "/a/c"
    );
  }

  #[tokio::test]
  async fn mount_updates_both_sides() {
    let (service, _, _) = test_service();
    let (server, client) = two_hosts(&service).await;
    let handler = ShareHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "data", &server.name, "/exports/data")
      .await
      .unwrap();

    let mount = handler
      .mount(&task, "data", &client.name, "/mnt/data")
      .await
      .unwrap();
    assert_eq!(mount.file_system, "nfs");
    assert!(mount.export.ends_with(":/exports/data"));

    let hosts = HostMetadata::new(service.clone());
    let stored_client =
      hosts.load(&client.id).await.unwrap();
    let mounts = stored_client
      .properties
      .get::<HostMountsV1>()
      .unwrap();
    assert!(
      mounts.remote_mounts_by_path.contains_key("/mnt/data")
    );

    let detail = handler.inspect(&task, "data").await.unwrap();
    assert!(
      detail.share.clients_by_name.contains_key("client")
    );
  }

  /// Mounting under an existing share mount is refused both ways.
  #[tokio::test]
  async fn nested_mounts_collide() {
    let (service, _, _) = test_service();
    let (server, client) = two_hosts(&service).await;
    let handler = ShareHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "a", &server.name, "/exports/a")
      .await
      .unwrap();
    handler
      .create(&task, "b", &server.name, "/exports/b")
      .await
      .unwrap();
    handler
      .mount(&task, "a", &client.name, "/mnt/a")
      .await
      .unwrap();

    let err = handler
      .mount(&task, "b", &client.name, "/mnt/a/b")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("another share is mounted"));

    let err = handler
      .mount(&task, "b", &client.name, "/mnt")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("another share is mounted"));

    // An unrelated prefix like /mnt/ab is fine.
    handler
      .mount(&task, "b", &client.name, "/mnt/ab")
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn delete_refuses_then_succeeds_after_unmount() {
    let (service, _, _) = test_service();
    let (server, client) = two_hosts(&service).await;
    let handler = ShareHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "data", &server.name, "/exports/data")
      .await
      .unwrap();
    handler
      .mount(&task, "data", &client.name, "/mnt/data")
      .await
      .unwrap();

    let err =
      handler.delete(&task, "data").await.unwrap_err();
    assert!(err.to_string().contains("client"));

    handler
      .unmount(&task, "data", &client.name)
      .await
      .unwrap();
    handler.delete(&task, "data").await.unwrap();
    assert!(
      handler
        .inspect(&task, "data")
        .await
        .unwrap_err()
        .is_not_found()
    );

    // The server host no longer serves anything.
    let stored = HostMetadata::new(service)
      .load(&server.id)
      .await
      .unwrap();
    assert!(
      stored
        .properties
        .get::<HostSharesV1>()
        .unwrap()
        .by_id
        .is_empty()
    );
  }
}
