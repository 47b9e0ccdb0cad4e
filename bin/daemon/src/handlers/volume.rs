use std::sync::Arc;

use concurrency::TaskCtx;
use safescale_client::{
  entities::{
    host::{HostVolume, HostVolumesV1},
    share::{HostLocalMount, HostMountsV1},
    validate_resource_name,
    volume::{
      Volume, VolumeAttachment, VolumeAttachmentsV1, VolumeRequest,
      VolumeSpeed, VolumeState,
    },
  },
  error::{Error, Result},
};

use super::{Scope, bail_if_aborted, settle, ssh_access};
use crate::{
  iaas::{Service, Stack as _},
  meta::{HostMetadata, VolumeMetadata},
};
use sshx::SshSession as _;

pub struct VolumeHandler {
  service: Arc<Service>,
}

impl VolumeHandler {
  pub fn new(service: Arc<Service>) -> VolumeHandler {
    VolumeHandler { service }
  }

  pub async fn create(
    &self,
    task: &TaskCtx,
    name: &str,
    size: u32,
    speed: VolumeSpeed,
  ) -> Result<Volume> {
    if !validate_resource_name(name) {
      return Err(Error::invalid_parameter(
        "name",
        format!("'{name}' is not a usable resource name"),
      ));
    }
    if size == 0 {
      return Err(Error::invalid_parameter(
        "size",
        "cannot be zero",
      ));
    }
    let volumes = VolumeMetadata::new(self.service.clone());
    if volumes.exists(name).await? {
      return Err(Error::already_exists("volume", name));
    }

    bail_if_aborted(task)?;
    let volume = self
      .service
      .stack
      .create_volume(&VolumeRequest {
        name: name.to_string(),
        size,
        speed,
      })
      .await?;

    let mut scope = Scope::new();
    {
      let (stack, id) =
        (self.service.stack.clone(), volume.id.clone());
      scope.arm(format!("delete volume '{name}'"), async move {
        stack.delete_volume(&id).await
      });
    }
    let out = volumes.save(&volume).await.map(|()| volume);
    settle(scope, out).await
  }

  pub async fn inspect(
    &self,
    _task: &TaskCtx,
    reference: &str,
  ) -> Result<Volume> {
    VolumeMetadata::new(self.service.clone())
      .load(reference)
      .await
  }

  pub async fn list(
    &self,
    _task: &TaskCtx,
  ) -> Result<Vec<Volume>> {
    VolumeMetadata::new(self.service.clone()).browse().await
  }

  pub async fn delete(
    &self,
    task: &TaskCtx,
    reference: &str,
  ) -> Result<()> {
    let volumes = VolumeMetadata::new(self.service.clone());
    let volume = volumes.load(reference).await?;

    let attachments =
      volume.properties.get::<VolumeAttachmentsV1>()?;
    if !attachments.hosts.is_empty() {
      let hosts = HostMetadata::new(self.service.clone());
      let mut names = Vec::new();
      for host_id in attachments.hosts.keys() {
        names.push(
          hosts
            .load(host_id)
            .await
            .map(|h| h.name)
            .unwrap_or_else(|_| host_id.clone()),
        );
      }
      return Err(Error::not_available(
        "volume",
        format!(
          "{}: still attached to host{} {}",
          volume.name,
          if names.len() > 1 { "s" } else { "" },
          names.join(", ")
        ),
      ));
    }

    bail_if_aborted(task)?;
    match self.service.stack.delete_volume(&volume.id).await {
      Ok(()) => {}
      Err(e) if e.is_not_found() => {
        warn!(
          "volume '{}' already gone provider-side | {e:#}",
          volume.name
        );
      }
      Err(e) => return Err(e),
    }
    volumes.delete(&volume).await
  }

  /// Attaches provider-side, then records the attachment on both
  /// the volume and the host; with a mount path, also formats and
  /// mounts the device remotely and records the local mount.
  pub async fn attach(
    &self,
    task: &TaskCtx,
    volume_ref: &str,
    host_ref: &str,
    mount_path: Option<String>,
    filesystem: &str,
  ) -> Result<VolumeAttachment> {
    let volumes = VolumeMetadata::new(self.service.clone());
    let hosts = HostMetadata::new(self.service.clone());
    let resolved = volumes.load(volume_ref).await?;
    let item = volumes.item(&resolved.id);
    let _item_guard = item.acquire().await;
    let mut volume = volumes.load(&resolved.id).await?;
    let mut host = hosts.load(host_ref).await?;

    let attachments =
      volume.properties.get::<VolumeAttachmentsV1>()?;
    if !attachments.hosts.is_empty() {
      return Err(Error::not_available(
        "volume",
        format!("{}: already attached", volume.name),
      ));
    }

    bail_if_aborted(task)?;
    let attachment = self
      .service
      .stack
      .create_volume_attachment(&volume.id, &host.id)
      .await?;

    let mut scope = Scope::new();
    {
      let (stack, volume_id, attach_id) = (
        self.service.stack.clone(),
        volume.id.clone(),
        attachment.id.clone(),
      );
      scope.arm(
        format!("detach volume '{}'", volume.name),
        async move {
          stack
            .delete_volume_attachment(&volume_id, &attach_id)
            .await
        },
      );
    }
    // A failure between the two metadata writes must not leave one
    // side claiming an attachment the other side lost.
    {
      let (volumes, hosts, volume_before, host_before) = (
        VolumeMetadata::new(self.service.clone()),
        HostMetadata::new(self.service.clone()),
        volume.clone(),
        host.clone(),
      );
      scope.arm(
        format!(
          "restore records of volume '{}' and host '{}'",
          volume.name, host.name
        ),
        async move {
          volumes.save(&volume_before).await?;
          hosts.save(&host_before).await
        },
      );
    }

    let out: Result<VolumeAttachment> = async {
      if let Some(path) = &mount_path {
        bail_if_aborted(task)?;
        let access = ssh_access(&self.service, &host).await?;
        let command = format!(
          "mkfs -t {filesystem} '{device}' && mkdir -p '{path}' && \
           mount -t {filesystem} '{device}' '{path}'",
          device = attachment.device,
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
              "failed to mount volume '{}' on '{}': {}",
              volume.name,
              host.name,
              out.combined()
            ),
          ));
        }
      }

      volume
        .properties
        .alter::<VolumeAttachmentsV1, _>(|attachments| {
          attachments
            .hosts
            .insert(host.id.clone(), attachment.id.clone());
          Ok(())
        })?;
      volume.state = VolumeState::Attached;

      host.properties.alter::<HostVolumesV1, _>(|record| {
        record.by_id.insert(
          volume.id.clone(),
          HostVolume {
            attach_id: attachment.id.clone(),
            device: attachment.device.clone(),
          },
        );
        record
          .by_name
          .insert(volume.name.clone(), volume.id.clone());
        record
          .by_device
          .insert(attachment.device.clone(), volume.id.clone());
        Ok(())
      })?;
      if let Some(path) = &mount_path {
        host.properties.alter::<HostMountsV1, _>(|mounts| {
          mounts.local_mounts_by_device.insert(
            attachment.device.clone(),
            path.clone(),
          );
          mounts.local_mounts_by_path.insert(
            path.clone(),
            HostLocalMount {
              device: attachment.device.clone(),
              path: path.clone(),
              file_system: filesystem.to_string(),
            },
          );
          Ok(())
        })?;
      }

      volumes.save(&volume).await?;
      hosts.save(&host).await?;
      Ok(attachment.clone())
    }
    .await;
    settle(scope, out).await
  }

  pub async fn detach(
    &self,
    task: &TaskCtx,
    volume_ref: &str,
    host_ref: &str,
  ) -> Result<()> {
    let volumes = VolumeMetadata::new(self.service.clone());
    let hosts = HostMetadata::new(self.service.clone());
    let mut volume = volumes.load(volume_ref).await?;
    let mut host = hosts.load(host_ref).await?;

    let attachments =
      volume.properties.get::<VolumeAttachmentsV1>()?;
    let Some(attach_id) =
      attachments.hosts.get(&host.id).cloned()
    else {
      return Err(Error::not_found(
        "attachment",
        format!(
          "volume '{}' on host '{}'",
          volume.name, host.name
        ),
      ));
    };

    // Unmount first when the volume was mounted.
    let record = host.properties.get::<HostVolumesV1>()?;
    let device = record
      .by_id
      .get(&volume.id)
      .map(|v| v.device.clone())
      .unwrap_or_default();
    let mounts = host.properties.get::<HostMountsV1>()?;
    if let Some(path) =
      mounts.local_mounts_by_device.get(&device).cloned()
    {
      bail_if_aborted(task)?;
      let access = ssh_access(&self.service, &host).await?;
      let out = self
        .service
        .ssh
        .run(
          &access,
          &format!("umount '{path}'"),
          self.service.timeouts.execution(),
        )
        .await?;
      if !out.success() {
        return Err(Error::execution(
          out.retcode,
          format!(
            "failed to unmount volume '{}' from '{}': {}",
            volume.name,
            host.name,
            out.combined()
          ),
        ));
      }
      host.properties.alter::<HostMountsV1, _>(|mounts| {
        mounts.local_mounts_by_device.shift_remove(&device);
        mounts.local_mounts_by_path.shift_remove(&path);
        Ok(())
      })?;
    }

    bail_if_aborted(task)?;
    self
      .service
      .stack
      .delete_volume_attachment(&volume.id, &attach_id)
      .await?;

    volume
      .properties
      .alter::<VolumeAttachmentsV1, _>(|attachments| {
        attachments.hosts.shift_remove(&host.id);
        Ok(())
      })?;
    volume.state = VolumeState::Available;
    host.properties.alter::<HostVolumesV1, _>(|record| {
      record.by_id.shift_remove(&volume.id);
      record.by_name.shift_remove(&volume.name);
      record.by_device.shift_remove(&device);
      Ok(())
    })?;

    volumes.save(&volume).await?;
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
  async fn attach_records_both_sides() {
    let (service, _, ssh) = test_service();
    let host_name = host(&service).await;
    let handler = VolumeHandler::new(service.clone());
    let task = TaskCtx::root();

    let volume = handler
      .create(&task, "data", 100, VolumeSpeed::Ssd)
      .await
      .unwrap();
    let attachment = handler
      .attach(
        &task,
        "data",
        &host_name,
        Some("/data".to_string()),
        "ext4",
      )
      .await
      .unwrap();
    assert_eq!(attachment.device, "/dev/vdb");
    assert!(ssh.ran_command_containing("mkfs -t ext4"));

    let stored =
      handler.inspect(&task, "data").await.unwrap();
    assert_eq!(stored.state, VolumeState::Attached);
    let attachments = stored
      .properties
      .get::<VolumeAttachmentsV1>()
      .unwrap();
    assert_eq!(attachments.hosts.len(), 1);

    let stored_host = HostMetadata::new(service.clone())
      .load(&host_name)
      .await
      .unwrap();
    let record = stored_host
      .properties
      .get::<HostVolumesV1>()
      .unwrap();
    assert!(record.by_name.contains_key("data"));
    let mounts = stored_host
      .properties
      .get::<HostMountsV1>()
      .unwrap();
    assert!(mounts.local_mounts_by_path.contains_key("/data"));
    assert_eq!(volume.id, stored.id);
  }

  #[tokio::test]
  async fn second_attachment_is_refused() {
    let (service, _, _) = test_service();
    let host_name = host(&service).await;
    let handler = VolumeHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "v", 10, VolumeSpeed::Hdd)
      .await
      .unwrap();
    handler
      .attach(&task, "v", &host_name, None, "ext4")
      .await
      .unwrap();
    let err = handler
      .attach(&task, "v", &host_name, None, "ext4")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("already attached"));
  }

  #[tokio::test]
  async fn delete_refuses_attached_then_detach_clears() {
    let (service, stack, _) = test_service();
    let host_name = host(&service).await;
    let handler = VolumeHandler::new(service.clone());
    let task = TaskCtx::root();
    handler
      .create(&task, "v", 10, VolumeSpeed::Hdd)
      .await
      .unwrap();
    handler
      .attach(
        &task,
        "v",
        &host_name,
        Some("/data".to_string()),
        "ext4",
      )
      .await
      .unwrap();

    let err = handler.delete(&task, "v").await.unwrap_err();
    assert!(err.to_string().contains("h1"));

    handler.detach(&task, "v", &host_name).await.unwrap();
    let stored = handler.inspect(&task, "v").await.unwrap();
    assert_eq!(stored.state, VolumeState::Available);
    let stored_host = HostMetadata::new(service.clone())
      .load(&host_name)
      .await
      .unwrap();
    assert!(
      stored_host
        .properties
        .get::<HostVolumesV1>()
        .unwrap()
        .by_id
        .is_empty()
    );
    assert!(
      stored_host
        .properties
        .get::<HostMountsV1>()
        .unwrap()
        .local_mounts_by_path
        .is_empty()
    );

    handler.delete(&task, "v").await.unwrap();
    assert_eq!(stack.volume_count(), 0);
  }
}
