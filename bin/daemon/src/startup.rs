use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use metadata::{Bucket, DirBucket, MemBucket};
use safescale_client::entities::config::{
  DaemonConfig, ProviderKind, TenantConfig,
};
use sshx::OpenSsh;

use crate::{
  iaas::{Service, emulated::EmulatedStack},
  state,
};

/// Builds one [`Service`] per configured tenant and selects the
/// default one. A daemon without tenants runs, but answers every
/// resource call with a precondition failure until one is added and
/// selected.
pub fn init_tenants(
  config: &'static DaemonConfig,
) -> anyhow::Result<()> {
  let mut tenants = IndexMap::new();
  let mut default = None;

  for tenant in &config.tenants {
    let service = build_service(tenant, config)
      .with_context(|| {
        format!("failed to set up tenant '{}'", tenant.name)
      })?;
    if tenant.default {
      default = Some(tenant.name.clone());
    }
    tenants.insert(tenant.name.clone(), Arc::new(service));
  }

  if tenants.is_empty() {
    warn!(
      "no tenants configured; resource operations will fail until one is defined"
    );
  }

  state::init_tenants(tenants);
  if let Some(name) = default {
    state::set_current_tenant(&name)
      .context("failed to select default tenant")?;
  }
  Ok(())
}

fn build_service(
  tenant: &TenantConfig,
  config: &DaemonConfig,
) -> anyhow::Result<Service> {
  let bucket: Arc<dyn Bucket> = if tenant.metadata_root.is_empty()
  {
    warn!(
      "tenant '{}' has no metadata_root: metadata is in-memory and lost on restart",
      tenant.name
    );
    Arc::new(MemBucket::new())
  } else {
    Arc::new(DirBucket::new(&tenant.metadata_root))
  };

  let stack = match tenant.provider {
    ProviderKind::Emulated => Arc::new(EmulatedStack::new()),
  };

  Ok(Service::new(
    &tenant.name,
    stack,
    bucket,
    Arc::new(OpenSsh::new()),
    config.timeouts.clone(),
  ))
}
