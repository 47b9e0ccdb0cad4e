use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use indexmap::IndexMap;
use safescale_client::{
  entities::TenantSummary,
  error::{Error, Result},
};

use crate::iaas::Service;

static TENANTS: OnceLock<IndexMap<String, Arc<Service>>> =
  OnceLock::new();

/// Must be called in the startup sequence, once.
pub fn init_tenants(tenants: IndexMap<String, Arc<Service>>) {
  if TENANTS.set(tenants).is_err() {
    error!(
      "FATAL: tenants initialized more than once - this should not happen | Exiting..."
    );
    std::process::exit(1)
  }
}

pub fn tenants() -> &'static IndexMap<String, Arc<Service>> {
  TENANTS.get().unwrap_or_else(|| {
    error!(
      "FATAL: tenants accessed before initialized | Ensure init_tenants() is called during startup | Exiting..."
    );
    std::process::exit(1)
  })
}

fn current() -> &'static ArcSwapOption<Service> {
  static CURRENT: OnceLock<ArcSwapOption<Service>> =
    OnceLock::new();
  CURRENT.get_or_init(Default::default)
}

/// The tenant operations run against. Every listener dereferences
/// this per call; no tenant selected is a precondition failure, not
/// an internal error.
pub fn current_service() -> Result<Arc<Service>> {
  current().load_full().ok_or_else(|| {
    Error::precondition(
      "no tenant set: use 'safescale tenant set <name>' first",
    )
  })
}

pub fn set_current_tenant(name: &str) -> Result<()> {
  let service = tenants()
    .get(name)
    .cloned()
    .ok_or_else(|| Error::not_found("tenant", name))?;
  info!("current tenant is now '{name}'");
  current().store(Some(service));
  Ok(())
}

pub fn tenant_summaries() -> Vec<TenantSummary> {
  let selected = current()
    .load_full()
    .map(|service| service.tenant.clone());
  tenants()
    .values()
    .map(|service| TenantSummary {
      name: service.tenant.clone(),
      provider: "emulated".to_string(),
      current: selected.as_deref()
        == Some(service.tenant.as_str()),
    })
    .collect()
}

pub fn current_tenant_summary() -> Option<TenantSummary> {
  tenant_summaries().into_iter().find(|t| t.current)
}
