//! Installers by method. The bash installer drives manifest phases
//! step by step; the package-manager installers all share
//! [`GenericPackager`], differing only by their three command
//! builders.

use async_trait::async_trait;
use concurrency::TaskCtx;
use indexmap::IndexMap;
use safescale_client::{
  entities::feature::{
    FeatureSettings, InstallAction, InstallMethod, PhaseSpec,
    Results, StepSpec,
  },
  error::{Error, Result},
};

use super::{Feature, Targetable};
use crate::features::step::{StepTargets, run_step};

#[async_trait]
pub trait Installer: Send + Sync {
  async fn check(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results>;

  async fn add(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results>;

  async fn remove(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results>;
}

pub struct BashInstaller {}

impl BashInstaller {
  fn phase<'s>(
    feature: &'s Feature,
    action: InstallAction,
  ) -> Result<Option<&'s PhaseSpec>> {
    let installer = feature
      .spec()
      .install
      .get(&InstallMethod::Bash.to_string())
      .ok_or_else(|| {
        Error::not_available("feature", feature.name())
      })?;
    Ok(installer.phase(action))
  }

  async fn run_phase(
    &self,
    feature: &Feature,
    action: InstallAction,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let mut results = Results::default();
    let Some(phase) = Self::phase(feature, action)? else {
      // A manifest without the phase: nothing to run. For check
      // that means "cannot probe", reported as not successful.
      return Ok(results);
    };

    for (step_name, spec) in &phase.steps {
      let targets = if spec.targets.is_empty() {
        StepTargets::default_for_step()
      } else {
        StepTargets::parse(&spec.targets)?
      };
      let hosts = target.hosts_for(&targets).await?;
      if hosts.is_empty() {
        continue;
      }
      let outcomes = run_step(
        target.service(),
        task,
        feature.name(),
        step_name,
        spec,
        &hosts,
        vars,
        settings,
      )
      .await?;

      let step_failed =
        outcomes.values().any(|unit| !unit.success);
      for (host_name, unit) in outcomes {
        results.add(step_name.clone(), host_name, unit);
      }
      // A failing check step just means "not installed"; any other
      // failing step invalidates the remaining phase.
      if step_failed && action != InstallAction::Check {
        break;
      }
    }
    Ok(results)
  }
}

#[async_trait]
impl Installer for BashInstaller {
  async fn check(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    self
      .run_phase(
        feature,
        InstallAction::Check,
        task,
        target,
        vars,
        settings,
      )
      .await
  }

  async fn add(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    self
      .run_phase(
        feature,
        InstallAction::Add,
        task,
        target,
        vars,
        settings,
      )
      .await
  }

  async fn remove(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    self
      .run_phase(
        feature,
        InstallAction::Remove,
        task,
        target,
        vars,
        settings,
      )
      .await
  }
}

type CommandBuilder = fn(&str) -> String;

/// The shared shape of apt/yum/dnf: one command builder per action,
/// run as a single implicit step on the selected hosts.
pub struct GenericPackager {
  method: InstallMethod,
  check_command: CommandBuilder,
  add_command: CommandBuilder,
  remove_command: CommandBuilder,
}

impl GenericPackager {
  pub fn apt() -> GenericPackager {
    GenericPackager {
      method: InstallMethod::Apt,
      check_command: |package| {
        format!("dpkg-query -s '{package}' &>/dev/null")
      },
      add_command: |package| {
        format!(
          "DEBIAN_FRONTEND=noninteractive apt-get install -y '{package}'"
        )
      },
      remove_command: |package| {
        format!(
          "DEBIAN_FRONTEND=noninteractive apt-get remove -y '{package}'"
        )
      },
    }
  }

  pub fn yum() -> GenericPackager {
    GenericPackager {
      method: InstallMethod::Yum,
      check_command: |package| format!("rpm -q '{package}'"),
      add_command: |package| {
        format!("yum install -y '{package}'")
      },
      remove_command: |package| {
        format!("yum remove -y '{package}'")
      },
    }
  }

  pub fn dnf() -> GenericPackager {
    GenericPackager {
      method: InstallMethod::Dnf,
      check_command: |package| format!("rpm -q '{package}'"),
      add_command: |package| {
        format!("dnf install -y '{package}'")
      },
      remove_command: |package| {
        format!("dnf remove -y '{package}'")
      },
    }
  }

  fn package_of(&self, feature: &Feature) -> String {
    feature
      .spec()
      .install
      .get(&self.method.to_string())
      .map(|spec| spec.package.clone())
      .filter(|package| !package.is_empty())
      .unwrap_or_else(|| feature.name().to_string())
  }

  async fn run_command(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
    command: String,
  ) -> Result<Results> {
    let spec = StepSpec {
      run: command,
      ..Default::default()
    };
    let hosts = target
      .hosts_for(&StepTargets::default_for_step())
      .await?;
    let step_name = self.method.to_string();
    let mut results = Results::default();
    if hosts.is_empty() {
      return Ok(results);
    }
    let outcomes = run_step(
      target.service(),
      task,
      feature.name(),
      &step_name,
      &spec,
      &hosts,
      vars,
      settings,
    )
    .await?;
    for (host_name, unit) in outcomes {
      results.add(step_name.clone(), host_name, unit);
    }
    Ok(results)
  }
}

#[async_trait]
impl Installer for GenericPackager {
  async fn check(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let command = (self.check_command)(&self.package_of(feature));
    self
      .run_command(feature, task, target, vars, settings, command)
      .await
  }

  async fn add(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let command = (self.add_command)(&self.package_of(feature));
    self
      .run_command(feature, task, target, vars, settings, command)
      .await
  }

  async fn remove(
    &self,
    feature: &Feature,
    task: &TaskCtx,
    target: &dyn Targetable,
    vars: &IndexMap<String, String>,
    settings: &FeatureSettings,
  ) -> Result<Results> {
    let command = (self.remove_command)(&self.package_of(feature));
    self
      .run_command(feature, task, target, vars, settings, command)
      .await
  }
}
