use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

/// On-disk shape of a feature manifest:
///
/// ```yaml
/// feature:
///   requirements:
///     features: [docker]
///   parameters:
///     - Version=latest
///   install:
///     bash:
///       add:
///         steps:
///           main:
///             targets: { hosts: "1" }
///             run: |
///               ...
///             wallTime: 10
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureFile {
  pub feature: FeatureSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureSpec {
  #[serde(default)]
  pub requirements: FeatureRequirements,
  /// `Name=default` entries; parameters without a default must be
  /// supplied by the caller.
  #[serde(default)]
  pub parameters: Vec<String>,
  /// Installer variants keyed by method name (bash, apt, yum, dnf).
  #[serde(default)]
  pub install: IndexMap<String, InstallerSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureRequirements {
  #[serde(default)]
  pub features: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InstallerSpec {
  /// Package name, for the package-manager methods.
  #[serde(default)]
  pub package: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub check: Option<PhaseSpec>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub add: Option<PhaseSpec>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remove: Option<PhaseSpec>,
}

impl InstallerSpec {
  pub fn phase(&self, action: InstallAction) -> Option<&PhaseSpec> {
    match action {
      InstallAction::Check => self.check.as_ref(),
      InstallAction::Add => self.add.as_ref(),
      InstallAction::Remove => self.remove.as_ref(),
    }
  }
}

/// Steps keep their manifest order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PhaseSpec {
  #[serde(default)]
  pub steps: IndexMap<String, StepSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
  /// Which hosts of the target the step runs on; see the selector
  /// grammar ("0"/"1"/"*" plus aliases).
  #[serde(default)]
  pub targets: IndexMap<String, String>,
  /// Templated script, `[[Var]]` placeholders.
  #[serde(default)]
  pub run: String,
  /// Maximum run time, minutes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub wall_time: Option<u64>,
  /// Never fan out across hosts.
  #[serde(default)]
  pub serial: bool,
  /// Content of an options file uploaded next to the script.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<String>,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Display,
  strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallAction {
  Check,
  Add,
  Remove,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Display,
  strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
  Bash,
  Apt,
  Yum,
  Dnf,
}

/// Knobs the caller can set on any feature operation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureSettings {
  /// Force sequential execution even for parallel-safe steps.
  #[serde(default)]
  pub serialize: bool,
  /// Skip the requirements of the feature.
  #[serde(default)]
  pub ignore_requirements: bool,
}

/// Outcome of one step on one host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UnitResult {
  /// The script ran to its end (whatever its verdict).
  pub completed: bool,
  /// The verdict itself.
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub output: String,
}

/// step name -> host name -> unit result
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Results(pub IndexMap<String, IndexMap<String, UnitResult>>);

impl Results {
  pub fn add(
    &mut self,
    step: impl Into<String>,
    host: impl Into<String>,
    result: UnitResult,
  ) {
    self
      .0
      .entry(step.into())
      .or_default()
      .insert(host.into(), result);
  }

  /// All targeted hosts succeeded on all steps. An empty result set
  /// is NOT a success.
  pub fn successful(&self) -> bool {
    !self.0.is_empty()
      && self
        .0
        .values()
        .flat_map(IndexMap::values)
        .all(|unit| unit.success)
  }

  pub fn error_messages(&self) -> String {
    let mut out = String::new();
    for (step, hosts) in &self.0 {
      for (host, unit) in hosts {
        if let Some(error) = &unit.error {
          out.push_str(&format!("{step}/{host}: {error}\n"));
        }
      }
    }
    out
  }

  /// `step/host` keys whose script did not run to completion.
  pub fn uncompleted(&self) -> Vec<String> {
    self
      .0
      .iter()
      .flat_map(|(step, hosts)| {
        hosts.iter().filter_map(move |(host, unit)| {
          (!unit.completed).then(|| format!("{step}/{host}"))
        })
      })
      .collect()
  }

  pub fn merge(&mut self, other: Results) {
    for (step, hosts) in other.0 {
      self.0.entry(step).or_default().extend(hosts);
    }
  }
}
