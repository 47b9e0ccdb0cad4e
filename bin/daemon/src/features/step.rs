//! One installation step across its selected hosts: target
//! selection, script rendering, upload, remote execution, exit-code
//! classification.

use std::{sync::Arc, time::Duration};

use concurrency::{TaskCtx, TaskGroup};
use indexmap::IndexMap;
use safescale_client::{
  entities::{
    feature::{FeatureSettings, StepSpec, UnitResult},
    host::Host,
  },
  error::{Error, Result},
};
use uuid::Uuid;

use crate::{
  handlers::{bail_if_aborted, ssh_access},
  iaas::Service,
};
use sshx::SshSession as _;

/// Exit codes below this one are failures the scripts classify
/// themselves; anything at or above it (except 255) is unclassified.
pub const NEXT_ERROR_CODE: i32 = 192;

/// Normalized target quadruple; each selector is "0", "1" or "*".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTargets {
  pub hosts: String,
  pub masters: String,
  pub nodes: String,
  pub gateways: String,
}

impl StepTargets {
  /// Parses the manifest's selector map, accepting the usual
  /// aliases. All-none is an error.
  pub fn parse(raw: &IndexMap<String, String>) -> Result<StepTargets> {
    let mut targets = StepTargets {
      hosts: "0".to_string(),
      masters: "0".to_string(),
      nodes: "0".to_string(),
      gateways: "0".to_string(),
    };
    for (key, value) in raw {
      let normalized = match key.as_str() {
        // A host target is a single machine: "all" is meaningless.
        "hosts" => match value.to_lowercase().as_str() {
          "" | "false" | "no" | "none" | "0" => "0",
          "yes" | "true" | "1" => "1",
          other => {
            return Err(Error::invalid_parameter(
              "targets.hosts",
              format!("invalid value '{other}'"),
            ));
          }
        },
        "masters" | "nodes" | "gateways" => {
          match value.to_lowercase().as_str() {
            "" | "false" | "no" | "none" | "0" => "0",
            "any" | "one" | "1" => "1",
            "all" | "*" => "*",
            other => {
              return Err(Error::invalid_parameter(
                format!("targets.{key}"),
                format!("invalid value '{other}'"),
              ));
            }
          }
        }
        other => {
          return Err(Error::invalid_parameter(
            "targets",
            format!("unknown target kind '{other}'"),
          ));
        }
      };
      match key.as_str() {
        "hosts" => targets.hosts = normalized.to_string(),
        "masters" => targets.masters = normalized.to_string(),
        "nodes" => targets.nodes = normalized.to_string(),
        "gateways" => targets.gateways = normalized.to_string(),
        _ => unreachable!(),
      }
    }
    if targets.hosts == "0"
      && targets.masters == "0"
      && targets.nodes == "0"
      && targets.gateways == "0"
    {
      return Err(Error::invalid_parameter(
        "targets",
        "no targets identified",
      ));
    }
    Ok(targets)
  }

  /// What a step without explicit targets means: the host itself,
  /// or every member of a cluster.
  pub fn default_for_step() -> StepTargets {
    StepTargets {
      hosts: "1".to_string(),
      masters: "*".to_string(),
      nodes: "*".to_string(),
      gateways: "0".to_string(),
    }
  }
}

/// Substitutes `[[Name]]` placeholders.
pub fn render(
  template: &str,
  vars: &IndexMap<String, String>,
) -> String {
  let replacers: Vec<(String, String)> = vars
    .iter()
    .map(|(name, value)| (format!("[[{name}]]"), value.clone()))
    .collect();
  svi::replace_in_string(template, &replacers)
}

/// Runs one step on every selected host, in parallel through a task
/// group unless the step or the caller asked for serial execution.
/// Returns per-host unit results keyed by host name.
pub async fn run_step(
  service: &Arc<Service>,
  task: &TaskCtx,
  feature_name: &str,
  step_name: &str,
  spec: &StepSpec,
  hosts: &[Host],
  vars: &IndexMap<String, String>,
  settings: &FeatureSettings,
) -> Result<IndexMap<String, UnitResult>> {
  bail_if_aborted(task)?;
  let mut outcomes = IndexMap::new();

  if spec.serial || settings.serialize {
    for host in hosts {
      bail_if_aborted(task)?;
      let unit = run_on_host(
        service.clone(),
        feature_name.to_string(),
        step_name.to_string(),
        spec.clone(),
        vars.clone(),
        host.clone(),
      )
      .await;
      outcomes.insert(host.name.clone(), unit);
    }
    return Ok(outcomes);
  }

  let group: TaskGroup<(String, UnitResult)> =
    TaskGroup::new(Some(task));
  for host in hosts {
    let service = service.clone();
    let feature_name = feature_name.to_string();
    let step_name = step_name.to_string();
    let spec = spec.clone();
    let vars = vars.clone();
    let host = host.clone();
    group
      .start(move |_| async move {
        let name = host.name.clone();
        let unit = run_on_host(
          service,
          feature_name,
          step_name,
          spec,
          vars,
          host,
        )
        .await;
        Ok((name, unit))
      })
      .await?;
  }
  let (results, error) = group.wait_group().await;
  if let Some(error) = error {
    return Err(error);
  }
  for (_, (host_name, unit)) in results {
    outcomes.insert(host_name, unit);
  }
  Ok(outcomes)
}

/// The full per-host sequence. Infrastructure failures (cannot
/// reach the host) land in the unit result, they don't abort the
/// other hosts of the step.
async fn run_on_host(
  service: Arc<Service>,
  feature_name: String,
  step_name: String,
  spec: StepSpec,
  mut vars: IndexMap<String, String>,
  host: Host,
) -> UnitResult {
  match execute_on_host(
    &service,
    &feature_name,
    &step_name,
    &spec,
    &mut vars,
    &host,
  )
  .await
  {
    Ok(unit) => unit,
    Err(e) => UnitResult {
      completed: false,
      success: false,
      error: Some(e.full_message()),
      output: String::new(),
    },
  }
}

async fn execute_on_host(
  service: &Arc<Service>,
  feature_name: &str,
  step_name: &str,
  spec: &StepSpec,
  vars: &mut IndexMap<String, String>,
  host: &Host,
) -> Result<UnitResult> {
  let access = ssh_access(service, host).await?;
  vars.insert(
    "HostIP".to_string(),
    access.ip.clone(),
  );
  vars.insert("Hostname".to_string(), host.name.clone());

  let wall_time = spec
    .wall_time
    .map(|minutes| Duration::from_secs(minutes * 60))
    .unwrap_or_else(|| service.timeouts.execution());

  if let Some(options) = &spec.options {
    let options_path =
      format!("/var/tmp/{feature_name}.options.json");
    upload_with_retry(
      service,
      &access,
      options.as_bytes(),
      &options_path,
    )
    .await?;
  }

  let script = render(&spec.run, vars);
  let remote_path = format!(
    "/var/tmp/{feature_name}.{step_name}.{}.sh",
    Uuid::new_v4().simple()
  );
  upload_with_retry(
    service,
    &access,
    script.as_bytes(),
    &remote_path,
  )
  .await?;

  // Ownership and mode are fixed in a separate remote call, also
  // retried: the upload path and the shell path can fail
  // independently.
  sshx::retry_while_unsuccessful(
    || async {
      let out = service
        .ssh
        .run(
          &access,
          &format!("chmod u+rwx '{remote_path}'"),
          service.timeouts.connection(),
        )
        .await?;
      if out.success() {
        Ok(())
      } else {
        Err(Error::other(format!(
          "failed to set script mode (code {})",
          out.retcode
        )))
      }
    },
    Duration::from_secs(2),
    service.timeouts.connection() * 3,
  )
  .await?;

  let command = format!(
    "sudo bash '{remote_path}'; rc=$?; rm -f '{remote_path}'; exit $rc"
  );
  let output =
    match service.ssh.run(&access, &command, wall_time).await {
      Ok(output) => output,
      Err(e) if e.is_timeout() => {
        return Ok(UnitResult {
          completed: false,
          success: false,
          error: Some(format!(
            "step '{step_name}' timed out on '{}'",
            host.name
          )),
          output: String::new(),
        });
      }
      Err(e) => return Err(e),
    };

  Ok(classify(step_name, &host.name, output))
}

fn classify(
  step_name: &str,
  host_name: &str,
  output: sshx::CommandOutput,
) -> UnitResult {
  let (completed, error) = match output.retcode {
    0 => (true, None),
    sshx::CONNECTION_LOST => (
      false,
      Some(format!(
        "remote connection lost running step '{step_name}' on '{host_name}'"
      )),
    ),
    code if code < NEXT_ERROR_CODE => (
      true,
      Some(format!(
        "step '{step_name}' failed on '{host_name}' (classified exit code {code})"
      )),
    ),
    code => (
      true,
      Some(format!(
        "step '{step_name}' failed on '{host_name}' (exit code {code})"
      )),
    ),
  };
  UnitResult {
    completed,
    success: output.retcode == 0,
    error,
    output: output.combined(),
  }
}

/// Upload with the two-stage retry policy: a failed copy first
/// tries to clear a half-written remote file, then retries.
pub(crate) async fn upload_with_retry(
  service: &Arc<Service>,
  access: &safescale_client::entities::host::SshAccess,
  content: &[u8],
  remote_path: &str,
) -> Result<()> {
  let mut attempts = 0u32;
  loop {
    match service.ssh.copy(access, content, remote_path).await {
      Ok(()) => return Ok(()),
      Err(e) => {
        attempts += 1;
        if attempts >= 3 {
          return Err(e);
        }
        warn!(
          "upload of '{remote_path}' failed (attempt {attempts}), clearing and retrying | {e:#}"
        );
        let _ = service
          .ssh
          .run(
            access,
            &format!("rm -f '{remote_path}'"),
            service.timeouts.connection(),
          )
          .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(
    pairs: &[(&str, &str)],
  ) -> IndexMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn selector_aliases_normalize() {
    let targets = StepTargets::parse(&raw(&[
      ("hosts", "yes"),
      ("masters", "all"),
      ("nodes", "any"),
      ("gateways", "none"),
    ]))
    .unwrap();
    assert_eq!(targets.hosts, "1");
    assert_eq!(targets.masters, "*");
    assert_eq!(targets.nodes, "1");
    assert_eq!(targets.gateways, "0");
  }

  #[test]
  fn all_none_is_an_error() {
    let err = StepTargets::parse(&raw(&[
      ("hosts", "no"),
      ("masters", "0"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("no targets identified"));
  }

  #[test]
  fn unknown_values_are_rejected() {
    assert!(StepTargets::parse(&raw(&[("hosts", "3")])).is_err());
    assert!(
      StepTargets::parse(&raw(&[("workers", "1")])).is_err()
    );
  }

  #[test]
  fn render_replaces_placeholders() {
    let vars = raw(&[("HostIP", "10.0.0.4"), ("Version", "1.2")]);
    let script =
      render("curl http://[[HostIP]]/v[[Version]]", &vars);
    assert_eq!(script, "curl http://10.0.0.4/v1.2");
  }

  #[test]
  fn exit_codes_classify() {
    let ok = classify("s", "h", sshx::CommandOutput {
      retcode: 0,
      stdout: "done".into(),
      stderr: String::new(),
    });
    assert!(ok.success && ok.completed);

    let known = classify("s", "h", sshx::CommandOutput {
      retcode: 12,
      ..Default::default()
    });
    assert!(known.completed && !known.success);
    assert!(known.error.unwrap().contains("classified"));

    let lost = classify("s", "h", sshx::CommandOutput {
      retcode: 255,
      ..Default::default()
    });
    assert!(!lost.completed);
    assert!(lost.error.unwrap().contains("connection lost"));
  }
}
