use serde::Serialize;
use stacked_errors::{Result, StackableErr};
use tracing::{error, info, warn};

use crate::{BuildConfiguration, BuildInvocation, BuildOutcome, ContainerPlan, Settings};

/// Exit status when the database container could not be started
pub const ACQUISITION_FAILURE_STATUS: i32 = 1;

/// The external effects of a run. [SystemBackend](crate::SystemBackend) is
/// the real one, tests substitute their own.
#[allow(async_fn_in_trait)]
pub trait HarnessBackend {
    /// Starts the container detached, returning once the runtime accepted it
    async fn start_container(&mut self, plan: &ContainerPlan) -> Result<()>;
    /// Removes a container of the same name even if it is running
    async fn force_remove_container(&mut self, plan: &ContainerPlan) -> Result<()>;
    async fn stop_container(&mut self, plan: &ContainerPlan) -> Result<()>;
    async fn remove_container(&mut self, plan: &ContainerPlan) -> Result<()>;
    /// Makes the build entry point executable
    async fn make_executable(&mut self, program: &str) -> Result<()>;
    /// Runs the build to completion. Failures are part of the outcome.
    async fn run_build(&mut self, invocation: &BuildInvocation) -> BuildOutcome;
}

/// Starts the container for `config.target` (unless it is the local
/// instance), runs the build, tears the container down, and returns the exit
/// status for this process.
///
/// The build is never run if the container cannot be started. Teardown runs
/// whatever the build outcome and its failures do not change the result.
pub async fn run_lifecycle<B: HarnessBackend>(
    backend: &mut B,
    config: &BuildConfiguration,
    settings: &Settings,
) -> i32 {
    let plan = config.container_plan();
    match plan {
        Some(ref plan) => {
            info!(
                "starting {} as container {} on port {}:{}",
                plan.image, plan.container_name, plan.host_port, plan.container_port
            );
            if let Err(e) = backend.start_container(plan).await {
                error!("could not start the database container: {e:?}");
                if let Err(e) = backend.force_remove_container(plan).await {
                    warn!("could not remove a stale {} container: {e:?}", plan.container_name);
                }
                return ACQUISITION_FAILURE_STATUS
            }
        }
        None => info!(
            "using the externally managed {} instance, no container is started",
            config.target
        ),
    }

    let invocation = BuildInvocation::new(config, settings.build_timeout());
    if let Err(e) = backend.make_executable(&invocation.program).await {
        warn!("could not make {} executable: {e:?}", invocation.program);
    }
    info!(
        "running {} build: {} {}",
        config.platform,
        invocation.program,
        invocation.args.join(" ")
    );
    let outcome = backend.run_build(&invocation).await;
    let status = outcome.exit_code();
    info!("build finished with {outcome:?}, exit status {status}");

    if let Some(ref plan) = plan {
        info!("stopping container {}", plan.container_name);
        if let Err(e) = backend.stop_container(plan).await {
            warn!("could not stop container {}: {e:?}", plan.container_name);
        }
        if let Err(e) = backend.remove_container(plan).await {
            warn!("could not remove container {}: {e:?}", plan.container_name);
        }
    }
    status
}

#[derive(Serialize)]
struct PlanReport<'a> {
    configuration: &'a BuildConfiguration,
    container: Option<ContainerPlan>,
    build: BuildInvocation,
}

/// The resolved configuration, container and build command as pretty JSON
pub fn plan_report(config: &BuildConfiguration, settings: &Settings) -> Result<String> {
    let report = PlanReport {
        configuration: config,
        container: config.container_plan(),
        build: BuildInvocation::new(config, settings.build_timeout()),
    };
    serde_json::to_string_pretty(&report).stack_err("plan_report -> serialization failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_names_everything() {
        let config = BuildConfiguration::resolve(["-couch", "couchdb2.0", "-Dk=v"]).unwrap();
        let report = plan_report(&config, &Settings::default()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(v["configuration"]["target"], "couchdb2.0");
        assert_eq!(v["configuration"]["platform"], "java");
        assert_eq!(v["container"]["container_port"], 15984);
        assert_eq!(v["build"]["args"][0], "-Dk=v");
        assert!(v["build"]["timeout"].is_null());
    }

    #[test]
    fn report_without_container() {
        let config = BuildConfiguration::resolve(["-couch", "cloudantlocal"]).unwrap();
        let report = plan_report(&config, &Settings::default()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert!(v["container"].is_null());
    }
}
