use std::path::PathBuf;

use stacked_errors::{Result, StackableErr};
use tracing::{debug, error, warn};

use crate::{
    acquire_dir_path, cli_docker::Container, make_executable, BuildInvocation, BuildOutcome,
    CommandResult, ContainerPlan, HarnessBackend, Settings,
};

/// Runs containers with the docker command line and the build as a child
/// process of this one
#[derive(Debug, Clone)]
pub struct SystemBackend {
    docker: String,
    project_dir: PathBuf,
}

impl SystemBackend {
    /// Fails if the project directory does not exist
    pub async fn new(settings: &Settings) -> Result<Self> {
        let project_dir = acquire_dir_path(&settings.project_dir)
            .await
            .stack_err("SystemBackend::new -> the project directory is not usable")?;
        Ok(Self {
            docker: settings.docker.clone(),
            project_dir,
        })
    }

    fn container(plan: &ContainerPlan) -> Container {
        Container::new(&plan.container_name, &plan.image)
            .host_name(&plan.host_name)
            .port(plan.host_port, plan.container_port)
            .container_args(&plan.container_args)
    }
}

fn outcome_of(comres: Option<CommandResult>) -> BuildOutcome {
    match comres.and_then(|comres| comres.status) {
        Some(status) => BuildOutcome::from_exit_status(status),
        None => BuildOutcome::WaitFailed,
    }
}

impl HarnessBackend for SystemBackend {
    async fn start_container(&mut self, plan: &ContainerPlan) -> Result<()> {
        let id = Self::container(plan)
            .run_detached(&self.docker)
            .await
            .stack()?;
        debug!("container {} has id {id}", plan.container_name);
        Ok(())
    }

    async fn force_remove_container(&mut self, plan: &ContainerPlan) -> Result<()> {
        Self::container(plan).force_remove(&self.docker).await.stack()
    }

    async fn stop_container(&mut self, plan: &ContainerPlan) -> Result<()> {
        Self::container(plan).stop(&self.docker).await.stack()
    }

    async fn remove_container(&mut self, plan: &ContainerPlan) -> Result<()> {
        Self::container(plan).remove(&self.docker).await.stack()
    }

    async fn make_executable(&mut self, program: &str) -> Result<()> {
        make_executable(self.project_dir.join(program)).await.stack()
    }

    async fn run_build(&mut self, invocation: &BuildInvocation) -> BuildOutcome {
        let command = invocation.command(&self.project_dir);
        let mut runner = match command.run().await {
            Ok(runner) => runner,
            Err(e) => {
                error!("the build could not be started: {e:?}");
                return BuildOutcome::LaunchFailed
            }
        };
        let Some(timeout) = invocation.timeout else {
            return match runner.wait_with_output().await {
                Ok(comres) => outcome_of(Some(comres)),
                Err(e) => {
                    error!("waiting on the build failed: {e:?}");
                    BuildOutcome::WaitFailed
                }
            }
        };
        match runner.wait_with_timeout(timeout).await {
            Ok(()) => outcome_of(runner.take_command_result()),
            Err(e) => {
                let outcome = if e.is_timeout() {
                    error!("the build did not finish within {timeout:?}, terminating it");
                    BuildOutcome::TimedOut
                } else {
                    error!("waiting on the build failed: {e:?}");
                    BuildOutcome::WaitFailed
                };
                if let Err(e) = runner.terminate().await {
                    warn!("could not terminate the build: {e:?}");
                }
                outcome
            }
        }
    }
}
