use stacked_errors::{Result, StackableErr};
use tracing::debug;

use crate::{Command, CommandResult};

/// A `-p host:container` publication for `docker run`
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortBinding {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }

    /// The argument as `docker run -p` expects it
    pub fn to_arg(&self) -> String {
        format!("{}:{}", self.host_port, self.container_port)
    }
}

/// Configuration for a long running service container that is started
/// detached with `docker run -d` and later stopped and removed by name.
///
/// The output of the docker commands themselves is forwarded, not the output
/// of the container.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Container {
    /// The name that the container is actually named with, this is what the
    /// stop and remove operations refer to
    pub container_name: String,
    /// Hostname of the container. Usually, this should be the same as
    /// `container_name`.
    pub host_name: String,
    /// An image in the format "name:tag" such as "klaemo/couchdb:1.6"
    pub image: String,
    /// Published ports
    pub port_bindings: Vec<PortBinding>,
    /// Arguments passed to the image's entrypoint, after the image
    pub container_args: Vec<String>,
}

impl Container {
    /// Creates the information needed to describe a `Container`. `name` is used
    /// for both the `container_name` and `host_name`.
    pub fn new(name: impl AsRef<str>, image: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            container_name: name.to_owned(),
            host_name: name.to_owned(),
            image: image.as_ref().to_owned(),
            port_bindings: vec![],
            container_args: vec![],
        }
    }

    /// Sets `host_name`
    pub fn host_name(mut self, host_name: impl AsRef<str>) -> Self {
        self.host_name = host_name.as_ref().to_owned();
        self
    }

    /// Publishes `container_port` on `host_port`
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.port_bindings
            .push(PortBinding::new(host_port, container_port));
        self
    }

    /// Adds arguments to `container_args`
    pub fn container_args<I, S>(mut self, container_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.container_args
            .extend(container_args.into_iter().map(|s| s.as_ref().to_owned()));
        self
    }

    /// The arguments to `docker` for starting the container detached
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_owned(), "-d".to_owned()];
        for binding in &self.port_bindings {
            args.push("-p".to_owned());
            args.push(binding.to_arg());
        }
        args.extend([
            "-h".to_owned(),
            self.host_name.clone(),
            "--name".to_owned(),
            self.container_name.clone(),
        ]);
        args.push(self.image.clone());
        args.extend(self.container_args.iter().cloned());
        args
    }

    fn docker_command<I, S>(&self, docker: &str, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Command::new(docker)
            .args(args.into_iter().map(|s| s.as_ref().to_owned()))
            .debug(true)
            .debug_line_prefix(Some(format!("docker {}", self.container_name)))
    }

    /// Runs a docker command to completion, an unsuccessful status is an
    /// error
    async fn docker_output(command: Command, context: &str) -> Result<CommandResult> {
        debug!("{context} command: {command:?}");
        let comres = command
            .run_to_completion()
            .await
            .stack_err_with_locationless(|| format!("{context} -> could not launch docker"))?;
        comres
            .assert_success()
            .stack_err_with_locationless(|| format!("{context} -> docker was unsuccessful"))?;
        Ok(comres)
    }

    async fn run_docker(command: Command, context: &str) -> Result<()> {
        Self::docker_output(command, context).await.map(drop)
    }

    /// Runs `docker run -d` for `self` and returns the container id
    pub async fn run_detached(&self, docker: &str) -> Result<String> {
        let command = self.docker_command(docker, self.run_args());
        let comres = Self::docker_output(command, "Container::run_detached").await?;
        let docker_id = comres
            .stdout_as_utf8()
            .stack_err_locationless("Container::run_detached -> container id is not UTF-8")?;
        Ok(docker_id.trim().to_owned())
    }

    /// Runs `docker stop` on the container
    pub async fn stop(&self, docker: &str) -> Result<()> {
        let command = self.docker_command(docker, ["stop", self.container_name.as_str()]);
        Self::run_docker(command, "Container::stop").await
    }

    /// Runs `docker rm` on the container
    pub async fn remove(&self, docker: &str) -> Result<()> {
        let command = self.docker_command(docker, ["rm", self.container_name.as_str()]);
        Self::run_docker(command, "Container::remove").await
    }

    /// Runs `docker rm -f` on the container, which also works if it is still
    /// running
    pub async fn force_remove(&self, docker: &str) -> Result<()> {
        let command = self.docker_command(docker, ["rm", "-f", self.container_name.as_str()]);
        Self::run_docker(command, "Container::force_remove").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_order() {
        let container = Container::new("couchdb", "klaemo/couchdb:2.0-dev")
            .port(5984, 15984)
            .container_args(["--with-admin-party-please"]);
        assert_eq!(
            container.run_args(),
            [
                "run",
                "-d",
                "-p",
                "5984:15984",
                "-h",
                "couchdb",
                "--name",
                "couchdb",
                "klaemo/couchdb:2.0-dev",
                "--with-admin-party-please",
            ]
        );
    }

    #[test]
    fn host_name_and_ports() {
        let container = Container::new("db", "img:1")
            .host_name("dbhost")
            .port(5984, 5984)
            .port(6984, 6984);
        assert_eq!(
            container.run_args(),
            [
                "run",
                "-d",
                "-p",
                "5984:5984",
                "-p",
                "6984:6984",
                "-h",
                "dbhost",
                "--name",
                "db",
                "img:1"
            ]
        );
    }

    #[test]
    fn teardown_commands_name_the_container() {
        let container = Container::new("couchdb", "klaemo/couchdb:1.6");
        let command = container.docker_command("/usr/bin/docker", ["rm", "-f", "couchdb"]);
        assert_eq!(
            command.get_unified_command(),
            "/usr/bin/docker rm -f couchdb"
        );
        assert!(command.stdout_recording && command.stdout_debug);
        assert_eq!(command.debug_line_prefix.as_deref(), Some("docker couchdb"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_docker_is_an_error() {
        // `false` ignores its arguments and exits 1
        let container = Container::new("couchdb", "klaemo/couchdb:1.6");
        assert!(container.stop("false").await.is_err());
        assert!(container.run_detached("false").await.is_err());
        assert!(container.remove("true").await.is_ok());
    }
}
