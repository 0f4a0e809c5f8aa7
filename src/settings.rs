use std::{path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, Parser};
use stacked_errors::{Result, StackableErr};

/// Runtime settings that are not part of the build command line. These only
/// come from the environment, the command line itself is left to
/// [BuildConfiguration::resolve](crate::BuildConfiguration::resolve).
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about)]
pub struct Settings {
    /// Container runtime program
    #[arg(long, env = "COUCH_HARNESS_DOCKER", default_value_t = String::from("docker"))]
    pub docker: String,
    /// Directory containing `gradlew`
    #[arg(long, env = "COUCH_HARNESS_PROJECT_DIR", default_value = ".")]
    pub project_dir: PathBuf,
    /// Terminates the build after this many seconds
    #[arg(long, env = "COUCH_HARNESS_BUILD_TIMEOUT_SECS")]
    pub build_timeout_secs: Option<u64>,
    /// Log the resolved plan as JSON before running it
    #[arg(
        long,
        env = "COUCH_HARNESS_PRINT_PLAN",
        default_value_t = false,
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set,
    )]
    pub print_plan: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker: "docker".to_owned(),
            project_dir: PathBuf::from("."),
            build_timeout_secs: None,
            print_plan: false,
        }
    }
}

impl Settings {
    /// Reads the settings from the `COUCH_HARNESS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Settings::try_parse_from([env!("CARGO_PKG_NAME")])
            .stack_err("invalid COUCH_HARNESS_* environment variable")
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }
}
