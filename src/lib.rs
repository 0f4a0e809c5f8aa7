//! Runs the sync library's Gradle test suites against a throwaway CouchDB
//! container.
//!
//! [BuildConfiguration::resolve] turns the command line into a typed
//! configuration, and [run_lifecycle] starts the database, runs the build,
//! stops the database, and hands back the build's exit status.

mod command;
mod command_runner;
mod config;
mod gradle;
mod lifecycle;
mod misc;
mod paths;
mod settings;
mod system;

/// Docker container management, using the "docker" OS command as a backend.
pub mod cli_docker;
pub use command::*;
pub use command_runner::*;
pub use config::*;
pub use gradle::*;
pub use lifecycle::*;
pub use misc::*;
pub use paths::*;
pub use settings::*;
pub use system::*;
