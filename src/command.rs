use core::fmt;
use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    fmt::{Debug, Display},
    path::{Path, PathBuf},
    process::ExitStatus,
    str::Utf8Error,
};

use stacked_errors::{bail_locationless, DisplayStr, Result, StackableErr};

use crate::{command_runner, CommandRunner};

/// An OS Command, this is `tokio::process::Command` wrapped in recording and
/// forwarding of the standard streams.
#[derive(Clone)]
pub struct Command {
    /// The program to run.
    pub program: OsString,
    /// All the arguments that will be passed to the program
    pub args: Vec<OsString>,
    /// Working directory for process. `acquire_dir_path` is used on this in the
    /// functions that run the `Command`.
    pub cwd: Option<PathBuf>,
    /// Set to true by default, this enables recording of the `stdout` which can
    /// be accessed from `stdout_record` in the runner or `stdout` in the
    /// command result later
    pub stdout_recording: bool,
    /// Set to true by default, this enables recording of the `stderr`
    pub stderr_recording: bool,
    /// Forward stdout to the current process stdout
    pub stdout_debug: bool,
    /// Forward stderr to the current process stderr
    pub stderr_debug: bool,
    /// If the default debug line prefix should be overridden. The stderr
    /// prefix gets an extra "E" before the separator.
    pub debug_line_prefix: Option<String>,
}

impl Default for Command {
    fn default() -> Self {
        Self {
            program: Default::default(),
            args: Default::default(),
            cwd: Default::default(),
            stdout_recording: true,
            stderr_recording: true,
            stdout_debug: Default::default(),
            stderr_debug: Default::default(),
            debug_line_prefix: None,
        }
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "Command {{ program: {:?},",
            DisplayStr(&self.get_unified_command()),
        ))?;
        if let Some(cwd) = &self.cwd {
            f.write_fmt(format_args!(" cwd: {cwd:?},"))?;
        }
        if !(self.stdout_recording && self.stderr_recording) {
            f.write_fmt(format_args!(
                " recording: ({}, {}),",
                self.stdout_recording, self.stderr_recording
            ))?;
        }
        if self.stdout_debug || self.stderr_debug {
            f.write_fmt(format_args!(
                " debug: ({}, {}),",
                self.stdout_debug, self.stderr_debug
            ))?;
        }
        f.write_fmt(format_args!(" }}"))
    }
}

impl Command {
    /// Creates a new `Command` for launching the `program`. The program is
    /// taken as is, a path with spaces in it is fine.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().into(),
            ..Default::default()
        }
    }

    /// Adds arguments to be passed to the program
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().into()));
        self
    }

    /// Sets `self.cwd`
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_owned());
        self
    }

    /// Sets `stdout_debug` and `stderr_debug` for passing command standard
    /// streams to the standard streams of this process.
    pub fn debug(mut self, std_stream_debug: bool) -> Self {
        self.stdout_debug = std_stream_debug;
        self.stderr_debug = std_stream_debug;
        self
    }

    /// Sets `stdout_recording` and `stderr_recording`
    pub fn recording(mut self, recording: bool) -> Self {
        self.stdout_recording = recording;
        self.stderr_recording = recording;
        self
    }

    /// Changes the debug line prefix. If `None`, then the default of the
    /// command name and process ID is used.
    pub fn debug_line_prefix(mut self, line_prefix: Option<String>) -> Self {
        self.debug_line_prefix = line_prefix;
        self
    }

    /// Gets the program and args interspersed with spaces
    pub fn get_unified_command(&self) -> String {
        let mut command = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            command.push(' ');
            command += arg.to_string_lossy().as_ref();
        }
        command
    }

    /// Runs the command with a null standard input, returning a
    /// `CommandRunner`. An `Err` here means the process could not be launched
    /// at all.
    pub async fn run(self) -> Result<CommandRunner> {
        command_runner(self).await
    }

    /// Calls [Command::run] and waits for it to complete, returning the command
    /// result
    pub async fn run_to_completion(self) -> Result<CommandResult> {
        self.run()
            .await
            .stack_err_locationless("Command::run_to_completion")?
            .wait_with_output()
            .await
    }
}

/// The result of a [Command](crate::Command) that was launched. Whether it
/// completed successfully is a separate question answered by `status`.
#[must_use]
#[derive(Clone, Default)]
pub struct CommandResult {
    // the command information is kept around for failures
    pub command: Command,
    /// `None` if the command was terminated before completion
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "CommandResult {{\ncommand: {:?},\nstatus: {:?},\n",
            self.command, self.status
        ))?;
        // move the commas out of the way of the stdout and stderr
        let stdout = self.stdout_as_utf8_lossy();
        if !stdout.is_empty() {
            f.write_fmt(format_args!("stdout: {}\n,", stdout))?;
        }
        let stderr = self.stderr_as_utf8_lossy();
        if !stderr.is_empty() {
            f.write_fmt(format_args!("stderr: {}\n,", stderr))?;
        }
        f.write_fmt(format_args!("}}"))
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:#?}", self))
    }
}

impl CommandResult {
    /// Returns a formatted error with relevant information if the command was
    /// not successful
    pub fn assert_success(&self) -> Result<()> {
        if let Some(status) = self.status.as_ref() {
            if status.success() {
                Ok(())
            } else {
                bail_locationless!("{self:#?}.assert_success() -> unsuccessful")
            }
        } else {
            bail_locationless!(
                "{self:#?}.assert_success() -> termination was called before completion"
            )
        }
    }

    /// Returns `str::from_utf8(&self.stdout)`
    pub fn stdout_as_utf8(&self) -> std::result::Result<&str, Utf8Error> {
        std::str::from_utf8(&self.stdout)
    }

    /// Returns `String::from_utf8_lossy(&self.stdout)`
    pub fn stdout_as_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Returns `String::from_utf8_lossy(&self.stderr)`
    pub fn stderr_as_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_keeps_spaces() {
        let command = Command::new("/opt/my tools/docker").args(["rm", "-f", "couchdb"]);
        assert_eq!(command.program, OsString::from("/opt/my tools/docker"));
        assert_eq!(command.args, ["rm", "-f", "couchdb"].map(OsString::from));
        assert_eq!(
            command.get_unified_command(),
            "/opt/my tools/docker rm -f couchdb"
        );
    }

    #[test]
    fn unfinished_result_is_unsuccessful() {
        let comres = CommandResult::default();
        assert!(comres.status.is_none());
        assert!(comres.assert_success().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_launched() {
        let comres = Command::new("sh")
            .args(["-c", "echo couchdb; exit 3"])
            .run_to_completion()
            .await
            .unwrap();
        assert_eq!(comres.status.and_then(|status| status.code()), Some(3));
        assert_eq!(comres.stdout_as_utf8().unwrap(), "couchdb\n");
        assert!(comres.assert_success().is_err());
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        assert!(Command::new("/nonexistent/couch_harness/gradlew")
            .run()
            .await
            .is_err());
    }
}
