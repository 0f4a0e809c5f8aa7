use std::{path::Path, process::ExitStatus, time::Duration};

use serde::Serialize;

use crate::{BuildConfiguration, Command, Platform};

/// The wrapper script in the project root
pub const GRADLE_WRAPPER: &str = "./gradlew";
/// Build file of the instrumented Android test project
pub const ANDROID_BUILD_FILE: &str = "AndroidTest/build.gradle";

/// Exit status used when the build could not produce one of its own
pub const LAUNCH_FAILURE_STATUS: i32 = 1;
/// Same as coreutils `timeout`
pub const TIMED_OUT_STATUS: i32 = 124;

/// A fully expanded Gradle command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// The build is terminated after this long, `None` waits forever
    pub timeout: Option<Duration>,
}

impl BuildInvocation {
    /// Expands the platform template with the passthrough options placed
    /// before the tasks
    pub fn new(config: &BuildConfiguration, timeout: Option<Duration>) -> Self {
        let (build_file_args, tasks): (&[&str], &[&str]) = match config.platform {
            Platform::Java => (&[], &["clean", "check", "integrationTest"]),
            Platform::Android => (
                &["-b", ANDROID_BUILD_FILE],
                &["clean", "installDebug", "connectedCheck"],
            ),
        };
        let mut args: Vec<String> = build_file_args.iter().map(|s| (*s).to_owned()).collect();
        args.extend(config.passthrough_options.iter().cloned());
        args.extend(tasks.iter().map(|s| (*s).to_owned()));
        Self {
            program: GRADLE_WRAPPER.to_owned(),
            args,
            timeout,
        }
    }

    /// The command to run from `project_dir`. Output is forwarded but not
    /// recorded, Gradle builds can print a lot.
    pub fn command(&self, project_dir: impl AsRef<Path>) -> Command {
        Command::new(project_dir.as_ref().join(&self.program))
            .args(&self.args)
            .cwd(project_dir)
            .recording(false)
            .debug(true)
            .debug_line_prefix(Some("gradle".to_owned()))
    }
}

/// How the build step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The build ran and exited with this code
    Exited(i32),
    /// The build was killed by this signal
    Signaled(i32),
    /// The configured timeout elapsed and the build was terminated
    TimedOut,
    /// The build process could not be started
    LaunchFailed,
    /// The build was started but waiting on it failed
    WaitFailed,
}

impl BuildOutcome {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return BuildOutcome::Exited(code)
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return BuildOutcome::Signaled(signal)
            }
        }
        BuildOutcome::WaitFailed
    }

    /// The status this process should exit with
    pub fn exit_code(self) -> i32 {
        match self {
            BuildOutcome::Exited(code) => code,
            BuildOutcome::Signaled(signal) => 128 + signal,
            BuildOutcome::TimedOut => TIMED_OUT_STATUS,
            BuildOutcome::LaunchFailed | BuildOutcome::WaitFailed => LAUNCH_FAILURE_STATUS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn java_template() {
        let config = BuildConfiguration::resolve(["-Dfoo=bar", "-Da=b"]).unwrap();
        let invocation = BuildInvocation::new(&config, None);
        assert_eq!(invocation.program, "./gradlew");
        assert_eq!(
            invocation.args,
            ["-Dfoo=bar", "-Da=b", "clean", "check", "integrationTest"]
        );
    }

    #[test]
    fn android_template() {
        let config = BuildConfiguration::resolve(["-platform", "android", "-Dx=1"]).unwrap();
        let invocation = BuildInvocation::new(&config, Some(Duration::from_secs(5)));
        assert_eq!(
            invocation.args,
            [
                "-b",
                "AndroidTest/build.gradle",
                "-Dx=1",
                "clean",
                "installDebug",
                "connectedCheck"
            ]
        );
        assert_eq!(invocation.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn command_runs_from_project_dir() {
        let config = BuildConfiguration::resolve(["-Dx=1"]).unwrap();
        let command = BuildInvocation::new(&config, None).command("/work/sync");
        assert_eq!(command.cwd.as_deref(), Some(Path::new("/work/sync")));
        assert_eq!(Path::new(&command.program), Path::new("/work/sync/gradlew"));
        assert!(!command.stdout_recording);
        assert!(command.stdout_debug && command.stderr_debug);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(BuildOutcome::Exited(0).exit_code(), 0);
        assert_eq!(BuildOutcome::Exited(255).exit_code(), 255);
        assert_eq!(BuildOutcome::Signaled(9).exit_code(), 137);
        assert_eq!(BuildOutcome::TimedOut.exit_code(), 124);
        assert_eq!(BuildOutcome::LaunchFailed.exit_code(), 1);
        assert_eq!(BuildOutcome::WaitFailed.exit_code(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn outcome_from_status() {
        use std::os::unix::process::ExitStatusExt;

        // wait statuses: exit code in the high byte, signal in the low bits
        assert_eq!(
            BuildOutcome::from_exit_status(ExitStatus::from_raw(3 << 8)),
            BuildOutcome::Exited(3)
        );
        assert_eq!(
            BuildOutcome::from_exit_status(ExitStatus::from_raw(15)),
            BuildOutcome::Signaled(15)
        );
    }
}
