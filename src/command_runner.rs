use core::fmt;
use std::{collections::VecDeque, fmt::Debug, io, process::Stdio, sync::Arc, time::Duration};

use stacked_errors::{bail_locationless, Error, Result, StackableErr};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::{self, Child},
    sync::Mutex,
    task::{self, JoinHandle},
    time::sleep,
};
use tracing::warn;

use crate::{acquire_dir_path, next_terminal_color, Command, CommandResult};

/// Writes lines of a child stream to one of our own streams, with `prefix`
/// at the start of every line
pub(crate) struct Forwarder<W> {
    writer: W,
    prefix: String,
    line_buf: Vec<u8>,
    // if the previous write ended with a newline
    previous_newline: bool,
    // if no bytes have been written
    empty: bool,
}

impl<W: AsyncWrite + Unpin> Forwarder<W> {
    pub(crate) fn new(writer: W, prefix: String) -> Self {
        Self {
            writer,
            prefix,
            line_buf: Vec::new(),
            previous_newline: false,
            empty: true,
        }
    }

    async fn write_lines(&mut self, bytes: &[u8]) -> io::Result<()> {
        // `lines_with_terminator` keeps the difference between a final line with and
        // without a newline
        for line in bstr::ByteSlice::lines_with_terminator(bytes) {
            // the prefix is written together with the line so that interleaved
            // stdout and stderr stay readable
            self.line_buf.clear();
            if self.empty || self.previous_newline {
                self.line_buf.extend_from_slice(self.prefix.as_bytes());
            }
            self.previous_newline = line.last() == Some(&b'\n');
            self.line_buf.extend_from_slice(line);
            self.writer.write_all(&self.line_buf).await?;
            self.empty = false;
        }
        if self.line_buf.capacity() > (8 * 1024) {
            self.line_buf = Vec::new();
        }
        self.writer.flush().await
    }

    /// Nonempty output with no ending newline gets one
    async fn finish(&mut self) -> io::Result<()> {
        if !self.empty && !self.previous_newline {
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
        }
        Ok(())
    }
}

/// Used as the engine in the stdout and stderr recording tasks. Reads until
/// the end of the stream even if forwarding fails, so that the child never
/// blocks on a full pipe and its status can still be collected.
async fn recorder<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    mut std_read: BufReader<R>,
    std_record: Option<Arc<Mutex<VecDeque<u8>>>>,
    mut std_forward: Option<Forwarder<W>>,
) {
    // 8 KB, like BufReader
    let mut buf = [0u8; 8 * 1024];
    loop {
        let bytes_read = match std_read.read(&mut buf).await {
            Ok(bytes_read) => bytes_read,
            Err(e) => {
                warn!("`couch_harness::Command` stdout or stderr recording failed on read: {e}");
                break
            }
        };
        if bytes_read == 0 {
            if let Some(forwarder) = std_forward.as_mut() {
                if let Err(e) = forwarder.finish().await {
                    warn!("`couch_harness::Command` forwarding failed on write: {e}");
                }
            }
            break
        }
        let bytes = &buf[..bytes_read];
        if let Some(ref arc) = std_record {
            arc.lock().await.extend(bytes);
        }
        let forwarded = match std_forward.as_mut() {
            Some(forwarder) => forwarder.write_lines(bytes).await,
            None => Ok(()),
        };
        if let Err(e) = forwarded {
            warn!(
                "`couch_harness::Command` forwarding failed on write, the rest of the output is \
                 not forwarded: {e}"
            );
            std_forward = None;
        }
    }
}

/// Detached `Commands` are represented by this struct.
///
/// # Note
///
/// Locks on `stdout_record` and `stderr_record` should only be held long enough
/// to make the needed `VecDeque` operations, because the task to record program
/// outputs needs the lock to progress.
#[must_use]
#[derive(Default)]
pub struct CommandRunner {
    /// The command this runner was started with
    command: Option<Command>,
    /// The handle to the `Child` process. The `ChildStdout` was taken if there
    /// was any kind of recording or forwarding.
    pub child_process: Option<Child>,
    handles: Vec<JoinHandle<()>>,
    /// The stdout of the command is actively pushed to the `VecDeque`
    pub stdout_record: Arc<Mutex<VecDeque<u8>>>,
    /// The stderr of the command is actively pushed to the `VecDeque`
    pub stderr_record: Arc<Mutex<VecDeque<u8>>>,
    result: Option<CommandResult>,
}

impl Debug for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // don't try to display `stdout` and `stderr`, leave that for the result
        f.debug_struct("CommandRunner")
            .field("command", &self.command)
            .field("child_process", &self.child_process)
            .field("handles", &self.handles)
            .field("result", &self.result)
            .finish()
    }
}

impl Drop for CommandRunner {
    fn drop(&mut self) {
        if self.child_process.is_some() && (!std::thread::panicking()) {
            warn!(
                "A `CommandRunner` was dropped without being properly finished, the command was: \
                 {}",
                self.command
                    .as_ref()
                    .map(|c| c.get_unified_command())
                    .unwrap_or_default()
            )
        }
    }
}

pub(crate) async fn command_runner(this: Command) -> Result<CommandRunner> {
    let mut cmd = process::Command::new(&this.program);
    if let Some(ref cwd) = this.cwd {
        let cwd = acquire_dir_path(cwd)
            .await
            .stack_err_with_locationless(|| {
                format!("{this:?}.run() -> failed to acquire current working directory")
            })?;
        cmd.current_dir(cwd);
    }
    let stdout_record = Arc::new(Mutex::new(VecDeque::new()));
    let stdout_record_clone = this.stdout_recording.then(|| Arc::clone(&stdout_record));
    let stderr_record = Arc::new(Mutex::new(VecDeque::new()));
    let stderr_record_clone = this.stderr_recording.then(|| Arc::clone(&stderr_record));
    cmd.args(&this.args).kill_on_drop(true);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .stack_err_with_locationless(|| {
            format!("{this:?}.run() -> failed to spawn child process")
        })?;
    let child_id = child.id().unwrap_or_default();
    let terminal_color = if this.stdout_debug || this.stderr_debug {
        next_terminal_color()
    } else {
        owo_colors::AnsiColors::Default
    };
    let prefix_base = if let Some(prefix) = &this.debug_line_prefix {
        prefix.clone()
    } else {
        format!("{} {child_id}", this.program.to_string_lossy())
    };
    let colored_prefix = |separator: &str| {
        owo_colors::OwoColorize::color(&format!("{prefix_base} {separator} "), terminal_color)
            .to_string()
    };
    let stdout_forward = this
        .stdout_debug
        .then(|| Forwarder::new(tokio::io::stdout(), colored_prefix(" |")));
    let stderr_forward = this
        .stderr_debug
        .then(|| Forwarder::new(tokio::io::stderr(), colored_prefix("E|")));
    let mut handles: Vec<JoinHandle<()>> = vec![];
    // dropping the stdout and stderr handles actually results in an error, we keep
    // them in `child_process` if there is not any kind of recording
    if this.stdout_recording || this.stdout_debug {
        let stdout = child
            .stdout
            .take()
            .stack_err_locationless("child process stdout was not piped")?;
        handles.push(task::spawn(recorder(
            BufReader::new(stdout),
            stdout_record_clone,
            stdout_forward,
        )));
    }
    if this.stderr_recording || this.stderr_debug {
        let stderr = child
            .stderr
            .take()
            .stack_err_locationless("child process stderr was not piped")?;
        handles.push(task::spawn(recorder(
            BufReader::new(stderr),
            stderr_record_clone,
            stderr_forward,
        )));
    }
    Ok(CommandRunner {
        command: Some(this),
        child_process: Some(child),
        handles,
        stdout_record,
        stderr_record,
        result: None,
    })
}

impl CommandRunner {
    /// Forces the command to exit. Drops the internal handle. Returns an error
    /// if some termination method has already been called.
    ///
    /// `self.result` is set, and `self.result.status` is set to `None`.
    pub async fn terminate(&mut self) -> Result<()> {
        if let Some(mut child_process) = self.child_process.take() {
            child_process.kill().await.stack_err_locationless(
                "CommandRunner::terminate -> running `kill` on the child process failed",
            )?;
            drop(child_process);
            // a grandchild can keep the pipes open, so the recorders are not waited on
            for handle in self.handles.drain(..) {
                handle.abort();
            }
            let stdout = self.stdout_record.lock().await.iter().copied().collect();
            let stderr = self.stderr_record.lock().await.iter().copied().collect();
            self.result = Some(CommandResult {
                command: self.command.take().unwrap_or_default(),
                status: None,
                stdout,
                stderr,
            });
            Ok(())
        } else {
            bail_locationless!(
                "CommandRunner::terminate -> a termination method has already been called"
            )
        }
    }

    async fn wait_with_output_internal(&mut self) -> Result<()> {
        let output = self
            .child_process
            .take()
            .stack_err_locationless(
                "`CommandRunner` has already had some termination method called",
            )?
            .wait_with_output()
            .await
            .stack_err_with_locationless(|| {
                format!("{self:?}.wait_with_output() -> failed when waiting on child process")
            })?;
        while let Some(handle) = self.handles.pop() {
            handle.await.stack_err_with_locationless(|| {
                format!("{self:?}.wait_with_output() -> `Command` task panicked")
            })?;
        }
        let stdout = self.stdout_record.lock().await.iter().copied().collect();
        let stderr = self.stderr_record.lock().await.iter().copied().collect();
        self.result = Some(CommandResult {
            command: self.command.take().unwrap_or_default(),
            status: Some(output.status),
            stdout,
            stderr,
        });
        Ok(())
    }

    /// Finishes the `CommandResult` (or stalls forever if the OS command does,
    /// use `wait_with_timeout` for a timeout). Note: If this function
    /// succeeds, it only means that the OS calls all succeeded, it does not
    /// mean that the command itself had a successful return status.
    pub async fn wait_with_output(mut self) -> Result<CommandResult> {
        self.wait_with_output_internal().await?;
        self.result
            .take()
            .stack_err_locationless("CommandRunner::wait_with_output -> no result was recorded")
    }

    /// If the command does not complete after `duration`, returns a timeout
    /// error. After `Ok(())` is returned, the `CommandRunner` is finished and
    /// you can call `take_command_result`. Call [Error::is_timeout()] on the
    /// error to see if it was a timeout or another kind of error.
    pub async fn wait_with_timeout(&mut self, duration: Duration) -> Result<()> {
        // backoff control
        let mut interval = Duration::from_millis(1);
        let mut elapsed = Duration::ZERO;
        loop {
            match self
                .child_process
                .as_mut()
                .stack_err_locationless(
                    "CommandRunner::wait_with_timeout -> some termination method has already been \
                     called",
                )?
                .try_wait()
            {
                Ok(Some(_)) => break,
                Ok(None) => (),
                Err(e) => {
                    return Err(Error::from_err_locationless(e)).stack_err_locationless(
                        "CommandRunner::wait_with_timeout failed at `try_wait` before reaching \
                         timeout or completed command",
                    )
                }
            }
            if elapsed > duration {
                return Err(Error::timeout())
            }
            sleep(interval).await;
            elapsed = elapsed.saturating_add(interval);
            if interval < Duration::from_millis(128) {
                interval = interval.saturating_mul(2);
            }
        }
        self.wait_with_output_internal().await?;
        Ok(())
    }

    /// After [CommandRunner::wait_with_timeout] is successful, this will take
    /// the `CommandResult` from `self`, replacing it with `None`.
    pub fn take_command_result(&mut self) -> Option<CommandResult> {
        self.result.take()
    }
}
