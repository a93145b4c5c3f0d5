//! Launching the server binary and watching its process.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{Level, debug, error, info, warn};

use crate::error::{Error, Result};

/// Regex pattern for matching MinIO log lines
static LOG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(INFO|WARNING|WARN|ERROR|FATAL|API|DEBUG):?\s+(.*)$")
        .expect("Invalid regex pattern")
});

/// Everything needed to launch the server.
#[derive(Clone)]
pub struct EngineCommand {
    /// Arguments, starting with the `server` subcommand.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Path to the server binary.
    pub executable: PathBuf,
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<_> = self
            .env
            .iter()
            .map(|(key, value)| {
                if key.contains("PASSWORD") {
                    (key.as_str(), "<redacted>")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();

        f.debug_struct("EngineCommand")
            .field("args", &self.args)
            .field("env", &env)
            .field("executable", &self.executable)
            .finish()
    }
}

impl EngineCommand {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());

        command
    }
}

/// OS-level process operations the supervisor relies on.
#[async_trait]
pub trait ProcessControl
where
    Self: Send + Sync + 'static,
{
    /// Launches `command` in the background and returns its process identifier.
    async fn spawn_detached(&self, command: &EngineCommand) -> Result<u32>;

    /// Whether a process with the given identifier exists.
    fn is_alive(&self, pid: u32) -> bool;
}

/// `ProcessControl` backed by the host operating system.
#[derive(Clone, Debug, Default)]
pub struct SystemProcessControl {
    log_file: Option<PathBuf>,
}

impl SystemProcessControl {
    /// Creates a controller that discards the output of detached servers.
    #[must_use]
    pub const fn new() -> Self {
        Self { log_file: None }
    }

    /// Appends the output of detached servers to `log_file` instead.
    #[must_use]
    pub fn with_log_file(mut self, log_file: impl AsRef<Path>) -> Self {
        self.log_file = Some(log_file.as_ref().to_path_buf());
        self
    }

    fn output(&self) -> Result<(Stdio, Stdio)> {
        let Some(path) = &self.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Io("failed to open minio log file", e))?;
        let err = file
            .try_clone()
            .map_err(|e| Error::Io("failed to clone minio log file", e))?;

        Ok((Stdio::from(file), Stdio::from(err)))
    }
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn spawn_detached(&self, command: &EngineCommand) -> Result<u32> {
        let (stdout, stderr) = self.output()?;

        let child = command
            .command()
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(Error::Spawn)?;

        child
            .id()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("process exited immediately")))
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };

        // EPERM means the process exists but belongs to someone else
        matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
    }
}

/// Launches `command` attached to this process, forwarding its output to `tracing`.
///
/// # Errors
///
/// Returns an error if the binary cannot be launched.
pub fn spawn_attached(command: &EngineCommand) -> Result<Child> {
    let mut child = command
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::Spawn)?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout));
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr));
    }

    Ok(child)
}

async fn forward_output<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => forward_log_line(&line),
            Ok(None) => break,
            Err(e) => {
                debug!("stopped reading minio output: {e}");
                break;
            }
        }
    }
}

/// Splits a server log line into the level it is forwarded at and its message.
fn classify(line: &str) -> (Level, &str) {
    let Some(caps) = LOG_REGEX.captures(line) else {
        return (Level::INFO, line);
    };

    let message = caps.get(2).map_or(line, |m| m.as_str());
    let level = match caps.get(1).map_or("INFO", |m| m.as_str()) {
        "DEBUG" => Level::DEBUG,
        "WARNING" | "WARN" => Level::WARN,
        // API lines carry request failures
        "ERROR" | "FATAL" | "API" => Level::ERROR,
        _ => Level::INFO,
    };

    (level, message)
}

fn forward_log_line(line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let (level, message) = classify(line);
    if level == Level::ERROR {
        error!(target: "minio", "{}", message);
    } else if level == Level::WARN {
        warn!(target: "minio", "{}", message);
    } else if level == Level::DEBUG {
        debug!(target: "minio", "{}", message);
    } else {
        info!(target: "minio", "{}", message);
    }
}
