//! External process execution.
//!
//! [`ProcessExecutor`] runs one argv at a time with a wall-clock timeout, an
//! explicit working directory and an explicit environment. Children are
//! spawned with `kill_on_drop`, so a timed-out call or a dropped dispatch
//! future (Ctrl-C) never leaves a process behind.
//!
//! Output is decoded lossily and cleaned of ANSI escape sequences and other
//! control characters before any parser sees it. The executor never decides
//! whether a non-zero exit is a failure; parsers do.

use regex::Regex;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, trace};

use crate::command::Invocation;

/// Default wall-clock limit for one external call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything a finished process reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Builds an output from raw bytes, decoding and cleaning both streams.
    pub fn from_raw(
        exit_code: Option<i32>,
        stdout: &[u8],
        stderr: &[u8],
        elapsed: Duration,
    ) -> Self {
        CommandOutput {
            exit_code,
            stdout: decode(stdout),
            stderr: decode(stderr),
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The last `n` non-empty lines of stderr, joined with spaces.
    pub fn stderr_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join(" ")
    }
}

/// Why a process could not produce a [`CommandOutput`].
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting for the process: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {}s", .limit.as_secs())]
    Timeout { limit: Duration },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

/// Something that can run an [`Invocation`].
///
/// The engine is generic over this trait so tests can script manager
/// behaviour without spawning processes.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput, ExecError>> + Send;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    limit: Duration,
    working_dir: PathBuf,
    base_env: BTreeMap<String, String>,
}

impl ProcessExecutor {
    /// Creates an executor whose children see exactly `base_env` plus the
    /// per-invocation overrides.
    pub fn new(base_env: BTreeMap<String, String>, working_dir: impl Into<PathBuf>) -> Self {
        ProcessExecutor {
            limit: DEFAULT_TIMEOUT,
            working_dir: working_dir.into(),
            base_env,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.limit
    }

    pub fn base_env(&self) -> &BTreeMap<String, String> {
        &self.base_env
    }
}

impl CommandRunner for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or(ExecError::EmptyCommand)?;
        debug!("Running command: {}", invocation);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(&self.base_env)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = command.spawn().map_err(|e| ExecError::Spawn {
            program: program.clone(),
            source: e,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(self.limit, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = start.elapsed();
                trace!(
                    "{} finished in {:?} with {:?}",
                    program,
                    elapsed,
                    output.status.code()
                );
                Ok(CommandOutput::from_raw(
                    output.status.code(),
                    &output.stdout,
                    &output.stderr,
                    elapsed,
                ))
            }
            Ok(Err(e)) => {
                error!("Process error: {}", e);
                Err(ExecError::Io(e))
            }
            Err(_) => {
                error!(
                    "Command timed out after {} seconds: {}",
                    self.limit.as_secs(),
                    invocation
                );
                Err(ExecError::Timeout { limit: self.limit })
            }
        }
    }
}

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]")
        .expect("ANSI escape pattern is valid")
});

/// Decodes process output: lossy UTF-8, CRLF normalized, carriage-return
/// overwrites resolved to the final text, escape sequences and other control
/// characters removed. Tabs and newlines are kept.
pub fn decode(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.replace("\r\n", "\n");
    ANSI_ESCAPE
        .replace_all(&text, "")
        .split('\n')
        .map(|line| {
            let visible = line.rsplit('\r').find(|s| !s.is_empty()).unwrap_or("");
            visible
                .chars()
                .filter(|c| *c == '\t' || !c.is_control())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
