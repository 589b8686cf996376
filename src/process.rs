//! Running external collaborator commands (agents, critics).
//!
//! The request goes to the child's stdin and the full stdout comes back as a
//! string. Stdin is written while stdout is drained, both under the one
//! timeout. A non-zero exit or a timeout is an error; the child is killed
//! when the timeout fires.

use anyhow::{Context, Result, bail};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Characters of stderr kept in error messages.
const STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// `program arg1 arg2` for log lines.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawn `spec`, write `input` to stdin, and return stdout.
pub async fn run_with_stdin(spec: &CommandSpec, input: &str, timeout: Duration) -> Result<String> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = spec.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", spec.program))?;

    let stdin = child.stdin.take();
    let write = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        // A child that exits without reading its input is not an error.
        match stdin.write_all(input.as_bytes()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e).context("Failed to write request to stdin"),
        }
        match stdin.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e).context("Failed to close stdin"),
        }
    };
    let run = async move {
        let (written, output) = tokio::join!(write, child.wait_with_output());
        written?;
        output.context("Failed to wait for process")
    };

    // Dropping `run` on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, run)
        .await
        .with_context(|| {
            format!(
                "'{}' timed out after {}s",
                spec.display(),
                timeout.as_secs()
            )
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .trim()
            .chars()
            .rev()
            .take(STDERR_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        bail!(
            "'{}' exited with code {}: {}",
            spec.program,
            output.status.code().unwrap_or(-1),
            tail
        );
    }

    String::from_utf8(output.stdout).context("Process output is not valid UTF-8")
}
