//! Subprocess execution for bound commands.
//!
//! Commands inherit the daemon's stdout/stderr and get no stdin; the exit
//! status is the only feedback channel. Failures here are always recoverable:
//! callers log them and keep processing events.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::cancel::CancelSignal;

/// One command ready to launch: a non-empty argv plus the originating
/// device's timeout, if it configured one.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub argv: Vec<String>,
    pub timeout: Option<Duration>,
}

enum Wait {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
}

async fn wait_limited(child: &mut Child, limit: Option<Duration>) -> Wait {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => Wait::Exited(result),
            Err(_) => Wait::TimedOut,
        },
        None => Wait::Exited(child.wait().await),
    }
}

/// Run one invocation to completion.
///
/// If `cancel` fires while the command is still running, the child is killed
/// and reaped; cancellation is not reported as a failure. A non-zero exit,
/// a spawn failure, or an expired timeout is an error for the caller to log.
pub async fn run(invocation: &CommandInvocation, cancel: Option<CancelSignal>) -> Result<()> {
    let (program, args) = invocation
        .argv
        .split_first()
        .context("empty command argument vector")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn command: {program}"))?;

    let waited = match cancel {
        Some(signal) => {
            tokio::select! {
                waited = wait_limited(&mut child, invocation.timeout) => Some(waited),
                _ = signal.cancelled() => None,
            }
        }
        None => Some(wait_limited(&mut child, invocation.timeout).await),
    };

    match waited {
        // Cancelled: the device is gone, nobody cares about the outcome.
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!(command = %program, "command cancelled");
            Ok(())
        }
        Some(Wait::TimedOut) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            bail!(
                "command {program} timed out after {}ms",
                invocation.timeout.unwrap_or_default().as_millis()
            );
        }
        Some(Wait::Exited(result)) => {
            let status =
                result.with_context(|| format!("Failed to wait for command: {program}"))?;
            if !status.success() {
                bail!("command {program} exited with {status}");
            }
            Ok(())
        }
    }
}
