//! Bounded execution of external command-line tools.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tokio::time::timeout;

use crate::ui::prelude::{Level, emit};

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
}

/// Run `program` with `args`, failing when it exits non-zero or exceeds `limit`.
/// The child is killed when the timeout fires.
pub async fn run_tool(program: &str, args: &[String], limit: Duration) -> Result<ToolOutput> {
    emit(
        Level::Debug,
        "tool.run",
        &format!("{} {}", program, args.join(" ")),
        None,
    );

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            bail!("`{program}` was not found on PATH")
        }
        Err(err) => return Err(err).with_context(|| format!("Failed to spawn {program}")),
    };

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("Failed to wait for {program}"))?,
        Err(_) => bail!("{program} timed out after {}s", limit.as_secs()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        bail!(
            "{program} exited with status {:?}: {}",
            output.status.code(),
            summarize_stderr(&stderr)
        );
    }

    Ok(ToolOutput { stdout })
}

/// Keep the lines that mention an error, or the tail of the output when none do.
pub fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let error_lines: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| line.to_ascii_lowercase().contains("error"))
        .collect();

    let picked = if error_lines.is_empty() {
        &lines[lines.len().saturating_sub(5)..]
    } else {
        &error_lines[..]
    };
    picked.join("\n")
}
