use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::warn;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;

use crate::types::ProcessError;

/// Captured streams of a successfully exited command.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Run one command to completion, capturing both output streams.
///
/// The child's environment is exactly `env` (callers pass through the full
/// invoking environment plus their overrides). A non-zero exit becomes
/// `ProcessError::Failed` carrying the captured output. On timeout the
/// process is killed and reaped before the error is returned, so no zombie
/// outlives the step that spawned it.
pub async fn check_output(
    cmd: &[String],
    timeout_secs: u64,
    env: &HashMap<String, String>,
    cwd: Option<&Path>,
) -> Result<ProcessOutput, ProcessError> {
    let display_cmd = cmd.join(" ");
    let Some((exe, args)) = cmd.split_first() else {
        return Err(ProcessError::Io {
            command: display_cmd,
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let mut command = Command::new(exe);
    command
        .args(args)
        .env_clear()
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ProcessError::Io {
        command: display_cmd.clone(),
        source,
    })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    // Both pipes are drained concurrently; reading them one after the other
    // can deadlock once the unread pipe's buffer fills.
    let wait = async {
        let (stdout_read, stderr_read) = tokio::join!(
            async {
                match stdout_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut stdout_buf).await.map(|_| ()),
                    None => Ok(()),
                }
            },
            async {
                match stderr_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut stderr_buf).await.map(|_| ()),
                    None => Ok(()),
                }
            }
        );
        stdout_read?;
        stderr_read?;
        child.wait().await
    };

    let status = match time::timeout(Duration::from_secs(timeout_secs), wait).await {
        Ok(result) => result.map_err(|source| ProcessError::Io {
            command: display_cmd.clone(),
            source,
        })?,
        Err(_) => {
            // kill() also reaps the process, satisfying the wait-after-kill
            // requirement.
            if let Err(err) = child.kill().await {
                warn!("Unable to kill timed out `{display_cmd}`: {err}");
            }
            return Err(ProcessError::TimedOut {
                command: display_cmd,
                timeout: timeout_secs,
            });
        }
    };

    let output = ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
        stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
    };

    if !status.success() {
        return Err(ProcessError::Failed {
            command: display_cmd,
            exit_code: status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(output)
}
