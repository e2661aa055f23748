//! Asynchronous utilities for use with Tokio.

use std::{panic, time::Duration};

use crate::prelude::*;

pub mod io;

/// Turn a non-zero exit into an error carrying the command's error output.
/// Both output streams are logged.
pub fn check_for_command_failure(command_name: &str, output: &std::process::Output) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
        Err(err) => Err(anyhow!("blocking task was cancelled: {err}")),
    }
}

/// Run `future` with a time limit.
pub async fn with_timeout<F, T>(what: &str, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {:?}", what, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_commands_report_exit_code() {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .output()
            .await
            .unwrap();
        let err = check_for_command_failure("sh", &output).unwrap_err();
        assert!(err.to_string().contains("exit code 3"), "{err:?}");
        assert!(err.to_string().contains("oops"), "{err:?}");

        let output = tokio::process::Command::new("true").output().await.unwrap();
        check_for_command_failure("true", &output).unwrap();
    }
}
