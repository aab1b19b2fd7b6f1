//! Asynchronous utilities for use with Tokio.
//!
//! The engine itself is plain async code. What lives here is the glue for
//! running external tools (`pdftocairo`, `tesseract`) without starving the
//! executor, plus a couple of type aliases that keep signatures readable.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::Stream;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A flag shared between the Ctrl-C handler and the run driver.
///
/// Once set, no new work is dispatched. Work already in flight is allowed to
/// finish and is absorbed normally.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful shutdown.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Has a shutdown been requested?
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Install a Ctrl-C listener which sets this flag. A second Ctrl-C exits
    /// immediately.
    pub fn listen_for_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("could not install Ctrl-C handler; interruption will not checkpoint");
                return;
            }
            warn!("Interrupt received, finishing in-flight items and saving progress");
            warn!("Press Ctrl-C again to exit immediately");
            flag.request();
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Forced exit without saving");
                std::process::exit(130);
            }
        });
    }
}

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged at debug level. Standard
/// error may optionally be checked with `is_error_line`, which lets us catch
/// tools that print errors but still exit successfully.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
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
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
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
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn shutdown_flag_is_shared_between_clones() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_requested());
        flag.request();
        assert!(other.is_requested());
    }

    #[test]
    fn command_failure_is_reported() {
        let output = Command::new("sh")
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .output()
            .unwrap();
        let err = check_for_command_failure("sh", &output, None).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }

    #[test]
    fn error_lines_fail_successful_commands() {
        let output = Command::new("sh")
            .arg("-c")
            .arg("echo 'Syntax Error: bad page' >&2")
            .output()
            .unwrap();
        let is_error = |line: &str| line.contains("Error");
        assert!(check_for_command_failure("sh", &output, Some(&is_error)).is_err());
        assert!(check_for_command_failure("sh", &output, None).is_ok());
    }
}
