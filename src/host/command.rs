//! Command-backed collaborators.
//!
//! Rendering and suspend are owned by other programs on the device (a panel
//! driver, `rtcwake`, `systemctl suspend`, ...). These adapters launch them
//! and map their exit status onto [`HostError`].

use crate::cycle::{DisplayRefresher, SleepEntry};
use thiserror::Error;
use tokio::process::Command;

/// Command launch errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    CommandFailed { program: String, code: Option<i32> },

    #[error("No command configured")]
    EmptyCommand,
}

/// Run `argv` to completion, failing on a non-zero exit
async fn run_command(argv: &[String]) -> Result<(), HostError> {
    let (program, args) = argv.split_first().ok_or(HostError::EmptyCommand)?;
    tracing::debug!("Running {} {:?}", program, args);

    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| HostError::Spawn {
            program: program.clone(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(HostError::CommandFailed {
            program: program.clone(),
            code: status.code(),
        })
    }
}

/// Refreshes the panel by running an external command
pub struct CommandRefresher {
    argv: Vec<String>,
}

impl CommandRefresher {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl DisplayRefresher for CommandRefresher {
    async fn refresh(&mut self) -> Result<(), HostError> {
        run_command(&self.argv).await
    }
}

/// Suspends the device by running an external command.
///
/// The command returns once the device has woken up again.
pub struct CommandSleep {
    argv: Vec<String>,
}

impl CommandSleep {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl SleepEntry for CommandSleep {
    async fn enter_deep_sleep(&mut self) -> Result<(), HostError> {
        run_command(&self.argv).await
    }
}

/// Logs instead of touching the panel or suspending; used for dry runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnly;

impl DisplayRefresher for LogOnly {
    async fn refresh(&mut self) -> Result<(), HostError> {
        tracing::info!("Dry run: display refresh skipped");
        Ok(())
    }
}

impl SleepEntry for LogOnly {
    async fn enter_deep_sleep(&mut self) -> Result<(), HostError> {
        tracing::info!("Dry run: deep sleep skipped");
        Ok(())
    }
}
