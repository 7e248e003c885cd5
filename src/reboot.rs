//! Reboot-request watcher.
//!
//! An action asks for a node reboot by creating [`REBOOT_REQUEST_PATH`]
//! (visible inside containers through the `/worker` bind mount). The
//! watcher polls for that file and runs the reboot binary once it appears.
//! A failed reboot command is retried on the next tick.

use crate::constants::{REBOOT_BINARY, REBOOT_POLL_INTERVAL, REBOOT_REQUEST_PATH};
use crate::context::Context;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Polls for a reboot request file.
#[derive(Debug, Clone)]
pub struct RebootWatcher {
    request_path: PathBuf,
    binary: PathBuf,
    interval: Duration,
}

impl Default for RebootWatcher {
    fn default() -> Self {
        Self::new(REBOOT_REQUEST_PATH, REBOOT_BINARY, REBOOT_POLL_INTERVAL)
    }
}

impl RebootWatcher {
    pub fn new(
        request_path: impl Into<PathBuf>,
        binary: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            request_path: request_path.into(),
            binary: binary.into(),
            interval,
        }
    }

    /// Runs until the reboot binary has been invoked successfully.
    ///
    /// Returns the context error if `ctx` finishes first.
    pub async fn watch(&self, ctx: &Context) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                err = ctx.done() => return Err(err),
                _ = ticker.tick() => {}
            }

            if !is_requested(&self.request_path).await {
                continue;
            }

            info!("Reboot requested via {}", self.request_path.display());
            match self.reboot().await {
                Ok(()) => return Ok(()),
                Err(e) => error!("Reboot failed, retrying: {}", e),
            }
        }
    }

    async fn reboot(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .status()
            .await
            .map_err(|e| Error::Internal(format!("{}: {}", self.binary.display(), e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "{} exited with {}",
                self.binary.display(),
                status
            )))
        }
    }
}

/// A request is a file (not a directory) at `path`.
async fn is_requested(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => !meta.is_dir(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Cannot stat {}: {}", path.display(), e);
            }
            false
        }
    }
}
