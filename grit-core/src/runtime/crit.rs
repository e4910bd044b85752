// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint image decoding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::command::{run, ChildIo};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

/// Turns a binary checkpoint artifact into text the remapper can scan.
#[async_trait]
pub trait CheckpointDecoder: Send + Sync {
    async fn decode(
        &self,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError>;
}

/// `crit decode -i <file> --pretty`.
#[derive(Debug, Clone)]
pub struct CritCli {
    binary: PathBuf,
}

impl CritCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.crit_binary.clone(),
        }
    }
}

#[async_trait]
impl CheckpointDecoder for CritCli {
    async fn decode(
        &self,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("decode").arg("-i").arg(artifact).arg("--pretty");

        let text = run("decode", &self.binary, cmd, ChildIo::capture(), cancel).await?;
        tracing::debug!(
            artifact = %artifact.display(),
            bytes = text.len(),
            "Decoded checkpoint artifact"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_crit_is_spawn_error() {
        let crit = CritCli {
            binary: PathBuf::from("/nonexistent/crit"),
        };
        let err = crit
            .decode(Path::new("/tmp/mountpoints-1.img"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { operation: "decode", .. }));
    }
}
