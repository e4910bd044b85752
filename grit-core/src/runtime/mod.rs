// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! External OCI runtime and checkpoint decoder invocation.
//!
//! The lifecycle core talks to the runtime only through [`OciRuntime`], so
//! tests substitute a recording fake. [`RuncCli`] is the subprocess-backed
//! implementation.

mod command;
mod crit;
mod runc;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, ShimError, ShimResult};
use crate::io::RuntimeIo;
use crate::types::ProcessId;

pub use crit::{CheckpointDecoder, CritCli};
pub use runc::RuncCli;

/// Options for `create`.
#[derive(Debug, Default)]
pub struct CreateOpts {
    pub pid_file: PathBuf,
    pub console_socket: Option<PathBuf>,
    pub io: RuntimeIo,
}

/// Options for `restore`.
#[derive(Debug, Default)]
pub struct RestoreOpts {
    pub image_path: PathBuf,
    pub pid_file: PathBuf,
    pub console_socket: Option<PathBuf>,
    pub io: RuntimeIo,
}

/// Options for `exec`.
#[derive(Debug, Default)]
pub struct ExecOpts {
    /// Process spec JSON written inside the bundle.
    pub process_spec: PathBuf,
    pub pid_file: PathBuf,
    pub console_socket: Option<PathBuf>,
    pub io: RuntimeIo,
}

/// Options for `checkpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointOptions {
    pub image_path: PathBuf,
    pub work_path: Option<PathBuf>,
    /// Stop the container after the dump instead of leaving it running.
    pub exit: bool,
    pub allow_open_tcp: bool,
    pub allow_external_unix_sockets: bool,
    pub allow_terminal: bool,
    pub file_locks: bool,
    pub empty_namespaces: Vec<String>,
}

/// Operations the lifecycle core needs from an OCI runtime.
///
/// Every call races the runtime against `cancel`.
#[async_trait]
pub trait OciRuntime: Send + Sync {
    async fn create(
        &self,
        id: &str,
        bundle: &Path,
        opts: CreateOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn start(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError>;

    async fn restore(
        &self,
        id: &str,
        bundle: &Path,
        opts: RestoreOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn pause(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError>;

    async fn resume(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError>;

    async fn kill(
        &self,
        id: &str,
        signal: Signal,
        all: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn delete(
        &self,
        id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn update(
        &self,
        id: &str,
        resources: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn checkpoint(
        &self,
        id: &str,
        opts: &CheckpointOptions,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn exec(
        &self,
        id: &str,
        opts: ExecOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;
}

/// Read the pid the runtime wrote after create, restore or exec.
pub async fn read_pid_file(path: &Path) -> ShimResult<ProcessId> {
    let pid_error = |reason: String| ShimError::PidFile {
        path: path.to_path_buf(),
        reason,
    };

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| pid_error(e.to_string()))?;
    let raw: u32 = content
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| pid_error(format!("{:?}: {}", content.trim(), e)))?;

    ProcessId::new(raw).map_err(|e| pid_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");
        std::fs::write(&path, "4242\n").unwrap();

        assert_eq!(read_pid_file(&path).await.unwrap().value(), 4242);
    }

    #[tokio::test]
    async fn test_read_pid_file_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");

        assert!(matches!(
            read_pid_file(&path).await,
            Err(ShimError::PidFile { .. })
        ));

        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(
            read_pid_file(&path).await,
            Err(ShimError::PidFile { .. })
        ));

        std::fs::write(&path, "0").unwrap();
        assert!(matches!(
            read_pid_file(&path).await,
            Err(ShimError::PidFile { .. })
        ));
    }
}
