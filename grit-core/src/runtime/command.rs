// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cancellable subprocess invocation shared by the runtime and decoder.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::io::RuntimeIo;

/// How the child's standard streams are wired.
#[derive(Debug)]
pub(crate) enum ChildIo {
    /// Capture stdout and stderr, optionally feeding stdin.
    Capture { input: Option<Vec<u8>> },
    /// Hand the container's own stdio to the runtime. Unset streams are null.
    Process(RuntimeIo),
}

impl ChildIo {
    pub(crate) fn capture() -> Self {
        Self::Capture { input: None }
    }

    /// For create, restore and exec. With `--detach` the container inherits
    /// the child's stdio, so these never capture, even with no stdio attached.
    pub(crate) fn process(io: RuntimeIo) -> Self {
        Self::Process(io)
    }
}

/// Run `cmd` to completion, returning its combined stdout and stderr.
///
/// A non-zero exit is `Failed`. When `cancel` fires first the child is
/// killed and the call returns `Cancelled`.
pub(crate) async fn run(
    operation: &'static str,
    binary: &Path,
    mut cmd: Command,
    io: ChildIo,
    cancel: &CancellationToken,
) -> Result<String, RuntimeError> {
    cmd.kill_on_drop(true);

    let input = match io {
        ChildIo::Capture { input } => {
            cmd.stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            input
        }
        ChildIo::Process(io) => {
            cmd.stdin(io.stdin.map_or_else(Stdio::null, Stdio::from));
            cmd.stdout(io.stdout.map_or_else(Stdio::null, Stdio::from));
            cmd.stderr(io.stderr.map_or_else(Stdio::null, Stdio::from));
            None
        }
    };

    tracing::debug!(operation, binary = %binary.display(), "Invoking OCI runtime");

    let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
        operation,
        binary: binary.to_path_buf(),
        source,
    })?;
    // The child owns its copies of any process descriptors now
    drop(cmd);

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(&input)
            .await
            .map_err(|source| RuntimeError::Wait { operation, source })?;
    }

    let output = tokio::select! {
        () = cancel.cancelled() => {
            tracing::warn!(operation, "OCI runtime call cancelled, killing child");
            return Err(RuntimeError::Cancelled { operation });
        }
        output = child.wait_with_output() => {
            output.map_err(|source| RuntimeError::Wait { operation, source })?
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(RuntimeError::Failed {
            operation,
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        });
    }

    Ok(combined)
}
