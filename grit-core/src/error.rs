// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for the grit shim.
//!
//! Every failure is an explicit enum variant. Remapping failures are the one
//! exception to propagation: they are folded into a `RemapReport` and never
//! reach the caller as an `Err`.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContainerId;

/// Top-level error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum ShimError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Process not found: {0}")]
    ProcessNotFound(ContainerId),

    #[error("Process already exists: {0}")]
    ProcessAlreadyExists(ContainerId),

    #[error("Process {id} cannot be released in state {state}")]
    ProcessNotDeleted { id: ContainerId, state: &'static str },

    // =========================================================================
    // External Runtime Errors
    // =========================================================================
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    // =========================================================================
    // Start / Restore Plumbing
    // =========================================================================
    #[error("Failed to retrieve OCI runtime container pid from {path}: {reason}")]
    PidFile { path: PathBuf, reason: String },

    #[error("Delete of {0} cancelled while io copies drain")]
    IoDrainCancelled(ContainerId),

    #[error("Stdio setup failed: {context} - {source}")]
    Stdio {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors for configuration and identifiers.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Path must be absolute: {field} = {path}")]
    RelativePath { field: &'static str, path: PathBuf },

    #[error("Invalid signal number: {signal}")]
    InvalidSignal { signal: u32 },
}

/// Rejections issued by the lifecycle state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("cannot {operation} process {container_id} in {state} state")]
    IllegalOperation {
        container_id: ContainerId,
        operation: &'static str,
        state: &'static str,
    },
}

/// Failures of the external OCI runtime or checkpoint tool.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("OCI runtime {operation} failed to spawn {binary}: {source}")]
    Spawn {
        operation: &'static str,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("OCI runtime {operation} failed ({status}): {output}")]
    Failed {
        operation: &'static str,
        status: String,
        output: String,
    },

    #[error("OCI runtime {operation} could not be awaited: {source}")]
    Wait {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("OCI runtime {operation} cancelled by caller")]
    Cancelled { operation: &'static str },
}

impl RuntimeError {
    /// Operation label the failure belongs to.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Spawn { operation, .. }
            | Self::Failed { operation, .. }
            | Self::Wait { operation, .. }
            | Self::Cancelled { operation } => operation,
        }
    }
}

/// Soft failures inside the identity remapping engine.
#[derive(Debug, Error)]
pub enum RemapError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create symlink {from} -> {to}: {source}")]
    Symlink {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bundle config {path}: {reason}")]
    BundleConfig { path: PathBuf, reason: String },

    #[error("invalid path pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type alias using ShimError.
pub type ShimResult<T> = Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_operation_display() {
        let err = StateTransitionError::IllegalOperation {
            container_id: ContainerId::new("web-1").unwrap(),
            operation: "pause",
            state: "created",
        };
        assert_eq!(err.to_string(), "cannot pause process web-1 in created state");
    }

    #[test]
    fn test_runtime_error_carries_operation() {
        let err = RuntimeError::Failed {
            operation: "restore",
            status: "exit status: 1".to_string(),
            output: "criu failed".to_string(),
        };
        assert_eq!(err.operation(), "restore");
        assert!(err.to_string().contains("criu failed"));

        let shim: ShimError = err.into();
        assert!(matches!(shim, ShimError::Runtime(_)));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::InvalidSignal { signal: 4096 };
        let shim_err: ShimError = validation_err.into();
        assert!(matches!(shim_err, ShimError::HardValidation(_)));
    }
}
