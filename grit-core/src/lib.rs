// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! GRIT Core Library
//!
//! Process-lifecycle core of a container runtime shim. Tracks the init
//! process of one container from creation to deletion through a
//! table-driven state machine, drives the OCI runtime, and prepares
//! GPU checkpoint restores across pod identities by remapping on-disk
//! path references.

pub mod bundle;
pub mod config;
pub mod error;
pub mod io;
pub mod process;
pub mod registry;
pub mod remap;
pub mod runtime;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLoader, PathsConfig, RuntimeConfig, ShimConfig};
pub use error::{
    HardValidationError, RemapError, RuntimeError, ShimError, ShimResult, StateTransitionError,
};
pub use io::StdioConfig;
pub use process::{
    CreateConfig, ExecConfig, ExecHandle, ExitStatus, InitProcess, ShimContext, StartOutcome,
};
pub use registry::ProcessRegistry;
pub use remap::{IdentityRemapper, RemapReport, RestorePreparer};
pub use runtime::{CheckpointDecoder, CheckpointOptions, CritCli, OciRuntime, RuncCli};
pub use state::{InitState, LifecycleStateMachine, Operation, Outcome, ProcessStatus, StateKind};
pub use types::{ContainerId, ProcessId};
