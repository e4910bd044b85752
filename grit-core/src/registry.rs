// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-safe process registry using DashMap.
//!
//! Owns every managed init process of the shim, keyed by container id. A
//! process leaves the registry only once it reached Deleted.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ShimError, ShimResult};
use crate::process::InitProcess;
use crate::state::{ProcessStatus, StateKind, StateMachineMetrics};
use crate::types::ContainerId;

/// Thread-safe registry of managed processes.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: DashMap<ContainerId, Arc<InitProcess>>,
}

impl ProcessRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            processes: DashMap::new(),
        }
    }

    /// Create a registry wrapped in an Arc for sharing across tasks.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a process. Fails if the id is already taken.
    pub fn register(&self, process: InitProcess) -> ShimResult<Arc<InitProcess>> {
        let id = process.id().clone();
        match self.processes.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ShimError::ProcessAlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let process = Arc::new(process);
                slot.insert(Arc::clone(&process));
                tracing::debug!(container_id = %id, "Process registered");
                Ok(process)
            }
        }
    }

    pub fn get(&self, id: &ContainerId) -> ShimResult<Arc<InitProcess>> {
        self.processes
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ShimError::ProcessNotFound(id.clone()))
    }

    /// Remove a process that has been deleted.
    pub fn remove(&self, id: &ContainerId) -> ShimResult<Arc<InitProcess>> {
        let process = self.get(id)?;
        let kind = process.state_kind();
        if kind != StateKind::Deleted {
            return Err(ShimError::ProcessNotDeleted {
                id: id.clone(),
                state: kind.name(),
            });
        }

        self.processes.remove(id);
        tracing::debug!(container_id = %id, "Process released");
        Ok(process)
    }

    pub fn status(&self, id: &ContainerId) -> ShimResult<ProcessStatus> {
        self.get(id).map(|p| p.status())
    }

    /// Status of every registered process, sorted by id.
    pub fn statuses(&self) -> Vec<(ContainerId, ProcessStatus)> {
        let mut all: Vec<_> = self
            .processes
            .iter()
            .map(|r| (r.key().clone(), r.value().status()))
            .collect();
        all.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        all
    }

    /// Get metrics for all processes.
    pub async fn metrics(&self) -> Vec<StateMachineMetrics> {
        let processes: Vec<Arc<InitProcess>> =
            self.processes.iter().map(|r| Arc::clone(r.value())).collect();

        let mut metrics = Vec::with_capacity(processes.len());
        for process in processes {
            metrics.push(process.metrics().await);
        }
        metrics
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.processes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
