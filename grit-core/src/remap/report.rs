// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Structured outcome of a remapping pass.

use std::path::PathBuf;

use serde::Serialize;

/// Which identity namespace a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pod,
    Sandbox,
}

/// A symlink installed from an old-identity path to its new-identity target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub phase: Phase,
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ConfigUnreadable,
    PodIdentityMissing,
    MountpointsMissing,
    DecodeFailed,
    RemapSkipped,
    NoOldIdentity,
    AmbiguousCandidate,
    NoMapping,
    UnsafeSubpath,
    TargetMissing,
    CoveredByLink,
    LinkFailed,
    SandboxIdentityMissing,
    CriuConfigFailed,
    AnnotationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

/// Everything a restore-time remapping pass did or skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemapReport {
    pub new_pod_uid: Option<String>,
    pub old_pod_uid: Option<String>,
    pub new_sandbox_id: Option<String>,
    pub old_sandbox_ids: Vec<String>,
    pub mountpoints: Option<PathBuf>,
    pub criu_config: Option<PathBuf>,
    pub links: Vec<LinkRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RemapReport {
    /// Record a skipped or failed step. Mirrored to the log.
    pub fn note(&mut self, kind: DiagnosticKind, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(kind = ?kind, "GPU restore: {}", detail);
        self.diagnostics.push(Diagnostic { kind, detail });
    }

    pub(crate) fn linked(&mut self, phase: Phase, from: PathBuf, to: PathBuf) {
        tracing::info!(
            phase = ?phase,
            from = %from.display(),
            to = %to.display(),
            "GPU restore: created symlink"
        );
        self.links.push(LinkRecord { phase, from, to });
    }

    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    pub fn links_in(&self, phase: Phase) -> impl Iterator<Item = &LinkRecord> {
        self.links.iter().filter(move |l| l.phase == phase)
    }
}
