// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Restore-time identity remapping.
//!
//! A checkpoint captured under one pod still names the old pod's kubelet
//! directories and the old sandbox's containerd directories. Before restore,
//! each such path is replaced by a symlink to its counterpart under the new
//! identity, when that counterpart exists. Nothing in here is fatal: every
//! failure becomes a diagnostic in the returned `RemapReport`.

mod prepare;
mod refs;
mod report;
mod tables;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::error::RemapError;

pub use prepare::{find_mountpoints, RestorePreparer};
pub use refs::{contained_subpath, PathPatterns, PathReference};
pub use report::{Diagnostic, DiagnosticKind, LinkRecord, Phase, RemapReport};
pub use tables::{MappingTables, CONTAINERS_DIR, PROJECTED_DIR};

/// Symlink-substitutes old-identity paths found in decoded checkpoint text.
#[derive(Debug, Clone)]
pub struct IdentityRemapper {
    paths: PathsConfig,
    patterns: PathPatterns,
}

impl IdentityRemapper {
    pub fn new(paths: PathsConfig) -> Result<Self, RemapError> {
        let patterns = PathPatterns::new(&paths)?;
        Ok(Self { paths, patterns })
    }

    pub fn patterns(&self) -> &PathPatterns {
        &self.patterns
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Relink kubelet pod paths from the old pod UID to `new_uid`.
    ///
    /// The old UID is the first UID in scan order that differs from the new
    /// one. With several differing UIDs only that first one is remapped.
    pub fn remap_pods(&self, decoded: &str, new_uid: &str, report: &mut RemapReport) {
        let refs = contained(self.patterns.pod_references(decoded), report);

        let old_uids: BTreeSet<&str> = refs
            .iter()
            .map(|r| r.identity.as_str())
            .filter(|uid| *uid != new_uid)
            .collect();
        let Some(old_uid) = refs
            .iter()
            .map(|r| r.identity.as_str())
            .find(|uid| *uid != new_uid)
        else {
            report.note(
                DiagnosticKind::NoOldIdentity,
                format!("no pod UID other than {new_uid} in checkpoint mounts"),
            );
            return;
        };
        if old_uids.len() > 1 {
            report.note(
                DiagnosticKind::AmbiguousCandidate,
                format!(
                    "{} old pod UIDs in checkpoint mounts, remapping first: {}",
                    old_uids.len(),
                    old_uid
                ),
            );
        }

        tracing::info!(
            old_pod_uid = %old_uid,
            new_pod_uid = %new_uid,
            "GPU restore: remapping kubelet paths"
        );
        report.old_pod_uid = Some(old_uid.to_string());

        let pods_root = &self.paths.kubelet_pods_root;
        let old_pod_dir = pods_root.join(old_uid);
        let new_pod_dir = pods_root.join(new_uid);

        let old_refs: Vec<&PathReference> =
            refs.iter().filter(|r| r.identity == old_uid).collect();
        let tables = MappingTables::build(&old_refs, &new_pod_dir, report);

        // Keyed by absolute path: deduplicates, and parents sort before children
        let candidates: BTreeMap<PathBuf, &str> = old_refs
            .iter()
            .map(|r| (old_pod_dir.join(&r.subpath), r.subpath.as_str()))
            .collect();

        let mut linked = Vec::new();
        for (old_path, subpath) in candidates {
            if is_covered(&old_path, &linked, report) {
                continue;
            }

            let Some(new_path) = tables.substitute(subpath, &new_pod_dir) else {
                report.note(
                    DiagnosticKind::NoMapping,
                    format!("no new pod path for {}", old_path.display()),
                );
                continue;
            };

            if self.relink(Phase::Pod, &old_path, &new_path, report) {
                linked.push(old_path);
            }
        }
    }

    /// Relink containerd sandbox paths from any differing sandbox id to
    /// `new_sandbox_id`. Independent of the pod phase.
    pub fn remap_sandboxes(&self, decoded: &str, new_sandbox_id: &str, report: &mut RemapReport) {
        let refs = contained(self.patterns.sandbox_references(decoded), report);
        if refs.is_empty() {
            return;
        }

        tracing::info!(
            new_sandbox_id = %new_sandbox_id,
            "GPU restore: handling containerd sandbox paths"
        );

        let sandboxes_root = self.paths.sandboxes_root();
        let new_dir = sandboxes_root.join(new_sandbox_id);

        let mut candidates: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for reference in refs.iter().filter(|r| r.identity != new_sandbox_id) {
            if !report.old_sandbox_ids.contains(&reference.identity) {
                report.old_sandbox_ids.push(reference.identity.clone());
            }
            let old_path = sandboxes_root
                .join(&reference.identity)
                .join(&reference.subpath);
            candidates
                .entry(old_path)
                .or_insert_with(|| new_dir.join(&reference.subpath));
        }

        let mut linked = Vec::new();
        for (old_path, new_path) in candidates {
            if is_covered(&old_path, &linked, report) {
                continue;
            }
            if self.relink(Phase::Sandbox, &old_path, &new_path, report) {
                linked.push(old_path);
            }
        }
    }

    /// Verify the target, then substitute. Returns whether a link was made.
    fn relink(
        &self,
        phase: Phase,
        old_path: &Path,
        new_path: &Path,
        report: &mut RemapReport,
    ) -> bool {
        if !new_path.exists() {
            report.note(
                DiagnosticKind::TargetMissing,
                format!(
                    "new {:?} path doesn't exist, skipping: {}",
                    phase,
                    new_path.display()
                ),
            );
            return false;
        }

        match symlink_substitute(old_path, new_path) {
            Ok(()) => {
                report.linked(phase, old_path.to_path_buf(), new_path.to_path_buf());
                true
            }
            Err(e) => {
                report.note(DiagnosticKind::LinkFailed, e.to_string());
                false
            }
        }
    }
}

/// Drop references that would escape their identity directory and
/// normalize the rest, so equal paths compare equal.
fn contained(refs: Vec<PathReference>, report: &mut RemapReport) -> Vec<PathReference> {
    refs.into_iter()
        .filter_map(|reference| match contained_subpath(&reference.subpath) {
            Some(subpath) => Some(PathReference { subpath, ..reference }),
            None => {
                report.note(
                    DiagnosticKind::UnsafeSubpath,
                    format!(
                        "ignoring subpath {:?} under {}",
                        reference.subpath, reference.identity
                    ),
                );
                None
            }
        })
        .collect()
}

/// Paths below an already-installed link resolve into the new identity;
/// touching them would modify the new pod's files.
fn is_covered(old_path: &Path, linked: &[PathBuf], report: &mut RemapReport) -> bool {
    match linked.iter().find(|l| old_path.starts_with(l)) {
        Some(link) => {
            report.note(
                DiagnosticKind::CoveredByLink,
                format!(
                    "{} already redirected by {}",
                    old_path.display(),
                    link.display()
                ),
            );
            true
        }
        None => false,
    }
}

/// Replace whatever is at `old_path` with a symlink to `new_path`.
///
/// Creates missing parents. An existing file or link is removed; an existing
/// directory is removed only when empty, otherwise the link fails.
pub fn symlink_substitute(old_path: &Path, new_path: &Path) -> Result<(), RemapError> {
    if let Some(parent) = old_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RemapError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if let Ok(meta) = std::fs::symlink_metadata(old_path) {
        let removed = if meta.is_dir() {
            std::fs::remove_dir(old_path)
        } else {
            std::fs::remove_file(old_path)
        };
        if let Err(e) = removed {
            tracing::debug!(path = %old_path.display(), error = %e, "Failed to remove stale entry");
        }
    }

    std::os::unix::fs::symlink(new_path, old_path).map_err(|source| RemapError::Symlink {
        from: old_path.to_path_buf(),
        to: new_path.to_path_buf(),
        source,
    })
}
