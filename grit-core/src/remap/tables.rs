// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Old→new correspondence tables built from the new pod's on-disk layout.
//!
//! Projected volume names and container hash directories are regenerated per
//! pod instance, so correspondence is positional (the first directory entry
//! in name order), never by content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::refs::PathReference;
use super::report::{DiagnosticKind, RemapReport};

/// Projected volumes directory relative to a pod directory.
pub const PROJECTED_DIR: &str = "volumes/kubernetes.io~projected";

/// Container hash directories relative to a pod directory.
pub const CONTAINERS_DIR: &str = "containers";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MappingTables {
    /// Old projected volume name → new projected volume name.
    pub projected: HashMap<String, String>,
    /// `containers/<name>/<old hash>` → `containers/<name>/<new hash>`.
    pub containers: HashMap<String, String>,
}

impl MappingTables {
    /// Build both tables for the references that belong to the old pod.
    pub fn build(refs: &[&PathReference], new_pod_dir: &Path, report: &mut RemapReport) -> Self {
        Self {
            projected: projected_volume_map(refs, new_pod_dir, report),
            containers: container_hash_map(refs, new_pod_dir, report),
        }
    }

    /// New-identity path for a sub-path of the old pod.
    ///
    /// Projected volumes first, then container hashes, then a direct
    /// structural substitution. Anything below the volume or hash directory
    /// is carried over.
    pub fn substitute(&self, subpath: &str, new_pod_dir: &Path) -> Option<PathBuf> {
        let parts: Vec<&str> = subpath.split('/').collect();

        if subpath.starts_with(&format!("{PROJECTED_DIR}/")) {
            let old_name = parts.get(2)?;
            let new_name = self.projected.get(*old_name)?;
            let mut path = new_pod_dir.join(PROJECTED_DIR).join(new_name);
            path.extend(&parts[3..]);
            return Some(path);
        }

        if subpath.starts_with(&format!("{CONTAINERS_DIR}/")) {
            if parts.len() < 3 {
                return None;
            }
            let old_key = container_key(parts[1], parts[2]);
            let new_key = self.containers.get(&old_key)?;
            let mut path = new_pod_dir.join(new_key);
            path.extend(&parts[3..]);
            return Some(path);
        }

        Some(new_pod_dir.join(subpath))
    }
}

fn container_key(container: &str, hash: &str) -> String {
    format!("{CONTAINERS_DIR}/{container}/{hash}")
}

/// Directory entry names in name order. Missing directories list as empty.
fn sorted_entries(dir: &Path, dirs_only: bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| !dirs_only || e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn projected_volume_map(
    refs: &[&PathReference],
    new_pod_dir: &Path,
    report: &mut RemapReport,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let projected = new_pod_dir.join(PROJECTED_DIR);
    let entries = sorted_entries(&projected, false);
    let Some(new_name) = entries.first() else {
        return map;
    };

    if entries.len() > 1 {
        report.note(
            DiagnosticKind::AmbiguousCandidate,
            format!(
                "{} projected volumes under {}, mapping to first: {}",
                entries.len(),
                projected.display(),
                new_name
            ),
        );
    }

    let prefix = format!("{PROJECTED_DIR}/");
    for reference in refs {
        if let Some(rest) = reference.subpath.strip_prefix(&prefix) {
            if let Some(old_name) = rest.split('/').next().filter(|n| !n.is_empty()) {
                map.insert(old_name.to_string(), new_name.clone());
            }
        }
    }
    map
}

fn container_hash_map(
    refs: &[&PathReference],
    new_pod_dir: &Path,
    report: &mut RemapReport,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let containers = new_pod_dir.join(CONTAINERS_DIR);

    for container in sorted_entries(&containers, true) {
        let hashes = sorted_entries(&containers.join(&container), false);
        let Some(new_hash) = hashes.first() else {
            continue;
        };

        if hashes.len() > 1 {
            report.note(
                DiagnosticKind::AmbiguousCandidate,
                format!(
                    "{} hash dirs for container {}, mapping to first: {}",
                    hashes.len(),
                    container,
                    new_hash
                ),
            );
        }

        for reference in refs {
            let parts: Vec<&str> = reference.subpath.split('/').collect();
            if parts.len() >= 3 && parts[0] == CONTAINERS_DIR && parts[1] == container {
                let old_key = container_key(parts[1], parts[2]);
                let new_key = container_key(&container, new_hash);
                tracing::info!(from = %old_key, to = %new_key, "GPU restore: mapping container path");
                map.insert(old_key, new_key);
            }
        }
    }
    map
}
