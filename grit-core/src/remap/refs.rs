// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Path references scraped out of decoded checkpoint text.
//!
//! Decoded output is scanned as plain text: anything matching a pod or
//! sandbox directory pattern is a candidate, regardless of JSON structure.
//! This is a best-effort heuristic and nothing outside this module depends on
//! how the matching is done.

use std::path::{Component, Path};

use regex::Regex;

use crate::config::PathsConfig;
use crate::error::RemapError;

/// An identity-rooted path found in text: `<root>/<identity>/<subpath>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReference {
    pub identity: String,
    /// Path below the identity directory, without a trailing slash.
    pub subpath: String,
}

/// Compiled patterns for one set of filesystem roots.
#[derive(Debug, Clone)]
pub struct PathPatterns {
    pod_reference: Regex,
    pod_uid: Regex,
    sandbox_reference: Regex,
    bundle_sandbox: Regex,
    sandbox_id: Regex,
}

/// Path tail: stops at quotes, whitespace and commas.
const SUBPATH: &str = r#"([^"'\s,]+)"#;

/// Kubernetes pod UIDs are canonical 36-char UUIDs.
const POD_UID: &str = "([a-f0-9-]{36})";

const SANDBOX_ID: &str = "([a-f0-9]+)";

impl PathPatterns {
    pub fn new(paths: &PathsConfig) -> Result<Self, RemapError> {
        let pods_root = escaped_root(&paths.kubelet_pods_root);
        let containerd_root = escaped_root(&paths.containerd_root);
        let state_root = escaped_root(&paths.state_root);

        Ok(Self {
            pod_reference: Regex::new(&format!("{pods_root}/{POD_UID}/{SUBPATH}"))?,
            pod_uid: Regex::new(&format!("{pods_root}/{POD_UID}/"))?,
            sandbox_reference: Regex::new(&format!(
                "{containerd_root}/[^/]+/sandboxes/{SANDBOX_ID}/{SUBPATH}"
            ))?,
            bundle_sandbox: Regex::new(&format!("{state_root}/[^/]+/k8s.io/{SANDBOX_ID}"))?,
            sandbox_id: Regex::new(&format!("^{SANDBOX_ID}$"))?,
        })
    }

    /// All pod directory references, in scan order.
    pub fn pod_references(&self, text: &str) -> Vec<PathReference> {
        extract(&self.pod_reference, text)
    }

    /// All sandbox directory references, in scan order.
    pub fn sandbox_references(&self, text: &str) -> Vec<PathReference> {
        extract(&self.sandbox_reference, text)
    }

    /// First pod UID embedded in a pod directory path.
    pub fn first_pod_uid(&self, text: &str) -> Option<String> {
        self.pod_uid
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Sandbox id encoded in a task bundle path.
    pub fn bundle_sandbox_id(&self, bundle: &str) -> Option<String> {
        self.bundle_sandbox
            .captures(bundle)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn is_sandbox_id(&self, value: &str) -> bool {
        self.sandbox_id.is_match(value)
    }
}

fn escaped_root(root: &Path) -> String {
    let root = root.to_string_lossy();
    regex::escape(root.trim_end_matches('/'))
}

fn extract(pattern: &Regex, text: &str) -> Vec<PathReference> {
    pattern
        .captures_iter(text)
        .filter_map(|c| {
            let identity = c.get(1)?.as_str().to_string();
            let subpath = c.get(2)?.as_str().trim_end_matches('/').to_string();
            if subpath.is_empty() {
                return None;
            }
            Some(PathReference { identity, subpath })
        })
        .collect()
}

/// Normalize a scraped subpath so it stays below its identity directory.
///
/// `.` components are dropped. Returns `None` for `..`, absolute paths and
/// anything that normalizes to nothing.
pub fn contained_subpath(subpath: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(subpath).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
