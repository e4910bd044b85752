// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! OCI bundle config access.
//!
//! Only the `annotations` map is interpreted. Writes are a read-modify-write
//! of the whole document so every other field survives untouched.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::RemapError;

/// Runtime config file inside a bundle.
pub const CONFIG_FILE: &str = "config.json";

/// CRIU configuration file written into the bundle before restore.
pub const CRIU_CONFIG_FILE: &str = "criu-gpu.conf";

/// Pod UID assigned by the orchestrator.
pub const POD_UID_ANNOTATION: &str = "io.kubernetes.pod.uid";

/// Sandbox the container belongs to.
pub const SANDBOX_ID_ANNOTATION: &str = "io.kubernetes.cri.sandbox-id";

/// runc forwards the file named here to CRIU as its configuration.
pub const CRIU_CONFIG_ANNOTATION: &str = "org.criu.config";

/// CRIU options for restoring GPU workloads under a new pod identity.
pub const CRIU_GPU_CONFIG: &str = "# CRIU GPU restore configuration
tcp-established
ext-unix-sk
shell-job
ext-mount-map auto
enable-external-masters
enable-external-sharing
mntns-compat-mode
";

/// A bundle's `config.json`, kept both as raw text and as a parsed document.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    path: PathBuf,
    raw: String,
    document: Option<Value>,
}

impl BundleConfig {
    /// Read `<bundle>/config.json`.
    ///
    /// Fails only when the file cannot be read. Unparseable JSON is kept as
    /// raw text so callers can still scan it.
    pub fn load(bundle: &Path) -> Result<Self, RemapError> {
        let path = bundle.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|source| RemapError::Read {
            path: path.clone(),
            source,
        })?;

        let document = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse bundle config");
                None
            }
        };

        Ok(Self {
            path,
            raw,
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file contents as read.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_parsed(&self) -> bool {
        self.document.is_some()
    }

    fn annotations(&self) -> Option<&Map<String, Value>> {
        self.document.as_ref()?.get("annotations")?.as_object()
    }

    /// String value of an annotation, if present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations()?.get(key)?.as_str()
    }

    pub fn annotation_keys(&self) -> Vec<&str> {
        self.annotations()
            .map(|a| a.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Set an annotation, creating the map when it is missing or not an object.
    pub fn set_annotation(&mut self, key: &str, value: &str) -> Result<(), RemapError> {
        let root = self
            .document
            .as_mut()
            .and_then(Value::as_object_mut)
            .ok_or_else(|| RemapError::BundleConfig {
                path: self.path.clone(),
                reason: "document is not a JSON object".to_string(),
            })?;

        let annotations = root
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if !annotations.is_object() {
            *annotations = Value::Object(Map::new());
        }
        if let Some(map) = annotations.as_object_mut() {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
        Ok(())
    }

    /// Write the document back, pretty printed.
    pub fn save(&mut self) -> Result<(), RemapError> {
        let document = self.document.as_ref().ok_or_else(|| RemapError::BundleConfig {
            path: self.path.clone(),
            reason: "document was not parsed".to_string(),
        })?;

        let rendered =
            serde_json::to_string_pretty(document).map_err(|e| RemapError::BundleConfig {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        std::fs::write(&self.path, &rendered).map_err(|source| RemapError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.raw = rendered;
        Ok(())
    }
}

/// Write `criu-gpu.conf` into the bundle and return its path.
pub fn write_criu_config(bundle: &Path) -> Result<PathBuf, RemapError> {
    let path = bundle.join(CRIU_CONFIG_FILE);
    std::fs::write(&path, CRIU_GPU_CONFIG).map_err(|source| RemapError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
