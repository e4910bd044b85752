// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML shim configuration with strict validation.
//!
//! Every filesystem root the remapping engine touches comes from here, so
//! the engine can be pointed at a scratch directory.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, ShimError, ShimResult};

/// Raw runtime section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawRuntimeConfig {
    #[serde(default = "default_runtime_binary")]
    binary: String,
    #[serde(default = "default_restore_binary")]
    restore_binary: String,
    #[serde(default = "default_crit_binary")]
    crit_binary: String,
    #[serde(default)]
    root: Option<String>,
}

fn default_runtime_binary() -> String {
    "runc".to_string()
}

fn default_restore_binary() -> String {
    // Plain runc: vendor wrappers such as nvidia-container-runtime reject restore
    "/usr/bin/runc".to_string()
}

fn default_crit_binary() -> String {
    "crit".to_string()
}

impl Default for RawRuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_runtime_binary(),
            restore_binary: default_restore_binary(),
            crit_binary: default_crit_binary(),
            root: None,
        }
    }
}

/// Raw filesystem roots.
#[derive(Debug, Deserialize)]
struct RawPathsConfig {
    #[serde(default = "default_kubelet_pods_root")]
    kubelet_pods_root: String,
    #[serde(default = "default_containerd_root")]
    containerd_root: String,
    #[serde(default = "default_sandboxes_dir")]
    sandboxes_dir: String,
    #[serde(default = "default_state_root")]
    state_root: String,
}

fn default_kubelet_pods_root() -> String {
    "/var/lib/kubelet/pods".to_string()
}

fn default_containerd_root() -> String {
    "/var/lib/containerd".to_string()
}

fn default_sandboxes_dir() -> String {
    "io.containerd.grpc.v1.cri/sandboxes".to_string()
}

fn default_state_root() -> String {
    "/run/containerd".to_string()
}

impl Default for RawPathsConfig {
    fn default() -> Self {
        Self {
            kubelet_pods_root: default_kubelet_pods_root(),
            containerd_root: default_containerd_root(),
            sandboxes_dir: default_sandboxes_dir(),
            state_root: default_state_root(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    runtime: RawRuntimeConfig,
    #[serde(default)]
    paths: RawPathsConfig,
}

/// Validated external binary configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    /// OCI runtime used for create/start/pause/resume/kill/delete.
    pub binary: PathBuf,
    /// OCI runtime used for restore.
    pub restore_binary: PathBuf,
    /// Checkpoint image decoder.
    pub crit_binary: PathBuf,
    /// Optional `--root` state directory for the runtime.
    pub root: Option<PathBuf>,
}

/// Validated filesystem roots for identity remapping.
#[derive(Debug, Clone, Serialize)]
pub struct PathsConfig {
    /// Node-agent pod directories, one per pod UID.
    pub kubelet_pods_root: PathBuf,
    /// containerd persistent root.
    pub containerd_root: PathBuf,
    /// Sandbox directory relative to `containerd_root`.
    pub sandboxes_dir: PathBuf,
    /// containerd runtime state root, which holds task bundles.
    pub state_root: PathBuf,
}

impl PathsConfig {
    /// Absolute directory holding one subdirectory per sandbox id.
    pub fn sandboxes_root(&self) -> PathBuf {
        self.containerd_root.join(&self.sandboxes_dir)
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ShimConfig {
    pub runtime: RuntimeConfig,
    pub paths: PathsConfig,
}

impl Default for ShimConfig {
    fn default() -> Self {
        // Built-in defaults always validate
        match ConfigLoader::validate(RawConfig::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default configuration is invalid: {e}"),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ShimResult<ShimConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShimError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShimError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ShimResult<ShimConfig> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ShimError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> ShimResult<ShimConfig> {
        let runtime = Self::validate_runtime(raw.runtime)?;
        let paths = Self::validate_paths(raw.paths)?;
        Ok(ShimConfig { runtime, paths })
    }

    fn validate_runtime(raw: RawRuntimeConfig) -> ShimResult<RuntimeConfig> {
        let binary = non_empty("runtime.binary", raw.binary)?;
        let restore_binary = non_empty("runtime.restore_binary", raw.restore_binary)?;
        let crit_binary = non_empty("runtime.crit_binary", raw.crit_binary)?;
        let root = match raw.root {
            Some(root) => Some(absolute("runtime.root", root)?),
            None => None,
        };

        Ok(RuntimeConfig {
            binary: PathBuf::from(binary),
            restore_binary: PathBuf::from(restore_binary),
            crit_binary: PathBuf::from(crit_binary),
            root,
        })
    }

    fn validate_paths(raw: RawPathsConfig) -> ShimResult<PathsConfig> {
        let kubelet_pods_root = absolute("paths.kubelet_pods_root", raw.kubelet_pods_root)?;
        let containerd_root = absolute("paths.containerd_root", raw.containerd_root)?;
        let state_root = absolute("paths.state_root", raw.state_root)?;

        let sandboxes_dir = PathBuf::from(non_empty("paths.sandboxes_dir", raw.sandboxes_dir)?);
        if !sandboxes_dir
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "paths.sandboxes_dir",
                value: sandboxes_dir.display().to_string(),
                reason: "Must be a relative path without '..' components".to_string(),
            }
            .into());
        }

        Ok(PathsConfig {
            kubelet_pods_root,
            containerd_root,
            sandboxes_dir,
            state_root,
        })
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, HardValidationError> {
    if value.trim().is_empty() {
        return Err(HardValidationError::MissingRequiredField {
            field,
            context: "shim configuration".to_string(),
        });
    }
    Ok(value)
}

fn absolute(field: &'static str, value: String) -> Result<PathBuf, HardValidationError> {
    let path = PathBuf::from(non_empty(field, value)?);
    if !path.is_absolute() {
        return Err(HardValidationError::RelativePath { field, path });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
runtime:
  binary: /usr/local/bin/nvidia-container-runtime
  restore_binary: /usr/bin/runc
  crit_binary: /usr/local/bin/crit
  root: /run/containerd/runc/k8s.io

paths:
  kubelet_pods_root: /var/lib/kubelet/pods
  containerd_root: /var/lib/containerd
  sandboxes_dir: io.containerd.grpc.v1.cri/sandboxes
  state_root: /run/containerd
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(
            config.runtime.binary,
            PathBuf::from("/usr/local/bin/nvidia-container-runtime")
        );
        assert_eq!(
            config.runtime.root,
            Some(PathBuf::from("/run/containerd/runc/k8s.io"))
        );
        assert_eq!(
            config.paths.sandboxes_root(),
            PathBuf::from("/var/lib/containerd/io.containerd.grpc.v1.cri/sandboxes")
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("runtime:\n  root: /run/runc\n").unwrap();
        assert_eq!(config.runtime.binary, PathBuf::from("runc"));
        assert_eq!(config.runtime.restore_binary, PathBuf::from("/usr/bin/runc"));
        assert_eq!(config.runtime.crit_binary, PathBuf::from("crit"));
        assert_eq!(
            config.paths.kubelet_pods_root,
            PathBuf::from("/var/lib/kubelet/pods")
        );
        assert_eq!(config.paths.state_root, PathBuf::from("/run/containerd"));
    }

    #[test]
    fn test_default_matches_empty_sections() {
        let config = ShimConfig::default();
        assert!(config.runtime.root.is_none());
        assert_eq!(config.paths.containerd_root, PathBuf::from("/var/lib/containerd"));
    }

    #[test]
    fn test_relative_root_rejected() {
        let yaml = r#"
paths:
  kubelet_pods_root: var/lib/kubelet/pods
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(
            result,
            Err(ShimError::HardValidation(HardValidationError::RelativePath { .. }))
        ));
    }

    #[test]
    fn test_sandboxes_dir_escape_rejected() {
        let yaml = r#"
paths:
  sandboxes_dir: ../../etc
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_empty_binary_rejected() {
        let yaml = r#"
runtime:
  binary: ""
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load_file("/nonexistent/grit-shim.yaml");
        assert!(matches!(result, Err(ShimError::ConfigNotFound { .. })));
    }
}
