// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bundle and filesystem preparation that precedes a GPU restore.
//!
//! Discovers the new identities, decodes the checkpoint's mount table,
//! remaps pod and sandbox paths, and points runc at a CRIU config. Every
//! step is best-effort.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::report::{DiagnosticKind, RemapReport};
use super::IdentityRemapper;
use crate::bundle::{
    write_criu_config, BundleConfig, CRIU_CONFIG_ANNOTATION, POD_UID_ANNOTATION,
    SANDBOX_ID_ANNOTATION,
};
use crate::runtime::CheckpointDecoder;

const MOUNTPOINTS_PREFIX: &str = "mountpoints-";
const MOUNTPOINTS_SUFFIX: &str = ".img";

/// Runs the remapping engine against a bundle and checkpoint image.
pub struct RestorePreparer {
    remapper: IdentityRemapper,
    decoder: Arc<dyn CheckpointDecoder>,
}

impl RestorePreparer {
    pub fn new(remapper: IdentityRemapper, decoder: Arc<dyn CheckpointDecoder>) -> Self {
        Self { remapper, decoder }
    }

    pub fn remapper(&self) -> &IdentityRemapper {
        &self.remapper
    }

    /// Prepare `bundle` for restoring the image at `image_path`.
    pub async fn prepare(
        &self,
        bundle: &Path,
        image_path: &Path,
        cancel: &CancellationToken,
    ) -> RemapReport {
        let mut report = RemapReport::default();
        tracing::info!(
            bundle = %bundle.display(),
            image = %image_path.display(),
            "GPU restore: preparing bundle"
        );

        let mut config = match BundleConfig::load(bundle) {
            Ok(config) => Some(config),
            Err(e) => {
                report.note(DiagnosticKind::ConfigUnreadable, e.to_string());
                None
            }
        };

        let new_pod_uid = config
            .as_ref()
            .and_then(|c| self.new_pod_uid(c, &mut report));
        report.new_pod_uid = new_pod_uid;
        let mountpoints = find_mountpoints(image_path);
        report.mountpoints = mountpoints.clone();

        let decoded = match &mountpoints {
            Some(artifact) => match self.decoder.decode(artifact, cancel).await {
                Ok(text) => Some(text),
                Err(e) => {
                    report.note(DiagnosticKind::DecodeFailed, e.to_string());
                    None
                }
            },
            None => {
                report.note(
                    DiagnosticKind::MountpointsMissing,
                    format!("no mountpoints file in {}", image_path.display()),
                );
                None
            }
        };

        match (decoded, report.new_pod_uid.clone()) {
            (Some(text), Some(new_uid)) => {
                self.remapper.remap_pods(&text, &new_uid, &mut report);

                report.new_sandbox_id = self.new_sandbox_id(bundle, config.as_ref());
                match report.new_sandbox_id.clone() {
                    Some(sandbox_id) => {
                        self.remapper
                            .remap_sandboxes(&text, &sandbox_id, &mut report)
                    }
                    None => report.note(
                        DiagnosticKind::SandboxIdentityMissing,
                        "new sandbox id not found in bundle path or annotations",
                    ),
                }
            }
            _ => report.note(
                DiagnosticKind::RemapSkipped,
                "decode failed or no new pod UID, restoring without path fixups",
            ),
        }

        self.install_criu_config(bundle, config.as_mut(), &mut report);
        report
    }

    /// Annotation first, then any pod directory named in the config text.
    fn new_pod_uid(&self, config: &BundleConfig, report: &mut RemapReport) -> Option<String> {
        tracing::info!(
            annotations = ?config.annotation_keys(),
            "GPU restore: bundle annotations"
        );

        if let Some(uid) = config
            .annotation(POD_UID_ANNOTATION)
            .filter(|uid| !uid.is_empty())
        {
            tracing::info!(pod_uid = %uid, "GPU restore: new pod UID from annotations");
            return Some(uid.to_string());
        }

        match self.remapper.patterns().first_pod_uid(config.raw()) {
            Some(uid) => {
                tracing::info!(pod_uid = %uid, "GPU restore: new pod UID from config mounts");
                Some(uid)
            }
            None => {
                report.note(
                    DiagnosticKind::PodIdentityMissing,
                    format!("{} annotation not found", POD_UID_ANNOTATION),
                );
                None
            }
        }
    }

    /// Bundle path first, then the sandbox annotation.
    fn new_sandbox_id(&self, bundle: &Path, config: Option<&BundleConfig>) -> Option<String> {
        let patterns = self.remapper.patterns();
        if let Some(id) = patterns.bundle_sandbox_id(&bundle.to_string_lossy()) {
            return Some(id);
        }
        config
            .and_then(|c| c.annotation(SANDBOX_ID_ANNOTATION))
            .filter(|id| patterns.is_sandbox_id(id))
            .map(str::to_string)
    }

    fn install_criu_config(
        &self,
        bundle: &Path,
        config: Option<&mut BundleConfig>,
        report: &mut RemapReport,
    ) {
        let criu_config = match write_criu_config(bundle) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "GPU restore: wrote CRIU config");
                path
            }
            Err(e) => {
                report.note(DiagnosticKind::CriuConfigFailed, e.to_string());
                return;
            }
        };
        report.criu_config = Some(criu_config.clone());

        let Some(config) = config else {
            report.note(
                DiagnosticKind::AnnotationFailed,
                "bundle config unavailable, CRIU config not referenced",
            );
            return;
        };

        let annotated = config
            .set_annotation(
                CRIU_CONFIG_ANNOTATION,
                &criu_config.to_string_lossy(),
            )
            .and_then(|()| config.save());
        match annotated {
            Ok(()) => tracing::info!(
                path = %config.path().display(),
                "GPU restore: updated config.json with CRIU annotation"
            ),
            Err(e) => report.note(DiagnosticKind::AnnotationFailed, e.to_string()),
        }
    }
}

/// The checkpoint's mount table: `mountpoints-<n>.img`, first in name order.
pub fn find_mountpoints(image_path: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(image_path).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(MOUNTPOINTS_PREFIX) && n.ends_with(MOUNTPOINTS_SUFFIX))
        .collect();
    names.sort();
    let path = image_path.join(names.first()?);
    tracing::info!(path = %path.display(), "GPU restore: found mountpoints file");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShimConfig;
    use crate::error::RuntimeError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingDecoder;

    #[async_trait]
    impl CheckpointDecoder for FailingDecoder {
        async fn decode(
            &self,
            _artifact: &Path,
            _cancel: &CancellationToken,
        ) -> Result<String, RuntimeError> {
            Err(RuntimeError::Failed {
                operation: "decode",
                status: "exit status: 1".to_string(),
                output: "unknown magic".to_string(),
            })
        }
    }

    #[test]
    fn test_find_mountpoints_by_pattern() {
        let image = TempDir::new().unwrap();
        std::fs::write(image.path().join("pages-1.img"), b"").unwrap();
        std::fs::write(image.path().join("mountpoints-13.img"), b"").unwrap();
        std::fs::write(image.path().join("mountpoints-13.img.bak"), b"").unwrap();

        assert_eq!(
            find_mountpoints(image.path()),
            Some(image.path().join("mountpoints-13.img"))
        );
        assert!(find_mountpoints(&image.path().join("missing")).is_none());
    }

    #[tokio::test]
    async fn test_decode_failure_still_writes_criu_config() {
        let bundle = TempDir::new().unwrap();
        let image = TempDir::new().unwrap();
        std::fs::write(
            bundle.path().join("config.json"),
            r#"{"annotations": {"io.kubernetes.pod.uid": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"}}"#,
        )
        .unwrap();
        std::fs::write(image.path().join("mountpoints-12.img"), b"").unwrap();

        let remapper = IdentityRemapper::new(ShimConfig::default().paths).unwrap();
        let preparer = RestorePreparer::new(remapper, Arc::new(FailingDecoder));
        let report = preparer
            .prepare(bundle.path(), image.path(), &CancellationToken::new())
            .await;

        assert!(report.has(DiagnosticKind::DecodeFailed));
        assert!(report.has(DiagnosticKind::RemapSkipped));
        assert!(report.links.is_empty());
        assert_eq!(
            report.new_pod_uid.as_deref(),
            Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")
        );

        let config = BundleConfig::load(bundle.path()).unwrap();
        let criu_config = bundle.path().join(crate::bundle::CRIU_CONFIG_FILE);
        assert_eq!(
            config.annotation(CRIU_CONFIG_ANNOTATION),
            Some(&*criu_config.to_string_lossy())
        );
        assert!(criu_config.exists());
    }

    #[tokio::test]
    async fn test_empty_pod_uid_annotation_falls_back_to_mounts() {
        let bundle = TempDir::new().unwrap();
        let image = TempDir::new().unwrap();
        std::fs::write(
            bundle.path().join("config.json"),
            r#"{
  "annotations": {"io.kubernetes.pod.uid": ""},
  "mounts": [{"source": "/var/lib/kubelet/pods/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee/etc-hosts"}]
}"#,
        )
        .unwrap();

        let remapper = IdentityRemapper::new(ShimConfig::default().paths).unwrap();
        let preparer = RestorePreparer::new(remapper, Arc::new(FailingDecoder));
        let report = preparer
            .prepare(bundle.path(), image.path(), &CancellationToken::new())
            .await;

        assert_eq!(
            report.new_pod_uid.as_deref(),
            Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")
        );
        assert!(!report.has(DiagnosticKind::PodIdentityMissing));
    }
}
