// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod remap;
pub mod restore;
pub mod validate;

use std::path::Path;

use grit_core::remap::RemapReport;
use grit_core::{ConfigLoader, ShimConfig, ShimResult};
use tokio_util::sync::CancellationToken;

/// Load the shim config, or the built-in defaults when no file was given.
pub fn load_config(path: Option<&Path>) -> ShimResult<ShimConfig> {
    match path {
        Some(path) => ConfigLoader::load_file(path),
        None => Ok(ShimConfig::default()),
    }
}

/// Token cancelled on Ctrl+C, so in-flight runtime calls are killed.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Human-readable report summary.
pub fn print_report(report: &RemapReport) {
    let unknown = "-".to_string();
    println!(
        "  Pod UID:     {} -> {}",
        report.old_pod_uid.as_ref().unwrap_or(&unknown),
        report.new_pod_uid.as_ref().unwrap_or(&unknown)
    );
    println!(
        "  Sandbox:     {} -> {}",
        if report.old_sandbox_ids.is_empty() {
            unknown.clone()
        } else {
            report.old_sandbox_ids.join(",")
        },
        report.new_sandbox_id.as_ref().unwrap_or(&unknown)
    );
    if let Some(criu) = &report.criu_config {
        println!("  CRIU config: {}", criu.display());
    }

    println!();
    println!("Links ({}):", report.links.len());
    for link in &report.links {
        println!(
            "  [{:?}] {} -> {}",
            link.phase,
            link.from.display(),
            link.to.display()
        );
    }

    if !report.diagnostics.is_empty() {
        println!();
        println!("Diagnostics ({}):", report.diagnostics.len());
        for diagnostic in &report.diagnostics {
            println!("  {:?}: {}", diagnostic.kind, diagnostic.detail);
        }
    }
}
