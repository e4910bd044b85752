// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `grit-shim restore` command - Restore a container from a checkpoint.

use std::path::{Path, PathBuf};

use grit_core::{ContainerId, CreateConfig, InitProcess, ShimContext, StdioConfig};

use super::{interrupt_token, load_config, print_report};

pub struct RestoreArgs {
    pub id: String,
    pub bundle: PathBuf,
    pub image: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub stdio: StdioConfig,
    pub json: bool,
}

pub async fn execute(
    config: Option<&Path>,
    args: RestoreArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let ctx = ShimContext::from_config(&config)?;
    let cancel = interrupt_token();

    let id = ContainerId::new(args.id)?;
    tracing::info!(
        container_id = %id,
        bundle = %args.bundle.display(),
        image = %args.image.display(),
        "Restoring container"
    );

    let create = CreateConfig {
        id,
        bundle: args.bundle,
        stdio: args.stdio,
        checkpoint: Some(args.image),
        pid_file: args.pid_file,
    };
    let process = InitProcess::create(&ctx, create, &cancel).await?;
    let started = process.start(&cancel).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "id": process.id(),
                "pid": started.pid.value(),
                "status": process.status(),
                "remap": started.remap,
            }))?
        );
        return Ok(());
    }

    println!(
        "✓ Restored {} (pid {})",
        process.id(),
        started.pid.value()
    );
    if let Some(report) = &started.remap {
        print_report(report);
    }
    Ok(())
}
