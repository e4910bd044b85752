// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `grit-shim remap` command - Prepare a bundle for restore.
//!
//! Runs every best-effort restore step (identity discovery, mount table
//! decode, symlink substitution, CRIU config) but stops short of invoking
//! the runtime.

use std::path::Path;

use grit_core::ShimContext;

use super::{interrupt_token, load_config, print_report};

pub async fn execute(
    config: Option<&Path>,
    bundle: &Path,
    image: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let ctx = ShimContext::from_config(&config)?;
    let cancel = interrupt_token();

    let report = ctx.preparer().prepare(bundle, image, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("✓ Bundle prepared: {}", bundle.display());
    print_report(&report);
    Ok(())
}
