// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `grit-shim validate` command - Validate a shim configuration file.

use std::path::Path;

use grit_core::ConfigLoader;

pub async fn execute(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Runtime:");
            println!("  Binary:         {}", config.runtime.binary.display());
            println!(
                "  Restore Binary: {}",
                config.runtime.restore_binary.display()
            );
            println!("  crit:           {}", config.runtime.crit_binary.display());
            if let Some(root) = &config.runtime.root {
                println!("  Root:           {}", root.display());
            }
            println!();
            println!("Paths:");
            println!(
                "  Kubelet Pods:   {}",
                config.paths.kubelet_pods_root.display()
            );
            println!(
                "  Sandboxes:      {}",
                config.paths.sandboxes_root().display()
            );
            println!("  State Root:     {}", config.paths.state_root.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
