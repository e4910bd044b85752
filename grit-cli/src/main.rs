// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! GRIT shim CLI
//!
//! Operator entry points into the shim's restore path: check a shim
//! configuration, dry-run the identity remapping against a bundle, or
//! restore a container from a checkpoint image.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// grit-shim - GPU checkpoint/restore helper for the containerd shim
#[derive(Parser)]
#[command(name = "grit-shim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Shim configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a shim configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Prepare a bundle for restore without restoring
    Remap {
        /// OCI bundle directory
        #[arg(short, long)]
        bundle: PathBuf,

        /// Checkpoint image directory
        #[arg(short, long)]
        image: PathBuf,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore a container from a checkpoint image
    Restore {
        /// Container id
        id: String,

        /// OCI bundle directory
        #[arg(short, long)]
        bundle: PathBuf,

        /// Checkpoint image directory
        #[arg(short, long)]
        image: PathBuf,

        /// Pid file written by the runtime (default: <bundle>/init.pid)
        #[arg(long)]
        pid_file: Option<PathBuf>,

        /// Allocate a console for the restored process
        #[arg(short, long)]
        terminal: bool,

        /// Fifo or file to feed the process's stdin from
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Fifo or file receiving the process's stdout
        #[arg(long)]
        stdout: Option<PathBuf>,

        /// Fifo or file receiving the process's stderr
        #[arg(long)]
        stderr: Option<PathBuf>,

        /// Print the remap report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Remap {
            bundle,
            image,
            json,
        } => commands::remap::execute(cli.config.as_deref(), &bundle, &image, json).await,
        Commands::Restore {
            id,
            bundle,
            image,
            pid_file,
            terminal,
            stdin,
            stdout,
            stderr,
            json,
        } => {
            let args = commands::restore::RestoreArgs {
                id,
                bundle,
                image,
                pid_file,
                stdio: grit_core::StdioConfig {
                    terminal,
                    stdin,
                    stdout,
                    stderr,
                },
                json,
            };
            commands::restore::execute(cli.config.as_deref(), args).await
        }
    }
}
