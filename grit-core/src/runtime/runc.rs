// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! runc command-line backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::command::{run, ChildIo};
use super::{CheckpointOptions, CreateOpts, ExecOpts, OciRuntime, RestoreOpts};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

/// Drives an OCI runtime binary with runc's command-line interface.
#[derive(Debug, Clone)]
pub struct RuncCli {
    binary: PathBuf,
    restore_binary: PathBuf,
    root: Option<PathBuf>,
}

impl RuncCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            restore_binary: config.restore_binary.clone(),
            root: config.root.clone(),
        }
    }

    fn command(&self, binary: &Path, args: Vec<OsString>) -> Command {
        let mut cmd = Command::new(binary);
        if let Some(root) = &self.root {
            cmd.arg("--root").arg(root);
        }
        cmd.args(args);
        cmd
    }

    async fn call(
        &self,
        operation: &'static str,
        args: Vec<OsString>,
        io: ChildIo,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let cmd = self.command(&self.binary, args);
        let output = run(operation, &self.binary, cmd, io, cancel).await?;
        if !output.trim().is_empty() {
            tracing::debug!(operation, output = %output.trim(), "OCI runtime output");
        }
        Ok(())
    }

    pub fn create_args(id: &str, bundle: &Path, opts: &CreateOpts) -> Vec<OsString> {
        let mut args = argv(&["create", "--bundle"]);
        args.push(bundle.into());
        args.push("--pid-file".into());
        args.push(opts.pid_file.clone().into());
        push_console_socket(&mut args, opts.console_socket.as_deref());
        args.push(id.into());
        args
    }

    pub fn restore_args(id: &str, bundle: &Path, opts: &RestoreOpts) -> Vec<OsString> {
        let mut args = argv(&["restore", "--image-path"]);
        args.push(opts.image_path.clone().into());
        args.push("--bundle".into());
        args.push(bundle.into());
        args.push("--detach".into());
        args.push("--pid-file".into());
        args.push(opts.pid_file.clone().into());
        args.extend(argv(&["--manage-cgroups-mode", "ignore"]));
        push_console_socket(&mut args, opts.console_socket.as_deref());
        args.push(id.into());
        args
    }

    pub fn kill_args(id: &str, signal: Signal, all: bool) -> Vec<OsString> {
        let mut args = argv(&["kill"]);
        if all {
            args.push("--all".into());
        }
        args.push(id.into());
        args.push((signal as i32).to_string().into());
        args
    }

    pub fn delete_args(id: &str, force: bool) -> Vec<OsString> {
        let mut args = argv(&["delete"]);
        if force {
            args.push("--force".into());
        }
        args.push(id.into());
        args
    }

    pub fn checkpoint_args(id: &str, opts: &CheckpointOptions) -> Vec<OsString> {
        let mut args = argv(&["checkpoint", "--image-path"]);
        args.push(opts.image_path.clone().into());
        if let Some(work) = &opts.work_path {
            args.push("--work-path".into());
            args.push(work.clone().into());
        }
        if !opts.exit {
            args.push("--leave-running".into());
        }
        if opts.allow_open_tcp {
            args.push("--tcp-established".into());
        }
        if opts.allow_external_unix_sockets {
            args.push("--ext-unix-sk".into());
        }
        if opts.allow_terminal {
            args.push("--shell-job".into());
        }
        if opts.file_locks {
            args.push("--file-locks".into());
        }
        for ns in &opts.empty_namespaces {
            args.push("--empty-ns".into());
            args.push(ns.into());
        }
        args.push(id.into());
        args
    }

    pub fn exec_args(id: &str, opts: &ExecOpts) -> Vec<OsString> {
        let mut args = argv(&["exec", "--detach", "--process"]);
        args.push(opts.process_spec.clone().into());
        args.push("--pid-file".into());
        args.push(opts.pid_file.clone().into());
        push_console_socket(&mut args, opts.console_socket.as_deref());
        args.push(id.into());
        args
    }
}

fn argv(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

fn push_console_socket(args: &mut Vec<OsString>, socket: Option<&Path>) {
    if let Some(socket) = socket {
        args.push("--console-socket".into());
        args.push(socket.into());
    }
}

#[async_trait]
impl OciRuntime for RuncCli {
    async fn create(
        &self,
        id: &str,
        bundle: &Path,
        opts: CreateOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::create_args(id, bundle, &opts);
        self.call("create", args, ChildIo::process(opts.io), cancel)
            .await
    }

    async fn start(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.call("start", argv(&["start", id]), ChildIo::capture(), cancel)
            .await
    }

    async fn restore(
        &self,
        id: &str,
        bundle: &Path,
        opts: RestoreOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::restore_args(id, bundle, &opts);
        tracing::info!(
            container_id = %id,
            binary = %self.restore_binary.display(),
            args = ?args,
            "GPU restore: running runtime restore"
        );

        let mut cmd = self.command(&self.restore_binary, args);
        cmd.current_dir(bundle);
        run(
            "restore",
            &self.restore_binary,
            cmd,
            ChildIo::process(opts.io),
            cancel,
        )
        .await?;
        tracing::info!(container_id = %id, "GPU restore: runtime restore succeeded");
        Ok(())
    }

    async fn pause(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.call("pause", argv(&["pause", id]), ChildIo::capture(), cancel)
            .await
    }

    async fn resume(&self, id: &str, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.call("resume", argv(&["resume", id]), ChildIo::capture(), cancel)
            .await
    }

    async fn kill(
        &self,
        id: &str,
        signal: Signal,
        all: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::kill_args(id, signal, all);
        self.call("kill", args, ChildIo::capture(), cancel).await
    }

    async fn delete(
        &self,
        id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::delete_args(id, force);
        self.call("delete", args, ChildIo::capture(), cancel).await
    }

    async fn update(
        &self,
        id: &str,
        resources: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let input = serde_json::to_vec(resources).map_err(|e| RuntimeError::Failed {
            operation: "update",
            status: "not started".to_string(),
            output: format!("resources not serializable: {}", e),
        })?;
        let args = argv(&["update", "--resources", "-", id]);
        self.call(
            "update",
            args,
            ChildIo::Capture { input: Some(input) },
            cancel,
        )
        .await
    }

    async fn checkpoint(
        &self,
        id: &str,
        opts: &CheckpointOptions,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::checkpoint_args(id, opts);
        self.call("checkpoint", args, ChildIo::capture(), cancel)
            .await
    }

    async fn exec(
        &self,
        id: &str,
        opts: ExecOpts,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let args = Self::exec_args(id, &opts);
        self.call("exec", args, ChildIo::process(opts.io), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_restore_args_exact() {
        let opts = RestoreOpts {
            image_path: PathBuf::from("/ckpt/image"),
            pid_file: PathBuf::from("/run/b/init.pid"),
            ..Default::default()
        };
        assert_eq!(
            strings(RuncCli::restore_args("ctr", Path::new("/run/b"), &opts)),
            vec![
                "restore",
                "--image-path",
                "/ckpt/image",
                "--bundle",
                "/run/b",
                "--detach",
                "--pid-file",
                "/run/b/init.pid",
                "--manage-cgroups-mode",
                "ignore",
                "ctr",
            ]
        );
    }

    #[test]
    fn test_restore_args_with_console() {
        let opts = RestoreOpts {
            image_path: PathBuf::from("/img"),
            pid_file: PathBuf::from("/pid"),
            console_socket: Some(PathBuf::from("/tmp/pty.sock")),
            ..Default::default()
        };
        let args = strings(RuncCli::restore_args("ctr", Path::new("/b"), &opts));
        assert_eq!(&args[args.len() - 3..], ["--console-socket", "/tmp/pty.sock", "ctr"]);
    }

    #[test]
    fn test_create_and_exec_args() {
        let create = CreateOpts {
            pid_file: PathBuf::from("/b/init.pid"),
            ..Default::default()
        };
        assert_eq!(
            strings(RuncCli::create_args("ctr", Path::new("/b"), &create)),
            vec!["create", "--bundle", "/b", "--pid-file", "/b/init.pid", "ctr"]
        );

        let exec = ExecOpts {
            process_spec: PathBuf::from("/b/exec-1.json"),
            pid_file: PathBuf::from("/b/exec-1.pid"),
            ..Default::default()
        };
        assert_eq!(
            strings(RuncCli::exec_args("ctr", &exec)),
            vec![
                "exec",
                "--detach",
                "--process",
                "/b/exec-1.json",
                "--pid-file",
                "/b/exec-1.pid",
                "ctr"
            ]
        );
    }

    #[test]
    fn test_kill_and_delete_args() {
        assert_eq!(
            strings(RuncCli::kill_args("ctr", Signal::SIGKILL, true)),
            vec!["kill", "--all", "ctr", "9"]
        );
        assert_eq!(
            strings(RuncCli::kill_args("ctr", Signal::SIGTERM, false)),
            vec!["kill", "ctr", "15"]
        );
        assert_eq!(
            strings(RuncCli::delete_args("ctr", true)),
            vec!["delete", "--force", "ctr"]
        );
    }

    #[test]
    fn test_checkpoint_args() {
        let opts = CheckpointOptions {
            image_path: PathBuf::from("/ckpt"),
            work_path: Some(PathBuf::from("/work")),
            exit: false,
            allow_open_tcp: true,
            allow_terminal: true,
            empty_namespaces: vec!["network".to_string()],
            ..Default::default()
        };
        assert_eq!(
            strings(RuncCli::checkpoint_args("ctr", &opts)),
            vec![
                "checkpoint",
                "--image-path",
                "/ckpt",
                "--work-path",
                "/work",
                "--leave-running",
                "--tcp-established",
                "--shell-job",
                "--empty-ns",
                "network",
                "ctr"
            ]
        );
    }

    #[tokio::test]
    async fn test_runtime_root_and_failure_surface() {
        let config = RuntimeConfig {
            binary: PathBuf::from("/bin/false"),
            restore_binary: PathBuf::from("/bin/false"),
            crit_binary: PathBuf::from("crit"),
            root: Some(PathBuf::from("/run/grit")),
        };
        let runc = RuncCli::new(&config);
        let err = runc
            .pause("ctr", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Failed { operation: "pause", .. }));
    }

    #[tokio::test]
    async fn test_restore_does_not_wait_on_detached_stdio() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        // Leaves a child behind holding whatever stdout it was given
        let restore = dir.path().join("fake-restore");
        std::fs::write(&restore, "#!/bin/sh\nsleep 30 &\nexit 0\n").unwrap();
        std::fs::set_permissions(&restore, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = RuntimeConfig {
            binary: PathBuf::from("/bin/false"),
            restore_binary: restore,
            crit_binary: PathBuf::from("crit"),
            root: None,
        };
        let opts = RestoreOpts {
            image_path: dir.path().join("image"),
            pid_file: dir.path().join("init.pid"),
            ..Default::default()
        };
        let restored = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            RuncCli::new(&config).restore("ctr", dir.path(), opts, &CancellationToken::new()),
        )
        .await;
        assert!(matches!(restored, Ok(Ok(()))));
    }
}
