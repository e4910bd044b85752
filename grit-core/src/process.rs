// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The managed init process of one container.
//!
//! Every lifecycle operation takes the operation lock, consults the dispatch
//! table, performs its side effects and commits the outcome only when they
//! all succeeded. `status` never takes the lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ShimConfig;
use crate::error::{HardValidationError, RemapError, ShimError, ShimResult};
use crate::io::{copy_console, Console, ConsoleSocket, PipeIo, RuntimeIo, StdioConfig};
use crate::remap::{IdentityRemapper, RemapReport, RestorePreparer};
use crate::runtime::{
    read_pid_file, CheckpointOptions, CreateOpts, CritCli, ExecOpts, OciRuntime, RestoreOpts,
    RuncCli,
};
use crate::state::{
    CheckpointParams, InitState, LifecycleStateMachine, Operation, Outcome, ProcessStatus,
    StateKind, StateMachineMetrics,
};
use crate::types::{ContainerId, ProcessId};

/// Default pid file name inside the bundle.
pub const INIT_PID_FILE: &str = "init.pid";

/// External collaborators shared by every process of a shim.
#[derive(Clone)]
pub struct ShimContext {
    runtime: Arc<dyn OciRuntime>,
    preparer: Arc<RestorePreparer>,
}

impl ShimContext {
    pub fn new(runtime: Arc<dyn OciRuntime>, preparer: Arc<RestorePreparer>) -> Self {
        Self { runtime, preparer }
    }

    /// runc and crit as configured.
    pub fn from_config(config: &ShimConfig) -> Result<Self, RemapError> {
        let remapper = IdentityRemapper::new(config.paths.clone())?;
        let decoder = Arc::new(CritCli::new(&config.runtime));
        Ok(Self {
            runtime: Arc::new(RuncCli::new(&config.runtime)),
            preparer: Arc::new(RestorePreparer::new(remapper, decoder)),
        })
    }

    pub fn runtime(&self) -> &Arc<dyn OciRuntime> {
        &self.runtime
    }

    pub fn preparer(&self) -> &Arc<RestorePreparer> {
        &self.preparer
    }
}

/// Parameters for [`InitProcess::create`].
#[derive(Debug, Clone)]
pub struct CreateConfig {
    pub id: ContainerId,
    pub bundle: PathBuf,
    pub stdio: StdioConfig,
    /// Checkpoint image to restore from on Start instead of a fresh create.
    pub checkpoint: Option<PathBuf>,
    /// Defaults to `<bundle>/init.pid`.
    pub pid_file: Option<PathBuf>,
}

impl CreateConfig {
    pub fn new(id: ContainerId, bundle: impl Into<PathBuf>) -> Self {
        Self {
            id,
            bundle: bundle.into(),
            stdio: StdioConfig::null(),
            checkpoint: None,
            pid_file: None,
        }
    }
}

/// Exit code and time recorded by `set_exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitStatus {
    pub code: i32,
    pub exited_at: SystemTime,
}

/// Result of a successful Start.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub pid: ProcessId,
    /// Present when Start restored from a checkpoint.
    pub remap: Option<RemapReport>,
}

/// An additional process to run inside the container.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub exec_id: ContainerId,
    /// OCI process spec.
    pub spec: serde_json::Value,
    pub stdio: StdioConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    pub exec_id: ContainerId,
    pub pid: ProcessId,
}

/// Stdio prepared before a runtime call and attached after it.
enum PendingIo {
    Console(ConsoleSocket),
    Pipes(PipeIo),
}

impl PendingIo {
    fn open(stdio: &StdioConfig) -> ShimResult<(Self, Option<PathBuf>, RuntimeIo)> {
        if stdio.terminal {
            let socket = ConsoleSocket::new_temp().map_err(|source| ShimError::Stdio {
                context: "create console socket",
                source,
            })?;
            let path = socket.path().to_path_buf();
            return Ok((Self::Console(socket), Some(path), RuntimeIo::default()));
        }

        let (pipes, child) = PipeIo::open(stdio).map_err(|source| ShimError::Stdio {
            context: "create stdio pipes",
            source,
        })?;
        Ok((Self::Pipes(pipes), None, child))
    }
}

struct Inner {
    machine: LifecycleStateMachine,
    exit: Option<ExitStatus>,
    consoles: Vec<Console>,
    stdin_close: CancellationToken,
}

/// Resets the pausing flag however pause ends.
struct PausingGuard<'a>(&'a AtomicBool);

impl<'a> PausingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PausingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn encode_kind(kind: StateKind) -> u8 {
    StateKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default() as u8
}

fn decode_kind(raw: u8) -> StateKind {
    StateKind::ALL
        .get(raw as usize)
        .copied()
        .unwrap_or(StateKind::Created)
}

/// The supervised init process of a container.
pub struct InitProcess {
    id: ContainerId,
    bundle: PathBuf,
    stdio: StdioConfig,
    pid_file: PathBuf,
    runtime: Arc<dyn OciRuntime>,
    preparer: Arc<RestorePreparer>,
    pausing: AtomicBool,
    /// Mirror of the committed state for lock-free status reads.
    kind: AtomicU8,
    /// 0 until the runtime reports a pid.
    pid: AtomicU32,
    io_tasks: TaskTracker,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for InitProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitProcess")
            .field("id", &self.id)
            .field("bundle", &self.bundle)
            .field("status", &self.status())
            .field("pid", &self.pid())
            .finish()
    }
}

impl InitProcess {
    /// Create the init process.
    ///
    /// A fresh process is created through the runtime and ends up in
    /// Created. A process with a checkpoint only records the restore
    /// parameters; the restore itself happens on Start.
    pub async fn create(
        ctx: &ShimContext,
        config: CreateConfig,
        cancel: &CancellationToken,
    ) -> ShimResult<Self> {
        let pid_file = config
            .pid_file
            .unwrap_or_else(|| config.bundle.join(INIT_PID_FILE));

        let machine = match &config.checkpoint {
            Some(image_path) => LifecycleStateMachine::from_checkpoint(
                config.id.clone(),
                CheckpointParams {
                    image_path: image_path.clone(),
                    pid_file: pid_file.clone(),
                },
            ),
            None => LifecycleStateMachine::new(config.id.clone()),
        };

        let process = Self {
            kind: AtomicU8::new(encode_kind(machine.kind())),
            id: config.id,
            bundle: config.bundle,
            stdio: config.stdio,
            pid_file,
            runtime: Arc::clone(&ctx.runtime),
            preparer: Arc::clone(&ctx.preparer),
            pausing: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            io_tasks: TaskTracker::new(),
            inner: Mutex::new(Inner {
                machine,
                exit: None,
                consoles: Vec::new(),
                stdin_close: CancellationToken::new(),
            }),
        };

        if config.checkpoint.is_some() {
            tracing::info!(
                container_id = %process.id,
                bundle = %process.bundle.display(),
                "Init process created from checkpoint"
            );
            return Ok(process);
        }

        process.create_fresh(cancel).await?;
        Ok(process)
    }

    async fn create_fresh(&self, cancel: &CancellationToken) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let (pending, console_socket, io) = PendingIo::open(&self.stdio)?;

        self.runtime
            .create(
                self.id.as_str(),
                &self.bundle,
                CreateOpts {
                    pid_file: self.pid_file.clone(),
                    console_socket,
                    io,
                },
                cancel,
            )
            .await?;

        let pid = read_pid_file(&self.pid_file).await?;
        self.attach_io(&mut inner, pending, &self.stdio, cancel)
            .await?;
        self.pid.store(pid.value(), Ordering::SeqCst);

        tracing::info!(
            container_id = %self.id,
            pid = pid.value(),
            "Init process created"
        );
        Ok(())
    }

    async fn attach_io(
        &self,
        inner: &mut Inner,
        pending: PendingIo,
        stdio: &StdioConfig,
        cancel: &CancellationToken,
    ) -> ShimResult<()> {
        match pending {
            PendingIo::Console(socket) => {
                let master =
                    socket
                        .receive_master(cancel)
                        .await
                        .map_err(|source| ShimError::Stdio {
                            context: "receive console master",
                            source,
                        })?;
                let console = copy_console(
                    &self.id,
                    master,
                    stdio,
                    &self.io_tasks,
                    inner.stdin_close.child_token(),
                )
                .map_err(|source| ShimError::Stdio {
                    context: "copy console",
                    source,
                })?;
                inner.consoles.push(console);
            }
            PendingIo::Pipes(pipes) => {
                pipes.copy(
                    &self.id,
                    stdio,
                    &self.io_tasks,
                    inner.stdin_close.child_token(),
                );
            }
        }
        Ok(())
    }

    fn commit(&self, inner: &mut Inner, outcome: Outcome) {
        inner.machine.commit(outcome);
        self.kind
            .store(encode_kind(inner.machine.kind()), Ordering::SeqCst);
    }

    fn check(&self, inner: &Inner, op: Operation) -> ShimResult<Outcome> {
        inner.machine.check(op).map_err(|e| {
            tracing::debug!(container_id = %self.id, error = %e, "Operation rejected");
            ShimError::from(e)
        })
    }

    /// Start the process, restoring it when it was created from a checkpoint.
    pub async fn start(&self, cancel: &CancellationToken) -> ShimResult<StartOutcome> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Start)?;

        let remap = match inner.machine.state().clone() {
            InitState::CreatedFromCheckpoint(params) => {
                Some(self.restore(&mut inner, &params, cancel).await?)
            }
            _ => {
                self.runtime.start(self.id.as_str(), cancel).await?;
                None
            }
        };

        let pid = self.pid().ok_or_else(|| ShimError::PidFile {
            path: self.pid_file.clone(),
            reason: "runtime never reported a pid".to_string(),
        })?;
        self.commit(&mut inner, outcome);

        tracing::info!(
            container_id = %self.id,
            pid = pid.value(),
            restored = remap.is_some(),
            "Init process started"
        );
        Ok(StartOutcome { pid, remap })
    }

    async fn restore(
        &self,
        inner: &mut Inner,
        params: &CheckpointParams,
        cancel: &CancellationToken,
    ) -> ShimResult<RemapReport> {
        let report = self
            .preparer
            .prepare(&self.bundle, &params.image_path, cancel)
            .await;
        tracing::info!(
            container_id = %self.id,
            links = report.links.len(),
            diagnostics = report.diagnostics.len(),
            "GPU restore: bundle prepared"
        );

        let (pending, console_socket, io) = PendingIo::open(&self.stdio)?;
        self.runtime
            .restore(
                self.id.as_str(),
                &self.bundle,
                RestoreOpts {
                    image_path: params.image_path.clone(),
                    pid_file: params.pid_file.clone(),
                    console_socket,
                    io,
                },
                cancel,
            )
            .await
            .map_err(|e| {
                tracing::error!(container_id = %self.id, error = %e, "GPU restore: runtime restore failed");
                ShimError::from(e)
            })?;

        let pid = read_pid_file(&params.pid_file).await?;
        self.attach_io(inner, pending, &self.stdio, cancel).await?;
        self.pid.store(pid.value(), Ordering::SeqCst);
        Ok(report)
    }

    /// Delete the process and its runtime state.
    pub async fn delete(&self, cancel: &CancellationToken) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Delete)?;
        let force = inner.machine.kind() != StateKind::Stopped;

        self.runtime.delete(self.id.as_str(), force, cancel).await?;

        // Io teardown follows a successful runtime delete
        inner.stdin_close.cancel();
        self.io_tasks.close();
        tokio::select! {
            biased;
            _ = self.io_tasks.wait() => {}
            _ = cancel.cancelled() => {
                tracing::warn!(container_id = %self.id, "Delete cancelled while io copies drain");
                return Err(ShimError::IoDrainCancelled(self.id.clone()));
            }
        }
        inner.consoles.clear();

        match tokio::fs::remove_file(&self.pid_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                container_id = %self.id,
                path = %self.pid_file.display(),
                error = %e,
                "Failed to remove pid file"
            ),
        }

        self.commit(&mut inner, outcome);
        tracing::info!(container_id = %self.id, force, "Init process deleted");
        Ok(())
    }

    pub async fn pause(&self, cancel: &CancellationToken) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Pause)?;

        let _pausing = PausingGuard::set(&self.pausing);
        self.runtime.pause(self.id.as_str(), cancel).await?;
        self.commit(&mut inner, outcome);
        tracing::info!(container_id = %self.id, "Init process paused");
        Ok(())
    }

    pub async fn resume(&self, cancel: &CancellationToken) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Resume)?;

        self.runtime.resume(self.id.as_str(), cancel).await?;
        self.commit(&mut inner, outcome);
        tracing::info!(container_id = %self.id, "Init process resumed");
        Ok(())
    }

    /// Apply a resources document (`linux.resources` shape).
    pub async fn update(
        &self,
        resources: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Update)?;

        self.runtime
            .update(self.id.as_str(), resources, cancel)
            .await?;
        self.commit(&mut inner, outcome);
        Ok(())
    }

    pub async fn checkpoint(
        &self,
        opts: &CheckpointOptions,
        cancel: &CancellationToken,
    ) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Checkpoint)?;

        self.runtime
            .checkpoint(self.id.as_str(), opts, cancel)
            .await?;
        self.commit(&mut inner, outcome);
        tracing::info!(
            container_id = %self.id,
            image = %opts.image_path.display(),
            exit = opts.exit,
            "Init process checkpointed"
        );
        Ok(())
    }

    /// Run an additional process inside the container.
    pub async fn exec(
        &self,
        config: ExecConfig,
        cancel: &CancellationToken,
    ) -> ShimResult<ExecHandle> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Exec)?;

        let process_spec = self.bundle.join(format!("exec-{}.json", config.exec_id));
        let pid_file = self.bundle.join(format!("exec-{}.pid", config.exec_id));
        let spec = serde_json::to_vec_pretty(&config.spec).map_err(|e| {
            ShimError::HardValidation(HardValidationError::InvalidFieldValue {
                field: "spec",
                value: config.exec_id.to_string(),
                reason: e.to_string(),
            })
        })?;
        tokio::fs::write(&process_spec, spec)
            .await
            .map_err(|source| ShimError::Io {
                context: "write exec process spec",
                source,
            })?;

        let (pending, console_socket, io) = PendingIo::open(&config.stdio)?;
        self.runtime
            .exec(
                self.id.as_str(),
                ExecOpts {
                    process_spec,
                    pid_file: pid_file.clone(),
                    console_socket,
                    io,
                },
                cancel,
            )
            .await?;

        let pid = read_pid_file(&pid_file).await?;
        self.attach_io(&mut inner, pending, &config.stdio, cancel)
            .await?;
        self.commit(&mut inner, outcome);

        tracing::info!(
            container_id = %self.id,
            exec_id = %config.exec_id,
            pid = pid.value(),
            "Exec process started"
        );
        Ok(ExecHandle {
            exec_id: config.exec_id,
            pid,
        })
    }

    /// Send `signal` to the init process, or to every process when `all`.
    pub async fn kill(&self, signal: u32, all: bool, cancel: &CancellationToken) -> ShimResult<()> {
        let mut inner = self.inner.lock().await;
        let outcome = self.check(&inner, Operation::Kill)?;

        let sig = i32::try_from(signal)
            .ok()
            .and_then(|raw| Signal::try_from(raw).ok())
            .ok_or(HardValidationError::InvalidSignal { signal })?;

        self.runtime.kill(self.id.as_str(), sig, all, cancel).await?;
        self.commit(&mut inner, outcome);
        tracing::debug!(container_id = %self.id, signal = %sig, all, "Signal delivered");
        Ok(())
    }

    /// Record that the init process exited with `code`.
    ///
    /// Moves every live state to Stopped. A paused process is resumed first
    /// so it can be reaped; a resume failure is logged and ignored. Stopped
    /// and Deleted ignore the event.
    pub async fn set_exited(&self, code: i32) {
        let mut inner = self.inner.lock().await;
        let kind = inner.machine.kind();

        match kind {
            StateKind::Stopped | StateKind::Deleted => {
                tracing::debug!(
                    container_id = %self.id,
                    state = kind.name(),
                    "Exit event ignored"
                );
                return;
            }
            StateKind::Paused => {
                if let Err(e) = self
                    .runtime
                    .resume(self.id.as_str(), &CancellationToken::new())
                    .await
                {
                    tracing::error!(
                        container_id = %self.id,
                        error = %e,
                        "Failed to resume paused process on exit"
                    );
                }
            }
            StateKind::Created | StateKind::CreatedFromCheckpoint | StateKind::Running => {}
        }

        inner.exit = Some(ExitStatus {
            code,
            exited_at: SystemTime::now(),
        });
        inner.stdin_close.cancel();
        self.commit(&mut inner, Outcome::Transition(StateKind::Stopped));

        tracing::info!(
            container_id = %self.id,
            exit_code = code,
            from = kind.name(),
            "Init process exited"
        );
    }

    /// Current status. Reports `pausing` while a pause is in flight.
    pub fn status(&self) -> ProcessStatus {
        if self.pausing.load(Ordering::SeqCst) {
            return ProcessStatus::Pausing;
        }
        self.state_kind().into()
    }

    /// Committed state, read without the operation lock.
    pub fn state_kind(&self) -> StateKind {
        decode_kind(self.kind.load(Ordering::SeqCst))
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    pub fn stdio(&self) -> &StdioConfig {
        &self.stdio
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn pid(&self) -> Option<ProcessId> {
        ProcessId::new(self.pid.load(Ordering::SeqCst)).ok()
    }

    pub async fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().await.exit
    }

    pub async fn metrics(&self) -> StateMachineMetrics {
        StateMachineMetrics::from(&self.inner.lock().await.machine)
    }
}
