// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process stdio plumbing.
//!
//! Pipe mode hands the child ends of fresh pipes to the runtime and copies
//! the shim ends to/from the configured fifos. Terminal mode receives the
//! pty master over a console socket and copies it instead. Every copy task
//! is spawned on the caller's `TaskTracker` so deletion can wait for output
//! to drain.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::types::ContainerId;

/// Where the process's standard streams go. `None` means not connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdioConfig {
    pub terminal: bool,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl StdioConfig {
    /// No terminal and no streams.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}

/// Child ends of the process pipes, handed to the runtime invocation.
#[derive(Debug, Default)]
pub struct RuntimeIo {
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
    pub stderr: Option<OwnedFd>,
}

impl RuntimeIo {
    pub fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}

/// Shim ends of the process pipes.
#[derive(Debug)]
pub struct PipeIo {
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
}

impl PipeIo {
    /// Create one pipe per configured stream.
    pub fn open(stdio: &StdioConfig) -> io::Result<(Self, RuntimeIo)> {
        let mut shim = Self {
            stdin: None,
            stdout: None,
            stderr: None,
        };
        let mut child = RuntimeIo::default();

        if stdio.stdin.is_some() {
            let (read, write) = pipe()?;
            child.stdin = Some(read);
            shim.stdin = Some(write);
        }
        if stdio.stdout.is_some() {
            let (read, write) = pipe()?;
            shim.stdout = Some(read);
            child.stdout = Some(write);
        }
        if stdio.stderr.is_some() {
            let (read, write) = pipe()?;
            shim.stderr = Some(read);
            child.stderr = Some(write);
        }

        Ok((shim, child))
    }

    /// Start the copy tasks. Stdin copying stops when `stdin_close` fires.
    pub fn copy(
        self,
        id: &ContainerId,
        stdio: &StdioConfig,
        tracker: &TaskTracker,
        stdin_close: CancellationToken,
    ) {
        if let (Some(sink), Some(source)) = (self.stdin, stdio.stdin.clone()) {
            spawn_pump_in(tracker, id, source, sink, stdin_close);
        }
        if let (Some(source), Some(target)) = (self.stdout, stdio.stdout.clone()) {
            spawn_pump_out(tracker, id, "stdout", source, target);
        }
        if let (Some(source), Some(target)) = (self.stderr, stdio.stderr.clone()) {
            spawn_pump_out(tracker, id, "stderr", source, target);
        }
    }
}

fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)
}

/// Pty master of a terminal process. Dropping it closes the console.
#[derive(Debug)]
pub struct Console {
    master: OwnedFd,
}

impl Console {
    pub fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

/// Copy a pty master to/from the configured fifos.
pub fn copy_console(
    id: &ContainerId,
    master: OwnedFd,
    stdio: &StdioConfig,
    tracker: &TaskTracker,
    stdin_close: CancellationToken,
) -> io::Result<Console> {
    if let Some(source) = stdio.stdin.clone() {
        spawn_pump_in(tracker, id, source, master.try_clone()?, stdin_close);
    }
    if let Some(target) = stdio.stdout.clone() {
        spawn_pump_out(tracker, id, "console", master.try_clone()?, target);
    }
    Ok(Console { master })
}

fn spawn_pump_out(
    tracker: &TaskTracker,
    id: &ContainerId,
    stream: &'static str,
    source: OwnedFd,
    target: PathBuf,
) {
    let id = id.clone();
    tracker.spawn(async move {
        match pump_out(source, &target).await {
            Ok(bytes) => tracing::debug!(container_id = %id, stream, bytes, "Stream drained"),
            Err(e) => tracing::warn!(
                container_id = %id,
                stream,
                target = %target.display(),
                error = %e,
                "Stream copy failed"
            ),
        }
    });
}

fn spawn_pump_in(
    tracker: &TaskTracker,
    id: &ContainerId,
    source: PathBuf,
    sink: OwnedFd,
    close: CancellationToken,
) {
    let id = id.clone();
    tracker.spawn(async move {
        let result = tokio::select! {
            () = close.cancelled() => Ok(0),
            result = pump_in(&source, sink) => result,
        };
        if let Err(e) = result {
            tracing::warn!(
                container_id = %id,
                source = %source.display(),
                error = %e,
                "Stdin copy failed"
            );
        }
    });
}

async fn pump_out(source: OwnedFd, target: &Path) -> io::Result<u64> {
    let mut reader = tokio::fs::File::from_std(std::fs::File::from(source));
    let mut writer = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(target)
        .await?;
    tokio::io::copy(&mut reader, &mut writer).await
}

async fn pump_in(source: &Path, sink: OwnedFd) -> io::Result<u64> {
    let mut reader = tokio::fs::OpenOptions::new().read(true).open(source).await?;
    let mut writer = tokio::fs::File::from_std(std::fs::File::from(sink));
    tokio::io::copy(&mut reader, &mut writer).await
}

/// Unix socket the runtime connects to in order to hand over a pty master.
#[derive(Debug)]
pub struct ConsoleSocket {
    _dir: tempfile::TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl ConsoleSocket {
    /// Bind a socket in a fresh temporary directory.
    pub fn new_temp() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("grit-pty").tempdir()?;
        let path = dir.path().join("pty.sock");
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            _dir: dir,
            path,
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the runtime to send the pty master.
    pub async fn receive_master(self, cancel: &CancellationToken) -> io::Result<OwnedFd> {
        let stream = tokio::select! {
            () = cancel.cancelled() => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "console receive cancelled"));
            }
            accepted = self.listener.accept() => accepted?.0,
        };

        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        tokio::task::spawn_blocking(move || receive_fd(stream.as_raw_fd()))
            .await
            .map_err(io::Error::other)?
    }
}

fn receive_fd(socket: RawFd) -> io::Result<OwnedFd> {
    let mut buf = [0u8; 4096];
    let mut iov = [io::IoSliceMut::new(&mut buf)];
    let mut space = nix::cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut space), MsgFlags::MSG_CMSG_CLOEXEC)
        .map_err(io::Error::from)?;

    for cmsg in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                // SAFETY: the kernel just installed this descriptor for us and
                // nothing else owns it.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "console socket message carried no descriptor",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn id() -> ContainerId {
        ContainerId::new("io-test").unwrap()
    }

    #[test]
    fn test_null_stdio_opens_no_pipes() {
        let (_, child) = PipeIo::open(&StdioConfig::null()).unwrap();
        assert!(child.is_empty());
    }

    #[tokio::test]
    async fn test_stdout_pipe_drains_into_file() {
        let dir = TempDir::new().unwrap();
        let stdio = StdioConfig {
            stdout: Some(dir.path().join("stdout.log")),
            ..StdioConfig::null()
        };
        let (shim, child) = PipeIo::open(&stdio).unwrap();
        assert!(child.stdout.is_some());
        assert!(child.stdin.is_none());

        let tracker = TaskTracker::new();
        shim.copy(&id(), &stdio, &tracker, CancellationToken::new());

        let mut writer = std::fs::File::from(child.stdout.unwrap());
        writer.write_all(b"hello from container\n").unwrap();
        drop(writer);

        tracker.close();
        tracker.wait().await;
        let logged = std::fs::read_to_string(dir.path().join("stdout.log")).unwrap();
        assert_eq!(logged, "hello from container\n");
    }

    #[tokio::test]
    async fn test_console_socket_receive_cancelled() {
        let socket = ConsoleSocket::new_temp().unwrap();
        assert!(socket.path().ends_with("pty.sock"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = socket.receive_master(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
