//! PTY process handle.
//!
//! A [`PtyProcess`] owns one shell spawned on a pseudo-terminal. Input,
//! output and exit are handled by dedicated threads and exposed through
//! [`PtyIo`] channels, so the owning session never blocks on the PTY and can
//! `select!` over all of them.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;

use portable_pty::{
    native_pty_system, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use protocol::TerminalSize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::SessionConfig;

/// Errors that can occur during PTY operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The process was already terminated or has exited.
    #[error("process already terminated")]
    AlreadyTerminated,

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to read from the PTY.
    #[error("failed to read from PTY: {0}")]
    ReadFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the process.
    #[error("failed to kill process: {0}")]
    KillFailed(String),
}

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the output channel, in chunks.
const OUTPUT_CAPACITY: usize = 256;

/// Capacity of the input channel, in frames.
const INPUT_CAPACITY: usize = 64;

/// Everything needed to start a shell.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Program to run.
    pub shell: String,
    /// Working directory. Inherited from the bridge when `None`.
    pub cwd: Option<PathBuf>,
    /// Initial geometry.
    pub size: TerminalSize,
    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl SpawnOptions {
    /// Build spawn options from session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            shell: config.resolved_shell(),
            cwd: config.resolved_cwd(),
            size: config.initial_size(),
            env: vec![("TERM".to_string(), config.term.clone())],
        }
    }
}

/// How the process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code reported by the OS.
    pub code: u32,
    /// Signal description, when the process was killed by one.
    pub signal: Option<String>,
}

impl ProcessExit {
    /// Whether the process exited cleanly.
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

impl From<&ExitStatus> for ProcessExit {
    fn from(status: &ExitStatus) -> Self {
        // portable-pty 0.8 keeps the signal name private; Display carries it.
        let signal = if status.success() {
            None
        } else {
            status
                .to_string()
                .strip_prefix("Terminated by ")
                .map(str::to_string)
        };

        Self {
            code: status.exit_code(),
            signal,
        }
    }
}

/// Channels connected to the PTY threads.
pub struct PtyIo {
    /// Input for the shell, written in order by the writer thread.
    ///
    /// Dropping every sender stops the writer thread.
    pub input: mpsc::Sender<Vec<u8>>,
    /// Fires if a write to the PTY fails. The writer stops after that.
    pub input_failed: oneshot::Receiver<SessionError>,
    /// Output chunks in emission order. Closed at EOF.
    pub output: mpsc::Receiver<Result<Vec<u8>, SessionError>>,
    /// Fires once when the process has exited and been reaped.
    pub exit: oneshot::Receiver<std::io::Result<ProcessExit>>,
}

/// A shell running on a pseudo-terminal.
///
/// Dropping a `PtyProcess` whose child is still running terminates it.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    shell: String,
    size: TerminalSize,
    terminated: bool,
    exited: bool,
}

impl PtyProcess {
    /// Spawns a shell on a fresh PTY and starts its reader, writer and
    /// waiter threads.
    pub fn spawn(options: SpawnOptions) -> Result<(Self, PtyIo), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(options.size))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // CommandBuilder starts from the bridge's own environment.
        let mut cmd = CommandBuilder::new(&options.shell);
        if let Some(ref dir) = options.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", options.shell, e)))?;

        // The child holds its own copy of the slave side; keeping ours open
        // would prevent EOF on the master once the shell exits.
        drop(pair.slave);

        let pid = child.process_id();
        let reader = pair.master.try_clone_reader();
        let writer = pair.master.take_writer();

        // From here on, an early return drops `process` and terminates the child.
        let mut process = PtyProcess {
            master: Mutex::new(pair.master),
            killer: child.clone_killer(),
            pid,
            shell: options.shell,
            size: options.size,
            terminated: false,
            exited: false,
        };

        let reader = reader.map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = writer.map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);
        spawn_thread("pty-reader", move || read_loop(reader, output_tx))?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (failed_tx, failed_rx) = oneshot::channel();
        spawn_thread("pty-writer", move || write_loop(writer, input_rx, failed_tx))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let waiter = spawn_thread("pty-waiter", move || {
            let result = child.wait().map(|status| ProcessExit::from(&status));
            let _ = exit_tx.send(result);
        });
        if let Err(e) = waiter {
            // The child went down with the closure, so nothing can reap it.
            process.mark_exited();
            let _ = process.killer.kill();
            return Err(e);
        }

        tracing::debug!(
            pid = ?pid,
            shell = %process.shell,
            cwd = ?options.cwd,
            size = %options.size,
            "Spawned shell on PTY"
        );

        Ok((
            process,
            PtyIo {
                input: input_tx,
                input_failed: failed_rx,
                output: output_rx,
                exit: exit_rx,
            },
        ))
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the program that was spawned.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    /// Whether the process may still be running.
    pub fn is_running(&self) -> bool {
        !self.terminated && !self.exited
    }

    /// Resizes the PTY. The process keeps running.
    pub fn resize(&mut self, size: TerminalSize) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::AlreadyTerminated);
        }

        self.master
            .lock()
            .map_err(|_| SessionError::ResizeFailed("master lock poisoned".to_string()))?
            .resize(pty_size(size))
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        self.size = size;

        tracing::debug!(pid = ?self.pid, cols = size.cols, rows = size.rows, "Resized PTY");
        Ok(())
    }

    /// Reads the geometry back from the PTY itself.
    pub fn pty_size(&self) -> Result<TerminalSize, SessionError> {
        let size = self
            .master
            .lock()
            .map_err(|_| SessionError::ResizeFailed("master lock poisoned".to_string()))?
            .get_size()
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        Ok(TerminalSize::new(size.cols, size.rows))
    }

    /// Records that the process has exited and been reaped.
    ///
    /// Later [`terminate`](Self::terminate) and
    /// [`force_kill`](Self::force_kill) calls become no-ops, so a reaped pid
    /// is never signalled.
    pub fn mark_exited(&mut self) {
        self.exited = true;
    }

    /// Sends the terminate signal (SIGHUP on unix) to the process.
    ///
    /// Returns `Ok(true)` if the signal was sent by this call and `Ok(false)`
    /// if the process had already been terminated or exited.
    pub fn terminate(&mut self) -> Result<bool, SessionError> {
        if self.terminated || self.exited {
            return Ok(false);
        }
        self.terminated = true;

        self.killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))?;

        tracing::debug!(pid = ?self.pid, "Sent terminate signal");
        Ok(true)
    }

    /// Kills a process that did not exit after [`terminate`](Self::terminate).
    #[cfg(unix)]
    pub fn force_kill(&mut self) -> Result<(), SessionError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.exited {
            return Ok(());
        }
        self.terminated = true;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                tracing::debug!(pid = pid, "Sent SIGKILL");
                Ok(())
            }
            Err(e) => Err(SessionError::KillFailed(e.to_string())),
        }
    }

    /// Kills a process that did not exit after [`terminate`](Self::terminate).
    #[cfg(not(unix))]
    pub fn force_kill(&mut self) -> Result<(), SessionError> {
        if self.exited {
            return Ok(());
        }
        self.terminated = true;
        self.killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.terminate() {
                tracing::warn!(pid = ?self.pid, error = %e, "Failed to terminate process on drop");
            }
        }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_thread<F>(name: &str, f: F) -> Result<(), SessionError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(drop)
        .map_err(|e| SessionError::SpawnFailed(format!("{name} thread: {e}")))
}

/// Blocking read loop feeding the output channel until EOF or error.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Result<Vec<u8>, SessionError>>,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if output_tx.blocking_send(Ok(buffer[..n].to_vec())).is_err() {
                    // Session is gone.
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if is_hangup(&e) => break,
            Err(e) => {
                let _ = output_tx.blocking_send(Err(SessionError::ReadFailed(e.to_string())));
                break;
            }
        }
    }
    tracing::trace!("PTY reader finished");
}

/// Blocking write loop draining the input channel until it closes or a
/// write fails.
fn write_loop(
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::Receiver<Vec<u8>>,
    failed_tx: oneshot::Sender<SessionError>,
) {
    while let Some(data) = input_rx.blocking_recv() {
        if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
            let _ = failed_tx.send(SessionError::WriteFailed(e.to_string()));
            break;
        }
    }
    tracing::trace!("PTY writer finished");
}

/// Linux reports EIO on the master once every slave handle is closed.
#[cfg(unix)]
fn is_hangup(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_hangup(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::BrokenPipe
}
