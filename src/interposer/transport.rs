//! Worker process launch
//!
//! The worker is connected either over three independent pipes or over one
//! pseudo-terminal that carries input and output together. On the shared
//! channel everything written to the worker is echoed back on its output.

use std::io::{self, Cursor, Read, Write};
use std::process::Stdio;

use portable_pty::{
    Child as PtyChild, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::config::{InterposerConfig, TransportKind};
use crate::error::{InterposeError, Result};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const PTY_READ_CHUNK: usize = 8192;

/// Streams connected to a running worker
pub struct WorkerChannels {
    /// Primary output, one stream-json record per line
    pub output: BoxedReader,
    /// Worker input
    pub input: BoxedWriter,
    /// Separate diagnostic stream, if not merged into `output`
    pub diagnostics: Option<BoxedReader>,
    /// Input and output share one channel, so input is echoed
    pub shared: bool,
}

/// Handle to the launched worker
pub enum WorkerProcess {
    Piped(tokio::process::Child),
    Pty {
        child: Box<dyn PtyChild + Send + Sync>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        /// Held so the terminal stays open until the worker is reaped
        master: Box<dyn MasterPty + Send>,
    },
}

impl WorkerProcess {
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Piped(child) => child.id(),
            Self::Pty { child, .. } => child.process_id(),
        }
    }

    /// Wait for exit and return the status code (-1 when killed by a signal)
    pub async fn wait(self) -> Result<i32> {
        match self {
            Self::Piped(mut child) => {
                let status = child.wait().await?;
                Ok(status.code().unwrap_or(-1))
            }
            Self::Pty {
                mut child, master, ..
            } => {
                let status = tokio::task::spawn_blocking(move || child.wait()).await??;
                drop(master);
                Ok(status.exit_code() as i32)
            }
        }
    }

    pub async fn kill(&mut self) {
        let result = match self {
            Self::Piped(child) => child.kill().await,
            Self::Pty { killer, .. } => killer.kill(),
        };
        if let Err(e) = result {
            debug!(error = %e, "Failed to kill worker (already exited?)");
        }
    }
}

/// Arguments passed to the worker after the configured base arguments
pub fn worker_args(config: &InterposerConfig, task: &str) -> Vec<String> {
    let mut args = config.worker_args.clone();
    args.extend(
        [
            "-p",
            task,
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--dangerously-skip-permissions",
        ]
        .into_iter()
        .map(String::from),
    );
    args
}

/// Launch the worker with all channels connected before any I/O happens
pub fn launch(config: &InterposerConfig, task: &str) -> Result<(WorkerProcess, WorkerChannels)> {
    let launched = match config.transport {
        TransportKind::Pipes => launch_piped(config, task)?,
        TransportKind::Pty => launch_pty(config, task)?,
    };

    info!(
        pid = ?launched.0.id(),
        worker = %config.worker_binary,
        transport = config.transport.as_str(),
        "Launched worker"
    );
    Ok(launched)
}

fn launch_error(binary: &str, e: impl std::fmt::Display) -> InterposeError {
    InterposeError::WorkerLaunch(format!("{}: {}", binary, e))
}

fn launch_piped(config: &InterposerConfig, task: &str) -> Result<(WorkerProcess, WorkerChannels)> {
    let mut cmd = Command::new(&config.worker_binary);
    cmd.args(worker_args(config, task))
        // Nested sessions refuse to start when this is inherited
        .env_remove("CLAUDECODE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| launch_error(&config.worker_binary, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| launch_error(&config.worker_binary, "stdin not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| launch_error(&config.worker_binary, "stdout not captured"))?;
    let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);

    Ok((
        WorkerProcess::Piped(child),
        WorkerChannels {
            output: Box::new(stdout),
            input: Box::new(stdin),
            diagnostics: stderr,
            shared: config.transport.is_shared(),
        },
    ))
}

fn launch_pty(config: &InterposerConfig, task: &str) -> Result<(WorkerProcess, WorkerChannels)> {
    let binary = &config.worker_binary;
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| launch_error(binary, e))?;
    disable_line_editing(&*pair.master).map_err(|e| launch_error(binary, e))?;

    let mut cmd = CommandBuilder::new(binary);
    cmd.args(worker_args(config, task));
    cmd.env_remove("CLAUDECODE");
    let cwd = match config.working_dir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| launch_error(binary, e))?,
    };
    cmd.cwd(cwd);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| launch_error(binary, e))?;
    // Only the worker may hold the slave side, or hangup never arrives
    drop(pair.slave);

    let killer = child.clone_killer();
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| launch_error(binary, e))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| launch_error(binary, e))?;

    let output = spawn_pty_reader(reader).map_err(|e| launch_error(binary, e))?;
    let input = spawn_pty_writer(writer);

    Ok((
        WorkerProcess::Pty {
            child,
            killer,
            master: pair.master,
        },
        WorkerChannels {
            output,
            input,
            diagnostics: None,
            shared: config.transport.is_shared(),
        },
    ))
}

/// Switch the terminal out of canonical mode, keeping echo.
///
/// Canonical mode caps an input line at 4095 bytes and silently drops the
/// rest, which would truncate long answers.
#[cfg(unix)]
fn disable_line_editing(master: &dyn MasterPty) -> io::Result<()> {
    let Some(fd) = master.as_raw_fd() else {
        return Err(io::Error::other("pty master has no file descriptor"));
    };

    // SAFETY: fd is the open master owned by `master`; termios is plain data
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(io::Error::last_os_error());
        }
        termios.c_lflag &= !libc::ICANON;
        termios.c_lflag |= libc::ECHO;
        termios.c_cc[libc::VMIN] = 1;
        termios.c_cc[libc::VTIME] = 0;
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn disable_line_editing(_master: &dyn MasterPty) -> io::Result<()> {
    Ok(())
}

/// Bridge the blocking terminal reader onto an async stream
fn spawn_pty_reader(mut reader: Box<dyn Read + Send>) -> io::Result<BoxedReader> {
    let (tx, rx) = mpsc::channel::<io::Result<Cursor<Vec<u8>>>>(64);

    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; PTY_READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Ok(Cursor::new(buf[..n].to_vec()))).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if is_hangup(&e) => break,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
            debug!("PTY reader finished");
        })?;

    Ok(Box::new(StreamReader::new(ReceiverStream::new(rx))))
}

/// A closed terminal reads as EIO on Linux; that is end of stream here
#[cfg(unix)]
fn is_hangup(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_hangup(_e: &io::Error) -> bool {
    false
}

/// Bridge async writes onto the blocking terminal writer
fn spawn_pty_writer(mut writer: Box<dyn Write + Send>) -> BoxedWriter {
    let (input, mut pump) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut buf = vec![0u8; PTY_READ_CHUNK];
        loop {
            let n = match pump.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let chunk = buf[..n].to_vec();
            let written = tokio::task::spawn_blocking(move || {
                writer.write_all(&chunk)?;
                writer.flush()?;
                Ok::<_, io::Error>(writer)
            })
            .await;

            writer = match written {
                Ok(Ok(w)) => w,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to write to worker terminal");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Terminal writer task failed");
                    break;
                }
            };
        }
        debug!("PTY writer finished");
    });

    Box::new(input)
}
