// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Interactive ssh session through a pseudo-terminal
//!
//! The local terminal is put in raw mode and bytes are copied both ways.
//! Outbound chunks go through [`filter_outbound`] first.

use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, PtySize, native_pty_system};
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::keys::{EOT, filter_outbound};
use crate::error::{TunnelError, TunnelResult};

/// How often the copy loop checks whether ssh has exited
const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

const BUFFER_SIZE: usize = 8192;

/// Remote shell endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellTarget {
    pub host: String,
    pub port: u16,
    pub identity_file: PathBuf,
    pub user: Option<String>,
}

impl ShellTarget {
    /// ssh arguments; host keys are neither checked nor recorded since the
    /// relay is ephemeral
    pub fn ssh_args(&self) -> Vec<String> {
        let destination = match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        };
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-i".to_string(),
            self.identity_file.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            destination,
        ]
    }
}

/// How the remote session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellExit {
    pub code: u32,
}

/// Interactive shell attached to the caller's terminal
#[async_trait]
pub trait ShellClient: Send + Sync {
    /// Block until the remote side closes
    async fn attach(&self, target: &ShellTarget) -> TunnelResult<ShellExit>;

    /// Stop a running session from another task
    fn abort(&self);
}

type KillerSlot = Arc<Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>>;

/// Runs the system `ssh` client in a pty
#[derive(Default)]
pub struct PtyShell {
    killer: KillerSlot,
    aborted: Arc<AtomicBool>,
}

impl PtyShell {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShellClient for PtyShell {
    async fn attach(&self, target: &ShellTarget) -> TunnelResult<ShellExit> {
        let target = target.clone();
        let killer = Arc::clone(&self.killer);
        let aborted = Arc::clone(&self.aborted);
        tokio::task::spawn_blocking(move || run_session(&target, &killer, &aborted))
            .await
            .map_err(|e| TunnelError::Terminal(format!("session task failed: {}", e)))?
    }

    fn abort(&self) {
        // Set before looking at the slot; see `register_killer`
        self.aborted.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.killer.lock()
            && let Some(mut killer) = slot.take()
            && let Err(e) = killer.kill()
        {
            debug!(error = %e, "ssh already gone");
        }
        // The session thread may not get to drop its guard
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Raw mode for the lifetime of the guard, when stdin is a terminal
struct RawMode {
    enabled: bool,
}

impl RawMode {
    fn enable() -> TunnelResult<Self> {
        if !io::stdin().is_terminal() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| TunnelError::Terminal(format!("failed to enable raw mode: {}", e)))?;
        Ok(Self { enabled: true })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

enum Event {
    Input(Vec<u8>),
    LocalClosed,
    RemoteClosed,
}

fn terminal_error(context: &str, err: impl std::fmt::Display) -> TunnelError {
    TunnelError::Terminal(format!("{}: {}", context, err))
}

/// Publish the child's killer for `abort`
///
/// Returns false if `abort` already ran, in which case it may have found the
/// slot empty and the caller must kill the child itself.
fn register_killer(
    slot: &KillerSlot,
    aborted: &AtomicBool,
    killer: Box<dyn ChildKiller + Send + Sync>,
) -> bool {
    if let Ok(mut slot) = slot.lock() {
        *slot = Some(killer);
    }
    !aborted.load(Ordering::SeqCst)
}

fn run_session(
    target: &ShellTarget,
    killer: &KillerSlot,
    aborted: &AtomicBool,
) -> TunnelResult<ShellExit> {
    if aborted.load(Ordering::SeqCst) {
        return Err(TunnelError::Interrupted);
    }

    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: rows.max(2),
            cols: cols.max(2),
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| terminal_error("failed to open pty", e))?;

    let mut cmd = CommandBuilder::new("ssh");
    cmd.args(target.ssh_args());
    if let Ok(term) = std::env::var("TERM") {
        cmd.env("TERM", term);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| TunnelError::Process {
            command: "ssh".to_string(),
            source: io::Error::other(e.to_string()),
        })?;
    // Only the child holds the slave side, so the reader sees EOF on exit
    drop(pair.slave);

    if !register_killer(killer, aborted, child.clone_killer()) {
        debug!("Aborted while starting ssh");
        if let Err(e) = child.kill() {
            debug!(error = %e, "ssh already gone");
        }
        let _ = child.wait();
        if let Ok(mut slot) = killer.lock() {
            slot.take();
        }
        return Err(TunnelError::Interrupted);
    }

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| terminal_error("failed to open pty reader", e))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| terminal_error("failed to open pty writer", e))?;

    let raw_mode = RawMode::enable()?;
    let (tx, rx) = mpsc::channel();

    let remote_tx = tx.clone();
    std::thread::spawn(move || {
        let mut stdout = io::stdout();
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdout.write_all(&buffer[..n]).and_then(|_| stdout.flush()).is_err() {
                        break;
                    }
                }
            }
        }
        let _ = remote_tx.send(Event::RemoteClosed);
    });

    // Blocks in read() until the next keystroke; it is left behind when the
    // session ends first
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(Event::LocalClosed);
                    break;
                }
                Ok(n) => {
                    if tx.send(Event::Input(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        match rx.recv_timeout(EXIT_CHECK_INTERVAL) {
            Ok(Event::Input(bytes)) => {
                let filtered = filter_outbound(&bytes);
                if writer.write_all(&filtered).and_then(|_| writer.flush()).is_err() {
                    break;
                }
            }
            Ok(Event::LocalClosed) | Ok(Event::RemoteClosed) => break,
            Err(RecvTimeoutError::Timeout) => {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // End of session: send EOF and wait for the remote side to close
    if let Err(e) = writer.write_all(&[EOT]).and_then(|_| writer.flush()) {
        debug!(error = %e, "pty already closed");
    }
    drop(writer);

    let status = child.wait()?;
    drop(raw_mode);

    if let Ok(mut slot) = killer.lock() {
        slot.take();
    }
    if !status.success() {
        warn!(code = status.exit_code(), "ssh exited with an error");
    }
    Ok(ShellExit {
        code: status.exit_code(),
    })
}
