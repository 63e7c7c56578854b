// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline executor.
//!
//! Each trigger (startup, a filesystem event) owns one generation: the
//! configured commands run in order, their output is streamed to the
//! command sinks, and a failing command either skips the rest of the
//! generation (`fatalIfErr`) or is logged and stepped over. A fresh event
//! or a shutdown signal cancels the running generation; the child's process
//! group gets SIGINT first and SIGKILL once the per-command deadline
//! expires, and every spawned child is always waited on before the
//! generation is declared done.

use std::io;
use std::process::Stdio;

use anyhow::Result;
use log::{debug, error, info};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as TokioCommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Command;
use crate::events::Event;
use crate::logs::CmdSink;
use crate::watcher::WatchError;

/// Chunk size for forwarding child stdout/stderr.
const OUTPUT_CHUNK_SIZE: usize = 4096;

/// How a command run ended.
enum CmdOutcome {
    Completed(std::process::ExitStatus),
    Cancelled,
}

/// Runs the configured command pipeline, one generation per trigger.
pub struct Executor {
    cmds: Vec<Command>,
    quiet: bool,
    no_events: bool,
}

impl Executor {
    #[must_use]
    pub const fn new(cmds: Vec<Command>, quiet: bool, no_events: bool) -> Self {
        Self {
            cmds,
            quiet,
            no_events,
        }
    }

    /// Runs generations until the watcher closes its streams or a shutdown
    /// signal arrives. The initial generation starts immediately; every
    /// event cancels the in-flight generation and starts the next one.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<Event>,
        mut errors: mpsc::Receiver<WatchError>,
    ) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            let cancel = CancellationToken::new();
            let generation = self.spawn_generation(cancel.clone());

            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT received, shutting down");
                    Self::drain(&cancel, generation).await;
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    Self::drain(&cancel, generation).await;
                    return Ok(());
                }
                watch_err = errors.recv() => {
                    Self::drain(&cancel, generation).await;
                    return match watch_err {
                        Some(e) => Err(e.into()),
                        None => Ok(()),
                    };
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if !self.no_events {
                                info!("{event}");
                            }
                            Self::drain(&cancel, generation).await;
                        }
                        // The watcher closed its stream; nothing more will
                        // ever trigger.
                        None => {
                            Self::drain(&cancel, generation).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn spawn_generation(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let cmds = self.cmds.clone();
        let quiet = self.quiet;
        let no_events = self.no_events;
        tokio::spawn(run_generation(cmds, cancel, quiet, no_events))
    }

    /// Cancels the generation and waits for every child to be reaped.
    async fn drain(cancel: &CancellationToken, generation: JoinHandle<()>) {
        cancel.cancel();
        let _ = generation.await;
    }
}

/// Runs every command of one generation in order.
async fn run_generation(cmds: Vec<Command>, cancel: CancellationToken, quiet: bool, no_events: bool) {
    for (i, cmd) in cmds.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        if !no_events {
            info!("starting cmds[{i}]");
        }

        match run_cmd(cmd, &cancel, quiet).await {
            Ok(CmdOutcome::Cancelled) => break,
            Ok(CmdOutcome::Completed(status)) => {
                if status.success() {
                    continue;
                }
                error!("cmds[{i}]: {status}");
                if cmd.fatal_if_err {
                    info!("the remaining cmds will be skipped due to the fatalIfErr flag");
                    break;
                }
            }
            Err(e) => {
                error!("cmds[{i}]: {e}");
                if cmd.fatal_if_err {
                    info!("the remaining cmds will be skipped due to the fatalIfErr flag");
                    break;
                }
            }
        }
    }
}

/// Spawns one command and waits for it, honoring cancellation.
///
/// The child gets its own session so that shells spawning further children
/// can be signalled as a group. Under cancellation the group receives
/// SIGINT; if it hasn't exited after the command's `delayToKill`, SIGKILL
/// follows, and the exit status is observed either way.
async fn run_cmd(cmd: &Command, cancel: &CancellationToken, quiet: bool) -> io::Result<CmdOutcome> {
    let mut command = TokioCommand::new(&cmd.terms[0]);
    command.args(&cmd.terms[1..]).stdin(Stdio::null());
    if quiet {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    } else {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = command.spawn()?;

    // Readers are only detached at the forcible-kill step so that output
    // produced during a graceful shutdown still gets forwarded.
    let detach_readers = CancellationToken::new();
    let mut readers = Vec::new();
    if !quiet {
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(stream_output(
                stdout,
                CmdSink::stdout(),
                detach_readers.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(stream_output(
                stderr,
                CmdSink::stderr(),
                detach_readers.clone(),
            )));
        }
    }

    let outcome = tokio::select! {
        status = child.wait() => CmdOutcome::Completed(status?),
        () = cancel.cancelled() => {
            signal_group(&child, libc::SIGINT);

            match timeout(cmd.delay_to_kill, child.wait()).await {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    debug!("graceful shutdown timed out, killing child");
                    signal_group(&child, libc::SIGKILL);
                    detach_readers.cancel();
                    let _ = child.start_kill();
                    child.wait().await?;
                }
            }
            CmdOutcome::Cancelled
        }
    };

    for reader in readers {
        let _ = reader.await;
    }
    Ok(outcome)
}

/// Sends a signal to the child's process group. The child became a session
/// leader at spawn, so its pid doubles as the group id.
fn signal_group(child: &Child, sig: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // A negative pid addresses the whole process group.
    if unsafe { libc::kill(-raw, sig) } == -1 {
        debug!("failed to signal process group {raw}");
    }
}

/// Forwards a child output stream to a sink in bounded chunks until EOF,
/// a read error, or detachment.
async fn stream_output<R>(mut reader: R, sink: CmdSink, detach: CancellationToken)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0_u8; OUTPUT_CHUNK_SIZE];
    loop {
        tokio::select! {
            () = detach.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.chunk(&buf[..n]),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
