// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Recursive inotify watcher.
//!
//! One inotify instance covers the whole tree under the configured root:
//! the bootstrap walk adds a watch per directory, and the event loop keeps
//! the set live as directories are created, removed and moved. Decoded
//! records are matched against the ignore expressions (directories with a
//! trailing `/`), rename halves go through [`MoveCoordinator`], and the
//! resulting [`Event`]s are delivered on a bounded channel so that a slow
//! consumer naturally coalesces bursts.
//!
//! The loop ends on an explicit close, on a read error, or when the root
//! watch itself disappears.

use std::collections::HashMap;
use std::fs;
use std::io;

use futures::StreamExt;
use inotify::{EventMask, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use log::warn;
use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::Event;
use crate::moves::{MoveCoordinator, MoveResult};
use crate::tree::{clean_path, join_path, TreeError, WatchTree, Wd};

// =============================================================================
// Constants
// =============================================================================

/// Room for 64 maximum-size records per read: header plus `NAME_MAX` plus
/// the terminating NUL.
const INOTIFY_BUFFER_SIZE: usize = (16 + 255 + 1) * 64;

/// Capacity of the events and errors channels. One slot is enough because
/// the consumer's reaction to any event is to cancel and restart, so "last
/// event wins" is the intended batching.
const CHANNEL_CAPACITY: usize = 1;

fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::CLOSE_WRITE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("creating inotify instance: {0}")]
    Init(io::Error),
    #[error("adding {path} to inotify instance: {source}")]
    AddWatch { path: String, source: io::Error },
    #[error("reading {path} dir: {source}")]
    ReadDir { path: String, source: io::Error },
    #[error("reading inotify events: {0}")]
    Read(io::Error),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

// =============================================================================
// Watcher
// =============================================================================

/// Handle to a running watcher. Dropping it (or calling [`Watcher::close`])
/// stops the event loop; closing is idempotent.
pub struct Watcher {
    shutdown: CancellationToken,
}

impl Watcher {
    /// Bootstraps a recursive watch rooted at `root` and spawns the event
    /// loop. Paths on emitted events are `join(root_form, relative)` where
    /// `root_form` is `root` after cleaning (`.` cleans to the empty
    /// string). A failure during bootstrap releases the inotify instance.
    pub fn start(
        root: &str,
        ignore_reg_exps: Vec<Regex>,
    ) -> Result<(Self, mpsc::Receiver<Event>, mpsc::Receiver<WatchError>), WatchError> {
        let inotify = Inotify::init().map_err(WatchError::Init)?;
        let stream = inotify
            .into_event_stream(vec![0_u8; INOTIFY_BUFFER_SIZE])
            .map_err(WatchError::Init)?;
        let mut watches = stream.watches();

        let root_form = clean_path(root);
        let root_desc =
            watches
                .add(fs_path(&root_form), watch_mask())
                .map_err(|source| WatchError::AddWatch {
                    path: root_form.clone(),
                    source,
                })?;
        let root_wd = root_desc.get_watch_descriptor_id();

        let mut tree = WatchTree::new();
        tree.set_root(&root_form, root_wd)?;

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut state = WatchState {
            tree,
            handles: HashMap::from([(root_wd, root_desc)]),
            watches,
            ignore_reg_exps,
            events_tx,
        };
        state.add_dirs_under(root_wd)?;

        let shutdown = CancellationToken::new();
        tokio::spawn(run_event_loop(state, stream, errors_tx, shutdown.clone()));

        Ok((Self { shutdown }, events_rx, errors_rx))
    }

    /// Stops the event loop and releases the inotify instance.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Event Loop
// =============================================================================

enum Flow {
    Continue,
    Stop,
}

struct WatchState {
    tree: WatchTree,
    /// Watch descriptor handles for every node in the tree, needed to
    /// detach kernel watches that outlive their directory's place in the
    /// tree (a directory moved out of the watched view keeps its watch).
    handles: HashMap<Wd, WatchDescriptor>,
    watches: Watches,
    ignore_reg_exps: Vec<Regex>,
    events_tx: mpsc::Sender<Event>,
}

async fn run_event_loop(
    mut state: WatchState,
    mut stream: EventStream<Vec<u8>>,
    errors_tx: mpsc::Sender<WatchError>,
    shutdown: CancellationToken,
) {
    let (mv, mut expired_rx) = MoveCoordinator::new();

    loop {
        let step = tokio::select! {
            () = shutdown.cancelled() => break,
            Some(result) = expired_rx.recv() => state.handle_move(result).await,
            record = stream.next() => match record {
                None => break,
                Some(Err(source)) => {
                    let _ = errors_tx.send(WatchError::Read(source)).await;
                    break;
                }
                Some(Ok(record)) => state.handle_record(&record, &mv).await,
            },
        };

        match step {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) => {
                let _ = errors_tx.send(e).await;
                break;
            }
        }
    }

    mv.close();
}

impl WatchState {
    async fn handle_record(
        &mut self,
        record: &inotify::Event<std::ffi::OsString>,
        mv: &MoveCoordinator,
    ) -> Result<Flow, WatchError> {
        let mask = record.mask;

        if mask.contains(EventMask::Q_OVERFLOW) {
            warn!("inotify queue overflowed, some events were dropped");
            return Ok(Flow::Continue);
        }

        let wd = record.wd.get_watch_descriptor_id();

        if mask.contains(EventMask::IGNORED) {
            // The root watch disappearing means the watched view is gone.
            // For any other directory the parent's DELETE or the rename
            // handling already purged the subtree.
            if self.tree.root() == Some(wd) {
                return Ok(Flow::Stop);
            }
            self.handles.remove(&wd);
            return Ok(Flow::Continue);
        }

        if !self.tree.has(wd) {
            // Record for a watch that was already removed from the tree.
            return Ok(Flow::Continue);
        }
        let Some(name) = record.name.as_ref() else {
            return Ok(Flow::Continue);
        };
        let name = name.to_string_lossy().into_owned();

        let path = join_path(&self.tree.path(wd)?, &name);
        let is_dir = mask.contains(EventMask::ISDIR);
        if self.matches_ignore(&path, is_dir) {
            return Ok(Flow::Continue);
        }

        if mask.contains(EventMask::CREATE) {
            if is_dir {
                if let Some(new_wd) = self.add_dir(&name, wd)? {
                    self.add_dirs_under(new_wd)?;
                }
            }
            return Ok(self.emit(Event::Create { path, is_dir }).await);
        }

        if mask.contains(EventMask::DELETE) {
            if is_dir {
                if let Some(dir_wd) = self.tree.find(&path) {
                    // The kernel dropped these watches with the directory.
                    self.remove_subtree(dir_wd, false)?;
                }
            }
            return Ok(self.emit(Event::Delete { path, is_dir }).await);
        }

        if mask.contains(EventMask::CLOSE_WRITE) {
            if !is_dir {
                return Ok(self.emit(Event::Modify { path }).await);
            }
            return Ok(Flow::Continue);
        }

        if mask.contains(EventMask::MOVED_FROM) {
            mv.on_move_from(record.cookie, &name, wd, is_dir);
            return Ok(Flow::Continue);
        }

        if mask.contains(EventMask::MOVED_TO) {
            let result = mv.on_move_to(record.cookie, &name, wd, is_dir);
            return self.handle_move(result).await;
        }

        Ok(Flow::Continue)
    }

    /// Applies a resolved move to the tree and emits the rename event.
    async fn handle_move(&mut self, result: MoveResult) -> Result<Flow, WatchError> {
        let MoveResult { old, new, is_dir } = result;

        let old_path = match &old {
            Some(end) if self.tree.has(end.parent_wd) => {
                Some(join_path(&self.tree.path(end.parent_wd)?, &end.name))
            }
            _ => None,
        };
        let new_path = match &new {
            Some(end) if self.tree.has(end.parent_wd) => {
                Some(join_path(&self.tree.path(end.parent_wd)?, &end.name))
            }
            _ => None,
        };

        if is_dir {
            let moved_wd = old_path.as_deref().and_then(|path| self.tree.find(path));
            match (&new, moved_wd) {
                // Both sides watched: relink the subtree under its new
                // parent, no re-walk needed.
                (Some(end), Some(wd)) if self.tree.has(end.parent_wd) => {
                    self.tree.rename(wd, Some(end.parent_wd), Some(&end.name))?;
                }
                // Moved out of the watched view: the kernel watches follow
                // the inode, so detach them along with the tree nodes.
                (None, Some(wd)) => {
                    self.remove_subtree(wd, true)?;
                }
                // Moved in from outside (or the source node is already
                // gone): watch the incoming subtree from scratch.
                (Some(end), None) if self.tree.has(end.parent_wd) => {
                    if let Some(new_wd) = self.add_dir(&end.name, end.parent_wd)? {
                        self.add_dirs_under(new_wd)?;
                    }
                }
                _ => {}
            }
        }

        if old_path.is_none() && new_path.is_none() {
            return Ok(Flow::Continue);
        }
        Ok(self
            .emit(Event::Rename {
                old_path,
                new_path,
                is_dir,
            })
            .await)
    }

    /// Adds a watch for `name` under `parent_wd` unless its path matches an
    /// ignore expression. Returns the new node's watch descriptor, or
    /// `None` when the directory was ignored or vanished again before the
    /// watch landed.
    fn add_dir(&mut self, name: &str, parent_wd: Wd) -> Result<Option<Wd>, WatchError> {
        let path = join_path(&self.tree.path(parent_wd)?, name);
        if self.matches_ignore(&path, true) {
            return Ok(None);
        }

        let desc = match self.watches.add(fs_path(&path), watch_mask()) {
            Ok(desc) => desc,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(WatchError::AddWatch { path, source }),
        };
        let wd = desc.get_watch_descriptor_id();
        self.tree.add(wd, name, parent_wd)?;
        self.handles.insert(wd, desc);
        Ok(Some(wd))
    }

    /// Walks `parent_wd`'s directory depth-first, adding a watch per
    /// subdirectory with the same ignore policy.
    fn add_dirs_under(&mut self, parent_wd: Wd) -> Result<(), WatchError> {
        let parent_path = self.tree.path(parent_wd)?;
        let entries =
            fs::read_dir(fs_path(&parent_path)).map_err(|source| WatchError::ReadDir {
                path: parent_path.clone(),
                source,
            })?;

        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(wd) = self.add_dir(&name, parent_wd)? {
                self.add_dirs_under(wd)?;
            }
        }
        Ok(())
    }

    /// Removes a node and its descendants from the tree. With
    /// `detach_kernel` the kernel watches are removed too; failures there
    /// are expected since the matching `IGNORED` records may already be
    /// queued.
    fn remove_subtree(&mut self, wd: Wd, detach_kernel: bool) -> Result<(), WatchError> {
        for removed in self.tree.remove(wd)? {
            if let Some(desc) = self.handles.remove(&removed) {
                if detach_kernel {
                    let _ = self.watches.remove(desc);
                }
            }
        }
        Ok(())
    }

    /// Whether the path matches any ignore expression. Directories are
    /// matched with a trailing `/` so that directory-only patterns exclude
    /// subtrees without also matching files sharing the prefix.
    fn matches_ignore(&self, path: &str, is_dir: bool) -> bool {
        if is_dir {
            let dir_form = format!("{path}/");
            self.ignore_reg_exps.iter().any(|rx| rx.is_match(&dir_form))
        } else {
            self.ignore_reg_exps.iter().any(|rx| rx.is_match(path))
        }
    }

    async fn emit(&self, event: Event) -> Flow {
        if self.events_tx.send(event).await.is_err() {
            return Flow::Stop;
        }
        Flow::Continue
    }
}

fn fs_path(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}

// =============================================================================
// Tests
// =============================================================================
