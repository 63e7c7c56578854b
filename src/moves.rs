// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Pairs the two halves of a rename.
//!
//! The kernel reports a rename as independent `MOVED_FROM` and `MOVED_TO`
//! records linked only by a cookie, and either half may never arrive when
//! one endpoint lies outside the watched tree. Each `MOVED_FROM` arms a
//! short rendezvous timer; a matching `MOVED_TO` cancels it and resolves
//! synchronously, while an expired timer surfaces the lone half on the
//! coordinator's queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::tree::Wd;

/// How long a `MOVED_FROM` waits for its `MOVED_TO`. The matching record
/// normally sits in the same read batch, so anything beyond scheduler
/// jitter is enough.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_millis(100);

/// One endpoint of a resolved move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEnd {
    pub parent_wd: Wd,
    pub name: String,
}

/// A resolved move. A missing side means that endpoint was never observed
/// within the rendezvous bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub old: Option<MoveEnd>,
    pub new: Option<MoveEnd>,
    pub is_dir: bool,
}

struct PendingMove {
    parent_wd: Wd,
    name: String,
    is_dir: bool,
    matched: oneshot::Sender<()>,
}

/// Coordinator for in-flight renames, keyed by kernel cookie.
pub struct MoveCoordinator {
    pending: Arc<Mutex<HashMap<u32, PendingMove>>>,
    expired_tx: mpsc::Sender<MoveResult>,
    closed: CancellationToken,
}

impl MoveCoordinator {
    /// Creates a coordinator and the queue on which expired half-renames
    /// are delivered.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<MoveResult>) {
        let (expired_tx, expired_rx) = mpsc::channel(1);
        (
            Self {
                pending: Arc::new(Mutex::new(HashMap::new())),
                expired_tx,
                closed: CancellationToken::new(),
            },
            expired_rx,
        )
    }

    /// Records a `MOVED_FROM` half and arms its rendezvous timer. If no
    /// matching `MOVED_TO` arrives in time, the from-only result is pushed
    /// on the expired queue; if the coordinator is closed first, the entry
    /// is dropped silently.
    pub fn on_move_from(&self, cookie: u32, name: &str, parent_wd: Wd, is_dir: bool) {
        let (matched_tx, matched_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().expect("pending moves lock poisoned");
            pending.insert(
                cookie,
                PendingMove {
                    parent_wd,
                    name: name.to_string(),
                    is_dir,
                    matched: matched_tx,
                },
            );
        }

        let pending = Arc::clone(&self.pending);
        let expired_tx = self.expired_tx.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = matched_rx => {}
                () = closed.cancelled() => {
                    pending.lock().expect("pending moves lock poisoned").remove(&cookie);
                }
                () = sleep(RENDEZVOUS_TIMEOUT) => {
                    let entry = pending
                        .lock()
                        .expect("pending moves lock poisoned")
                        .remove(&cookie);
                    if let Some(entry) = entry {
                        let _ = expired_tx
                            .send(MoveResult {
                                old: Some(MoveEnd {
                                    parent_wd: entry.parent_wd,
                                    name: entry.name,
                                }),
                                new: None,
                                is_dir: entry.is_dir,
                            })
                            .await;
                    }
                }
            }
        });
    }

    /// Resolves a `MOVED_TO` half. Cookies are never matched across, even
    /// if names collide; with no pending counterpart the result carries
    /// only the destination side.
    #[must_use]
    pub fn on_move_to(&self, cookie: u32, name: &str, parent_wd: Wd, is_dir: bool) -> MoveResult {
        let entry = self
            .pending
            .lock()
            .expect("pending moves lock poisoned")
            .remove(&cookie);

        let new = Some(MoveEnd {
            parent_wd,
            name: name.to_string(),
        });

        if let Some(entry) = entry {
            let _ = entry.matched.send(());
            return MoveResult {
                old: Some(MoveEnd {
                    parent_wd: entry.parent_wd,
                    name: entry.name,
                }),
                new,
                is_dir,
            };
        }

        MoveResult {
            old: None,
            new,
            is_dir,
        }
    }

    /// Closes the coordinator. Pending entries are dropped without emitting.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_matched_pair_resolves_both_sides() {
        let (coordinator, mut expired_rx) = MoveCoordinator::new();

        coordinator.on_move_from(7, "a.txt", 2, false);
        let result = coordinator.on_move_to(7, "b.txt", 3, false);

        assert_eq!(
            result,
            MoveResult {
                old: Some(MoveEnd {
                    parent_wd: 2,
                    name: "a.txt".to_string()
                }),
                new: Some(MoveEnd {
                    parent_wd: 3,
                    name: "b.txt".to_string()
                }),
                is_dir: false,
            }
        );

        // The timer was cancelled, so nothing reaches the expired queue.
        advance(RENDEZVOUS_TIMEOUT * 2).await;
        tokio::task::yield_now().await;
        assert_matches!(expired_rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_emits_from_only() {
        let (coordinator, mut expired_rx) = MoveCoordinator::new();

        coordinator.on_move_from(9, "dir", 4, true);

        let result = timeout(RENDEZVOUS_TIMEOUT * 3, expired_rx.recv())
            .await
            .expect("timer never fired")
            .expect("queue closed");
        assert_eq!(
            result,
            MoveResult {
                old: Some(MoveEnd {
                    parent_wd: 4,
                    name: "dir".to_string()
                }),
                new: None,
                is_dir: true,
            }
        );
        let _ = coordinator;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_to_resolves_to_only() {
        let (coordinator, _expired_rx) = MoveCoordinator::new();

        let result = coordinator.on_move_to(11, "incoming", 5, true);
        assert_eq!(
            result,
            MoveResult {
                old: None,
                new: Some(MoveEnd {
                    parent_wd: 5,
                    name: "incoming".to_string()
                }),
                is_dir: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cookies_never_match_across() {
        let (coordinator, mut expired_rx) = MoveCoordinator::new();

        coordinator.on_move_from(1, "same-name", 2, false);
        let result = coordinator.on_move_to(2, "same-name", 3, false);
        assert_eq!(result.old, None);

        // The unmatched from-half still times out on its own.
        let expired = timeout(RENDEZVOUS_TIMEOUT * 3, expired_rx.recv())
            .await
            .expect("timer never fired")
            .expect("queue closed");
        assert_eq!(
            expired.old,
            Some(MoveEnd {
                parent_wd: 2,
                name: "same-name".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_pending_silently() {
        let (coordinator, mut expired_rx) = MoveCoordinator::new();

        coordinator.on_move_from(3, "dropped", 2, false);
        coordinator.close();

        // Let the timer task observe the close before its timeout can fire.
        tokio::task::yield_now().await;
        advance(RENDEZVOUS_TIMEOUT * 2).await;
        tokio::task::yield_now().await;
        assert_matches!(expired_rx.try_recv(), Err(TryRecvError::Empty));
    }
}
