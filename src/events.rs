// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Filesystem events emitted by the watcher.
//!
//! Paths are emitted as `join(root_form, relative_path)` where `root_form`
//! is the cleaned root the watcher was constructed with. Watching `.` makes
//! every path relative to the working directory.

use std::fmt;

/// An event emitted by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A file or directory was created.
    Create { path: String, is_dir: bool },
    /// A file or directory was removed.
    Delete { path: String, is_dir: bool },
    /// A file was written and closed.
    Modify { path: String },
    /// A file or directory was moved. A missing side means the counterpart
    /// lived in an unwatched (ignored) location.
    Rename {
        old_path: Option<String>,
        new_path: Option<String>,
        is_dir: bool,
    },
}

impl Event {
    /// Whether the event item is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        match self {
            Self::Create { is_dir, .. } | Self::Delete { is_dir, .. } | Self::Rename { is_dir, .. } => *is_dir,
            Self::Modify { .. } => false,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { path, .. } => write!(f, "CREATE {path}"),
            Self::Delete { path, .. } => write!(f, "DELETE {path}"),
            Self::Modify { path } => write!(f, "MODIFY {path}"),
            Self::Rename { old_path, new_path, .. } => match (old_path, new_path) {
                (Some(old), Some(new)) => write!(f, "RENAME {old} to {new}"),
                (Some(old), None) => write!(f, "RENAME {old}"),
                (None, Some(new)) => write!(f, "RENAME to {new}"),
                (None, None) => Ok(()),
            },
        }
    }
}
