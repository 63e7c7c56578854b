// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Tree of watched directories indexed by watch descriptor.
//!
//! Every inotify record names only a watch descriptor and a child name, so
//! resolving it to a full path would otherwise mean string bookkeeping per
//! directory. The tree keeps one node per live watch with a parent link and
//! a name, which makes path resolution an ancestor walk and makes moving a
//! whole subtree a single relink. Resolved paths are memoized in a two-way
//! cache that is invalidated whenever a node or any of its ancestors is
//! moved, renamed or removed.

use std::collections::HashMap;

use thiserror::Error;

/// Raw watch descriptor as assigned by the kernel.
pub type Wd = i32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("there's already a root")]
    RootAlreadySet,
    #[error("cannot remove the root")]
    RemoveRoot,
    #[error("cannot move the root")]
    MoveRoot,
    #[error("watch {0} is not in the tree")]
    UnknownWatch(Wd),
}

/// A directory being watched. The root has no parent and its name is the
/// cleaned root path; every other name is a single path segment.
#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<Wd>,
    /// Child name to child watch descriptor.
    children: HashMap<String, Wd>,
}

#[derive(Debug, Default)]
struct PathCache {
    path_by_wd: HashMap<Wd, String>,
    wd_by_path: HashMap<String, Wd>,
}

impl PathCache {
    fn insert(&mut self, wd: Wd, path: String) {
        self.path_by_wd.insert(wd, path.clone());
        self.wd_by_path.insert(path, wd);
    }

    fn path(&self, wd: Wd) -> Option<&String> {
        self.path_by_wd.get(&wd)
    }

    fn wd(&self, path: &str) -> Option<Wd> {
        self.wd_by_path.get(path).copied()
    }

    fn remove(&mut self, wd: Wd) {
        if let Some(path) = self.path_by_wd.remove(&wd) {
            self.wd_by_path.remove(&path);
        }
    }
}

/// Tree of watched directories starting at the watch root.
#[derive(Debug, Default)]
pub struct WatchTree {
    root: Option<Wd>,
    nodes: HashMap<Wd, Node>,
    cache: PathCache,
}

impl WatchTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root node. `path` is cleaned first, so a root of `.` turns
    /// into the empty string and descendant paths come out relative.
    pub fn set_root(&mut self, path: &str, wd: Wd) -> Result<(), TreeError> {
        if self.root.is_some() {
            return Err(TreeError::RootAlreadySet);
        }

        self.nodes.insert(
            wd,
            Node {
                name: clean_path(path),
                parent: None,
                children: HashMap::new(),
            },
        );
        self.root = Some(wd);
        Ok(())
    }

    #[must_use]
    pub const fn root(&self) -> Option<Wd> {
        self.root
    }

    #[must_use]
    pub fn has(&self, wd: Wd) -> bool {
        self.nodes.contains_key(&wd)
    }

    /// Inserts a child directory under `parent_wd`.
    pub fn add(&mut self, wd: Wd, name: &str, parent_wd: Wd) -> Result<(), TreeError> {
        let parent = self
            .nodes
            .get_mut(&parent_wd)
            .ok_or(TreeError::UnknownWatch(parent_wd))?;
        parent.children.insert(name.to_string(), wd);

        self.nodes.insert(
            wd,
            Node {
                name: name.to_string(),
                parent: Some(parent_wd),
                children: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Removes a node and all of its descendants, returning every removed
    /// watch descriptor. Cache entries for the subtree are purged.
    pub fn remove(&mut self, wd: Wd) -> Result<Vec<Wd>, TreeError> {
        let node = self.nodes.get(&wd).ok_or(TreeError::UnknownWatch(wd))?;
        let Some(parent_wd) = node.parent else {
            return Err(TreeError::RemoveRoot);
        };

        let name = node.name.clone();
        if let Some(parent) = self.nodes.get_mut(&parent_wd) {
            parent.children.remove(&name);
        }

        let removed = self.subtree(wd);
        for &sub_wd in &removed {
            self.cache.remove(sub_wd);
            self.nodes.remove(&sub_wd);
        }
        Ok(removed)
    }

    /// Moves and/or renames a node. A `None` parent keeps the current
    /// parent; a `None` (or empty) name keeps the current name. The path
    /// cache for the moved subtree is invalidated.
    pub fn rename(
        &mut self,
        wd: Wd,
        new_parent_wd: Option<Wd>,
        new_name: Option<&str>,
    ) -> Result<(), TreeError> {
        let node = self.nodes.get(&wd).ok_or(TreeError::UnknownWatch(wd))?;
        let Some(old_parent_wd) = node.parent else {
            return Err(TreeError::MoveRoot);
        };
        let old_name = node.name.clone();

        let target_parent_wd = new_parent_wd.unwrap_or(old_parent_wd);
        if !self.nodes.contains_key(&target_parent_wd) {
            return Err(TreeError::UnknownWatch(target_parent_wd));
        }

        let target_name = match new_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => old_name.clone(),
        };

        if let Some(old_parent) = self.nodes.get_mut(&old_parent_wd) {
            old_parent.children.remove(&old_name);
        }
        if let Some(target_parent) = self.nodes.get_mut(&target_parent_wd) {
            target_parent.children.insert(target_name.clone(), wd);
        }

        let node = self
            .nodes
            .get_mut(&wd)
            .ok_or(TreeError::UnknownWatch(wd))?;
        node.name = target_name;
        node.parent = Some(target_parent_wd);

        for sub_wd in self.subtree(wd) {
            self.cache.remove(sub_wd);
        }
        Ok(())
    }

    /// Returns the full path of a node, walking to the root and populating
    /// the cache opportunistically.
    pub fn path(&mut self, wd: Wd) -> Result<String, TreeError> {
        if let Some(path) = self.cache.path(wd) {
            return Ok(path.clone());
        }

        let node = self.nodes.get(&wd).ok_or(TreeError::UnknownWatch(wd))?;
        let Some(parent_wd) = node.parent else {
            // The root path is its own name and is never cached.
            return Ok(node.name.clone());
        };
        let name = node.name.clone();

        let parent_path = self.path(parent_wd)?;
        let path = join_path(&parent_path, &name);
        self.cache.insert(wd, path.clone());
        Ok(path)
    }

    /// Finds the node whose full path equals `path`. Uses the path cache
    /// when warm, otherwise descends from the root segment by segment.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<Wd> {
        let root_wd = self.root?;
        let root_name = &self.nodes.get(&root_wd)?.name;

        if path == root_name {
            return Some(root_wd);
        }
        if path.is_empty() {
            return None;
        }
        if let Some(wd) = self.cache.wd(path) {
            return Some(wd);
        }

        let relative = if root_name.is_empty() {
            path
        } else {
            path.strip_prefix(&format!("{root_name}/"))?
        };

        let mut current = root_wd;
        for segment in relative.split('/') {
            current = *self.nodes.get(&current)?.children.get(segment)?;
        }
        Some(current)
    }

    /// All watch descriptors in the subtree rooted at `wd`, `wd` included.
    fn subtree(&self, wd: Wd) -> Vec<Wd> {
        let mut collected = Vec::new();
        let mut stack = vec![wd];
        while let Some(current) = stack.pop() {
            collected.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.values().copied());
            }
        }
        collected
    }
}

/// Cleans a path for use as the tree root. Behaves like a plain clean except
/// that `.` becomes the empty string, so paths built on top of it stay
/// relative to the working directory.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path == "." {
        return String::new();
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed.to_string()
}

/// Joins a base path and a name, keeping the result clean when the base is
/// the empty root form.
#[must_use]
pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    if base == "/" {
        return format!("/{name}");
    }
    format!("{base}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_tree() -> WatchTree {
        // 1 = root, 2 = a, 3 = a/b, 4 = a/b/c, 5 = d
        let mut tree = WatchTree::new();
        tree.set_root(".", 1).unwrap();
        tree.add(2, "a", 1).unwrap();
        tree.add(3, "b", 2).unwrap();
        tree.add(4, "c", 3).unwrap();
        tree.add(5, "d", 1).unwrap();
        tree
    }

    #[test]
    fn test_set_root_twice_fails() {
        let mut tree = WatchTree::new();
        tree.set_root(".", 1).unwrap();
        assert_eq!(tree.set_root(".", 2), Err(TreeError::RootAlreadySet));
    }

    #[test]
    fn test_paths() {
        let mut tree = sample_tree();
        assert_eq!(tree.path(1).unwrap(), "");
        assert_eq!(tree.path(4).unwrap(), "a/b/c");
        assert_eq!(tree.path(5).unwrap(), "d");
    }

    #[test]
    fn test_path_idempotent() {
        let mut tree = sample_tree();
        let first = tree.path(4).unwrap();
        let second = tree.path(4).unwrap();
        assert_eq!(first, second);
        assert_eq!(tree.find(&first), Some(4));
    }

    #[test]
    fn test_path_with_absolute_root() {
        let mut tree = WatchTree::new();
        tree.set_root("/srv/project/", 1).unwrap();
        tree.add(2, "a", 1).unwrap();
        assert_eq!(tree.path(2).unwrap(), "/srv/project/a");
        assert_eq!(tree.find("/srv/project/a"), Some(2));
    }

    #[test]
    fn test_find() {
        let mut tree = sample_tree();
        assert_eq!(tree.find(""), Some(1));
        assert_eq!(tree.find("a/b"), Some(3));
        assert_eq!(tree.find("a/b/c"), Some(4));
        assert_eq!(tree.find("a/x"), None);
        // Warm the cache and look up again through it.
        tree.path(4).unwrap();
        assert_eq!(tree.find("a/b/c"), Some(4));
    }

    #[test]
    fn test_rename_invalidates_subtree_paths() {
        let mut tree = sample_tree();
        assert_eq!(tree.path(4).unwrap(), "a/b/c");

        tree.rename(3, None, Some("z")).unwrap();
        assert_eq!(tree.path(3).unwrap(), "a/z");
        assert_eq!(tree.path(4).unwrap(), "a/z/c");
        assert_eq!(tree.find("a/b"), None);
        assert_eq!(tree.find("a/z/c"), Some(4));
    }

    #[test]
    fn test_move_to_new_parent() {
        let mut tree = sample_tree();
        assert_eq!(tree.path(3).unwrap(), "a/b");

        tree.rename(3, Some(5), None).unwrap();
        assert_eq!(tree.path(3).unwrap(), "d/b");
        assert_eq!(tree.path(4).unwrap(), "d/b/c");
        assert_eq!(tree.find("a/b"), None);
    }

    #[test]
    fn test_move_and_rename_at_once() {
        let mut tree = sample_tree();
        tree.rename(3, Some(5), Some("q")).unwrap();
        assert_eq!(tree.path(4).unwrap(), "d/q/c");
    }

    #[test]
    fn test_rename_empty_name_keeps_current() {
        let mut tree = sample_tree();
        tree.rename(3, Some(5), Some("")).unwrap();
        assert_eq!(tree.path(3).unwrap(), "d/b");
    }

    #[test]
    fn test_rename_root_fails() {
        let mut tree = sample_tree();
        assert_eq!(tree.rename(1, Some(2), None), Err(TreeError::MoveRoot));
    }

    #[test]
    fn test_rename_missing_parent_fails() {
        let mut tree = sample_tree();
        assert_eq!(
            tree.rename(3, Some(99), None),
            Err(TreeError::UnknownWatch(99))
        );
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = sample_tree();
        tree.path(4).unwrap();

        let mut removed = tree.remove(2).unwrap();
        removed.sort_unstable();
        assert_eq!(removed, vec![2, 3, 4]);

        assert!(!tree.has(3));
        assert_eq!(tree.find("a/b/c"), None);
        assert_eq!(tree.path(3), Err(TreeError::UnknownWatch(3)));
        assert!(tree.has(1));
        assert!(tree.has(5));
    }

    #[test]
    fn test_remove_root_fails() {
        let mut tree = sample_tree();
        assert_eq!(tree.remove(1), Err(TreeError::RemoveRoot));
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("."), "");
        assert_eq!(clean_path("a/b/"), "a/b");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/srv/x"), "/srv/x");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
        assert_eq!(join_path("/", "a"), "/a");
    }
}
