//! Concurrent hierarchical index over cached entries (component E).
//!
//! The whole tree sits behind a single [`parking_lot::Mutex`], acquired exactly once per public
//! method. Every method that needs to walk or mutate more than one node does so through private
//! helpers operating on the already-held `&mut Inner`, never re-locking — this gives recursive
//! operations (removing a subtree, renaming a directory and everything under it) the same
//! atomicity a literal re-entrant lock would, without the deadlock risk of one.
//!
//! Directory paths are normalized to end with `/` (§3, §4.E); file and symlink paths never carry
//! a trailing slash. [`normalize_path`] is the single place that rule is enforced, and every
//! public method that takes or produces a path goes through it or [`dirname_of`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::entry::Entry;
use crate::metadata::FileMetadata;
use crate::node::Node;

const ROOT: &str = "/";

/// Normalize a path per the directory-suffix rule: directories end with exactly one trailing
/// `/`, files and symlinks never do.
pub fn normalize_path(path: &str, is_directory: bool) -> String {
    if path == ROOT {
        return ROOT.to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if is_directory {
        format!("{trimmed}/")
    } else {
        trimmed.to_string()
    }
}

/// The normalized path of the directory that would contain `path`, inferred from `path` itself
/// (dirname), never taken as an explicit argument.
fn dirname_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => format!("{}/", &trimmed[..idx]),
    }
}

struct Inner {
    nodes: HashMap<String, Node>,
}

/// An in-memory directory hierarchy keyed by full, normalized path.
pub struct DirectoryTree {
    inner: Mutex<Inner>,
}

impl DirectoryTree {
    /// Construct a tree containing only the root directory.
    pub fn new() -> Self {
        let root_record = Arc::new(FileMetadata::new_directory(ROOT, 0o755));
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Node::new(root_record, None));
        Self {
            inner: Mutex::new(Inner { nodes }),
        }
    }

    /// Resolve a caller-supplied path (which may or may not carry the directory's trailing
    /// slash) to the exact key it is stored under.
    fn resolve_key(inner: &Inner, path: &str) -> Option<String> {
        if inner.nodes.contains_key(path) {
            return Some(path.to_string());
        }
        if path == ROOT {
            return None;
        }
        let trimmed = path.trim_end_matches('/');
        let with_slash = format!("{trimmed}/");
        if inner.nodes.contains_key(&with_slash) {
            return Some(with_slash);
        }
        if trimmed != path && inner.nodes.contains_key(trimmed) {
            return Some(trimmed.to_string());
        }
        None
    }

    /// Look up a single entry by path.
    pub fn find(&self, path: &str) -> Option<Entry> {
        let inner = self.inner.lock();
        let key = Self::resolve_key(&inner, path)?;
        inner.nodes.get(&key).map(|n| n.entry())
    }

    /// Whether `path` is currently indexed.
    pub fn has(&self, path: &str) -> bool {
        let inner = self.inner.lock();
        Self::resolve_key(&inner, path).is_some()
    }

    /// List the immediate children of a directory, sorted by path.
    pub fn find_children(&self, path: &str) -> Option<Vec<Entry>> {
        let inner = self.inner.lock();
        let key = Self::resolve_key(&inner, path)?;
        let node = inner.nodes.get(&key)?;
        Some(
            node.children()
                .filter_map(|child| inner.nodes.get(child).map(|n| n.entry()))
                .collect(),
        )
    }

    /// Insert or update a single record, inferring its parent directory from its own path
    /// (dirname), exactly as the original's `Grow` does. Always succeeds: if the parent
    /// directory is not yet known the node is inserted as a detached orphan (no parent link) and
    /// picked up automatically the first time a directory record for that parent path arrives.
    pub fn grow(&self, record: Arc<FileMetadata>) -> bool {
        let mut inner = self.inner.lock();
        Self::grow_one(&mut inner, record)
    }

    /// Insert or update many records in one locked call.
    pub fn grow_batch(&self, records: Vec<Arc<FileMetadata>>) -> bool {
        let mut inner = self.inner.lock();
        for record in records {
            Self::grow_one(&mut inner, record);
        }
        true
    }

    fn grow_one(inner: &mut Inner, record: Arc<FileMetadata>) -> bool {
        let is_directory = record.is_directory();
        let child_path = normalize_path(&record.path, is_directory);
        let parent_path = dirname_of(&child_path);

        if let Some(existing) = inner.nodes.get(&child_path) {
            if record.mtime < existing.record().mtime {
                warn!("grow({child_path}) ignored, incoming mtime older than cached record");
                return true;
            }
        }

        inner
            .nodes
            .entry(child_path.clone())
            .and_modify(|n| n.set_record(record.clone()))
            .or_insert_with(|| Node::new(record.clone(), None));

        if child_path != ROOT && inner.nodes.contains_key(&parent_path) {
            inner
                .nodes
                .get_mut(&child_path)
                .expect("just inserted")
                .set_parent(Some(parent_path.clone()));
            inner
                .nodes
                .get_mut(&parent_path)
                .expect("checked above")
                .add_child(child_path.clone());
        }

        if is_directory {
            let orphans: Vec<String> = inner
                .nodes
                .iter()
                .filter(|(path, node)| {
                    path.as_str() != ROOT
                        && path.as_str() != child_path
                        && node.parent().is_none()
                        && dirname_of(path) == child_path
                })
                .map(|(path, _)| path.clone())
                .collect();
            for orphan in orphans {
                debug!("grow({child_path}) re-parented orphan {orphan}");
                inner
                    .nodes
                    .get_mut(&orphan)
                    .expect("collected above")
                    .set_parent(Some(child_path.clone()));
                inner
                    .nodes
                    .get_mut(&child_path)
                    .expect("checked above")
                    .add_child(orphan);
            }
        }

        true
    }

    /// Reconcile a directory's children against a freshly-listed set: children not present in
    /// `entries` are removed (recursively, if they are directories), and every entry in `entries`
    /// is inserted or updated. If `path` is not yet known, a default directory node is created
    /// for it first rather than failing. Entries whose own dirname does not match `path` are
    /// filtered out before processing.
    pub fn update_directory(&self, path: &str, entries: Vec<Arc<FileMetadata>>) -> bool {
        let mut inner = self.inner.lock();
        let dir_path = normalize_path(path, true);

        if let Some(key) = Self::resolve_key(&inner, &dir_path) {
            if !inner.nodes.get(&key).expect("resolved above").record().is_directory() {
                return false;
            }
        } else {
            debug!("update_directory({dir_path}) creating default directory node");
            let default_record = Arc::new(FileMetadata::new_directory(dir_path.clone(), 0o755));
            Self::grow_one(&mut inner, default_record);
        }

        let entries: Vec<Arc<FileMetadata>> = entries
            .into_iter()
            .filter(|e| {
                let child_path = normalize_path(&e.path, e.is_directory());
                let matches = dirname_of(&child_path) == dir_path;
                if !matches {
                    warn!(
                        "update_directory({dir_path}) dropped entry {} whose dirname doesn't match",
                        e.path
                    );
                }
                matches
            })
            .collect();

        let fresh: BTreeSet<String> = entries
            .iter()
            .map(|e| normalize_path(&e.path, e.is_directory()))
            .collect();
        let stale: Vec<String> = inner
            .nodes
            .get(&dir_path)
            .expect("created above if missing")
            .children()
            .filter(|c| !fresh.contains(*c))
            .map(str::to_string)
            .collect();
        for child in &stale {
            Self::remove_subtree(&mut inner, child);
        }
        if let Some(node) = inner.nodes.get_mut(&dir_path) {
            for child in &stale {
                node.remove_child(child);
            }
        }

        for record in entries {
            Self::grow_one(&mut inner, record);
        }
        debug!(
            "update_directory({dir_path}) reconciled, {} stale removed",
            stale.len()
        );
        true
    }

    /// Rename a path and every path nested under it (if it's a directory), preserving structure.
    /// Rejects the root path, an empty path, or renaming onto a path that already exists.
    pub fn rename(&self, old_path: &str, new_path: &str) -> bool {
        if old_path.is_empty() || old_path == ROOT {
            return false;
        }
        let mut inner = self.inner.lock();
        let Some(old_key) = Self::resolve_key(&inner, old_path) else {
            return false;
        };
        let is_dir = inner
            .nodes
            .get(&old_key)
            .expect("resolved above")
            .record()
            .is_directory();
        let new_key = normalize_path(new_path, is_dir);
        if new_key == ROOT || old_key == new_key || inner.nodes.contains_key(&new_key) {
            return false;
        }

        let old_parent = inner
            .nodes
            .get(&old_key)
            .expect("resolved above")
            .parent()
            .map(str::to_string);
        let new_parent = dirname_of(&new_key);

        let to_rename: Vec<String> = inner
            .nodes
            .keys()
            .filter(|p| **p == old_key || (is_dir && p.starts_with(&old_key)))
            .cloned()
            .collect();

        for old in &to_rename {
            let new = format!("{new_key}{}", &old[old_key.len()..]);
            let mut node = inner.nodes.remove(old).expect("collected above");

            let mut record = (**node.record()).clone();
            record.path = new.clone();
            node.set_record(Arc::new(record));

            let renamed_children: BTreeSet<String> = node
                .children()
                .map(|c| format!("{new_key}{}", &c[old_key.len()..]))
                .collect();
            node.clear_children();
            for child in renamed_children {
                node.add_child(child);
            }

            if *old == old_key {
                if inner_has_or_will_have(&new_parent, &new_key, &to_rename) {
                    node.set_parent(Some(new_parent.clone()));
                } else {
                    node.set_parent(None);
                }
            } else {
                node.set_parent(Some(dirname_of(&new)));
            }
            inner.nodes.insert(new, node);
        }

        if let Some(parent_path) = &old_parent {
            if let Some(parent) = inner.nodes.get_mut(parent_path) {
                parent.remove_child(&old_key);
            }
        }
        if inner.nodes.contains_key(&new_parent) {
            if let Some(parent) = inner.nodes.get_mut(&new_parent) {
                parent.add_child(new_key.clone());
            }
        }
        true
    }

    /// Remove a path and, if it is a directory, its entire subtree. Rejects the root path.
    /// Unlike the routine this generalizes, descent is gated on each *visited* node's own
    /// directory-ness, not the directory-ness of the node the removal started from.
    pub fn remove(&self, path: &str) -> bool {
        if path == ROOT {
            return false;
        }
        let mut inner = self.inner.lock();
        let Some(key) = Self::resolve_key(&inner, path) else {
            return false;
        };
        let parent_path = inner.nodes.get(&key).unwrap().parent().map(str::to_string);
        Self::remove_subtree(&mut inner, &key);
        if let Some(parent_path) = parent_path {
            if let Some(parent) = inner.nodes.get_mut(&parent_path) {
                parent.remove_child(&key);
            }
        }
        true
    }

    fn remove_subtree(inner: &mut Inner, path: &str) {
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            let Some(node) = inner.nodes.remove(&current) else {
                continue;
            };
            // Only descend into children if *this* node is a directory, not the node that
            // started the removal.
            if node.record().is_directory() {
                stack.extend(node.children().map(str::to_string));
            }
        }
    }
}

/// Whether `new_parent` is either already indexed, or itself among the paths being renamed in
/// this same operation (so the parent link can still be formed once the loop finishes).
fn inner_has_or_will_have(new_parent: &str, new_key: &str, to_rename: &[String]) -> bool {
    new_parent == new_key || to_rename.iter().any(|p| p == new_parent)
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dir(path: &str) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new_directory(path, 0o755))
    }

    fn file(path: &str) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new_file(path, 0, 0o644))
    }

    #[test]
    fn bootstrap_has_root_only() {
        let tree = DirectoryTree::new();
        assert!(tree.has("/"));
        assert_eq!(tree.find_children("/").unwrap().len(), 0);
    }

    #[test]
    fn grow_adds_file_and_folder() {
        let tree = DirectoryTree::new();
        assert!(tree.grow(dir("/a")));
        assert!(tree.grow(file("/a/b.txt")));
        assert_eq!(tree.find_children("/").unwrap().len(), 1);
        assert_eq!(tree.find_children("/a").unwrap().len(), 1);
        assert_eq!(tree.find("/a/b.txt").unwrap().is_directory(), Some(false));
    }

    #[test]
    fn directory_paths_are_normalized_with_trailing_slash() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        assert!(tree.has("/a"));
        assert!(tree.has("/a/"));
        assert_eq!(tree.find("/a").unwrap().path().as_deref(), Some("/a/"));
    }

    #[test]
    fn grow_creates_orphan_when_parent_missing_then_reparents() {
        let tree = DirectoryTree::new();
        // Parent "/missing" doesn't exist yet: the child is still accepted, just detached.
        assert!(tree.grow(file("/missing/x")));
        assert!(tree.has("/missing/x"));
        assert_eq!(tree.find_children("/").unwrap().len(), 0);

        // Once the parent directory shows up, the orphan is re-parented automatically.
        assert!(tree.grow(dir("/missing")));
        assert_eq!(tree.find_children("/").unwrap().len(), 1);
        assert_eq!(tree.find_children("/missing").unwrap().len(), 1);
    }

    #[test]
    fn grow_ignores_stale_mtime_on_reingest() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        let fresh = Arc::new(FileMetadata::new_file("/a/b.txt", 10, 0o644));
        tree.grow(fresh.clone());

        let mut stale = (*fresh).clone();
        stale.size = 1;
        stale.mtime = fresh.mtime - Duration::from_secs(60);
        tree.grow(Arc::new(stale));

        assert_eq!(tree.find("/a/b.txt").unwrap().metadata().unwrap().size, 10);
    }

    #[test]
    fn grow_accepts_newer_mtime_on_reingest() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        let original = Arc::new(FileMetadata::new_file("/a/b.txt", 10, 0o644));
        tree.grow(original.clone());

        let mut newer = (*original).clone();
        newer.size = 20;
        newer.mtime = original.mtime + Duration::from_secs(60);
        tree.grow(Arc::new(newer));

        assert_eq!(tree.find("/a/b.txt").unwrap().metadata().unwrap().size, 20);
    }

    #[test]
    fn rename_moves_subtree() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        tree.grow(file("/a/b.txt"));
        assert!(tree.rename("/a", "/z"));
        assert!(!tree.has("/a"));
        assert!(!tree.has("/a/b.txt"));
        assert!(tree.has("/z"));
        assert!(tree.has("/z/b.txt"));
        assert_eq!(tree.find_children("/z").unwrap().len(), 1);
        assert_eq!(tree.find("/z").unwrap().path().as_deref(), Some("/z/"));
        assert_eq!(tree.find("/z/b.txt").unwrap().path().as_deref(), Some("/z/b.txt"));
    }

    #[test]
    fn rename_rejects_root() {
        let tree = DirectoryTree::new();
        assert!(!tree.rename("/", "/x"));
        assert!(tree.has("/"));
    }

    #[test]
    fn update_directory_drops_stale_children() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        tree.grow(file("/a/old.txt"));
        assert!(tree.update_directory("/a", vec![file("/a/new.txt")]));
        assert!(!tree.has("/a/old.txt"));
        assert!(tree.has("/a/new.txt"));
    }

    #[test]
    fn update_directory_creates_missing_directory() {
        let tree = DirectoryTree::new();
        assert!(tree.update_directory("/fresh", vec![file("/fresh/a.txt")]));
        assert!(tree.has("/fresh"));
        assert!(tree.has("/fresh/a.txt"));
    }

    #[test]
    fn update_directory_filters_mismatched_dirnames() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        tree.grow(dir("/b"));
        assert!(tree.update_directory("/a", vec![file("/b/intruder.txt")]));
        assert!(!tree.has("/b/intruder.txt"));
    }

    #[test]
    fn remove_drops_entire_subtree() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        tree.grow(dir("/a/b"));
        tree.grow(file("/a/b/c.txt"));
        assert!(tree.remove("/a"));
        assert!(!tree.has("/a"));
        assert!(!tree.has("/a/b"));
        assert!(!tree.has("/a/b/c.txt"));
        assert_eq!(tree.find_children("/").unwrap().len(), 0);
    }

    #[test]
    fn remove_rejects_root() {
        let tree = DirectoryTree::new();
        assert!(!tree.remove("/"));
        assert!(tree.has("/"));
    }

    #[test]
    fn remove_file_does_not_descend_into_siblings() {
        let tree = DirectoryTree::new();
        tree.grow(dir("/a"));
        tree.grow(file("/a/b.txt"));
        assert!(tree.remove("/a/b.txt"));
        assert!(tree.has("/a"));
        assert_eq!(tree.find_children("/a").unwrap().len(), 0);
    }
}
