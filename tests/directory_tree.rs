use std::sync::Arc;

use objectfs_core::metadata::FileMetadata;
use objectfs_core::DirectoryTree;

fn dir(path: &str) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new_directory(path, 0o755))
}

fn file(path: &str) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new_file(path, 0, 0o644))
}

#[test]
fn bootstrap_grow_rename_and_list() {
    let tree = DirectoryTree::new();
    assert!(tree.has("/"));

    assert!(tree.grow(dir("/docs")));
    assert!(tree.grow(file("/docs/readme.md")));
    assert!(tree.grow(file("/docs/license.md")));

    let children = tree.find_children("/docs").unwrap();
    assert_eq!(children.len(), 2);

    assert!(tree.rename("/docs", "/documents"));
    assert!(tree.has("/documents/readme.md"));
    assert!(!tree.has("/docs"));
    assert!(!tree.has("/docs/readme.md"));

    assert!(tree.update_directory("/documents", vec![file("/documents/readme.md")]));
    assert_eq!(tree.find_children("/documents").unwrap().len(), 1);
    assert!(!tree.has("/documents/license.md"));
}

#[test]
fn removing_a_directory_drops_its_whole_subtree() {
    let tree = DirectoryTree::new();
    tree.grow(dir("/a"));
    tree.grow(dir("/a/b"));
    tree.grow(file("/a/b/c.txt"));

    assert!(tree.remove("/a"));
    assert!(!tree.has("/a"));
    assert!(!tree.has("/a/b"));
    assert!(!tree.has("/a/b/c.txt"));
}

#[test]
fn grow_orphan_is_reparented_once_directory_arrives() {
    let tree = DirectoryTree::new();
    assert!(tree.grow(file("/later/x.txt")));
    assert_eq!(tree.find_children("/").unwrap().len(), 0);

    assert!(tree.grow(dir("/later")));
    assert_eq!(tree.find_children("/later").unwrap().len(), 1);
}

#[test]
fn rename_and_remove_reject_root() {
    let tree = DirectoryTree::new();
    assert!(!tree.rename("/", "/elsewhere"));
    assert!(!tree.remove("/"));
    assert!(tree.has("/"));
}
