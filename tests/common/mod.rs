//! Shared helpers for bramble integration tests.
//!
//! Every tree lives in its own temp directory.

#![allow(dead_code)]

use std::path::Path;

use bramble::annotate::MemoryStore;
use bramble::tree::WorkingTree;
use bramble::{RevisionId, TextKey};
use tempfile::TempDir;

/// A fresh tree with `dirs` created and `files` written as `(path, contents)`,
/// all versioned.
pub fn setup_tree(dirs: &[&str], files: &[(&str, &str)]) -> (TempDir, WorkingTree) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut tree = WorkingTree::init(dir.path()).expect("failed to init tree");
    for d in dirs {
        std::fs::create_dir_all(dir.path().join(d)).unwrap();
        tree.add(d).unwrap();
    }
    for (path, contents) in files {
        std::fs::write(dir.path().join(path), contents).unwrap();
        tree.add(path).unwrap();
    }
    (dir, tree)
}

/// Read a file under `root` as a string.
pub fn read(root: &Path, path: &str) -> String {
    std::fs::read_to_string(root.join(path))
        .unwrap_or_else(|e| panic!("failed to read {path}: {e}"))
}

/// Every path under `root` except the control directory, with its unix
/// mode, sorted.
pub fn snapshot(root: &Path) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, u32)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if rel == ".bramble" {
            continue;
        }
        let meta = std::fs::symlink_metadata(&path).unwrap();
        out.push((rel, mode(&meta)));
        if meta.is_dir() {
            walk(root, &path, out);
        }
    }
}

#[cfg(unix)]
fn mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode(_meta: &std::fs::Metadata) -> u32 {
    0
}

/// Whether `.bramble/limbo` and `.bramble/pending-deletion` are gone.
pub fn staging_is_clean(root: &Path) -> bool {
    !root.join(".bramble/limbo").exists() && !root.join(".bramble/pending-deletion").exists()
}

pub fn key(rev: &str) -> TextKey {
    TextKey::new("file.txt", rev)
}

pub fn rev(id: &str) -> RevisionId {
    RevisionId::new(id)
}

/// `file.txt` history `r1..=rN` where `rK` appends line `K`.
pub fn appending_history(n: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    let mut text = String::new();
    for i in 1..=n {
        text.push_str(&format!("{i}\n"));
        let parents = if i == 1 {
            vec![]
        } else {
            vec![key(&format!("r{}", i - 1))]
        };
        store.add_text(key(&format!("r{i}")), parents, text.as_bytes());
    }
    store
}
