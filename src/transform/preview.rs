//! A read-only view of the tree as it will be after apply.
//!
//! Each query resolves a final path to either an id the transform knows
//! about (answered from staged state) or a tree path the transform leaves
//! alone (answered from disk). Nothing is written to the transform, limbo,
//! or the tree.

use std::collections::{BTreeMap, BTreeSet};

use bramble_core::model::types::{Line, RevisionId, split_lines};

use super::limbo::content_hash;
use super::{Kind, TransId, TransformError, TreeChange, TreeTransform, io_err, join_path};
use crate::annotate::{AnnotatedLine, AnnotationMerger};
use crate::tree::MutableTree;

/// Where a final path's answer comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Node {
    Trans(TransId),
    /// A tree path not registered with the transform.
    Tree(String),
}

/// Summary of one path's contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentSummary {
    Missing,
    File { size: u64, executable: bool },
    Directory,
    Symlink { target: Option<String> },
    TreeReference { reference: Option<RevisionId> },
}

/// One entry of a preview listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewEntry {
    pub path: String,
    pub kind: Kind,
    pub versioned: bool,
    pub executable: bool,
}

/// Read-only projection of a transform's result.
pub struct PreviewTree<'a, 't, T: MutableTree> {
    transform: &'a TreeTransform<'t, T>,
    by_parent: BTreeMap<TransId, BTreeSet<TransId>>,
}

impl<'a, 't, T: MutableTree> PreviewTree<'a, 't, T> {
    pub fn new(transform: &'a TreeTransform<'t, T>) -> Self {
        Self {
            by_parent: transform.by_parent(),
            transform,
        }
    }

    // -- path resolution ----------------------------------------------------

    /// Whether the tree directory behind `id` survives into the final state.
    fn keeps_tree_dir(&self, id: TransId) -> bool {
        self.transform.tree_id_paths.contains_key(&id)
            && !self.transform.removed_contents.contains(&id)
            && !self.transform.new_contents.contains_key(&id)
    }

    fn node_kind(&self, node: &Node) -> Option<Kind> {
        match node {
            Node::Trans(id) => self.transform.final_kind(*id),
            Node::Tree(path) => {
                let meta = std::fs::symlink_metadata(self.transform.tree.abspath(path)).ok()?;
                Kind::from_file_type(meta.file_type())
            }
        }
    }

    /// Live children of `node` by final name.
    fn children(&self, node: &Node) -> BTreeMap<String, Node> {
        let mut out = BTreeMap::new();
        let tree_dir = match node {
            Node::Trans(id) => {
                for &child in self.by_parent.get(id).into_iter().flatten() {
                    if self.transform.final_kind(child).is_none() {
                        continue;
                    }
                    if let Ok(name) = self.transform.final_name(child) {
                        out.entry(name.to_owned()).or_insert(Node::Trans(child));
                    }
                }
                self.keeps_tree_dir(*id)
                    .then(|| self.transform.tree_id_paths.get(id).cloned())
                    .flatten()
            }
            Node::Tree(path) => Some(path.clone()),
        };
        if let Some(dir) = tree_dir
            && let Ok(entries) = std::fs::read_dir(self.transform.tree.abspath(&dir))
        {
            for entry in entries.flatten() {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let child = join_path(&dir, &name);
                // Registered paths are placed by the transform, not by disk.
                if self.transform.tree.is_control_filename(&child)
                    || self.transform.tree_path_ids.contains_key(&child)
                {
                    continue;
                }
                out.entry(name).or_insert(Node::Tree(child));
            }
        }
        out
    }

    fn resolve(&self, path: &str) -> Option<Node> {
        let mut node = Node::Trans(self.transform.root());
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = self.children(&node).remove(component)?;
        }
        self.node_kind(&node).map(|_| node)
    }

    fn resolve_or_missing(&self, path: &str) -> Result<Node, TransformError> {
        self.resolve(path).ok_or_else(|| TransformError::NoSuchFile {
            path: path.to_owned(),
        })
    }

    // -- queries --------------------------------------------------------------

    /// The final kind at `path`, or `None` if nothing will be there.
    pub fn kind(&self, path: &str) -> Option<Kind> {
        self.resolve(path).and_then(|n| self.node_kind(&n))
    }

    /// Whether anything will exist at `path`.
    pub fn has_filename(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Whether `path` will be versioned.
    pub fn is_versioned(&self, path: &str) -> bool {
        match self.resolve(path) {
            Some(Node::Trans(id)) => self.transform.final_is_versioned(id),
            Some(Node::Tree(p)) => self.transform.tree.is_versioned(&p),
            None => false,
        }
    }

    /// Whether `path` will be an executable file.
    pub fn is_executable(&self, path: &str) -> bool {
        match self.resolve(path) {
            Some(Node::Trans(id)) => self.transform.final_is_executable(id),
            Some(Node::Tree(p)) => self.transform.tree.entry(&p).is_some_and(|e| e.executable),
            None => false,
        }
    }

    /// The final bytes of the file at `path`.
    ///
    /// # Errors
    /// Returns `NoSuchFile` if `path` will not be a file, or an I/O error.
    pub fn get_file_text(&self, path: &str) -> Result<Vec<u8>, TransformError> {
        let node = self.resolve_or_missing(path)?;
        if self.node_kind(&node) != Some(Kind::File) {
            return Err(TransformError::NoSuchFile {
                path: path.to_owned(),
            });
        }
        let tree_path = match &node {
            Node::Trans(id) if self.transform.new_contents.contains_key(id) => {
                return self
                    .transform
                    .limbo_file_bytes(*id)
                    .ok_or_else(|| TransformError::NoSuchFile {
                        path: path.to_owned(),
                    });
            }
            Node::Trans(id) => self.transform.tree_id_paths.get(id).cloned().unwrap_or_default(),
            Node::Tree(p) => p.clone(),
        };
        let abspath = self.transform.tree.abspath(&tree_path);
        std::fs::read(&abspath).map_err(io_err(&abspath))
    }

    /// The final lines of the file at `path`, newlines included.
    ///
    /// # Errors
    /// As for [`get_file_text`](Self::get_file_text).
    pub fn get_file_lines(&self, path: &str) -> Result<Vec<Line>, TransformError> {
        Ok(split_lines(&self.get_file_text(path)?))
    }

    /// Size in bytes of the file at `path`.
    ///
    /// # Errors
    /// As for [`get_file_text`](Self::get_file_text).
    pub fn get_file_size(&self, path: &str) -> Result<u64, TransformError> {
        Ok(self.get_file_text(path)?.len() as u64)
    }

    /// Hex SHA-256 of the file at `path`.
    ///
    /// # Errors
    /// As for [`get_file_text`](Self::get_file_text).
    pub fn get_file_hash(&self, path: &str) -> Result<String, TransformError> {
        if let Some(Node::Trans(id)) = self.resolve(path)
            && let Some(hash) = self.transform.observed_hashes.get(&id)
        {
            return Ok(hash.clone());
        }
        Ok(content_hash(&self.get_file_text(path)?))
    }

    /// The target of the symlink at `path`.
    ///
    /// Returns `None` when `path` is not a symlink, or when the tree cannot
    /// hold symlinks and the staged link was never written.
    pub fn get_symlink_target(&self, path: &str) -> Option<String> {
        let node = self.resolve(path)?;
        if self.node_kind(&node) != Some(Kind::Symlink) {
            return None;
        }
        let tree_path = match &node {
            Node::Trans(id) if self.transform.new_contents.contains_key(id) => {
                return self.transform.limbo_symlink_target(*id);
            }
            Node::Trans(id) => self.transform.tree_id_paths.get(id)?.clone(),
            Node::Tree(p) => p.clone(),
        };
        std::fs::read_link(self.transform.tree.abspath(&tree_path))
            .ok()
            .and_then(|t| t.to_str().map(str::to_owned))
    }

    /// Kind-specific summary of `path`.
    pub fn path_content_summary(&self, path: &str) -> ContentSummary {
        let Some(node) = self.resolve(path) else {
            return ContentSummary::Missing;
        };
        match self.node_kind(&node) {
            None => ContentSummary::Missing,
            Some(Kind::Directory) => {
                let reference = match &node {
                    Node::Trans(id) => self.transform.new_reference.get(id).cloned(),
                    Node::Tree(_) => None,
                };
                let is_reference = reference.is_some()
                    || self.stored_entry(&node).is_some_and(|e| e.kind == Kind::TreeReference);
                if is_reference {
                    let reference =
                        reference.or_else(|| self.stored_entry(&node).and_then(|e| e.reference));
                    ContentSummary::TreeReference { reference }
                } else {
                    ContentSummary::Directory
                }
            }
            Some(Kind::TreeReference) => ContentSummary::TreeReference {
                reference: self.stored_entry(&node).and_then(|e| e.reference),
            },
            Some(Kind::Symlink) => ContentSummary::Symlink {
                target: self.get_symlink_target(path),
            },
            Some(Kind::File) => ContentSummary::File {
                size: self.get_file_size(path).unwrap_or(0),
                executable: self.is_executable(path),
            },
        }
    }

    fn stored_entry(&self, node: &Node) -> Option<crate::tree::IndexEntry> {
        let path = match node {
            Node::Trans(id) => self.transform.tree_id_paths.get(id)?,
            Node::Tree(p) => p,
        };
        self.transform.tree.entry(path)
    }

    fn entry_for(&self, path: String, node: &Node) -> Option<PreviewEntry> {
        let kind = self.node_kind(node)?;
        let (versioned, executable) = match node {
            Node::Trans(id) => (
                self.transform.final_is_versioned(*id),
                self.transform.final_is_executable(*id),
            ),
            Node::Tree(p) => (
                self.transform.tree.is_versioned(p),
                self.transform.tree.entry(p).is_some_and(|e| e.executable),
            ),
        };
        Some(PreviewEntry {
            path,
            kind,
            versioned,
            executable: executable && kind == Kind::File,
        })
    }

    /// Versioned entries, root first, each directory's children listed
    /// together before descending into them.
    pub fn iter_entries_by_dir(&self) -> Vec<PreviewEntry> {
        let root = Node::Trans(self.transform.root());
        let mut out: Vec<PreviewEntry> = self.entry_for(String::new(), &root).into_iter().collect();
        let mut stack = vec![(String::new(), root)];
        while let Some((dir, node)) = stack.pop() {
            let mut subdirs = Vec::new();
            for (name, child) in self.children(&node) {
                let path = join_path(&dir, &name);
                let Some(entry) = self.entry_for(path.clone(), &child) else {
                    continue;
                };
                if !entry.versioned {
                    continue;
                }
                if entry.kind == Kind::Directory {
                    subdirs.push((path, child));
                }
                out.push(entry);
            }
            // Reverse so the first subdirectory is expanded first.
            stack.extend(subdirs.into_iter().rev());
        }
        out
    }

    /// Every entry (versioned or not) below `from_dir`, sorted by path.
    ///
    /// # Errors
    /// Returns `NoSuchFile` if `from_dir` will not exist.
    pub fn list_files(
        &self,
        from_dir: &str,
        recursive: bool,
    ) -> Result<Vec<PreviewEntry>, TransformError> {
        let from_dir = from_dir.trim_matches('/');
        let start = self.resolve_or_missing(from_dir)?;
        let mut out = Vec::new();
        let mut stack = vec![(from_dir.to_owned(), start)];
        while let Some((dir, node)) = stack.pop() {
            for (name, child) in self.children(&node) {
                let path = join_path(&dir, &name);
                let Some(entry) = self.entry_for(path.clone(), &child) else {
                    continue;
                };
                if recursive && entry.kind == Kind::Directory {
                    stack.push((path, child));
                }
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Changes between the current tree and this preview.
    ///
    /// # Errors
    /// As for [`TreeTransform::iter_changes`].
    pub fn iter_changes(&self) -> Result<Vec<TreeChange>, TransformError> {
        self.transform.iter_changes()
    }

    /// Annotate the final contents of `path`.
    ///
    /// Unchanged files keep the tree's annotation. Changed files are
    /// reannotated against it, with new lines attributed to
    /// `default_revision`.
    ///
    /// # Errors
    /// Returns `NoSuchFile` if `path` will not be a file, or an error
    /// reading either version.
    pub fn annotate_iter(
        &self,
        path: &str,
        default_revision: &RevisionId,
    ) -> Result<Vec<AnnotatedLine<RevisionId>>, TransformError> {
        let node = self.resolve_or_missing(path)?;
        let old_path = match &node {
            Node::Trans(id) => self
                .transform
                .tree_id_paths
                .get(id)
                .filter(|_| self.transform.tree_kind(*id) == Some(Kind::File))
                .cloned(),
            Node::Tree(p) => Some(p.clone()),
        };
        let unchanged = match &node {
            Node::Trans(id) => !self.transform.new_contents.contains_key(id),
            Node::Tree(_) => true,
        };
        if unchanged && let Some(old) = &old_path {
            return Ok(self.transform.tree.annotate_iter(old, default_revision)?);
        }
        let new_lines = self.get_file_lines(path)?;
        let parents = match &old_path {
            Some(old) => vec![self.transform.tree.annotate_iter(old, default_revision)?],
            None => Vec::new(),
        };
        Ok(AnnotationMerger::new().reannotate(&parents, &new_lines, default_revision, None))
    }
}

impl<'t, T: MutableTree> TreeTransform<'t, T> {
    /// A read-only view of this transform's result.
    pub fn preview(&self) -> PreviewTree<'_, 't, T> {
        PreviewTree::new(self)
    }
}
