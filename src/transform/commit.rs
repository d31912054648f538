//! Committing a transform: record the would-be tree, then apply it.

use bramble_core::model::types::RevisionId;

use super::{ApplyOptions, TransformError, TreeChange, TreeTransform};
use crate::tree::MutableTree;

/// The revision history a commit is recorded into.
pub trait Branch {
    /// Tip of the branch, or the null revision when it has none.
    fn last_revision(&self) -> RevisionId;

    /// Store a new revision and return its id. Does not move the tip.
    ///
    /// # Errors
    /// Returns an error if the revision cannot be stored.
    fn record_commit(
        &mut self,
        parents: &[RevisionId],
        message: &str,
        changes: &[TreeChange],
    ) -> anyhow::Result<RevisionId>;

    /// Move the tip to `revision`.
    ///
    /// # Errors
    /// Returns an error if the tip cannot be updated.
    fn set_last_revision(&mut self, revision: RevisionId) -> anyhow::Result<()>;
}

/// A revision held by [`MemoryBranch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub parents: Vec<RevisionId>,
    pub message: String,
    pub changes: Vec<TreeChange>,
}

/// In-memory [`Branch`]. Revision ids are `rev-1`, `rev-2`, ...
#[derive(Debug)]
pub struct MemoryBranch {
    revisions: Vec<Revision>,
    tip: RevisionId,
}

impl Default for MemoryBranch {
    fn default() -> Self {
        Self {
            revisions: Vec::new(),
            tip: RevisionId::null(),
        }
    }
}

impl MemoryBranch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded revision, oldest first.
    #[must_use]
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    #[must_use]
    pub fn revision(&self, id: &RevisionId) -> Option<&Revision> {
        self.revisions.iter().find(|r| &r.id == id)
    }
}

impl Branch for MemoryBranch {
    fn last_revision(&self) -> RevisionId {
        self.tip.clone()
    }

    fn record_commit(
        &mut self,
        parents: &[RevisionId],
        message: &str,
        changes: &[TreeChange],
    ) -> anyhow::Result<RevisionId> {
        if let Some(missing) = parents
            .iter()
            .find(|p| !p.is_null() && self.revision(p).is_none())
        {
            anyhow::bail!("unknown parent revision {missing}");
        }
        let id = RevisionId::new(format!("rev-{}", self.revisions.len() + 1));
        self.revisions.push(Revision {
            id: id.clone(),
            parents: parents.to_vec(),
            message: message.to_owned(),
            changes: changes.to_vec(),
        });
        Ok(id)
    }

    fn set_last_revision(&mut self, revision: RevisionId) -> anyhow::Result<()> {
        if !revision.is_null() && self.revision(&revision).is_none() {
            anyhow::bail!("unknown revision {revision}");
        }
        self.tip = revision;
        Ok(())
    }
}

fn branch_err(e: &anyhow::Error) -> TransformError {
    TransformError::Branch {
        message: format!("{e:#}"),
    }
}

impl<T: MutableTree> TreeTransform<'_, T> {
    /// Commit the transform's result to `branch`, then apply it to the tree.
    ///
    /// The first parent is the tree's last revision; `merge_parents` follow.
    /// With `strict`, new content that would end up unversioned is refused.
    ///
    /// # Errors
    /// Returns `Malformed` if conflicts remain, `StrictCommitFailed`,
    /// `MergeParentsOnFirstCommit`, `NotBasedOnBranchTip`, `Branch` when the
    /// branch refuses the revision, or any apply error.
    pub fn commit(
        &mut self,
        branch: &mut dyn Branch,
        message: &str,
        merge_parents: &[RevisionId],
        strict: bool,
    ) -> Result<RevisionId, TransformError> {
        self.ensure_building()?;
        let _span = tracing::info_span!("commit", strict, merges = merge_parents.len()).entered();
        self.check_malformed()?;
        if strict
            && self
                .new_contents
                .keys()
                .any(|&id| !self.final_is_versioned(id))
        {
            return Err(TransformError::StrictCommitFailed);
        }

        let tip = branch.last_revision();
        let parents: Vec<RevisionId> = if tip.is_null() {
            if !merge_parents.is_empty() {
                return Err(TransformError::MergeParentsOnFirstCommit);
            }
            Vec::new()
        } else {
            std::iter::once(tip.clone())
                .chain(merge_parents.iter().cloned())
                .collect()
        };
        let based_on = self.tree.last_revision();
        if based_on != tip {
            return Err(TransformError::NotBasedOnBranchTip {
                tree: based_on,
                branch: tip,
            });
        }

        self.register_versioned_descendants();
        let changes = self.preview().iter_changes()?;
        let revision = branch
            .record_commit(&parents, message, &changes)
            .map_err(|e| branch_err(&e))?;
        tracing::debug!(%revision, changes = changes.len(), "recorded commit");

        self.apply(ApplyOptions::default())?;
        branch
            .set_last_revision(revision.clone())
            .map_err(|e| branch_err(&e))?;
        self.tree.set_last_revision(revision.clone())?;
        tracing::info!(%revision, "committed");
        Ok(revision)
    }
}
