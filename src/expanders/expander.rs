//! The expander plugin contract

use super::types::{ExpanderResult, ListActionsResult, TreeNode};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// A plugin that can supply a node's children and/or its display content.
///
/// The dispatcher calls [`Expander::resolve`] on every registered expander in
/// turn, then probes [`Expander::does_expand`], then runs [`Expander::expand`]
/// concurrently on a clone of the node for every expander that said yes.
#[async_trait]
pub trait Expander: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cache lookups onto the node before probing. Must not do I/O.
    fn resolve(&self, _node: &mut TreeNode) {}

    /// Whether this expander applies to `node`. An error here aborts the expansion.
    fn does_expand(&self, node: &TreeNode) -> Result<bool>;

    async fn expand(&self, node: &TreeNode) -> ExpanderResult;

    /// `Ok(false)` when the node isn't handled by this expander
    async fn delete(&self, _node: &TreeNode) -> Result<bool> {
        Ok(false)
    }

    fn can_update(&self, _node: &TreeNode) -> bool {
        false
    }

    async fn update(&self, node: &TreeNode, _content: &str) -> Result<()> {
        anyhow::bail!("{} cannot update '{}'", self.name(), node.id)
    }

    fn has_actions(&self, _node: &TreeNode) -> Result<bool> {
        Ok(false)
    }

    async fn list_actions(&self, _node: &TreeNode) -> ListActionsResult {
        ListActionsResult::default()
    }
}

impl fmt::Debug for dyn Expander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
