//! Shows the JSON item a parent captured for the node, without a request

use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, TreeNode};
use anyhow::Result;
use async_trait::async_trait;

const SOURCE: &str = "JSONExpander";

#[derive(Debug, Default)]
pub struct JsonExpander;

#[async_trait]
impl Expander for JsonExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.context.json_item.is_some())
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let content = node
            .context
            .json_item
            .as_ref()
            .map(|item| item.to_string())
            .unwrap_or_default();
        ExpanderResult::primary(SOURCE, ExpanderResponse::json(content), Vec::new())
    }
}
