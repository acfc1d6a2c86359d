//! Swagger-driven expansion
//!
//! Resolves a node to its `(ApiSet, ResourceType)` pair, lets the API set
//! fetch and enumerate, then synthesises the fixed children from the
//! parent's captured template values.

use super::api_set::{ApiSet, ApiSetRegistry, ChildMatching};
use super::dispatch::ExpandError;
use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, TreeNode, SUB_RESOURCE_TYPE};
use crate::armclient::ApiError;
use crate::endpoints::{substitute_values, EndpointTemplate, TemplateError};
use crate::swagger::{find_resource_type, ResourceType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

const SOURCE: &str = "SwaggerResourceExpander";
pub const SWAGGER_NAMESPACE: &str = "swagger";

pub struct SwaggerResourceExpander {
    api_sets: Arc<ApiSetRegistry>,
}

impl SwaggerResourceExpander {
    pub fn new(api_sets: Arc<ApiSetRegistry>) -> Self {
        Self { api_sets }
    }

    pub fn api_sets(&self) -> &Arc<ApiSetRegistry> {
        &self.api_sets
    }

    /// Pinned set, if the node carries one
    fn api_set_for(&self, node: &TreeNode) -> Option<Arc<dyn ApiSet>> {
        node.context
            .api_set_id
            .as_deref()
            .and_then(|id| self.api_sets.get(id))
    }

    async fn expand_with(
        &self,
        node: &TreeNode,
        api_set: &dyn ApiSet,
        resource_type: &Arc<ResourceType>,
    ) -> ExpanderResult {
        if let Some(content) = &resource_type.fixed_content {
            let nodes = match child_nodes(node, api_set, resource_type) {
                Ok(nodes) => nodes,
                Err(e) => return ExpanderResult::failed(SOURCE, e),
            };
            return ExpanderResult::primary(SOURCE, ExpanderResponse::text(content.clone()), nodes);
        }

        let expanded = match api_set.expand_resource(node, resource_type).await {
            Ok(expanded) => expanded,
            Err(e) => {
                let body = ApiError::body_of(&e).unwrap_or_default().to_string();
                return ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::json(body));
            }
        };

        let mut nodes: Vec<TreeNode> = expanded
            .sub_resources
            .into_iter()
            .map(|sub| {
                let mut child = TreeNode::child_of(node, sub.id, sub.name, SUB_RESOURCE_TYPE)
                    .with_namespace(SWAGGER_NAMESPACE)
                    .with_expand_url(sub.expand_url);
                child.delete_url = sub.delete_url;
                child.swagger_resource_type = Some(sub.resource_type);
                child.context.api_set_id = Some(api_set.id().to_string());
                child.context.cluster_id = node.context.cluster_id.clone();
                child
            })
            .collect();

        match child_nodes(node, api_set, resource_type) {
            Ok(children) => nodes.extend(children),
            // A partial set of children would misrepresent the tree
            Err(e) => return ExpanderResult::failed(SOURCE, e).with_response(expanded.response),
        }

        ExpanderResult::primary(SOURCE, expanded.response, nodes)
    }
}

/// Nodes for the declared children of `resource_type`, built from the values
/// captured from `node.expand_url`
fn child_nodes(node: &TreeNode, api_set: &dyn ApiSet, resource_type: &ResourceType) -> Result<Vec<TreeNode>> {
    if resource_type.children.is_empty() {
        return Ok(Vec::new());
    }

    let values = resource_type.endpoint.matches(&node.expand_url).values;
    let ordered = resource_type.endpoint.ordered_values(&values);
    let build = |template: &EndpointTemplate| -> Result<String, TemplateError> {
        match api_set.child_matching() {
            ChildMatching::ByName => template.build(&values),
            ChildMatching::ByPosition => template.build_from_values(&ordered),
        }
    };

    let mut nodes = Vec::with_capacity(resource_type.children.len());
    for child in &resource_type.children {
        let url = build(&child.endpoint)
            .with_context(|| format!("Error building URL for '{}' from '{}'", child.display, child.endpoint))?;
        let delete_url = child
            .delete_endpoint
            .as_ref()
            .map(|endpoint| {
                build(endpoint).with_context(|| format!("Error building child delete url '{}'", endpoint))
            })
            .transpose()?;

        let display = substitute_values(&child.display, &values);
        let mut child_node = TreeNode::child_of(node, format!("{}/{}", node.id, display), display, SUB_RESOURCE_TYPE)
            .with_namespace(SWAGGER_NAMESPACE)
            .with_expand_url(url);
        child_node.delete_url = delete_url;
        child_node.swagger_resource_type = Some(Arc::clone(child));
        child_node.context.api_set_id = Some(api_set.id().to_string());
        child_node.context.cluster_id = node.context.cluster_id.clone();
        nodes.push(child_node);
    }
    Ok(nodes)
}

#[async_trait]
impl Expander for SwaggerResourceExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn resolve(&self, node: &mut TreeNode) {
        if node.suppress_swagger_expand {
            return;
        }
        let api_set = match self.api_set_for(node) {
            Some(api_set) => api_set,
            None => match self.api_sets.find_for_node(node) {
                Some(api_set) => {
                    node.context.api_set_id = Some(api_set.id().to_string());
                    api_set
                }
                None => return,
            },
        };
        if node.swagger_resource_type.is_none() {
            node.swagger_resource_type = find_resource_type(&node.expand_url, api_set.resource_types());
        }
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(!node.suppress_swagger_expand
            && node.swagger_resource_type.is_some()
            && self.api_set_for(node).is_some())
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let Some(resource_type) = node.swagger_resource_type.as_ref() else {
            return ExpanderResult::failed(SOURCE, ExpandError::UnresolvedResourceType { node: node.id.clone() }.into());
        };
        let Some(api_set) = self.api_set_for(node) else {
            return ExpanderResult::failed(SOURCE, ExpandError::UnresolvedApiSet { node: node.id.clone() }.into());
        };
        tracing::debug!("swagger expand {} via {} ({})", node.id, api_set.id(), resource_type.endpoint);
        self.expand_with(node, api_set.as_ref(), resource_type).await
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let api_set = match self.api_set_for(node) {
            Some(api_set) => api_set,
            None => match self.api_sets.find_for_node(node) {
                Some(api_set) => api_set,
                None => return Ok(false),
            },
        };
        api_set.delete(node).await
    }

    fn can_update(&self, node: &TreeNode) -> bool {
        node.context.api_set_id.is_some()
            && node
                .swagger_resource_type
                .as_ref()
                .is_some_and(|rt| rt.put_endpoint.is_some())
    }

    async fn update(&self, node: &TreeNode, content: &str) -> Result<()> {
        let Some(api_set) = self.api_set_for(node) else {
            return Err(ExpandError::UnresolvedApiSet { node: node.id.clone() }.into());
        };
        api_set.update(node, content).await.context("Error updating")
    }
}
