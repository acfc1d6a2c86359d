//! Generic fallback: GET the node's URL and show whatever ARM returns

use super::expander::Expander;
use super::types::{
    status_from_properties, ExpanderResponse, ExpanderResult, ListActionsResult, TreeNode, ACTION_TYPE,
    EXPAND_URL_NOT_SUPPORTED, RESOURCE_TYPE,
};
use crate::armclient::{ApiError, ArmClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

const SOURCE: &str = "GenericExpander";
const PROVIDER_OPERATIONS_API_VERSION: &str = "2018-01-01-preview";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderOperations {
    #[serde(default)]
    resource_types: Vec<ResourceTypeOperations>,
}

#[derive(Debug, Deserialize)]
struct ResourceTypeOperations {
    name: String,
    #[serde(default)]
    operations: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    display_name: String,
}

/// DELETE a node's `delete_url` through ARM
pub(crate) async fn delete_arm_item(client: &ArmClient, node: &TreeNode) -> Result<bool> {
    let Some(delete_url) = node.delete_url.as_deref() else {
        return Ok(false);
    };
    client
        .do_request(Method::DELETE, delete_url)
        .await
        .with_context(|| format!("Failed to delete {}", delete_url))?;
    Ok(true)
}

/// Failed result that still shows the body ARM sent back
pub(crate) fn arm_failure(source: &str, error: anyhow::Error) -> ExpanderResult {
    let body = ApiError::body_of(&error).unwrap_or_default().to_string();
    ExpanderResult::failed(source, error).with_response(ExpanderResponse::json(body))
}

pub struct GenericExpander {
    client: ArmClient,
}

impl GenericExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }

    async fn actions(&self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        let path = format!(
            "/providers/Microsoft.Authorization/providerOperations/{}?api-version={}&$expand=resourceTypes",
            node.namespace, PROVIDER_OPERATIONS_API_VERSION
        );
        let body = self.client.get(&path).await.context("Failed to get actions")?;
        let operations: ProviderOperations =
            serde_json::from_str(&body).context("Error unmarshalling provider operations")?;

        let type_name = node.arm_type.split('/').nth(1).unwrap_or_default();
        let Some(resource_type) = operations.resource_types.iter().find(|rt| rt.name == type_name) else {
            return Ok(Vec::new());
        };
        if resource_type.operations.is_empty() {
            return Ok(Vec::new());
        }

        let api_version = self
            .client
            .api_version_for(&node.subscription_id, &node.arm_type)
            .await?
            .with_context(|| format!("Failed to find an api version for {}", node.arm_type))?;

        Ok(resource_type
            .operations
            .iter()
            .map(|operation| {
                let action = operation
                    .name
                    .replace(&node.arm_type, "")
                    .replace("/action", "")
                    .trim_start_matches('/')
                    .to_string();
                let name = if operation.display_name.is_empty() {
                    action.clone()
                } else {
                    operation.display_name.clone()
                };
                let url = format!("{}/{}?api-version={}", node.id, action, api_version);
                TreeNode::child_of(node, url.clone(), name, ACTION_TYPE).with_expand_url(url)
            })
            .collect())
    }
}

#[async_trait]
impl Expander for GenericExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.expand_url != EXPAND_URL_NOT_SUPPORTED && !node.suppress_generic_expand)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };

        let status = match serde_json::from_str::<Value>(&body) {
            Ok(resource) => status_from_properties(&resource),
            Err(e) => {
                return ExpanderResult::failed(SOURCE, anyhow::Error::new(e).context("Error parsing resource"))
                    .with_response(ExpanderResponse::json(body))
            }
        };
        if status.is_some() && status != node.status_indicator {
            tracing::debug!("Updated status of {} -> {:?}", node.id, status);
        }

        let mut result = ExpanderResult::nodes(SOURCE, Vec::new());
        result.response = ExpanderResponse::json(body);
        result.status_indicator = status;
        result
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        delete_arm_item(&self.client, node).await
    }

    fn has_actions(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == RESOURCE_TYPE && !node.namespace.is_empty() && !node.arm_type.is_empty())
    }

    async fn list_actions(&self, node: &TreeNode) -> ListActionsResult {
        match self.actions(node).await {
            Ok(nodes) => ListActionsResult {
                nodes,
                source_description: SOURCE.to_string(),
                ..Default::default()
            },
            Err(error) => ListActionsResult {
                error: Some(error),
                source_description: SOURCE.to_string(),
                ..Default::default()
            },
        }
    }
}
