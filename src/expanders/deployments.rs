//! Resource group deployments and their operations

use super::default::{arm_failure, delete_arm_item};
use super::expander::Expander;
use super::types::{
    draw_status, ExpanderResponse, ExpanderResult, TreeNode, DEPLOYMENTS_TYPE, DEPLOYMENT_OPERATION_TYPE,
    DEPLOYMENT_TYPE,
};
use crate::armclient::ArmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const SOURCE: &str = "DeploymentsExpander";
const DEPLOYMENTS_API_VERSION: &str = "2017-05-10";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    #[serde(default)]
    provisioning_state: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    target_resource: TargetResource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetResource {
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    resource_name: String,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    id: String,
    name: String,
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentOperation {
    id: String,
    operation_id: String,
    #[serde(default)]
    properties: DeploymentProperties,
}

pub struct DeploymentsExpander {
    client: ArmClient,
}

impl DeploymentsExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }
}

fn status_of(properties: &DeploymentProperties) -> Option<String> {
    let status = draw_status(&properties.provisioning_state);
    (!status.is_empty()).then(|| status.to_string())
}

/// `value` array items paired with their raw JSON
fn items<T: for<'de> Deserialize<'de>>(body: &str) -> Result<Vec<(T, Value)>> {
    let value: Value = serde_json::from_str(body).context("Error unmarshalling deployments response")?;
    let Some(items) = value.get("value").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .map(|item| {
            let parsed = serde_json::from_value(item.clone()).context("Unexpected deployment item")?;
            Ok((parsed, item.clone()))
        })
        .collect()
}

fn deployment_nodes(parent: &TreeNode, body: &str) -> Result<Vec<TreeNode>> {
    Ok(items::<Deployment>(body)?
        .into_iter()
        .map(|(deployment, raw)| {
            let display = format!(
                "{}\n   Started:  {}\n   Duration: {}\n   DeploymentStatus: {}",
                deployment.name,
                deployment.properties.timestamp,
                deployment.properties.duration,
                deployment.properties.provisioning_state
            );
            let mut node = TreeNode::child_of(parent, deployment.id.clone(), deployment.name, DEPLOYMENT_TYPE)
                .with_display(display)
                .with_expand_url(format!("{}/operations/?api-version={}", deployment.id, DEPLOYMENTS_API_VERSION))
                .with_delete_url(format!("{}?api-version={}", deployment.id, DEPLOYMENTS_API_VERSION));
            node.status_indicator = status_of(&deployment.properties);
            node.context.json_item = Some(raw);
            node
        })
        .collect())
}

fn operation_nodes(parent: &TreeNode, body: &str) -> Result<Vec<TreeNode>> {
    Ok(items::<DeploymentOperation>(body)?
        .into_iter()
        .map(|(operation, raw)| {
            let target = &operation.properties.target_resource;
            let title = if target.resource_type.is_empty() {
                operation.operation_id.clone()
            } else {
                target.resource_name.clone()
            };
            let mut display = format!(
                "{}\n   Started: {}\n   Duration: {}\n   DeploymentStatus: {}",
                title,
                operation.properties.timestamp,
                operation.properties.duration,
                operation.properties.provisioning_state
            );
            if !target.resource_type.is_empty() {
                display.push_str(&format!("\n   ResourceType: {}", target.resource_type));
            }
            let mut node =
                TreeNode::child_of(parent, operation.id, operation.operation_id, DEPLOYMENT_OPERATION_TYPE).with_display(display);
            node.status_indicator = status_of(&operation.properties);
            node.context.json_item = Some(raw);
            node
        })
        .collect())
}

#[async_trait]
impl Expander for DeploymentsExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == DEPLOYMENTS_TYPE || node.item_type == DEPLOYMENT_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };

        if node.item_type == DEPLOYMENTS_TYPE {
            return match deployment_nodes(node, &body) {
                Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes),
                Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::text(body)),
            };
        }

        // The deployment's own JSON comes from the item the parent captured
        match operation_nodes(node, &body) {
            Ok(nodes) => ExpanderResult::nodes(SOURCE, nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e),
        }
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        delete_arm_item(&self.client, node).await
    }
}
