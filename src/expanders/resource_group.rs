//! Resource group: lists its resources plus the Deployments and Activity Log
//! grouping nodes
//!
//! Provisioning states come from a Resource Graph query that runs alongside
//! the resource listing. The query gets a short grace period once the listing
//! is back; if it misses it the resources are shown without status.

use super::activity_log::activity_log_url;
use super::default::{arm_failure, delete_arm_item};
use super::expander::Expander;
use super::types::{
    draw_status, namespace_from_arm_type, ExpanderResponse, ExpanderResult, TreeNode, ACTIVITY_LOG_TYPE,
    DEPLOYMENTS_TYPE, RESOURCE_GROUP_TYPE, RESOURCE_TYPE,
};
use crate::armclient::ArmClient;
use crate::notification::StatusBus;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const SOURCE: &str = "ResourceGroupExpander";
const DEPLOYMENTS_API_VERSION: &str = "2017-05-10";
const GRAPH_QUERY_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    value: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    name: String,
    #[serde(rename = "type")]
    arm_type: String,
}

pub struct ResourceGroupExpander {
    client: ArmClient,
    status: StatusBus,
}

impl ResourceGroupExpander {
    pub fn new(client: ArmClient, status: StatusBus) -> Self {
        Self { client, status }
    }

    /// Resource id -> provisioning state; empty when the query fails
    async fn resource_states(&self, node: &TreeNode) -> HashMap<String, String> {
        let query = graph_query(&node.name);
        let states = self
            .client
            .resource_graph_query(&node.subscription_id, &query)
            .await
            .and_then(|body| parse_graph_states(&body));
        match states {
            Ok(states) => states,
            Err(e) => {
                self.status
                    .failure(format!("Getting query response: {} {:#}", query, e));
                HashMap::new()
            }
        }
    }

    async fn resource_nodes(&self, parent: &TreeNode, body: &str, states: &HashMap<String, String>) -> Result<Vec<TreeNode>> {
        let list: ResourceList = serde_json::from_str(body).context("Error unmarshalling resources")?;

        let mut nodes = Vec::with_capacity(list.value.len());
        for resource in list.value {
            let api_version = match self.client.api_version_for(&parent.subscription_id, &resource.arm_type).await {
                Ok(Some(version)) => Some(version),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Api version lookup failed for {}: {:#}", resource.arm_type, e);
                    None
                }
            };
            let url = match &api_version {
                Some(version) => format!("{}?api-version={}", resource.id, version),
                None => {
                    self.status
                        .failure(format!("Failed to get resource version for the type: {}", resource.arm_type));
                    resource.id.clone()
                }
            };

            let mut node = TreeNode::child_of(parent, resource.id.clone(), resource.name, RESOURCE_TYPE)
                .with_namespace(namespace_from_arm_type(&resource.arm_type))
                .with_expand_url(url.clone())
                .with_delete_url(url);
            node.status_indicator = states
                .get(&resource.id)
                .map(|state| draw_status(state))
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            node.arm_type = resource.arm_type;
            nodes.push(node);
        }
        Ok(nodes)
    }
}

/// Resource Graph query for one group's resources and their states
fn graph_query(resource_group: &str) -> String {
    // KQL single-quoted literal
    let escaped = resource_group.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "where resourceGroup=='{}' | project name, id, sku, kind, location, tags, properties.provisioningState",
        escaped
    )
}

/// Rows of a table-format graph response: column 1 is the id, column 6 the state
fn parse_graph_states(body: &str) -> Result<HashMap<String, String>> {
    let value: Value = serde_json::from_str(body).context("Parsing query response")?;
    let rows = value
        .pointer("/data/rows")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(rows
        .iter()
        .filter_map(|row| {
            let id = row.get(1)?.as_str()?;
            let state = row.get(6)?.as_str()?;
            Some((id.to_string(), state.to_string()))
        })
        .collect())
}

/// Deployments and Activity Log nodes every group gets
fn grouping_nodes(parent: &TreeNode) -> Vec<TreeNode> {
    let deployments_id = format!("{}/providers/Microsoft.Resources/deployments", parent.id);
    let deployments = TreeNode::child_of(parent, deployments_id.clone(), "Deployments", DEPLOYMENTS_TYPE)
        .with_namespace("None")
        .with_display("[Microsoft.Resources] Deployments")
        .with_expand_url(format!("{}?api-version={}", deployments_id, DEPLOYMENTS_API_VERSION));

    let activity_log = TreeNode::child_of(parent, format!("{}/<activitylog>", parent.id), "Activity Log", ACTIVITY_LOG_TYPE)
        .with_namespace("None")
        .with_display("[Microsoft.Insights] Activity Log")
        .with_expand_url(activity_log_url(&parent.subscription_id, &parent.name, chrono::Utc::now()));

    vec![deployments, activity_log]
}

#[async_trait]
impl Expander for ResourceGroupExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == RESOURCE_GROUP_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let states = self.resource_states(node);
        let listing = self.client.get(&node.expand_url);
        tokio::pin!(states, listing);

        let (listing, states) = tokio::select! {
            states = &mut states => ((&mut listing).await, states),
            listing = &mut listing => {
                let states = tokio::time::timeout(GRAPH_QUERY_GRACE, &mut states)
                    .await
                    .unwrap_or_else(|_| {
                        tracing::debug!("Resource graph query for {} timed out", node.id);
                        HashMap::new()
                    });
                (listing, states)
            }
        };

        let body = match listing {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e.context(format!("Failed {}", node.expand_url))),
        };

        let mut nodes = grouping_nodes(node);
        match self.resource_nodes(node, &body, &states).await {
            Ok(resources) => nodes.extend(resources),
            Err(e) => return ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::json(body)),
        }
        ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes)
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        delete_arm_item(&self.client, node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_graph_states() {
        let body = r#"{"data":{"columns":[],"rows":[
            ["web","/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/web",null,"","westeurope",{},"Succeeded"],
            ["short","/x"]
        ]}}"#;
        let states = parse_graph_states(body).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(
            states["/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/web"],
            "Succeeded"
        );
        assert!(parse_graph_states("{}").unwrap().is_empty());
    }

    #[test]
    fn test_graph_query_escapes_quotes() {
        assert!(graph_query("rg").starts_with("where resourceGroup=='rg' | project"));
        assert!(graph_query("o'brien").starts_with(r"where resourceGroup=='o\'brien' | project"));
        assert!(graph_query(r"a\b").starts_with(r"where resourceGroup=='a\\b' | project"));
    }

    #[test]
    fn test_grouping_nodes() {
        let mut rg = TreeNode::new("/subscriptions/1/resourceGroups/rg", "rg", RESOURCE_GROUP_TYPE);
        rg.subscription_id = "1".to_string();
        let nodes = grouping_nodes(&rg);
        assert_eq!(nodes[0].id, "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Resources/deployments");
        assert_eq!(
            nodes[0].expand_url,
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Resources/deployments?api-version=2017-05-10"
        );
        assert_eq!(nodes[1].id, "/subscriptions/1/resourceGroups/rg/<activitylog>");
        assert!(nodes[1].expand_url.starts_with("/subscriptions/1/providers/microsoft.insights/"));
        assert!(nodes.iter().all(|n| n.delete_url.is_none()));
    }
}
