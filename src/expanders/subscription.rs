//! Subscription: lists its resource groups

use super::default::{arm_failure, delete_arm_item};
use super::expander::Expander;
use super::types::{draw_status, ExpanderResponse, ExpanderResult, TreeNode, RESOURCE_GROUP_TYPE, SUBSCRIPTION_TYPE};
use crate::armclient::ArmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

const SOURCE: &str = "SubscriptionExpander";
const RESOURCES_API_VERSION: &str = "2017-05-10";

#[derive(Debug, Deserialize)]
struct ResourceGroupList {
    #[serde(default)]
    value: Vec<ResourceGroup>,
}

#[derive(Debug, Deserialize)]
struct ResourceGroup {
    id: String,
    name: String,
    #[serde(default)]
    properties: GroupProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupProperties {
    #[serde(default)]
    provisioning_state: String,
}

pub struct SubscriptionExpander {
    client: ArmClient,
}

impl SubscriptionExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }
}

fn resource_group_nodes(parent: &TreeNode, body: &str) -> Result<Vec<TreeNode>> {
    let list: ResourceGroupList = serde_json::from_str(body).context("Error unmarshalling resource groups")?;
    Ok(list
        .value
        .into_iter()
        .map(|group| {
            let status = draw_status(&group.properties.provisioning_state);
            let mut node = TreeNode::child_of(parent, group.id.clone(), group.name, RESOURCE_GROUP_TYPE)
                .with_expand_url(format!("{}/resources?api-version={}", group.id, RESOURCES_API_VERSION))
                .with_delete_url(format!("{}?api-version={}", group.id, RESOURCES_API_VERSION));
            node.status_indicator = (!status.is_empty()).then(|| status.to_string());
            node
        })
        .collect())
}

#[async_trait]
impl Expander for SubscriptionExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == SUBSCRIPTION_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };
        match resource_group_nodes(node, &body) {
            Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::text(body)),
        }
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        delete_arm_item(&self.client, node).await
    }
}
