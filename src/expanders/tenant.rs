//! Tenant root: lists the subscriptions the signed-in identity can see

use super::default::arm_failure;
use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, TreeNode, SUBSCRIPTION_TYPE, TENANT_TYPE};
use crate::armclient::ArmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

const SOURCE: &str = "TenantExpander";
const SUBSCRIPTIONS_PATH: &str = "/subscriptions?api-version=2018-01-01";

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    value: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    id: String,
    subscription_id: String,
    display_name: String,
}

pub struct TenantExpander {
    client: ArmClient,
}

impl TenantExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }
}

fn subscription_nodes(parent: &TreeNode, body: &str) -> Result<Vec<TreeNode>> {
    let list: SubscriptionList = serde_json::from_str(body).context("Failed to load subscriptions")?;
    Ok(list
        .value
        .into_iter()
        .map(|sub| {
            let mut node = TreeNode::child_of(parent, sub.id.clone(), sub.display_name, SUBSCRIPTION_TYPE)
                .with_expand_url(format!("{}/resourceGroups?api-version=2018-05-01", sub.id));
            node.subscription_id = sub.subscription_id;
            node
        })
        .collect())
}

#[async_trait]
impl Expander for TenantExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == TENANT_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(SUBSCRIPTIONS_PATH).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };
        match subscription_nodes(node, &body) {
            Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::text(body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_nodes() {
        let body = r#"{"value":[{"id":"/subscriptions/0000","subscriptionId":"0000","displayName":"1testsub","state":"Enabled"}]}"#;
        let root = TreeNode::new("AvailableSubscriptions", "Subscriptions", TENANT_TYPE);
        let nodes = subscription_nodes(&root, body).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].display, "1testsub");
        assert_eq!(nodes[0].subscription_id, "0000");
        assert_eq!(nodes[0].expand_url, "/subscriptions/0000/resourceGroups?api-version=2018-05-01");
    }

    #[test]
    fn test_bad_subscription_list() {
        let root = TreeNode::new("root", "root", TENANT_TYPE);
        assert!(subscription_nodes(&root, "<html>").is_err());
    }
}
