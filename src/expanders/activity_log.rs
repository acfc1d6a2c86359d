//! Activity log of a resource group over the last 30 days

use super::default::arm_failure;
use super::expander::Expander;
use super::types::{draw_status, ExpanderResponse, ExpanderResult, TreeNode, ACTIVITY_LOG_TYPE, SUB_ACTIVITY_LOG_TYPE};
use crate::armclient::ArmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

const SOURCE: &str = "ActivityLogExpander";
const LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Localized {
    #[serde(default)]
    value: String,
    #[serde(default)]
    localized_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    id: String,
    #[serde(default)]
    operation_name: Localized,
    #[serde(default)]
    status: Localized,
}

/// Management events for `resource_group` between `now - 30 days` and `now`
pub fn activity_log_url(subscription_id: &str, resource_group: &str, now: DateTime<Utc>) -> String {
    let from = (now - Duration::days(LOOKBACK_DAYS)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let to = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let filter = format!(
        "eventTimestamp ge '{}' and eventTimestamp le '{}' and eventChannels eq 'Admin, Operation' and resourceGroupName eq '{}' and levels eq 'Critical,Error,Warning,Informational' | orderby eventTimestamp desc",
        from, to, resource_group
    );
    format!(
        "/subscriptions/{}/providers/microsoft.insights/eventtypes/management/values?api-version=2017-03-01-preview&$filter={}",
        subscription_id,
        urlencoding::encode(&filter)
    )
}

pub struct ActivityLogExpander {
    client: ArmClient,
}

impl ActivityLogExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }
}

fn log_nodes(parent: &TreeNode, body: &str) -> Result<Vec<TreeNode>> {
    let value: Value = serde_json::from_str(body).context("Error unmarshalling activity log")?;
    let Some(items) = value.get("value").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            let entry: LogEntry = serde_json::from_value(item.clone()).context("Unexpected activity log entry")?;
            let display = if entry.operation_name.localized_value.is_empty() {
                entry.operation_name.value.clone()
            } else {
                entry.operation_name.localized_value.clone()
            };
            let status = draw_status(&entry.status.value);

            let mut node = TreeNode::child_of(parent, entry.id, entry.operation_name.value, SUB_ACTIVITY_LOG_TYPE)
                .with_display(display);
            node.status_indicator = (!status.is_empty()).then(|| status.to_string());
            node.context.json_item = Some(item.clone());
            Ok(node)
        })
        .collect()
}

#[async_trait]
impl Expander for ActivityLogExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == ACTIVITY_LOG_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };
        match log_nodes(node, &body) {
            Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::text(body)),
        }
    }
}
