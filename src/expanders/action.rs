//! Runs a resource action listed by `get_actions` (POST to its URL)

use super::default::arm_failure;
use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, TreeNode, ACTION_TYPE};
use crate::armclient::ArmClient;
use crate::notification::StatusBus;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;

const SOURCE: &str = "ActionExpander";

pub struct ActionExpander {
    client: ArmClient,
    status: StatusBus,
}

impl ActionExpander {
    pub fn new(client: ArmClient, status: StatusBus) -> Self {
        Self { client, status }
    }
}

#[async_trait]
impl Expander for ActionExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(node.item_type == ACTION_TYPE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        let event = self.status.start(format!("Action: {} @ {}", node.name, node.id));
        let response = self.client.do_request(Method::POST, &node.expand_url).await;
        self.status.finish(event);

        match response {
            Ok(body) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), Vec::new()),
            Err(e) => arm_failure(SOURCE, e),
        }
    }
}
