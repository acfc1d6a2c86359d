//! Tree node model shared by every expander

use super::expander::Expander;
use crate::swagger::ResourceType;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// `expand_url` of a node that has no generic expansion
pub const EXPAND_URL_NOT_SUPPORTED: &str = "notsupported";

pub const TENANT_TYPE: &str = "tenant";
pub const SUBSCRIPTION_TYPE: &str = "subscription";
pub const RESOURCE_GROUP_TYPE: &str = "resourcegroup";
pub const RESOURCE_TYPE: &str = "resource";
pub const SUB_RESOURCE_TYPE: &str = "subResource";
pub const DEPLOYMENTS_TYPE: &str = "deployments";
pub const DEPLOYMENT_TYPE: &str = "deployment";
pub const DEPLOYMENT_OPERATION_TYPE: &str = "deploymentOperation";
pub const ACTIVITY_LOG_TYPE: &str = "activityLog";
pub const SUB_ACTIVITY_LOG_TYPE: &str = "subActivityLog";
pub const ACTION_TYPE: &str = "action";
pub const METRICS_TYPE: &str = "metrics";
pub const METRIC_TYPE: &str = "metric";

/// Format of the content an expander returns for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Yaml,
    PlainText,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::PlainText => "text",
        };
        f.write_str(name)
    }
}

/// Display content for a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpanderResponse {
    pub response: String,
    pub response_type: ResponseType,
}

impl ExpanderResponse {
    pub fn json(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            response_type: ResponseType::Json,
        }
    }

    pub fn yaml(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            response_type: ResponseType::Yaml,
        }
    }

    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            response_type: ResponseType::PlainText,
        }
    }

    /// Pretty-print JSON content; other formats and invalid JSON are returned as is
    pub fn pretty(&self) -> String {
        if self.response_type != ResponseType::Json {
            return self.response.clone();
        }
        serde_json::from_str::<Value>(&self.response)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|_| self.response.clone())
    }
}

/// What one expander produced for one node
#[derive(Debug, Default)]
pub struct ExpanderResult {
    pub response: ExpanderResponse,
    pub nodes: Vec<TreeNode>,
    pub error: Option<anyhow::Error>,
    pub source_description: String,
    /// Claims `response` as the node's display content
    pub is_primary_response: bool,
    /// Fresher status icon for the expanded node itself
    pub status_indicator: Option<String>,
}

impl ExpanderResult {
    /// Result that supplies the node's content
    pub fn primary(source: &str, response: ExpanderResponse, nodes: Vec<TreeNode>) -> Self {
        Self {
            response,
            nodes,
            error: None,
            source_description: source.to_string(),
            is_primary_response: true,
            status_indicator: None,
        }
    }

    /// Result that only contributes child nodes
    pub fn nodes(source: &str, nodes: Vec<TreeNode>) -> Self {
        Self {
            nodes,
            source_description: source.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(source: &str, error: anyhow::Error) -> Self {
        Self {
            error: Some(error),
            source_description: source.to_string(),
            ..Default::default()
        }
    }

    /// Attach whatever the backend returned alongside a failure
    pub fn with_response(mut self, response: ExpanderResponse) -> Self {
        self.response = response;
        self
    }
}

/// Result of an expander's action listing
#[derive(Debug, Default)]
pub struct ListActionsResult {
    pub nodes: Vec<TreeNode>,
    pub error: Option<anyhow::Error>,
    pub source_description: String,
    pub is_primary_response: bool,
}

/// Registry data-plane state handed from a node to its descendants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryContext {
    /// ARM URL of the registry resource
    pub registry_id: Option<String>,
    pub login_server: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub digest: Option<String>,
    /// Continuation marker for `?last=` paging
    pub last_item: Option<String>,
}

/// Metric a graph node plots, and the resource it belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricContext {
    pub resource_id: String,
    /// Lower-cased key of the data point field to plot, e.g. `average`
    pub aggregation: String,
    pub unit: String,
}

/// Typed per-node context for follow-up expansions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeContext {
    /// Owning API set, once resolved
    pub api_set_id: Option<String>,
    /// ARM id of the AKS cluster the node belongs to
    pub cluster_id: Option<String>,
    /// Item captured from the parent's response; shown without a request
    pub json_item: Option<Value>,
    pub registry: RegistryContext,
    pub metric: Option<MetricContext>,
}

/// The unit of navigation
#[derive(Clone, Default)]
pub struct TreeNode {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub display: String,
    pub expand_url: String,
    pub item_type: String,
    pub delete_url: Option<String>,
    pub namespace: String,
    pub arm_type: String,
    pub subscription_id: String,
    pub status_indicator: Option<String>,
    pub context: NodeContext,
    /// Cached resource type resolution
    pub swagger_resource_type: Option<Arc<ResourceType>>,
    /// Expander that produced the node; used for delete and update
    pub expander: Option<Arc<dyn Expander>>,
    pub suppress_swagger_expand: bool,
    pub suppress_generic_expand: bool,
    pub timeout_override: Option<Duration>,
    /// Replace this node with its children instead of nesting them ("more...")
    pub expand_in_place: bool,
}

impl TreeNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, item_type: &str) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            display: name.clone(),
            name,
            item_type: item_type.to_string(),
            expand_url: EXPAND_URL_NOT_SUPPORTED.to_string(),
            ..Default::default()
        }
    }

    /// A node whose parent is `parent`, inheriting its subscription
    pub fn child_of(parent: &TreeNode, id: impl Into<String>, name: impl Into<String>, item_type: &str) -> Self {
        let mut node = Self::new(id, name, item_type);
        node.parent_id = parent.id.clone();
        node.subscription_id = parent.subscription_id.clone();
        node
    }

    pub fn with_expand_url(mut self, url: impl Into<String>) -> Self {
        self.expand_url = url.into();
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn with_delete_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.delete_url = (!url.is_empty()).then_some(url);
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn is_expand_supported(&self) -> bool {
        self.expand_url != EXPAND_URL_NOT_SUPPORTED && !self.expand_url.is_empty()
    }

    /// Status icon (if any) followed by the display text
    pub fn title(&self) -> String {
        match self.status_indicator.as_deref() {
            Some(status) if !status.is_empty() => format!("{} {}", status, self.display),
            _ => self.display.clone(),
        }
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("item_type", &self.item_type)
            .field("expand_url", &self.expand_url)
            .field("delete_url", &self.delete_url)
            .field("namespace", &self.namespace)
            .field("api_set_id", &self.context.api_set_id)
            .field("expander", &self.expander.as_ref().map(|e| e.name()))
            .finish()
    }
}

/// Icon for an ARM provisioning state
pub fn draw_status(state: &str) -> &'static str {
    match state {
        "Deleting" => "☠",
        "Failed" => "⛈",
        "Updating" | "Running" => "⟳",
        "Resuming" | "Starting" => "⛅",
        "Provisioning" => "⌛",
        "Creating" | "Preparing" => "🏗",
        "Scaling" => "⚖",
        "Suspended" | "Suspending" => "⛔",
        "Succeeded" => "☼",
        _ => "",
    }
}

/// `Microsoft.Web/sites` -> `Microsoft.Web`
pub fn namespace_from_arm_type(arm_type: &str) -> &str {
    arm_type.split('/').next().unwrap_or_default()
}

/// Status icon for `properties.provisioningState`, if present
pub fn status_from_properties(item: &Value) -> Option<String> {
    item.pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(draw_status)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draw_status() {
        assert_eq!(draw_status("Succeeded"), "☼");
        assert_eq!(draw_status("Running"), "⟳");
        assert_eq!(draw_status("Updating"), "⟳");
        assert_eq!(draw_status("Unknown"), "");
    }

    #[test]
    fn test_child_inherits_parent_and_subscription() {
        let mut parent = TreeNode::new("/subscriptions/1", "sub", SUBSCRIPTION_TYPE);
        parent.subscription_id = "1".to_string();
        let child = TreeNode::child_of(&parent, "/subscriptions/1/resourceGroups/rg", "rg", RESOURCE_GROUP_TYPE);
        assert_eq!(child.parent_id, "/subscriptions/1");
        assert_eq!(child.subscription_id, "1");
        assert!(!child.is_expand_supported());
    }

    #[test]
    fn test_empty_delete_url_is_none() {
        let node = TreeNode::new("x", "x", RESOURCE_TYPE).with_delete_url("");
        assert!(node.delete_url.is_none());
    }

    #[test]
    fn test_title_includes_status() {
        let mut node = TreeNode::new("x", "web", RESOURCE_TYPE);
        node.status_indicator = Some("☼".to_string());
        assert_eq!(node.title(), "☼ web");
    }

    #[test]
    fn test_status_from_properties() {
        let item = json!({ "properties": { "provisioningState": "Failed" } });
        assert_eq!(status_from_properties(&item).as_deref(), Some("⛈"));
        assert!(status_from_properties(&json!({})).is_none());
    }

    #[test]
    fn test_pretty_json() {
        let response = ExpanderResponse::json(r#"{"a":1}"#);
        assert_eq!(response.pretty(), "{\n  \"a\": 1\n}");
        assert_eq!(ExpanderResponse::json("nope").pretty(), "nope");
    }
}
