//! ARM resources described by the embedded path declarations

use super::api_set::{ApiSet, ApiSetExpandResponse, ChildMatching, SubResource};
use super::types::{ExpanderResponse, TreeNode, RESOURCE_TYPE, SUB_RESOURCE_TYPE};
use crate::armclient::ArmClient;
use crate::endpoints::substitute_values;
use crate::swagger::{build_resource_types, DeclaredPath, PathTreeConfig, ResourceType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

pub const ARM_API_SET_ID: &str = "ARM_RESOURCES_FROM_SPECS";

/// Embedded resource declarations (compiled into the binary)
const ARM_SPEC: &str = include_str!("../resources/arm.json");

/// One provider's declarations from `arm.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ArmApiGroup {
    pub provider: String,
    pub api_version: String,
    pub paths: Vec<DeclaredPath>,
    #[serde(default)]
    pub config: PathTreeConfig,
}

#[derive(Debug, Deserialize)]
struct ArmSpec {
    api_sets: Vec<ArmApiGroup>,
}

static RESOURCE_TYPES: OnceLock<Vec<Arc<ResourceType>>> = OnceLock::new();

/// Resource type trees for every embedded provider, built on first use
pub fn arm_resource_types() -> &'static [Arc<ResourceType>] {
    RESOURCE_TYPES.get_or_init(|| {
        let spec: ArmSpec = serde_json::from_str(ARM_SPEC)
            .unwrap_or_else(|e| panic!("Failed to parse embedded ARM spec JSON: {}", e));

        let mut resource_types = Vec::new();
        for group in &spec.api_sets {
            let built = build_resource_types(&group.paths, Some(&group.api_version), &group.config)
                .unwrap_or_else(|e| panic!("Invalid embedded paths for {}: {}", group.provider, e));
            resource_types.extend(built);
        }
        tracing::debug!("Loaded {} ARM root resource types", resource_types.len());
        resource_types
    })
}

/// `{"value": [{"id": ...}]}` list response
#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    value: Vec<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct ResourceId {
    id: String,
}

pub struct ArmApiSet {
    client: ArmClient,
    resource_types: Vec<Arc<ResourceType>>,
}

impl ArmApiSet {
    pub fn new(client: ArmClient) -> Self {
        Self::with_resource_types(client, arm_resource_types().to_vec())
    }

    pub fn with_resource_types(client: ArmClient, resource_types: Vec<Arc<ResourceType>>) -> Self {
        Self { client, resource_types }
    }

    fn sub_resource(&self, resource_type: &ResourceType, id: &str) -> Result<SubResource> {
        let url = resource_type.perform_sub_path_replace(id);
        let sub_type = resource_type
            .sub_resource_type_for_url(&url)
            .with_context(|| format!("SubResource type not found for {}", url))?;

        let values = sub_type.endpoint.matches(&url).values;
        let delete_url = sub_type
            .delete_endpoint
            .as_ref()
            .map(|endpoint| {
                endpoint
                    .build(&values)
                    .with_context(|| format!("Error building subresource delete url '{}'", endpoint))
            })
            .transpose()?;
        let expand_url = match &sub_type.endpoint.api_version {
            Some(version) => format!("{}?api-version={}", url, version),
            None => url.clone(),
        };

        Ok(SubResource {
            name: substitute_values(&sub_type.display, &values),
            id: url,
            resource_type: sub_type,
            expand_url,
            delete_url,
        })
    }
}

#[async_trait]
impl ApiSet for ArmApiSet {
    fn id(&self) -> &str {
        ARM_API_SET_ID
    }

    fn resource_types(&self) -> &[Arc<ResourceType>] {
        &self.resource_types
    }

    fn applies_to_node(&self, node: &TreeNode) -> bool {
        node.item_type == RESOURCE_TYPE || node.item_type == SUB_RESOURCE_TYPE
    }

    fn child_matching(&self) -> ChildMatching {
        ChildMatching::ByName
    }

    async fn expand_resource(&self, node: &TreeNode, resource_type: &ResourceType) -> Result<ApiSetExpandResponse> {
        let body = self
            .client
            .do_request(resource_type.verb.to_method(), &node.expand_url)
            .await
            .with_context(|| format!("Failed to expand {}", node.expand_url))?;

        let mut sub_resources = Vec::new();
        if !resource_type.sub_resources.is_empty() {
            let list: ResourceList = serde_json::from_str(&body)
                .with_context(|| format!("Error unmarshalling response from {}", node.expand_url))?;
            for resource in &list.value {
                sub_resources.push(self.sub_resource(resource_type, &resource.id)?);
            }
        }

        Ok(ApiSetExpandResponse {
            response: ExpanderResponse::json(body),
            sub_resources,
        })
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let delete_url = node
            .delete_url
            .as_deref()
            .context("Item cannot be deleted (No DeleteURL)")?;
        self.client
            .do_request(Method::DELETE, delete_url)
            .await
            .with_context(|| format!("Failed to delete {}", delete_url))?;
        Ok(true)
    }

    async fn update(&self, node: &TreeNode, content: &str) -> Result<()> {
        let resource_type = node
            .swagger_resource_type
            .as_ref()
            .context("Item has no resource type")?;
        let put_endpoint = resource_type
            .put_endpoint
            .as_ref()
            .context("Resource type has no PUT endpoint")?;

        let matched = resource_type.endpoint.matches(&node.expand_url);
        if !matched.is_match {
            anyhow::bail!("'{}' didn't match '{}'", node.expand_url, resource_type.endpoint);
        }
        let put_url = put_endpoint
            .build(&matched.values)
            .with_context(|| format!("Failed to build PUT URL '{}'", put_endpoint))?;

        let response = self
            .client
            .do_request_with_body(Method::PUT, &put_url, content)
            .await
            .context("Error making PUT request")?;

        if let Some(message) = api_error_message(&response)? {
            anyhow::bail!("Error: {}", message);
        }
        Ok(())
    }
}

/// The `error` object of an ARM response, flattened to one line
fn api_error_message(response: &str) -> Result<Option<String>> {
    if response.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(response).context("Error parsing API response")?;
    Ok(value
        .get("error")
        .filter(|e| !e.is_null())
        .map(|e| e.to_string().replace(['\r', '\n'], "")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swagger::find_resource_type;

    #[test]
    fn test_embedded_spec_loads() {
        let resource_types = arm_resource_types();
        assert!(!resource_types.is_empty());

        let site = find_resource_type(
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app?api-version=2019-08-01",
            resource_types,
        )
        .unwrap();
        assert!(site.put_endpoint.is_some());
        assert!(site.children.iter().any(|c| c.display == "config"));
    }

    #[test]
    fn test_override_groups_list_call_under_logical_path() {
        let settings = find_resource_type(
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app/config/appsettings/list",
            arm_resource_types(),
        )
        .unwrap();
        assert_eq!(settings.verb.to_method(), Method::POST);
        assert_eq!(settings.display, "appsettings");
    }

    #[test]
    fn test_slots_are_enumerated() {
        let slots = find_resource_type(
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app/slots",
            arm_resource_types(),
        )
        .unwrap();
        assert_eq!(slots.sub_resources.len(), 1);
        assert!(slots.sub_resources[0].delete_endpoint.is_some());
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(api_error_message("").unwrap(), None);
        assert_eq!(api_error_message(r#"{"id":"x"}"#).unwrap(), None);
        assert_eq!(
            api_error_message(r#"{"error":{"code":"Conflict"}}"#).unwrap().as_deref(),
            Some(r#"{"code":"Conflict"}"#)
        );
        assert!(api_error_message("not json").is_err());
    }
}
