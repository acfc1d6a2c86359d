//! Kubernetes API server of one AKS cluster
//!
//! Resource types come from the cluster's own `/openapi/v2` document and all
//! traffic goes straight to the API server over mTLS, with YAML bodies.

use super::api_set::{ApiSet, ApiSetExpandResponse, ChildMatching, SubResource};
use super::types::{ExpanderResponse, TreeNode};
use crate::armclient::HttpClient;
use crate::swagger::{AdditionalPath, PathTreeConfig, RegexReplace, ResourceType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;

const POD_LOG_TEMPLATE: &str = "/api/v1/namespaces/{namespace}/pods/{name}/log";
const MAX_TAIL_LINES: u32 = 100;
const SELECT_A_NODE: &str = "Select a node to expand";

/// Grouping nodes the published Kubernetes document lacks
pub fn kubernetes_path_config() -> PathTreeConfig {
    PathTreeConfig {
        additional_paths: vec![
            AdditionalPath {
                name: Some("watch".to_string()),
                path: "/api/v1/watch".to_string(),
                fixed_content: Some(SELECT_A_NODE.to_string()),
                ..Default::default()
            },
            AdditionalPath {
                name: Some("watch".to_string()),
                path: "/apis/apps/v1/watch".to_string(),
                fixed_content: Some(SELECT_A_NODE.to_string()),
                ..Default::default()
            },
            AdditionalPath {
                name: Some("namespaces".to_string()),
                path: "/apis/apps/v1/namespaces".to_string(),
                get_path: Some("/api/v1/namespaces".to_string()),
                sub_path_regex: Some(RegexReplace {
                    pattern: "/api/v1/namespaces/".to_string(),
                    replace: "/apis/apps/v1/namespaces/".to_string(),
                }),
                ..Default::default()
            },
            AdditionalPath {
                name: Some("{namespace}".to_string()),
                path: "/apis/apps/v1/namespaces/{namespace}".to_string(),
                fixed_content: Some(SELECT_A_NODE.to_string()),
                ..Default::default()
            },
        ],
        suppress_api_version: true,
        ..Default::default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ListItem {
    #[serde(default)]
    metadata: ItemMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    self_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodResponse {
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    name: String,
}

pub struct KubernetesApiSet {
    id: String,
    cluster_id: String,
    server_url: String,
    http: HttpClient,
    resource_types: Vec<Arc<ResourceType>>,
}

impl KubernetesApiSet {
    /// `id` is the node id prefix (`<clusterID>/<k8sapi>`)
    pub fn new(
        id: &str,
        cluster_id: &str,
        server_url: &str,
        http: HttpClient,
        resource_types: Vec<Arc<ResourceType>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            cluster_id: cluster_id.to_string(),
            server_url: server_url.trim_end_matches('/').to_string(),
            http,
            resource_types,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn request(&self, method: Method, path: &str, body: &str) -> Result<String> {
        let url = format!("{}{}", self.server_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, "application/yaml")
            .header(ACCEPT, "application/yaml");
        if !body.is_empty() {
            request = request.body(body.to_string());
        }
        self.http.execute(request).await
    }

    /// Logs of a pod with several containers need a container picked first
    async fn pod_log_containers(
        &self,
        node: &TreeNode,
        resource_type: &ResourceType,
    ) -> Result<Option<ApiSetExpandResponse>> {
        let Some(pod_path) = node.expand_url.strip_suffix("/log") else {
            return Ok(None);
        };
        let body = self.request(Method::GET, pod_path, "").await?;
        let pod: PodResponse = serde_yaml::from_str(&body).context("Error parsing pod YAML")?;

        match pod.spec.containers.len() {
            0 => anyhow::bail!("No containers in pod {}", pod_path),
            1 => Ok(None),
            _ => {
                let resource_type = Arc::new(resource_type.clone());
                let sub_resources = pod
                    .spec
                    .containers
                    .iter()
                    .map(|container| SubResource {
                        id: format!("{}/{}", node.id, container.name),
                        name: container.name.clone(),
                        resource_type: Arc::clone(&resource_type),
                        expand_url: format!(
                            "{}?container={}&tailLines={}",
                            node.expand_url, container.name, MAX_TAIL_LINES
                        ),
                        delete_url: None,
                    })
                    .collect();
                Ok(Some(ApiSetExpandResponse {
                    response: ExpanderResponse::text("Pick a container to view logs"),
                    sub_resources,
                }))
            }
        }
    }

    fn sub_resource(&self, resource_type: &ResourceType, list_url: &str, item: &ListItem) -> Result<SubResource> {
        let self_link = item
            .metadata
            .self_link
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("{}/{}", list_url.split('?').next().unwrap_or_default(), item.metadata.name));
        let url = resource_type.perform_sub_path_replace(&self_link);
        let sub_type = resource_type
            .sub_resource_type_for_url(&url)
            .with_context(|| format!("SubResource type not found for {}", url))?;

        let delete_url = match &sub_type.delete_endpoint {
            Some(endpoint) => Some(
                endpoint
                    .build(&sub_type.endpoint.matches(&url).values)
                    .with_context(|| format!("Error building subresource delete url '{}'", endpoint))?,
            ),
            None => None,
        };

        Ok(SubResource {
            id: format!("{}{}", self.cluster_id, url),
            name: item.metadata.name.clone(),
            resource_type: sub_type,
            expand_url: url,
            delete_url,
        })
    }
}

#[async_trait]
impl ApiSet for KubernetesApiSet {
    fn id(&self) -> &str {
        &self.id
    }

    fn resource_types(&self) -> &[Arc<ResourceType>] {
        &self.resource_types
    }

    /// Nodes are pinned to a cluster when they are created
    fn applies_to_node(&self, _node: &TreeNode) -> bool {
        false
    }

    fn child_matching(&self) -> ChildMatching {
        ChildMatching::ByPosition
    }

    async fn expand_resource(&self, node: &TreeNode, resource_type: &ResourceType) -> Result<ApiSetExpandResponse> {
        let mut expand_url = node.expand_url.clone();
        if resource_type.endpoint.template_url == POD_LOG_TEMPLATE && !expand_url.contains('?') {
            if let Some(containers) = self.pod_log_containers(node, resource_type).await? {
                return Ok(containers);
            }
            expand_url = format!("{}?tailLines={}", expand_url, MAX_TAIL_LINES);
        }

        let body = self
            .request(Method::GET, &expand_url, "")
            .await
            .with_context(|| format!("Failed to make request to {}", expand_url))?;

        let mut sub_resources = Vec::new();
        if !resource_type.sub_resources.is_empty() {
            let list: ListResponse = serde_yaml::from_str(&body).context("Error parsing YAML response")?;
            for item in &list.items {
                sub_resources.push(self.sub_resource(resource_type, &expand_url, item)?);
            }
        }

        Ok(ApiSetExpandResponse {
            response: ExpanderResponse::yaml(body),
            sub_resources,
        })
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let delete_url = node
            .delete_url
            .as_deref()
            .context("Item cannot be deleted (No DeleteURL)")?;
        self.request(Method::DELETE, delete_url, "")
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

        self.request(Method::PUT, &put_url, content)
            .await
            .context("Error making PUT request")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swagger::{build_resource_types, find_resource_type, DeclaredPath, Verb};

    fn kubernetes_types() -> Vec<Arc<ResourceType>> {
        let declared = vec![
            DeclaredPath::new("/api/v1/namespaces", &[Verb::Get]),
            DeclaredPath::new("/api/v1/namespaces/{name}", &[Verb::Get, Verb::Put, Verb::Delete]),
            DeclaredPath::new("/apis/apps/v1/namespaces/{namespace}/deployments", &[Verb::Get]),
            DeclaredPath::new("/apis/apps/v1/namespaces/{namespace}/deployments/{name}", &[Verb::Get, Verb::Put, Verb::Delete]),
        ];
        build_resource_types(&declared, Some("v1"), &kubernetes_path_config()).unwrap()
    }

    #[test]
    fn test_config_suppresses_api_version() {
        let types = kubernetes_types();
        let namespaces = find_resource_type("/api/v1/namespaces", &types).unwrap();
        assert!(namespaces.endpoint.api_version.is_none());
    }

    #[test]
    fn test_namespaces_grouped_under_apps() {
        let types = kubernetes_types();
        // The grouping node fetches from the core API but rehomes its items
        let namespaces = types
            .iter()
            .find(|t| t.endpoint.template_url == "/api/v1/namespaces" && t.display == "namespaces" && t.sub_path_regex.is_some())
            .unwrap();
        assert_eq!(
            namespaces.perform_sub_path_replace("/api/v1/namespaces/default"),
            "/apis/apps/v1/namespaces/default"
        );
        let namespace = namespaces
            .sub_resource_type_for_url("/apis/apps/v1/namespaces/default")
            .unwrap();
        assert!(namespace.fixed_content.is_some());
        assert!(namespace.children.iter().any(|c| c.display == "deployments"));
    }

    #[test]
    fn test_list_items_fall_back_to_list_url() {
        let types = kubernetes_types();
        let set = KubernetesApiSet::new("c/<k8sapi>", "c", "https://k8s", HttpClient::new().unwrap(), types.clone());
        let deployments = find_resource_type("/apis/apps/v1/namespaces/default/deployments", &types).unwrap();

        let list: ListResponse = serde_yaml::from_str("items:\n- metadata:\n    name: web\n").unwrap();
        let sub = set
            .sub_resource(&deployments, "/apis/apps/v1/namespaces/default/deployments", &list.items[0])
            .unwrap();
        assert_eq!(sub.expand_url, "/apis/apps/v1/namespaces/default/deployments/web");
        assert_eq!(sub.id, "c/apis/apps/v1/namespaces/default/deployments/web");
        assert_eq!(sub.delete_url.as_deref(), Some("/apis/apps/v1/namespaces/default/deployments/web"));
        assert_eq!(sub.name, "web");
    }
}
