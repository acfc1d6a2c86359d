//! AKS clusters: adds a "Kubernetes API" node and bootstraps the cluster's
//! [`KubernetesApiSet`] the first time it is opened

use super::api_set::{ApiSet, ApiSetRegistry};
use super::expander::Expander;
use super::kubernetes_api_set::{kubernetes_path_config, KubernetesApiSet};
use super::swagger::SWAGGER_NAMESPACE;
use super::types::{ExpanderResponse, ExpanderResult, TreeNode, RESOURCE_TYPE, SUB_RESOURCE_TYPE};
use crate::armclient::http::USER_AGENT;
use crate::armclient::{ArmClient, HttpClient};
use crate::swagger::{build_resource_types, ResourceType, SwaggerDocument};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Certificate, Identity, Method};
use serde::Deserialize;
use std::sync::Arc;

const SOURCE: &str = "AzureKubernetesServiceExpander";
pub const AKS_NAMESPACE: &str = "AzureKubernetesService";
pub const CLUSTER_TEMPLATE_URL: &str =
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.ContainerService/managedClusters/{resourceName}";
const KUBERNETES_API_SUFFIX: &str = "/<k8sapi>";
const CREDENTIALS_API_VERSION: &str = "2019-08-01";

#[derive(Debug, Deserialize)]
struct ClusterCredentials {
    #[serde(default)]
    kubeconfigs: Vec<KubeConfigEntry>,
}

#[derive(Debug, Deserialize)]
struct KubeConfigEntry {
    #[serde(alias = "Value")]
    value: String,
}

/// The parts of a kubeconfig needed to reach the API server
#[derive(Debug, Default, Deserialize)]
pub struct KubeConfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Default, Deserialize)]
struct NamedCluster {
    cluster: ClusterEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority_data: String,
}

#[derive(Debug, Default, Deserialize)]
struct NamedUser {
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    client_certificate_data: String,
    #[serde(default)]
    client_key_data: String,
}

impl KubeConfig {
    /// Decode the base64 YAML kubeconfig returned by `listClusterUserCredential`
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = STANDARD.decode(encoded.trim()).context("Error decoding kubeconfig")?;
        serde_yaml::from_slice(&decoded).context("Error parsing kubeconfig")
    }

    pub fn server(&self) -> Result<&str> {
        self.clusters
            .first()
            .map(|c| c.cluster.server.as_str())
            .context("Kubeconfig has no clusters")
    }

    /// mTLS client trusting the cluster CA
    pub fn http_client(&self) -> Result<HttpClient> {
        let cluster = self.clusters.first().context("Kubeconfig has no clusters")?;
        let user = self.users.first().context("Kubeconfig has no users")?;

        let certificate = STANDARD
            .decode(&user.user.client_certificate_data)
            .context("Error decoding client certificate data")?;
        let key = STANDARD
            .decode(&user.user.client_key_data)
            .context("Error decoding client key data")?;
        let authority = STANDARD
            .decode(&cluster.cluster.certificate_authority_data)
            .context("Error decoding certificate authority data")?;

        let mut pem = key;
        pem.push(b'\n');
        pem.extend_from_slice(&certificate);
        let identity = Identity::from_pem(&pem).context("Invalid client certificate")?;
        let root = Certificate::from_pem(&authority).context("Invalid certificate authority")?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .identity(identity)
            .add_root_certificate(root)
            .build()
            .context("Failed to create Kubernetes HTTP client")?;
        Ok(HttpClient::with_client(client))
    }
}

pub struct ContainerServiceExpander {
    client: ArmClient,
    api_sets: Arc<ApiSetRegistry>,
}

impl ContainerServiceExpander {
    pub fn new(client: ArmClient, api_sets: Arc<ApiSetRegistry>) -> Self {
        Self { client, api_sets }
    }

    fn is_cluster(node: &TreeNode) -> bool {
        node.item_type == RESOURCE_TYPE
            && node
                .swagger_resource_type
                .as_ref()
                .is_some_and(|rt| rt.endpoint.template_url == CLUSTER_TEMPLATE_URL)
    }

    async fn cluster_config(&self, cluster_id: &str) -> Result<KubeConfig> {
        let url = format!(
            "{}/listClusterUserCredential?api-version={}",
            cluster_id, CREDENTIALS_API_VERSION
        );
        let body = self
            .client
            .do_request(Method::POST, &url)
            .await
            .with_context(|| format!("Failed to get credentials for {}", cluster_id))?;
        let credentials: ClusterCredentials =
            serde_json::from_str(&body).with_context(|| format!("Error unmarshalling credentials for {}", cluster_id))?;
        let entry = credentials
            .kubeconfigs
            .first()
            .with_context(|| format!("Response has no kubeconfigs for {}", cluster_id))?;
        KubeConfig::from_base64(&entry.value)
    }

    async fn create_api_set(&self, api_set_id: &str, cluster_id: &str) -> Result<Arc<dyn ApiSet>> {
        let config = self.cluster_config(cluster_id).await?;
        let http = config.http_client()?;
        let server = config.server()?;

        let openapi_url = format!("{}/openapi/v2", server.trim_end_matches('/'));
        let body = http
            .execute(http.request(Method::GET, &openapi_url))
            .await
            .context("Failed to fetch the cluster's OpenAPI document")?;
        let document = SwaggerDocument::from_json(&body)?;
        let resource_types = build_resource_types(&document.paths, document.version.as_deref(), &kubernetes_path_config())?;

        tracing::info!(
            "Built {} Kubernetes root resource types for {}",
            resource_types.len(),
            cluster_id
        );
        Ok(Arc::new(KubernetesApiSet::new(api_set_id, cluster_id, server, http, resource_types)))
    }

    async fn expand_kubernetes_root(&self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        let cluster_id = node
            .context
            .cluster_id
            .as_deref()
            .context("Kubernetes API node has no cluster id")?;
        let api_set_id = format!("{}{}", cluster_id, KUBERNETES_API_SUFFIX);

        let api_set = match self.api_sets.get(&api_set_id) {
            Some(api_set) => api_set,
            None => {
                let api_set = self.create_api_set(&api_set_id, cluster_id).await?;
                self.api_sets.register(Arc::clone(&api_set));
                api_set
            }
        };
        Ok(root_nodes(node, &api_set_id, api_set.resource_types()))
    }
}

/// One node per root resource type, pinned to the cluster's API set
fn root_nodes(parent: &TreeNode, api_set_id: &str, resource_types: &[Arc<ResourceType>]) -> Vec<TreeNode> {
    resource_types
        .iter()
        .map(|resource_type| {
            let display = if resource_type.display == "{}" {
                resource_type.endpoint.template_url.clone()
            } else {
                resource_type.display.clone()
            };
            let mut node = TreeNode::child_of(parent, format!("{}/{}", parent.id, display), display, SUB_RESOURCE_TYPE)
                .with_namespace(SWAGGER_NAMESPACE)
                .with_expand_url(resource_type.endpoint.template_url.clone());
            node.swagger_resource_type = Some(Arc::clone(resource_type));
            node.context.api_set_id = Some(api_set_id.to_string());
            node.context.cluster_id = parent.context.cluster_id.clone();
            node
        })
        .collect()
}

#[async_trait]
impl Expander for ContainerServiceExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(Self::is_cluster(node) || (node.namespace == AKS_NAMESPACE && node.item_type == SUB_RESOURCE_TYPE))
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        if node.namespace != AKS_NAMESPACE && Self::is_cluster(node) {
            let mut api_node = TreeNode::child_of(
                node,
                format!("{}{}", node.id, KUBERNETES_API_SUFFIX),
                "Kubernetes API",
                SUB_RESOURCE_TYPE,
            )
            .with_namespace(AKS_NAMESPACE);
            api_node.suppress_swagger_expand = true;
            api_node.suppress_generic_expand = true;
            api_node.context.cluster_id = Some(node.id.clone());
            // The swagger expander supplies the cluster's content
            return ExpanderResult::nodes(SOURCE, vec![api_node]);
        }

        match self.expand_kubernetes_root(node).await {
            Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::text(""), nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armclient::{AccessToken, StaticTokenProvider, DEFAULT_ARM_ENDPOINT};
    use crate::endpoints::EndpointTemplate;

    fn expander() -> ContainerServiceExpander {
        let client = ArmClient::with_token_provider(
            DEFAULT_ARM_ENDPOINT,
            Arc::new(StaticTokenProvider::new(AccessToken::bearer("t"))),
        )
        .unwrap();
        ContainerServiceExpander::new(client, Arc::new(ApiSetRegistry::new()))
    }

    fn cluster_node() -> TreeNode {
        let endpoint = EndpointTemplate::parse(CLUSTER_TEMPLATE_URL, Some("2019-08-01")).unwrap();
        let mut node = TreeNode::new(
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks",
            "aks",
            RESOURCE_TYPE,
        );
        node.swagger_resource_type = Some(Arc::new(ResourceType::new("{resourceName}", endpoint)));
        node
    }

    #[tokio::test]
    async fn test_cluster_gets_kubernetes_api_node() {
        let expander = expander();
        let node = cluster_node();
        assert!(expander.does_expand(&node).unwrap());

        let result = expander.expand(&node).await;
        assert!(result.error.is_none());
        assert!(!result.is_primary_response);
        let api_node = &result.nodes[0];
        assert_eq!(api_node.id, format!("{}/<k8sapi>", node.id));
        assert_eq!(api_node.namespace, AKS_NAMESPACE);
        assert!(api_node.suppress_swagger_expand && api_node.suppress_generic_expand);
        assert_eq!(api_node.context.cluster_id.as_deref(), Some(node.id.as_str()));
        assert!(expander.does_expand(api_node).unwrap());
    }

    #[test]
    fn test_other_resources_are_ignored() {
        let node = TreeNode::new("/subscriptions/1/x", "x", RESOURCE_TYPE);
        assert!(!expander().does_expand(&node).unwrap());
    }

    #[test]
    fn test_kubeconfig_decoding() {
        let yaml = "clusters:\n- name: aks\n  cluster:\n    server: https://aks.example:443\n    certificate-authority-data: Q0E=\nusers:\n- name: user\n  user:\n    client-certificate-data: Q0VSVA==\n    client-key-data: S0VZ\n";
        let config = KubeConfig::from_base64(&STANDARD.encode(yaml)).unwrap();
        assert_eq!(config.server().unwrap(), "https://aks.example:443");
        assert_eq!(config.users[0].user.client_key_data, "S0VZ");
        assert!(KubeConfig::from_base64("!!!").is_err());
    }

    #[test]
    fn test_root_nodes_are_pinned_to_cluster_set() {
        let mut parent = TreeNode::new("c/<k8sapi>", "Kubernetes API", SUB_RESOURCE_TYPE);
        parent.context.cluster_id = Some("c".to_string());
        let types = vec![
            Arc::new(ResourceType::new("api", EndpointTemplate::parse("/api", None).unwrap())),
            Arc::new(ResourceType::new("{}", EndpointTemplate::parse("/version/", None).unwrap())),
        ];

        let nodes = root_nodes(&parent, "c/<k8sapi>", &types);
        assert_eq!(nodes[0].id, "c/<k8sapi>/api");
        assert_eq!(nodes[0].expand_url, "/api");
        assert_eq!(nodes[1].display, "/version/");
        assert!(nodes.iter().all(|n| n.context.api_set_id.as_deref() == Some("c/<k8sapi>")));
    }
}
