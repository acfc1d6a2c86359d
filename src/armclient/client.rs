//! ARM Client
//!
//! Combines credentials and HTTP transport for the management plane.

use super::auth::{ArmCredentials, TokenProvider};
use super::http::{read_response, HttpClient, USER_AGENT};
use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT as USER_AGENT_HEADER};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use url::Url;

pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

const ARM_ENDPOINT_SUFFIX: &str = "management.azure.com";
const PROVIDERS_API_VERSION: &str = "2017-05-10";
const RESOURCE_GRAPH_PATH: &str = "/providers/Microsoft.ResourceGraph/resources?api-version=2018-09-01-preview";

/// `GET /subscriptions/{id}/providers` response
#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    #[serde(default)]
    value: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Provider {
    namespace: String,
    #[serde(default)]
    resource_types: Vec<ProviderResourceType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResourceType {
    resource_type: String,
    #[serde(default)]
    api_versions: Vec<String>,
}

/// Lower-cased `namespace/type` -> api version
type ApiVersionLookup = HashMap<String, String>;

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    credentials: ArmCredentials,
    http: HttpClient,
    endpoint: Url,
    tenant_id: Arc<StdRwLock<Option<String>>>,
    /// Keyed on subscription id
    api_versions: Arc<RwLock<HashMap<String, Arc<ApiVersionLookup>>>>,
}

impl ArmClient {
    pub fn new(endpoint: &str, credentials: ArmCredentials) -> Result<Self> {
        let endpoint = Url::parse(endpoint).with_context(|| format!("Invalid ARM endpoint '{}'", endpoint))?;
        Ok(Self {
            credentials,
            http: HttpClient::new()?,
            endpoint,
            tenant_id: Arc::new(StdRwLock::new(None)),
            api_versions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Client for the public cloud using Azure CLI credentials
    pub fn from_cli(tenant_id: Option<String>) -> Result<Self> {
        let client = Self::new(DEFAULT_ARM_ENDPOINT, ArmCredentials::from_cli(tenant_id.clone()))?;
        client.set_tenant_id(tenant_id);
        Ok(client)
    }

    /// Client with a custom token source (tests, pre-issued tokens)
    pub fn with_token_provider(endpoint: &str, provider: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::new(endpoint, ArmCredentials::new(provider))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Tenant of the most recently used token
    pub fn tenant_id(&self) -> Option<String> {
        self.tenant_id.read().ok().and_then(|t| t.clone())
    }

    fn set_tenant_id(&self, tenant_id: Option<String>) {
        if tenant_id.is_none() {
            return;
        }
        if let Ok(mut current) = self.tenant_id.write() {
            *current = tenant_id;
        }
    }

    pub fn credentials(&self) -> &ArmCredentials {
        &self.credentials
    }

    /// Resolve a path or absolute URL to the URL to request
    pub fn request_url(&self, path: &str) -> Result<String> {
        let Ok(url) = Url::parse(path) else {
            if !is_arm_url_path(path) {
                anyhow::bail!("Url path '{}' is invalid", path);
            }
            return Ok(format!("{}{}", self.endpoint.as_str().trim_end_matches('/'), path));
        };

        let same_origin = url.origin() == self.endpoint.origin();
        if !same_origin {
            if url.scheme() != "https" {
                anyhow::bail!("Scheme must be https");
            }
            let host = url.host_str().unwrap_or_default();
            if !host.ends_with(ARM_ENDPOINT_SUFFIX) {
                anyhow::bail!("'{}' is not an ARM endpoint", host);
            }
        }
        if !is_arm_url_path(url.path()) {
            anyhow::bail!("Url path '{}' is invalid", url.path());
        }
        Ok(path.to_string())
    }

    pub async fn do_request(&self, method: Method, path: &str) -> Result<String> {
        self.do_request_with_body(method, path, "").await
    }

    /// Issue a request with ARM headers, retrying once with a fresh token on 401
    pub async fn do_request_with_body(&self, method: Method, path: &str, body: &str) -> Result<String> {
        let url = self.request_url(path)?;

        let token = self.credentials.get_token().await?;
        self.set_tenant_id(token.tenant.clone());
        let mut response = self
            .http
            .send(self.build_request(&method, &url, &token.header_value(), body))
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("401 from {}, refreshing token", url);
            let token = self.credentials.refresh_token().await?;
            self.set_tenant_id(token.tenant.clone());
            response = self
                .http
                .send(self.build_request(&method, &url, &token.header_value(), body))
                .await?;
        }

        read_response(response).await
    }

    fn build_request(&self, method: &Method, url: &str, authorization: &str, body: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(USER_AGENT_HEADER, USER_AGENT)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if !body.is_empty() {
            request = request.body(body.to_string());
        }
        request
    }

    pub async fn get(&self, path: &str) -> Result<String> {
        self.do_request(Method::GET, path).await
    }

    /// Run a Resource Graph query scoped to one subscription
    pub async fn resource_graph_query(&self, subscription_id: &str, query: &str) -> Result<String> {
        let body = serde_json::json!({
            "subscriptions": [subscription_id],
            "query": query,
            "options": { "$top": 1000, "$skip": 0 },
        });
        self.do_request_with_body(Method::POST, RESOURCE_GRAPH_PATH, &body.to_string())
            .await
    }

    /// Latest api version for an ARM resource type (`Microsoft.Web/sites`),
    /// preferring stable versions over previews
    pub async fn api_version_for(&self, subscription_id: &str, arm_type: &str) -> Result<Option<String>> {
        let lookup = self.provider_api_versions(subscription_id).await?;
        Ok(lookup.get(&arm_type.to_lowercase()).cloned())
    }

    async fn provider_api_versions(&self, subscription_id: &str) -> Result<Arc<ApiVersionLookup>> {
        {
            let cache = self.api_versions.read().await;
            if let Some(lookup) = cache.get(subscription_id) {
                return Ok(Arc::clone(lookup));
            }
        }

        let path = format!(
            "/subscriptions/{}/providers?api-version={}",
            subscription_id, PROVIDERS_API_VERSION
        );
        let body = self.get(&path).await.context("Failed to list resource providers")?;
        let providers: ProvidersResponse =
            serde_json::from_str(&body).context("Failed to parse resource providers")?;
        let lookup = Arc::new(build_api_version_lookup(&providers));

        tracing::info!(
            "Cached api versions for {} resource types in subscription {}",
            lookup.len(),
            subscription_id
        );
        let mut cache = self.api_versions.write().await;
        cache.insert(subscription_id.to_string(), Arc::clone(&lookup));
        Ok(lookup)
    }
}

fn build_api_version_lookup(providers: &ProvidersResponse) -> ApiVersionLookup {
    let mut stable = HashMap::new();
    let mut preview: HashMap<String, String> = HashMap::new();
    for provider in &providers.value {
        for resource_type in &provider.resource_types {
            let key = format!("{}/{}", provider.namespace, resource_type.resource_type).to_lowercase();
            // Versions are listed newest first
            for api_version in &resource_type.api_versions {
                if api_version.contains("preview") {
                    preview.entry(key.clone()).or_insert_with(|| api_version.clone());
                } else {
                    stable.insert(key.clone(), api_version.clone());
                    break;
                }
            }
        }
    }
    for (key, version) in preview {
        stable.entry(key).or_insert(version);
    }
    stable
}

fn is_arm_url_path(path: &str) -> bool {
    let path = path.to_lowercase();
    path.starts_with("/subscriptions") || path.starts_with("/tenants") || path.starts_with("/providers")
}
