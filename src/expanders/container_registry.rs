//! Container registry data plane
//!
//! Adds a "Repositories" node under every registry resource and walks the
//! registry's v2/ACR API from there: repositories, tags and manifests, with
//! `?last=` paging surfaced as "more..." nodes.
//!
//! Registry calls use their own bearer token, obtained by exchanging the ARM
//! token for a registry refresh token and then for a scoped access token.

use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, RegistryContext, TreeNode, RESOURCE_TYPE, SUB_RESOURCE_TYPE};
use crate::armclient::{ArmClient, HttpClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

const SOURCE: &str = "ContainerRegistryExpander";
pub const REGISTRY_NAMESPACE: &str = "containerRegistry";
pub const REGISTRY_TEMPLATE_URL: &str =
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.ContainerRegistry/registries/{registryName}";

pub const REPOSITORY_TYPE: &str = "containerRegistry.repository";
pub const TAGS_TYPE: &str = "containerRegistry.repository.tags";
pub const TAG_TYPE: &str = "containerRegistry.repository.tag";
pub const MANIFESTS_TYPE: &str = "containerRegistry.repository.manifests";
pub const MANIFEST_TYPE: &str = "containerRegistry.repository.manifest";

const MORE: &str = "more...";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryProperties {
    #[serde(default)]
    login_server: String,
}

#[derive(Debug, Deserialize)]
struct RegistryResource {
    properties: RegistryProperties,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Kinds of node created from a listing
#[derive(Debug, Clone, Copy)]
enum ItemKind {
    Repository,
    Tag,
    Manifest,
}

/// Paged listing endpoint and how to read item names out of it
struct Listing<'a> {
    url: String,
    scope: String,
    /// Dotted path to the item array
    collection: &'a str,
    /// Field holding the item name; the items are plain strings when `None`
    item_field: Option<&'a str>,
    kind: ItemKind,
    /// Item type of the "more..." node; no paging when `None`
    continuation: Option<&'a str>,
}

pub struct ContainerRegistryExpander {
    arm: ArmClient,
    http: HttpClient,
    scheme: String,
}

impl ContainerRegistryExpander {
    pub fn new(arm: ArmClient) -> Result<Self> {
        Ok(Self {
            arm,
            http: HttpClient::new()?,
            scheme: "https".to_string(),
        })
    }

    /// Talk to login servers over another scheme (plain-HTTP test registries)
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    fn is_registry(node: &TreeNode) -> bool {
        node.item_type == RESOURCE_TYPE
            && node
                .swagger_resource_type
                .as_ref()
                .is_some_and(|rt| rt.endpoint.template_url == REGISTRY_TEMPLATE_URL)
    }

    fn registry_url(&self, login_server: &str, path: &str) -> String {
        format!("{}://{}{}", self.scheme, login_server, path)
    }

    async fn login_server(&self, registry_id: &str) -> Result<String> {
        let body = self
            .arm
            .get(registry_id)
            .await
            .with_context(|| format!("Failed to get registry {}", registry_id))?;
        let registry: RegistryResource =
            serde_json::from_str(&body).with_context(|| format!("Error unmarshalling response for {}", registry_id))?;
        if registry.properties.login_server.is_empty() {
            anyhow::bail!("Registry {} has no login server", registry_id);
        }
        Ok(registry.properties.login_server)
    }

    /// Scoped registry access token
    async fn registry_token(&self, login_server: &str, scope: &str) -> Result<String> {
        let challenge = self
            .http
            .send(self.http.request(Method::GET, &self.registry_url(login_server, "/v2")))
            .await
            .context("Error validating loginserver/v2 endpoint")?;
        if challenge.status() != StatusCode::UNAUTHORIZED || !challenge.headers().contains_key(WWW_AUTHENTICATE) {
            anyhow::bail!("Expected a 401 with WWW-Authenticate from {}/v2", login_server);
        }

        let tenant = self.arm.tenant_id().unwrap_or_default();
        let arm_token = self
            .arm
            .credentials()
            .get_token()
            .await
            .context("Failed to get ARM token")?;

        let body = self
            .http
            .execute(
                self.http
                    .request(Method::POST, &self.registry_url(login_server, "/oauth2/exchange"))
                    .form(&[
                        ("grant_type", "access_token"),
                        ("service", login_server),
                        ("tenant", tenant.as_str()),
                        ("access_token", arm_token.access_token.as_str()),
                    ]),
            )
            .await
            .context("Refresh token request failed")?;
        let refresh: RefreshTokenResponse =
            serde_json::from_str(&body).context("Error unmarshalling refresh token response")?;

        let body = self
            .http
            .execute(
                self.http
                    .request(Method::POST, &self.registry_url(login_server, "/oauth2/token"))
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("service", login_server),
                        ("scope", scope),
                        ("refresh_token", refresh.refresh_token.as_str()),
                    ]),
            )
            .await
            .context("Access token request failed")?;
        let access: AccessTokenResponse =
            serde_json::from_str(&body).context("Error unmarshalling access token response")?;
        Ok(access.access_token)
    }

    async fn request(&self, method: Method, url: &str, token: &str) -> Result<String> {
        self.http
            .execute(self.http.request(method, url).bearer_auth(token))
            .await
    }

    async fn list_items(&self, url: &str, token: &str, listing: &Listing<'_>) -> Result<(String, Vec<String>)> {
        let body = self.request(Method::GET, url, token).await?;
        let items = item_names(&body, listing.collection, listing.item_field)?;
        Ok((body, items))
    }

    async fn expand_listing(&self, node: &TreeNode, listing: Listing<'_>) -> Result<ExpanderResult> {
        let registry = &node.context.registry;
        let login_server = registry.login_server.as_deref().context("Node has no login server")?;
        let token = self.registry_token(login_server, &listing.scope).await?;

        let url = match (&registry.last_item, listing.continuation) {
            (Some(last), Some(_)) => format!("{}?last={}", listing.url, urlencoding::encode(last)),
            _ => listing.url.clone(),
        };
        let (body, items) = self.list_items(&url, &token, &listing).await?;

        let mut nodes: Vec<TreeNode> = items
            .iter()
            .map(|item| item_node(node, listing.kind, item))
            .collect();

        if let (Some(continuation), Some(last)) = (listing.continuation, items.last()) {
            let next_url = format!("{}?last={}", listing.url, urlencoding::encode(last));
            // A failed probe just means no "more..." node
            let has_more = match self.list_items(&next_url, &token, &listing).await {
                Ok((_, next)) => !next.is_empty(),
                Err(e) => {
                    tracing::warn!("Paging probe for {} failed: {:#}", listing.url, e);
                    false
                }
            };
            if has_more {
                nodes.push(more_node(node, continuation, last));
            }
        }

        Ok(ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes))
    }

    async fn expand_repositories(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let registry_id = node
            .context
            .registry
            .registry_id
            .as_deref()
            .context("Node has no registry id")?;
        let login_server = self.login_server(registry_id).await?;

        let mut node = node.clone();
        node.context.registry.login_server = Some(login_server.clone());
        self.expand_listing(
            &node,
            Listing {
                url: self.registry_url(&login_server, "/v2/_catalog"),
                scope: "registry:catalog:*".to_string(),
                collection: "repositories",
                item_field: None,
                kind: ItemKind::Repository,
                continuation: Some(SUB_RESOURCE_TYPE),
            },
        )
        .await
    }

    async fn expand_repository(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let (login_server, repository) = repository_of(node)?;
        let token = self
            .registry_token(login_server, &format!("repository:{}:pull", repository))
            .await?;
        let body = self
            .request(
                Method::GET,
                &self.registry_url(login_server, &format!("/acr/v1/{}", repository)),
                &token,
            )
            .await?;

        let nodes = vec![
            group_node(node, TAGS_TYPE, "Tags"),
            group_node(node, MANIFESTS_TYPE, "Manifests"),
        ];
        Ok(ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes))
    }

    async fn expand_tag(&self, node: &TreeNode) -> Result<ExpanderResult> {
        let (login_server, repository) = repository_of(node)?;
        let tag = node.context.registry.tag.as_deref().context("Node has no tag")?;
        let token = self
            .registry_token(login_server, &format!("repository:{}:metadata_read", repository))
            .await?;
        let body = self
            .request(
                Method::GET,
                &self.registry_url(login_server, &format!("/acr/v1/{}/_tags/{}", repository, tag)),
                &token,
            )
            .await?;

        let value: Value = serde_json::from_str(&body).context("Error unmarshalling tag response")?;
        let digest = value
            .pointer("/tag/digest")
            .and_then(Value::as_str)
            .context("Tag response has no digest")?;
        let nodes = vec![item_node(node, ItemKind::Manifest, digest)];
        Ok(ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes))
    }

    async fn expand_node(&self, node: &TreeNode) -> Result<ExpanderResult> {
        if node.item_type == SUB_RESOURCE_TYPE {
            return self.expand_repositories(node).await;
        }

        let (login_server, repository) = repository_of(node)?;
        let pull = format!("repository:{}:pull", repository);
        match node.item_type.as_str() {
            REPOSITORY_TYPE => self.expand_repository(node).await,
            TAG_TYPE => self.expand_tag(node).await,
            TAGS_TYPE => {
                let listing = Listing {
                    url: self.registry_url(login_server, &format!("/acr/v1/{}/_tags", repository)),
                    scope: pull,
                    collection: "tags",
                    item_field: Some("name"),
                    kind: ItemKind::Tag,
                    continuation: Some(TAGS_TYPE),
                };
                self.expand_listing(node, listing).await
            }
            MANIFESTS_TYPE => {
                let listing = Listing {
                    url: self.registry_url(login_server, &format!("/acr/v1/{}/_manifests", repository)),
                    scope: pull,
                    collection: "manifests",
                    item_field: Some("digest"),
                    kind: ItemKind::Manifest,
                    continuation: Some(MANIFESTS_TYPE),
                };
                self.expand_listing(node, listing).await
            }
            MANIFEST_TYPE => {
                let digest = node.context.registry.digest.as_deref().context("Node has no digest")?;
                let listing = Listing {
                    url: self.registry_url(login_server, &format!("/v2/{}/manifests/{}", repository, digest)),
                    scope: format!("repository:{}:metadata_read", repository),
                    collection: "manifest.tags",
                    item_field: None,
                    kind: ItemKind::Tag,
                    continuation: None,
                };
                self.expand_listing(node, listing).await
            }
            other => anyhow::bail!("Unhandled registry item type '{}'", other),
        }
    }
}

/// `(login server, repository)` carried by a data-plane node
fn repository_of(node: &TreeNode) -> Result<(&str, &str)> {
    let registry = &node.context.registry;
    let login_server = registry.login_server.as_deref().context("Node has no login server")?;
    let repository = registry.repository.as_deref().context("Node has no repository")?;
    Ok((login_server, repository))
}

/// Item names under a dotted collection path; a missing collection is empty
fn item_names(body: &str, collection: &str, item_field: Option<&str>) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(body).context("Error unmarshalling registry response")?;
    let pointer = format!("/{}", collection.replace('.', "/"));
    let Some(items) = value.pointer(&pointer).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            let name = match item_field {
                Some(field) => item.get(field).and_then(Value::as_str),
                None => item.as_str(),
            };
            name.map(str::to_string)
                .with_context(|| format!("Unexpected item in '{}': {}", collection, item))
        })
        .collect()
}

fn registry_child(parent: &TreeNode, id: String, name: &str, item_type: &str, registry: RegistryContext) -> TreeNode {
    let mut node = TreeNode::child_of(parent, id, name, item_type).with_namespace(REGISTRY_NAMESPACE);
    node.context.registry = registry;
    node
}

fn item_node(parent: &TreeNode, kind: ItemKind, item: &str) -> TreeNode {
    let parent_ctx = &parent.context.registry;
    let mut registry = RegistryContext {
        login_server: parent_ctx.login_server.clone(),
        repository: parent_ctx.repository.clone(),
        ..Default::default()
    };
    let item_type = match kind {
        ItemKind::Repository => {
            registry.repository = Some(item.to_string());
            REPOSITORY_TYPE
        }
        ItemKind::Tag => {
            registry.tag = Some(item.to_string());
            TAG_TYPE
        }
        ItemKind::Manifest => {
            registry.digest = Some(item.to_string());
            MANIFEST_TYPE
        }
    };
    let id = format!("{}/{}", parent.id, item);
    registry_child(parent, id.clone(), item, item_type, registry).with_delete_url(id)
}

fn group_node(parent: &TreeNode, item_type: &str, title: &str) -> TreeNode {
    let parent_ctx = &parent.context.registry;
    let registry = RegistryContext {
        login_server: parent_ctx.login_server.clone(),
        repository: parent_ctx.repository.clone(),
        ..Default::default()
    };
    registry_child(parent, format!("{}/{}", parent.id, title), title, item_type, registry)
}

/// "more..." continuation replacing itself with the next page
fn more_node(parent: &TreeNode, item_type: &str, last_item: &str) -> TreeNode {
    let mut registry = parent.context.registry.clone();
    registry.last_item = Some(last_item.to_string());

    let id = if item_type == SUB_RESOURCE_TYPE {
        format!("{}/<more>", parent.id)
    } else {
        format!("{}/{}", parent.id, MORE)
    };
    let mut node = registry_child(parent, id, MORE, item_type, registry);
    node.suppress_swagger_expand = true;
    node.suppress_generic_expand = true;
    node.expand_in_place = true;
    node
}

#[async_trait]
impl Expander for ContainerRegistryExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(Self::is_registry(node) || node.namespace == REGISTRY_NAMESPACE)
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        if node.namespace != REGISTRY_NAMESPACE && Self::is_registry(node) {
            let mut repositories = TreeNode::child_of(
                node,
                format!("{}/<repositories>", node.id),
                "Repositories",
                SUB_RESOURCE_TYPE,
            )
            .with_namespace(REGISTRY_NAMESPACE);
            repositories.suppress_swagger_expand = true;
            repositories.suppress_generic_expand = true;
            repositories.context.registry.registry_id = Some(node.expand_url.clone());
            return ExpanderResult::nodes(SOURCE, vec![repositories]);
        }

        match self.expand_node(node).await {
            Ok(result) => result,
            Err(e) => ExpanderResult::failed(SOURCE, e),
        }
    }

    async fn delete(&self, node: &TreeNode) -> Result<bool> {
        let path = match node.item_type.as_str() {
            REPOSITORY_TYPE => {
                let (_, repository) = repository_of(node)?;
                format!("/acr/v1/{}", repository)
            }
            TAG_TYPE => {
                let (_, repository) = repository_of(node)?;
                let tag = node.context.registry.tag.as_deref().context("Node has no tag")?;
                format!("/acr/v1/{}/_tags/{}", repository, tag)
            }
            MANIFEST_TYPE => {
                let (_, repository) = repository_of(node)?;
                let digest = node.context.registry.digest.as_deref().context("Node has no digest")?;
                format!("/v2/{}/manifests/{}", repository, digest)
            }
            _ => return Ok(false),
        };

        let (login_server, repository) = repository_of(node)?;
        let token = self
            .registry_token(login_server, &format!("repository:{}:delete", repository))
            .await?;
        self.request(Method::DELETE, &self.registry_url(login_server, &path), &token)
            .await
            .with_context(|| format!("Failed to delete {}", node.id))?;
        Ok(true)
    }
}
