//! Backend families behind the swagger expander
//!
//! An [`ApiSet`] owns a resource type tree and knows how to talk to one live
//! API surface. The tree walking and child synthesis live in the swagger
//! expander; an API set only fetches and enumerates.

use super::types::{ExpanderResponse, TreeNode};
use crate::swagger::ResourceType;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// How captured template values are carried over to child templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildMatching {
    /// Child templates reuse the parent's placeholder names
    ByName,
    /// Child templates may rename placeholders; values are taken in order
    ByPosition,
}

/// An instance discovered by enumerating a response
#[derive(Debug, Clone)]
pub struct SubResource {
    pub id: String,
    pub name: String,
    pub resource_type: Arc<ResourceType>,
    pub expand_url: String,
    pub delete_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiSetExpandResponse {
    pub response: ExpanderResponse,
    pub sub_resources: Vec<SubResource>,
}

#[async_trait]
pub trait ApiSet: Send + Sync {
    /// Prefix identifying the nodes owned by this set
    fn id(&self) -> &str;

    fn resource_types(&self) -> &[Arc<ResourceType>];

    /// Only consulted for nodes not yet pinned to a set
    fn applies_to_node(&self, node: &TreeNode) -> bool;

    fn child_matching(&self) -> ChildMatching;

    /// Fetch `node` and enumerate its sub resources.
    ///
    /// Non-2xx responses surface as [`crate::armclient::ApiError`] so the
    /// caller can still show the body.
    async fn expand_resource(&self, node: &TreeNode, resource_type: &ResourceType) -> Result<ApiSetExpandResponse>;

    async fn delete(&self, node: &TreeNode) -> Result<bool>;

    async fn update(&self, node: &TreeNode, content: &str) -> Result<()>;
}

/// Process-wide `id -> ApiSet` map, in registration order
#[derive(Default)]
pub struct ApiSetRegistry {
    sets: RwLock<Vec<Arc<dyn ApiSet>>>,
}

impl ApiSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a set, replacing any set with the same id
    pub fn register(&self, api_set: Arc<dyn ApiSet>) {
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(
            "Registering API set {} ({} root resource types)",
            api_set.id(),
            api_set.resource_types().len()
        );
        match sets.iter_mut().find(|s| s.id() == api_set.id()) {
            Some(existing) => *existing = api_set,
            None => sets.push(api_set),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ApiSet>> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.iter().find(|s| s.id() == id).cloned()
    }

    /// First registered set that claims `node`
    pub fn find_for_node(&self, node: &TreeNode) -> Option<Arc<dyn ApiSet>> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.iter().find(|s| s.applies_to_node(node)).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::endpoints::EndpointTemplate;
    use crate::expanders::types::{RESOURCE_TYPE, SUB_RESOURCE_TYPE};

    /// In-memory API set serving canned responses
    pub(crate) struct StaticApiSet {
        pub id: String,
        pub resource_types: Vec<Arc<ResourceType>>,
        pub item_type: &'static str,
        pub matching: ChildMatching,
        pub response: String,
    }

    impl StaticApiSet {
        pub fn new(id: &str, templates: &[&str]) -> Self {
            let resource_types = templates
                .iter()
                .map(|t| {
                    let endpoint = EndpointTemplate::parse(t, Some("2020-01-01")).unwrap();
                    Arc::new(ResourceType::new(&endpoint.last_segment_name(), endpoint))
                })
                .collect();
            Self {
                id: id.to_string(),
                resource_types,
                item_type: RESOURCE_TYPE,
                matching: ChildMatching::ByName,
                response: "{}".to_string(),
            }
        }
    }

    #[async_trait]
    impl ApiSet for StaticApiSet {
        fn id(&self) -> &str {
            &self.id
        }

        fn resource_types(&self) -> &[Arc<ResourceType>] {
            &self.resource_types
        }

        fn applies_to_node(&self, node: &TreeNode) -> bool {
            node.item_type == self.item_type
        }

        fn child_matching(&self) -> ChildMatching {
            self.matching
        }

        async fn expand_resource(&self, _node: &TreeNode, _resource_type: &ResourceType) -> Result<ApiSetExpandResponse> {
            Ok(ApiSetExpandResponse {
                response: ExpanderResponse::json(self.response.clone()),
                sub_resources: Vec::new(),
            })
        }

        async fn delete(&self, _node: &TreeNode) -> Result<bool> {
            Ok(true)
        }

        async fn update(&self, _node: &TreeNode, _content: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_keeps_registration_order() {
        let registry = ApiSetRegistry::new();
        let mut second = StaticApiSet::new("second", &["/b/{name}"]);
        second.item_type = SUB_RESOURCE_TYPE;
        registry.register(Arc::new(StaticApiSet::new("first", &["/a/{name}"])));
        registry.register(Arc::new(second));

        assert_eq!(registry.ids(), vec!["first", "second"]);
        let node = TreeNode::new("x", "x", SUB_RESOURCE_TYPE);
        assert_eq!(registry.find_for_node(&node).unwrap().id(), "second");
    }

    #[test]
    fn test_register_replaces_same_id() {
        let registry = ApiSetRegistry::new();
        registry.register(Arc::new(StaticApiSet::new("set", &["/a/{name}"])));
        registry.register(Arc::new(StaticApiSet::new("set", &["/a/{name}", "/b/{name}"])));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("set").unwrap().resource_types().len(), 2);
        assert!(registry.get("missing").is_none());
    }
}
