//! Runtime resource types
//!
//! A [`ResourceType`] is the read-only projection of a [`Path`]: only paths
//! with a permitted GET survive, and every endpoint is the one to put on the
//! wire. Trees are shared behind `Arc` so nodes can cache their resolution
//! cheaply.

use super::path::{merge_paths, DeclaredPath, Path, PathTreeConfig, RegexReplace, Verb};
use super::BuildError;
use crate::endpoints::EndpointTemplate;
use regex::Regex;
use std::sync::Arc;

/// Compiled `sub_path_regex` rewrite
#[derive(Debug, Clone)]
pub struct SubPathRegex {
    pattern: Regex,
    replace: String,
}

impl SubPathRegex {
    pub fn new(spec: &RegexReplace) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&spec.pattern)?,
            replace: spec.replace.clone(),
        })
    }

    pub fn apply(&self, url: &str) -> String {
        self.pattern.replace_all(url, self.replace.as_str()).into_owned()
    }
}

/// A navigable endpoint with its auto-expanded children and enumerated sub resources
#[derive(Debug, Clone)]
pub struct ResourceType {
    pub display: String,
    /// Wire endpoint for GET
    pub endpoint: EndpointTemplate,
    /// Verb issued for the logical GET
    pub verb: Verb,
    pub delete_endpoint: Option<EndpointTemplate>,
    pub patch_endpoint: Option<EndpointTemplate>,
    pub put_endpoint: Option<EndpointTemplate>,
    /// Reachable by substituting the parent's captured values
    pub children: Vec<Arc<ResourceType>>,
    /// Discovered by enumerating the parent's response
    pub sub_resources: Vec<Arc<ResourceType>>,
    pub fixed_content: Option<String>,
    pub sub_path_regex: Option<SubPathRegex>,
}

impl ResourceType {
    pub fn new(display: &str, endpoint: EndpointTemplate) -> Self {
        Self {
            display: display.to_string(),
            endpoint,
            verb: Verb::Get,
            delete_endpoint: None,
            patch_endpoint: None,
            put_endpoint: None,
            children: Vec::new(),
            sub_resources: Vec::new(),
            fixed_content: None,
            sub_path_regex: None,
        }
    }

    /// Apply the configured sub path rewrite (identity when none is set)
    pub fn perform_sub_path_replace(&self, url: &str) -> String {
        match &self.sub_path_regex {
            Some(regex) => regex.apply(url),
            None => url.to_string(),
        }
    }

    /// Resolve an enumerated child URL against this type's sub resources
    pub fn sub_resource_type_for_url(&self, url: &str) -> Option<Arc<ResourceType>> {
        find_resource_type(url, &self.sub_resources)
    }
}

/// Find the first resource type whose endpoint matches `url`.
///
/// Depth-first: each candidate itself, then its sub resources, then its children.
pub fn find_resource_type(url: &str, resource_types: &[Arc<ResourceType>]) -> Option<Arc<ResourceType>> {
    for resource_type in resource_types {
        if resource_type.endpoint.matches(url).is_match {
            return Some(Arc::clone(resource_type));
        }
        if let Some(found) = find_resource_type(url, &resource_type.sub_resources) {
            return Some(found);
        }
        if let Some(found) = find_resource_type(url, &resource_type.children) {
            return Some(found);
        }
    }
    None
}

/// Project a Path forest into resource types, dropping paths without a GET
pub fn resource_types_from_paths(paths: &[Path]) -> Result<Vec<Arc<ResourceType>>, BuildError> {
    let mut resource_types = Vec::new();
    for path in paths {
        let Some(get_endpoint) = path.operations.get.endpoint.as_ref() else {
            continue;
        };
        if !path.operations.get.permitted {
            continue;
        }

        let mut resource_type = ResourceType::new(&path.name, get_endpoint.clone());
        resource_type.verb = path.operations.get.verb.unwrap_or(Verb::Get);
        resource_type.delete_endpoint = permitted_endpoint(&path.operations.delete);
        resource_type.patch_endpoint = permitted_endpoint(&path.operations.patch);
        resource_type.put_endpoint = permitted_endpoint(&path.operations.put);
        resource_type.children = resource_types_from_paths(&path.children)?;
        resource_type.sub_resources = resource_types_from_paths(&path.sub_paths)?;
        resource_type.fixed_content = path.fixed_content.clone();
        resource_type.sub_path_regex = path.sub_path_regex.as_ref().map(SubPathRegex::new).transpose()?;

        resource_types.push(Arc::new(resource_type));
    }
    Ok(resource_types)
}

fn permitted_endpoint(operation: &super::PathOperation) -> Option<EndpointTemplate> {
    if operation.permitted {
        operation.endpoint.clone()
    } else {
        None
    }
}

/// Build the resource type tree for a set of declarations in one step
pub fn build_resource_types(
    declared: &[DeclaredPath],
    api_version: Option<&str>,
    config: &PathTreeConfig,
) -> Result<Vec<Arc<ResourceType>>, BuildError> {
    let paths = merge_paths(Vec::new(), declared, api_version, config)?;
    resource_types_from_paths(&paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swagger::AdditionalPath;

    fn declared(path: &str, verbs: &[Verb]) -> DeclaredPath {
        DeclaredPath::new(path, verbs)
    }

    fn sample_tree() -> Vec<Arc<ResourceType>> {
        build_resource_types(
            &[
                declared("/test/{name}", &[Verb::Get, Verb::Put, Verb::Delete]),
                declared("/test/{name}/child1", &[Verb::Get]),
                declared("/test/{name}/child1/{id}", &[Verb::Get, Verb::Delete]),
                declared("/test/{name}/action", &[Verb::Post]),
            ],
            Some("2020-01-01"),
            &PathTreeConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_projection_keeps_only_gettable_paths() {
        let tree = sample_tree();
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.display, "{name}");
        assert!(root.put_endpoint.is_some());
        assert!(root.delete_endpoint.is_some());
        assert!(root.patch_endpoint.is_none());
        // POST-only `action` is dropped
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].display, "child1");
        assert_eq!(root.children[0].sub_resources.len(), 1);
    }

    #[test]
    fn test_find_resource_type_searches_descendants() {
        let tree = sample_tree();
        let found = find_resource_type("/test/a/child1/42?api-version=2020-01-01", &tree).unwrap();
        assert_eq!(found.endpoint.path(), "/test/{name}/child1/{id}");

        let child = find_resource_type("/test/a/child1", &tree).unwrap();
        assert_eq!(child.display, "child1");

        assert!(find_resource_type("/other/a", &tree).is_none());
    }

    #[test]
    fn test_sub_resource_lookup_is_scoped() {
        let tree = sample_tree();
        let child = &tree[0].children[0];
        assert!(child.sub_resource_type_for_url("/test/a/child1/7").is_some());
        assert!(tree[0].sub_resource_type_for_url("/test/a/child1/7").is_none());
    }

    #[test]
    fn test_sub_path_regex_rewrites_urls() {
        let config = PathTreeConfig {
            additional_paths: vec![AdditionalPath {
                path: "/apis/apps/v1/namespaces".to_string(),
                get_path: Some("/api/v1/namespaces".to_string()),
                sub_path_regex: Some(RegexReplace {
                    pattern: "/api/v1/namespaces".to_string(),
                    replace: "/apis/apps/v1/namespaces".to_string(),
                }),
                ..Default::default()
            }],
            suppress_api_version: true,
            ..Default::default()
        };
        let tree = build_resource_types(&[], None, &config).unwrap();
        assert_eq!(
            tree[0].perform_sub_path_replace("/api/v1/namespaces/default"),
            "/apis/apps/v1/namespaces/default"
        );
    }

    #[test]
    fn test_invalid_sub_path_regex_is_rejected() {
        let config = PathTreeConfig {
            additional_paths: vec![AdditionalPath {
                path: "/broken".to_string(),
                sub_path_regex: Some(RegexReplace {
                    pattern: "(".to_string(),
                    replace: String::new(),
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            build_resource_types(&[], None, &config),
            Err(BuildError::Regex(_))
        ));
    }
}
