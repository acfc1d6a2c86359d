//! Path model and PathTree builder
//!
//! Each declared URL becomes a [`Path`] and is nested under the deepest
//! existing Path whose logical endpoint is a prefix of it. A nested Path with
//! the same number of named segments as its parent is a *child* (its URL can
//! be built from the parent's captured values); otherwise it is a *sub path*
//! whose instances have to be enumerated from a live response.
//!
//! Input is processed in sorted order (condensed path, then full path), which
//! makes the resulting forest independent of the order declarations arrive in.

use super::BuildError;
use crate::endpoints::{condense_path, EndpointTemplate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs understood by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Put,
    Patch,
    Post,
    Delete,
    Head,
    Options,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
        }
    }

    pub fn to_method(self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Put => reqwest::Method::PUT,
            Verb::Patch => reqwest::Method::PATCH,
            Verb::Post => reqwest::Method::POST,
            Verb::Delete => reqwest::Method::DELETE,
            Verb::Head => reqwest::Method::HEAD,
            Verb::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Get),
            "put" => Ok(Verb::Put),
            "patch" => Ok(Verb::Patch),
            "post" => Ok(Verb::Post),
            "delete" => Ok(Verb::Delete),
            "head" => Ok(Verb::Head),
            "options" => Ok(Verb::Options),
            other => Err(format!("unhandled verb: {}", other)),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation (GET, PUT, ...) on a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOperation {
    pub permitted: bool,
    /// Set only when the verb is overridden (e.g. a logical GET issued as POST)
    pub verb: Option<Verb>,
    /// Wire endpoint for the operation
    pub endpoint: Option<EndpointTemplate>,
}

impl PathOperation {
    fn permitted_at(endpoint: EndpointTemplate) -> Self {
        Self {
            permitted: true,
            verb: None,
            endpoint: Some(endpoint),
        }
    }

    fn merge_from(&mut self, other: &PathOperation) {
        if other.permitted {
            *self = other.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOperations {
    pub get: PathOperation,
    pub delete: PathOperation,
    pub patch: PathOperation,
    pub post: PathOperation,
    pub put: PathOperation,
}

impl PathOperations {
    fn merge_from(&mut self, other: &PathOperations) {
        self.get.merge_from(&other.get);
        self.delete.merge_from(&other.delete);
        self.patch.merge_from(&other.patch);
        self.post.merge_from(&other.post);
        self.put.merge_from(&other.put);
    }

    fn permitted_verbs(&self) -> Vec<&'static str> {
        [
            (&self.get, "GET"),
            (&self.put, "PUT"),
            (&self.patch, "PATCH"),
            (&self.post, "POST"),
            (&self.delete, "DELETE"),
        ]
        .iter()
        .filter(|(op, _)| op.permitted)
        .map(|(_, name)| *name)
        .collect()
    }
}

/// Regex replacement applied to enumerated sub resource URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexReplace {
    #[serde(rename = "match")]
    pub pattern: String,
    pub replace: String,
}

/// Build-time node of the resource hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub name: String,
    pub condensed_endpoint_path: String,
    pub fixed_content: Option<String>,
    /// The logical endpoint; operations may override it
    pub endpoint: EndpointTemplate,
    pub operations: PathOperations,
    pub children: Vec<Path>,
    pub sub_paths: Vec<Path>,
    pub sub_path_regex: Option<RegexReplace>,
}

impl Path {
    fn new(endpoint: EndpointTemplate, name: Option<&str>) -> Self {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| endpoint.last_segment_name());
        Self {
            name,
            condensed_endpoint_path: condense_path(&endpoint.path()),
            fixed_content: None,
            endpoint,
            operations: PathOperations::default(),
            children: Vec::new(),
            sub_paths: Vec::new(),
            sub_path_regex: None,
        }
    }

    fn match_key(&self, use_condensed_path: bool) -> String {
        if use_condensed_path {
            self.condensed_endpoint_path.clone()
        } else {
            self.endpoint.path()
        }
    }
}

/// A declared API path and the verbs it supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPath {
    pub path: String,
    pub verbs: Vec<Verb>,
}

impl DeclaredPath {
    pub fn new(path: &str, verbs: &[Verb]) -> Self {
        Self {
            path: path.to_string(),
            verbs: verbs.to_vec(),
        }
    }
}

/// Reconciles a declared wire path with the desired logical grouping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOverride {
    /// Logical path to group the declaration under
    #[serde(default)]
    pub path: Option<String>,
    /// Verb to use for logical GET requests
    #[serde(default)]
    pub get_verb: Option<Verb>,
    /// Also use the logical path on the wire
    #[serde(default)]
    pub rewrite_path: bool,
    #[serde(default)]
    pub put_path: Option<String>,
    #[serde(default)]
    pub delete_path: Option<String>,
}

/// Synthetic path injected into the hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalPath {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    /// Wire path used for GET requests when different from `path`
    #[serde(default)]
    pub get_path: Option<String>,
    /// Static content displayed instead of making a request
    #[serde(default)]
    pub fixed_content: Option<String>,
    #[serde(default)]
    pub sub_path_regex: Option<RegexReplace>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTreeConfig {
    /// Keyed on the declared path
    #[serde(default)]
    pub overrides: HashMap<String, PathOverride>,
    #[serde(default)]
    pub additional_paths: Vec<AdditionalPath>,
    /// Don't append `?api-version=` to built URLs
    #[serde(default)]
    pub suppress_api_version: bool,
    /// Compare full template text (including placeholder names) when nesting
    #[serde(default)]
    pub validate_captured_segments: bool,
}

enum Entry<'a> {
    Declared(&'a DeclaredPath),
    Additional(&'a AdditionalPath),
}

impl<'a> Entry<'a> {
    /// Logical path the entry will be grouped under
    fn sort_path(&self, config: &'a PathTreeConfig) -> &'a str {
        match self {
            Entry::Declared(d) => config
                .overrides
                .get(&d.path)
                .and_then(|o| o.path.as_deref())
                .unwrap_or(&d.path),
            Entry::Additional(a) => &a.path,
        }
    }

    fn declared_path(&self) -> &'a str {
        match self {
            Entry::Declared(d) => &d.path,
            Entry::Additional(a) => &a.path,
        }
    }
}

#[derive(Clone, Copy)]
enum Branch {
    Child,
    Sub,
}

/// Merge `declared` (plus the config's additional paths) into `paths`
pub fn merge_paths(
    mut paths: Vec<Path>,
    declared: &[DeclaredPath],
    api_version: Option<&str>,
    config: &PathTreeConfig,
) -> Result<Vec<Path>, BuildError> {
    let api_version = if config.suppress_api_version {
        None
    } else {
        api_version
    };

    let mut entries: Vec<Entry> = declared
        .iter()
        .map(Entry::Declared)
        .chain(config.additional_paths.iter().map(Entry::Additional))
        .collect();
    entries.sort_by(|a, b| {
        let (a_path, b_path) = (a.sort_path(config), b.sort_path(config));
        condense_path(a_path)
            .cmp(&condense_path(b_path))
            .then_with(|| a_path.cmp(b_path))
            .then_with(|| a.declared_path().cmp(b.declared_path()))
    });

    let use_condensed_path = !config.validate_captured_segments;
    for entry in entries {
        let path = match entry {
            Entry::Declared(declared) => path_from_declaration(declared, api_version, config)?,
            Entry::Additional(additional) => path_from_additional(additional, api_version)?,
        };
        insert_path(&mut paths, path, use_condensed_path);
    }

    Ok(paths)
}

fn path_from_declaration(
    declared: &DeclaredPath,
    api_version: Option<&str>,
    config: &PathTreeConfig,
) -> Result<Path, BuildError> {
    let default_override = PathOverride::default();
    let path_override = config
        .overrides
        .get(&declared.path)
        .unwrap_or(&default_override);

    let logical_path = path_override.path.as_deref().unwrap_or(&declared.path);
    let endpoint = EndpointTemplate::parse(logical_path, api_version)?;
    let mut path = Path::new(endpoint.clone(), None);

    let get_verb = path_override.get_verb.unwrap_or(Verb::Get);
    let declares = |verb: Verb| declared.verbs.contains(&verb);

    if declares(get_verb) {
        let get_endpoint = if path_override.path.is_none() || path_override.rewrite_path {
            endpoint.clone()
        } else {
            EndpointTemplate::parse(&declared.path, api_version)?
        };
        path.operations.get = PathOperation {
            permitted: true,
            verb: (get_verb != Verb::Get).then_some(get_verb),
            endpoint: Some(get_endpoint),
        };
    }

    let ops = &mut path.operations;
    for (verb, op) in [
        (Verb::Delete, &mut ops.delete),
        (Verb::Patch, &mut ops.patch),
        (Verb::Post, &mut ops.post),
        (Verb::Put, &mut ops.put),
    ] {
        if declares(verb) && get_verb != verb {
            *op = PathOperation::permitted_at(endpoint.clone());
        }
    }

    if let Some(put_path) = &path_override.put_path {
        ops.put = PathOperation::permitted_at(EndpointTemplate::parse(put_path, api_version)?);
    }
    if let Some(delete_path) = &path_override.delete_path {
        ops.delete = PathOperation::permitted_at(EndpointTemplate::parse(delete_path, api_version)?);
    }

    Ok(path)
}

fn path_from_additional(
    additional: &AdditionalPath,
    api_version: Option<&str>,
) -> Result<Path, BuildError> {
    let endpoint = EndpointTemplate::parse(&additional.path, api_version)?;
    let get_endpoint = match &additional.get_path {
        Some(get_path) => EndpointTemplate::parse(get_path, api_version)?,
        None => endpoint.clone(),
    };

    let mut path = Path::new(endpoint, additional.name.as_deref());
    path.operations.get = PathOperation::permitted_at(get_endpoint);
    path.fixed_content = additional.fixed_content.clone();
    path.sub_path_regex = additional.sub_path_regex.clone();
    Ok(path)
}

fn insert_path(paths: &mut Vec<Path>, path: Path, use_condensed_path: bool) {
    let key = path.match_key(use_condensed_path);
    let Some(trail) = find_deepest_path(paths, &key, use_condensed_path) else {
        paths.push(path);
        return;
    };

    let parent = node_at_mut(paths, &trail);
    if parent.endpoint.path() == path.endpoint.path() {
        // Same logical endpoint declared twice (e.g. via an override): merge
        parent.operations.merge_from(&path.operations);
        if parent.fixed_content.is_none() {
            parent.fixed_content = path.fixed_content;
        }
        if parent.sub_path_regex.is_none() {
            parent.sub_path_regex = path.sub_path_regex;
        }
        parent.children.extend(path.children);
        parent.sub_paths.extend(path.sub_paths);
    } else if parent.endpoint.named_segment_count() == path.endpoint.named_segment_count() {
        parent.children.push(path);
    } else {
        parent.sub_paths.push(path);
    }
}

/// Locate the deepest node whose key is a segment-aligned prefix of `key`.
/// Siblings are searched in insertion order and the first match wins.
fn find_deepest_path(paths: &[Path], key: &str, use_condensed_path: bool) -> Option<Vec<(Branch, usize)>> {
    fn search(
        paths: &[Path],
        branch: Branch,
        key: &str,
        use_condensed_path: bool,
        trail: &mut Vec<(Branch, usize)>,
    ) -> bool {
        for (index, path) in paths.iter().enumerate() {
            if !is_segment_prefix(&path.match_key(use_condensed_path), key) {
                continue;
            }
            trail.push((branch, index));
            if !search(&path.children, Branch::Child, key, use_condensed_path, trail) {
                search(&path.sub_paths, Branch::Sub, key, use_condensed_path, trail);
            }
            return true;
        }
        false
    }

    let mut trail = Vec::new();
    // Roots are addressed with `Branch::Child` on the top-level vector
    search(paths, Branch::Child, key, use_condensed_path, &mut trail).then_some(trail)
}

fn node_at_mut<'a>(paths: &'a mut [Path], trail: &[(Branch, usize)]) -> &'a mut Path {
    let ((_, root), rest) = trail
        .split_first()
        .map(|(first, rest)| (*first, rest))
        .unwrap_or(((Branch::Child, 0), &[]));
    let mut node = &mut paths[root];
    for (branch, index) in rest {
        node = match branch {
            Branch::Child => &mut node.children[*index],
            Branch::Sub => &mut node.sub_paths[*index],
        };
    }
    node
}

fn is_segment_prefix(candidate: &str, key: &str) -> bool {
    if candidate == key {
        return true;
    }
    key.starts_with(candidate) && (candidate.ends_with('/') || key[candidate.len()..].starts_with('/'))
}

/// Indented text dump of a Path forest
pub fn render_paths(paths: &[Path]) -> String {
    fn render(out: &mut String, path: &Path, depth: usize, marker: &str) {
        let get_endpoint = path
            .operations
            .get
            .endpoint
            .as_ref()
            .map(|e| e.path())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}{}{}  {}  [{}]",
            "  ".repeat(depth),
            marker,
            path.name,
            path.endpoint.path(),
            path.operations.permitted_verbs().join(",")
        ));
        if get_endpoint != path.endpoint.path() {
            out.push_str(&format!("  (GET {})", get_endpoint));
        }
        out.push('\n');
        for child in &path.children {
            render(out, child, depth + 1, "+ ");
        }
        for sub in &path.sub_paths {
            render(out, sub, depth + 1, "* ");
        }
    }

    let mut out = String::new();
    for path in paths {
        render(&mut out, path, 0, "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> DeclaredPath {
        DeclaredPath::new(path, &[Verb::Get])
    }

    fn build(declared: &[DeclaredPath], config: &PathTreeConfig) -> Vec<Path> {
        merge_paths(Vec::new(), declared, Some("2018-05-01"), config).unwrap()
    }

    fn get_template(path: &Path) -> String {
        path.operations.get.endpoint.as_ref().unwrap().path()
    }

    #[test]
    fn test_simple_hierarchy_out_of_order() {
        let paths = build(
            &[
                get("/test/{testname}/child1/{name2}"),
                get("/test/{testname}/child1"),
                get("/test/{testname}"),
            ],
            &PathTreeConfig::default(),
        );

        assert_eq!(paths.len(), 1);
        let root = &paths[0];
        assert_eq!(root.endpoint.path(), "/test/{testname}");
        assert_eq!(root.children.len(), 1);
        assert!(root.sub_paths.is_empty());

        let child = &root.children[0];
        assert_eq!(child.endpoint.path(), "/test/{testname}/child1");
        assert_eq!(child.name, "child1");
        assert!(child.children.is_empty());
        assert_eq!(child.sub_paths.len(), 1);

        let sub = &child.sub_paths[0];
        assert_eq!(sub.endpoint.path(), "/test/{testname}/child1/{name2}");
        assert_eq!(sub.name, "{name2}");
    }

    #[test]
    fn test_trailing_slashes_are_ignored() {
        let paths = build(
            &[
                get("/test/{testname}/"),
                get("/test/{testname}/child1/"),
                get("/test/{testname}/child1/{name2}"),
            ],
            &PathTreeConfig::default(),
        );
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].endpoint.path(), "/test/{testname}");
        assert_eq!(paths[0].children[0].sub_paths.len(), 1);
    }

    #[test]
    fn test_path_override_keeps_wire_endpoint() {
        let mut config = PathTreeConfig::default();
        config.overrides.insert(
            "/testx/{testname}/child1".to_string(),
            PathOverride {
                path: Some("/test/{testname}/child1".to_string()),
                ..Default::default()
            },
        );
        config.overrides.insert(
            "/testx/{testname}/child1/{name2}".to_string(),
            PathOverride {
                path: Some("/test/{testname}/child1/{name2}".to_string()),
                ..Default::default()
            },
        );

        let paths = build(
            &[
                get("/testx/{testname}/child1/{name2}"),
                get("/testx/{testname}/child1"),
                get("/test/{testname}"),
            ],
            &config,
        );

        assert_eq!(paths.len(), 1);
        let child = &paths[0].children[0];
        assert_eq!(child.endpoint.path(), "/test/{testname}/child1");
        assert_eq!(get_template(child), "/testx/{testname}/child1");

        let sub = &child.sub_paths[0];
        assert_eq!(sub.endpoint.path(), "/test/{testname}/child1/{name2}");
        assert_eq!(get_template(sub), "/testx/{testname}/child1/{name2}");
    }

    #[test]
    fn test_rewrite_override_uses_logical_path_on_the_wire() {
        let mut config = PathTreeConfig::default();
        config.overrides.insert(
            "/Test/{Name}".to_string(),
            PathOverride {
                path: Some("/test/{name}".to_string()),
                rewrite_path: true,
                ..Default::default()
            },
        );
        let paths = build(&[get("/Test/{Name}")], &config);
        assert_eq!(get_template(&paths[0]), "/test/{name}");
    }

    #[test]
    fn test_additional_paths_group_declarations() {
        let config = PathTreeConfig {
            additional_paths: vec![
                AdditionalPath {
                    path: "/testx".to_string(),
                    fixed_content: Some("placeholder".to_string()),
                    ..Default::default()
                },
                AdditionalPath {
                    path: "/testx/{testname}".to_string(),
                    get_path: Some("/test/{testname}".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let paths = build(
            &[
                get("/testx/{testname}/child1/{name2}"),
                get("/testx/{testname}/child1"),
                get("/test/{testname}/foo"),
                get("/test/{testname}"),
                get("/test"),
            ],
            &config,
        );

        assert_eq!(paths.len(), 2);

        let test = &paths[0];
        assert_eq!(test.endpoint.path(), "/test");
        assert!(test.children.is_empty());
        assert_eq!(test.sub_paths.len(), 1);
        assert_eq!(test.sub_paths[0].children[0].endpoint.path(), "/test/{testname}/foo");

        let testx = &paths[1];
        assert_eq!(testx.endpoint.path(), "/testx");
        assert_eq!(testx.fixed_content.as_deref(), Some("placeholder"));
        let named = &testx.sub_paths[0];
        assert_eq!(named.endpoint.path(), "/testx/{testname}");
        assert_eq!(get_template(named), "/test/{testname}");
        assert_eq!(named.children.len(), 1);
    }

    #[test]
    fn test_delete_only_declaration_merges_into_existing_node() {
        let mut config = PathTreeConfig::default();
        config.overrides.insert(
            "/other/{testname}".to_string(),
            PathOverride {
                path: Some("/test/{testname}".to_string()),
                ..Default::default()
            },
        );
        let paths = build(
            &[
                get("/test/{testname}"),
                DeclaredPath::new("/other/{testname}", &[Verb::Delete]),
            ],
            &config,
        );

        assert_eq!(paths.len(), 1);
        let ops = &paths[0].operations;
        assert!(ops.get.permitted);
        assert!(ops.delete.permitted);
        assert!(paths[0].children.is_empty());
    }

    #[test]
    fn test_get_verb_override() {
        let mut config = PathTreeConfig::default();
        config.overrides.insert(
            "/test/{name}/listKeys".to_string(),
            PathOverride {
                get_verb: Some(Verb::Post),
                ..Default::default()
            },
        );
        let paths = build(
            &[
                get("/test/{name}"),
                DeclaredPath::new("/test/{name}/listKeys", &[Verb::Post]),
            ],
            &config,
        );

        let keys = &paths[0].children[0];
        assert!(keys.operations.get.permitted);
        assert_eq!(keys.operations.get.verb, Some(Verb::Post));
        assert!(!keys.operations.post.permitted);
    }

    #[test]
    fn test_sibling_prefix_is_segment_aligned() {
        let paths = build(&[get("/test"), get("/testing")], &PathTreeConfig::default());
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_suppress_api_version() {
        let config = PathTreeConfig {
            suppress_api_version: true,
            ..Default::default()
        };
        let paths = build(&[get("/api/v1/namespaces")], &config);
        assert_eq!(paths[0].endpoint.api_version, None);
    }

    #[test]
    fn test_render_paths_marks_children_and_sub_paths() {
        let paths = build(
            &[get("/test/{a}"), get("/test/{a}/child"), get("/test/{a}/child/{b}")],
            &PathTreeConfig::default(),
        );
        let rendered = render_paths(&paths);
        assert!(rendered.contains("+ child"));
        assert!(rendered.contains("* {b}"));
    }
}
