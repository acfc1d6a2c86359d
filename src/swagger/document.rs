//! Swagger 2.0 document reader
//!
//! Only the parts the hierarchy needs are read: `info.version` and, for every
//! entry in `paths`, which HTTP verbs it declares.

use super::path::{DeclaredPath, Verb};
use super::BuildError;
use serde_json::Value;

/// Path declarations extracted from a swagger document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwaggerDocument {
    pub version: Option<String>,
    pub paths: Vec<DeclaredPath>,
}

impl SwaggerDocument {
    pub fn from_json(json: &str) -> Result<Self, BuildError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| BuildError::Document(e.to_string()))?;
        declared_paths_from_swagger(&value)
    }
}

/// Read `info.version` and the declared verbs of every path
pub fn declared_paths_from_swagger(doc: &Value) -> Result<SwaggerDocument, BuildError> {
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| BuildError::Document("missing 'paths' object".to_string()))?;

    let version = doc
        .pointer("/info/version")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut declared = Vec::with_capacity(paths.len());
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            return Err(BuildError::Document(format!("path '{}' is not an object", path)));
        };
        // Non-verb keys such as `parameters` are skipped
        let mut verbs: Vec<Verb> = item.keys().filter_map(|k| k.parse().ok()).collect();
        verbs.sort();
        declared.push(DeclaredPath {
            path: path.clone(),
            verbs,
        });
    }

    Ok(SwaggerDocument {
        version,
        paths: declared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_version_and_verbs() {
        let doc = json!({
            "swagger": "2.0",
            "info": { "version": "2018-05-01" },
            "paths": {
                "/test/{name}": {
                    "parameters": [],
                    "get": {},
                    "delete": {}
                },
                "/test/{name}/child1": { "get": {} }
            }
        });

        let parsed = declared_paths_from_swagger(&doc).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("2018-05-01"));
        assert_eq!(parsed.paths.len(), 2);

        let root = parsed.paths.iter().find(|p| p.path == "/test/{name}").unwrap();
        assert_eq!(root.verbs, vec![Verb::Get, Verb::Delete]);
    }

    #[test]
    fn test_missing_paths_is_an_error() {
        let err = declared_paths_from_swagger(&json!({ "info": {} })).unwrap_err();
        assert!(matches!(err, BuildError::Document(_)));
    }

    #[test]
    fn test_from_json_rejects_invalid_text() {
        assert!(SwaggerDocument::from_json("{not json").is_err());
    }
}
