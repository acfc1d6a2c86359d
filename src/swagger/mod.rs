//! Swagger-driven resource hierarchy
//!
//! Turns a flat, unordered set of API path declarations into a forest of
//! [`Path`] nodes and projects that forest into the runtime
//! [`ResourceType`] tree used by the swagger expander.
//!
//! # Architecture
//!
//! - [`path`] - `Path` model and the PathTree builder (`merge_paths`)
//! - [`resource_type`] - runtime projection and URL -> resource type lookup
//! - [`document`] - reads path declarations out of a swagger 2.0 document

pub mod document;
pub mod path;
pub mod resource_type;

use crate::endpoints::TemplateError;

pub use document::{declared_paths_from_swagger, SwaggerDocument};
pub use path::{
    merge_paths, render_paths, AdditionalPath, DeclaredPath, Path, PathOperation, PathOperations,
    PathOverride, PathTreeConfig, RegexReplace, Verb,
};
pub use resource_type::{
    build_resource_types, find_resource_type, resource_types_from_paths, ResourceType,
    SubPathRegex,
};

/// Errors raised while turning declarations into a resource hierarchy
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid sub path regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid swagger document: {0}")]
    Document(String),
}
