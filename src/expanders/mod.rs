//! Resource expansion
//!
//! A [`TreeNode`] is opened by handing it to the [`Dispatcher`], which asks
//! every registered [`Expander`] whether it applies, runs the interested ones
//! concurrently under one deadline and merges their children. At most one
//! expander supplies the node's display content (the primary response); when
//! none does, the generic expander fetches the node's URL.
//!
//! Most ARM resources are handled by the [`SwaggerResourceExpander`], which
//! walks resource-type trees built from path declarations and talks to the
//! backend through an [`ApiSet`].

pub mod action;
pub mod activity_log;
pub mod api_set;
pub mod arm_api_set;
pub mod container_registry;
pub mod container_service;
pub mod default;
pub mod deployments;
pub mod dispatch;
pub mod expander;
pub mod json;
pub mod kubernetes_api_set;
pub mod metrics;
pub mod register;
pub mod resource_group;
pub mod subscription;
pub mod swagger;
pub mod tenant;
pub mod types;

pub use api_set::{ApiSet, ApiSetExpandResponse, ApiSetRegistry, ChildMatching, SubResource};
pub use arm_api_set::{ArmApiSet, ARM_API_SET_ID};
pub use dispatch::{Dispatcher, ExpandError, ExpanderFailure, Expansion};
pub use expander::Expander;
pub use kubernetes_api_set::KubernetesApiSet;
pub use register::register_expanders;
pub use swagger::SwaggerResourceExpander;
pub use types::*;
