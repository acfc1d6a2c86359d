//! tarm: browse Azure resources as a tree
//!
//! The library holds the expansion engine: URL templates, the path tree
//! builder that turns API declarations into resource types, the ARM client
//! and the expanders that turn a node into its children.

pub mod armclient;
pub mod config;
pub mod endpoints;
pub mod expanders;
pub mod notification;
pub mod swagger;
