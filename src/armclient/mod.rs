//! Azure Resource Manager interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - access tokens acquired through the Azure CLI, with caching
//! - [`http`] - HTTP transport helpers shared by every backend (typed `ApiError`)
//! - [`client`] - ARM client: URL validation, request headers, 401 retry, provider cache
//!
//! # Example
//!
//! ```ignore
//! use tarm::armclient::ArmClient;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = ArmClient::from_cli(None)?;
//!     let subscriptions = client.get("/subscriptions?api-version=2018-01-01").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;

pub use auth::{AccessToken, ArmCredentials, AzCliTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{ArmClient, DEFAULT_ARM_ENDPOINT};
pub use http::{format_api_error, ApiError, HttpClient};
