//! Microsoft Entra ID directory client for xavyo
//!
//! Implements the `xavyo-reconcile` collaborator traits against Microsoft
//! Entra ID (formerly Azure AD) through the Microsoft Graph API.
//!
//! # Features
//!
//! - `OAuth2` client credentials authentication with token caching
//! - Transient retry: 429 honoring `Retry-After`, 502/503/504 with backoff
//! - Paged collections read to the last page before use
//! - Group member and owner edges, group lifecycle, name lookup
//! - Password and certificate credentials on applications and service principals
//! - Multi-cloud support (Commercial, US Government, China, Germany)
//!
//! # Example
//!
//! ```no_run
//! use xavyo_connector_entra::{EntraConfig, EntraCredentials, EntraDirectory};
//! use xavyo_reconcile::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EntraConfig::builder()
//!     .tenant_id("your-tenant-id")
//!     .build()?;
//!
//! let credentials = EntraCredentials {
//!     client_id: "your-client-id".to_string(),
//!     client_secret: secrecy::SecretString::new("your-client-secret".to_string()),
//! };
//!
//! let directory = EntraDirectory::new(&config, credentials)?;
//! let reconciler = Reconciler::new(&directory, ReconcileConfig::from_env()?);
//!
//! let group: ObjectId = "00000000-0000-0000-0000-000000000001".parse()?;
//! let owner: ObjectId = "00000000-0000-0000-0000-000000000002".parse()?;
//! reconciler
//!     .reconcile_edges(Relation::Owners, &group, &[owner])
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod config;
mod directory;
mod error;
mod graph_client;

// Re-exports
pub use auth::TokenCache;
pub use config::{
    EntraCloudEnvironment, EntraConfig, EntraConfigBuilder, EntraCredentials, RetryConfig,
};
pub use directory::EntraDirectory;
pub use error::{is_transient_status, EntraError, EntraResult};
pub use graph_client::{GraphClient, ODataError, ODataErrorBody, ODataResponse};
