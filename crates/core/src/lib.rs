//! Unix user mapping core library.
//!
//! This crate resolves which remote-connection configurations a Unix user
//! and its groups are entitled to, based on a declarative XML mapping file:
//! settings, the configuration model, the mapping parser and cache, and the
//! authentication provider that ties them to an external identity check.

pub mod config;
pub mod errors;
pub mod mapping;
pub mod models;
pub mod provider;

// Re-exports for convenience.
pub use config::AppConfig;
pub use mapping::{MappingCache, MappingDocument};
pub use models::ConfigurationEntry;
pub use provider::{AuthenticationProvider, Credentials, IdentityVerifier};
