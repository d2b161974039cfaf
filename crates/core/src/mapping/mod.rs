//! User mapping engine: which connection configurations a Unix user and its
//! groups may use.
//!
//! - [`parser`] turns `unix-user-mapping.xml` into a [`MappingDocument`]
//! - [`document`] holds the parsed mapping and resolves identities against it
//! - [`cache`] re-reads the file only when its modification time changes

pub mod cache;
pub mod document;
pub mod parser;

pub use cache::{MappingCache, Snapshot};
pub use document::{MappingDocument, MappingSummary, DEFAULT_SERVICE_NAME};
pub use parser::{load_file, parse_str, ROOT_ELEMENT};
