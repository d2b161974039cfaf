//! Error types for the user-mapping core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

// ---------------------------------------------------------------------------
// Configuration entry validation
// ---------------------------------------------------------------------------

/// A [`ConfigurationEntry`](crate::models::ConfigurationEntry) invariant was
/// violated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The protocol identifier was empty.
    #[error("protocol must not be empty")]
    EmptyProtocol,

    /// A parameter name was empty.
    #[error("parameter name must not be empty")]
    EmptyParameterName,

    /// A parameter value was empty.
    #[error("value of parameter '{0}' must not be empty")]
    EmptyParameterValue(String),
}

// ---------------------------------------------------------------------------
// Mapping document structure
// ---------------------------------------------------------------------------

/// The mapping document is malformed or breaks the nesting rules.
///
/// Any of these aborts the parse; nothing partial is ever published.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// The markup itself is not well-formed.
    #[error("malformed XML at byte {position}: {detail}")]
    Malformed { position: u64, detail: String },

    /// An element appeared somewhere the grammar does not allow it.
    #[error("<{element}> is not allowed {context}")]
    Misplaced {
        element: &'static str,
        context: &'static str,
    },

    /// A required attribute is missing.
    #[error("each {element} must have a {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// A config element produced an invalid configuration entry.
    #[error("config '{name}' is invalid: {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: ValidationError,
    },

    /// The document ended before every element was closed.
    #[error("unexpected end of document: <{0}> is not closed")]
    Unclosed(String),

    /// The document contains no root element.
    #[error("document has no unix-user-mapping root element")]
    MissingRoot,
}

// ---------------------------------------------------------------------------
// Mapping source
// ---------------------------------------------------------------------------

/// Errors from loading the mapping document off disk.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The mapping file does not exist.
    #[error("user mapping file '{0}' does not exist")]
    AbsentSource(String),

    /// The mapping file exists but could not be read.
    #[error("unable to read user mapping file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The mapping file was read but is not a valid document.
    #[error("user mapping file '{path}' is not valid: {source}")]
    Structural {
        path: String,
        #[source]
        source: StructuralError,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from settings loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A setting value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the settings file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Errors surfaced to the hosting authentication framework.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No mapping document could ever be loaded.
    #[error("user mapping could not be read from '{0}'")]
    MappingUnavailable(String),
}

/// Failure reported by an external identity verifier.
///
/// The provider treats this the same as a rejected credential.
#[derive(Debug, Error)]
#[error("identity verification failed: {0}")]
pub struct VerifyError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = StructuralError::MissingAttribute {
            element: "config",
            attribute: "protocol",
        };
        assert_eq!(err.to_string(), "each config must have a protocol attribute");

        let err = StructuralError::Misplaced {
            element: "param",
            context: "outside of a config",
        };
        assert_eq!(err.to_string(), "<param> is not allowed outside of a config");

        let err = MappingError::AbsentSource("/etc/guacamole/unix-user-mapping.xml".into());
        assert!(err.to_string().contains("does not exist"));

        let err = ValidationError::EmptyParameterValue("port".into());
        assert!(err.to_string().contains("'port'"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err = MappingError::AbsentSource("x".into());
        let core_err: CoreError = err.into();
        assert!(matches!(core_err, CoreError::Mapping(_)));

        let err = ProviderError::MappingUnavailable("x".into());
        let core_err: CoreError = err.into();
        assert!(matches!(core_err, CoreError::Provider(_)));
    }

    #[test]
    fn test_invalid_config_keeps_source() {
        use std::error::Error as _;

        let err = StructuralError::InvalidConfig {
            name: "web".into(),
            source: ValidationError::EmptyProtocol,
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("protocol must not be empty"));
    }
}
