//! Authentication provider glue between the host, an external identity
//! verifier (e.g. PAM), and the cached user mapping.
//!
//! The provider never checks credentials itself. It asks an
//! [`IdentityVerifier`] using the mapping's service name, and on success
//! resolves the caller's user name and groups against the mapping.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{ProviderError, VerifyError};
use crate::mapping::{MappingCache, DEFAULT_SERVICE_NAME};
use crate::models::ConfigurationEntry;

/// Configurations granted to an identity, keyed by configuration name.
pub type AuthorizedConfigurations = BTreeMap<String, ConfigurationEntry>;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A login attempt as handed over by the host.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Identity verification
// ---------------------------------------------------------------------------

/// External credential check, e.g. a PAM conversation.
pub trait IdentityVerifier: Send + Sync {
    /// Verify `credentials` under the policy named `service_name`.
    ///
    /// Returns the user's group names on success and `None` when the
    /// credentials are rejected.
    fn verify(
        &self,
        service_name: &str,
        credentials: &Credentials,
    ) -> Result<Option<Vec<String>>, VerifyError>;
}

impl<F> IdentityVerifier for F
where
    F: Fn(&str, &Credentials) -> Result<Option<Vec<String>>, VerifyError> + Send + Sync,
{
    fn verify(
        &self,
        service_name: &str,
        credentials: &Credentials,
    ) -> Result<Option<Vec<String>>, VerifyError> {
        self(service_name, credentials)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Resolves authorized connection configurations for verified users.
pub struct AuthenticationProvider<V> {
    identifier: String,
    cache: MappingCache,
    verifier: V,
}

impl<V: IdentityVerifier> AuthenticationProvider<V> {
    /// Build a provider from settings. The mapping file is read lazily on
    /// first use.
    pub fn new(config: &AppConfig, verifier: V) -> Self {
        Self::with_mapping_path(&config.provider.identifier, config.mapping_path(), verifier)
    }

    /// Build a provider reading the mapping file at `path`.
    pub fn with_mapping_path(
        identifier: impl Into<String>,
        path: impl Into<PathBuf>,
        verifier: V,
    ) -> Self {
        let provider = Self {
            identifier: identifier.into(),
            cache: MappingCache::new(path),
            verifier,
        };
        info!(
            identifier = %provider.identifier,
            path = %provider.cache.path().display(),
            "created authentication provider"
        );
        provider
    }

    /// Identifier reported to the host, e.g. `pam`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn cache(&self) -> &MappingCache {
        &self.cache
    }

    /// Service name of the current mapping, or the default when no mapping
    /// is available.
    pub fn service_name(&self) -> String {
        self.cache
            .get_mapping()
            .map(|doc| doc.service_name().to_string())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string())
    }

    /// Resolve configurations for an already verified identity.
    ///
    /// Returns `None` only when no mapping could ever be loaded. An empty map
    /// means the identity is not granted any connection.
    pub fn resolve_authorized_configurations<I, S>(
        &self,
        username: &str,
        groups: I,
    ) -> Option<AuthorizedConfigurations>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mapping = self.cache.get_mapping()?;
        Some(mapping.resolve(username, groups))
    }

    /// Verify `credentials` and resolve the configurations they unlock.
    ///
    /// `Ok(None)` means the credentials were rejected (or the verifier
    /// failed). An error means no mapping is available at all.
    pub fn authorized_configurations(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthorizedConfigurations>, ProviderError> {
        let mapping = self.cache.get_mapping().ok_or_else(|| {
            ProviderError::MappingUnavailable(self.cache.path().display().to_string())
        })?;

        let username = credentials.username();
        let groups = match self.verifier.verify(mapping.service_name(), credentials) {
            Ok(Some(groups)) => groups,
            Ok(None) => {
                debug!(username, "credentials rejected");
                return Ok(None);
            }
            Err(e) => {
                warn!(username, error = %e, "identity verification failed");
                return Ok(None);
            }
        };

        let configs = mapping.resolve(username, &groups);
        debug!(
            username,
            groups = groups.len(),
            configs = configs.len(),
            "resolved authorized configurations"
        );
        Ok(Some(configs))
    }
}

impl<V> std::fmt::Debug for AuthenticationProvider<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationProvider")
            .field("identifier", &self.identifier)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const MAPPING: &str = r#"<unix-user-mapping serviceName="guac-login">
<config name="A" protocol="rdp"><param name="hostname" value="a"/></config>
<config name="B" protocol="ssh"><param name="hostname" value="b"/></config>
<user name="alice"><config-ref name="A"/></user>
<group name="staff"><config-ref name="B"/></group>
</unix-user-mapping>"#;

    type VerifyFn = fn(&str, &Credentials) -> Result<Option<Vec<String>>, VerifyError>;

    fn staff_verifier(
        service: &str,
        creds: &Credentials,
    ) -> Result<Option<Vec<String>>, VerifyError> {
        assert_eq!(service, "guac-login");
        if creds.secret() == "correct" {
            Ok(Some(vec!["staff".to_string()]))
        } else {
            Ok(None)
        }
    }

    fn provider_at(path: &Path, verifier: VerifyFn) -> AuthenticationProvider<VerifyFn> {
        AuthenticationProvider::with_mapping_path("pam", path, verifier)
    }

    #[test]
    fn test_authorized_configurations_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unix-user-mapping.xml");
        std::fs::write(&path, MAPPING).unwrap();

        let provider = provider_at(&path, staff_verifier);
        let configs = provider
            .authorized_configurations(&Credentials::new("alice", "correct"))
            .unwrap()
            .unwrap();
        let names: Vec<&str> = configs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_authorized_configurations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unix-user-mapping.xml");
        std::fs::write(&path, MAPPING).unwrap();

        let provider = provider_at(&path, staff_verifier);
        let result = provider
            .authorized_configurations(&Credentials::new("alice", "wrong"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_verifier_error_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unix-user-mapping.xml");
        std::fs::write(&path, MAPPING).unwrap();

        let provider = provider_at(&path, |_, _| Err(VerifyError("conversation failed".into())));
        let result = provider
            .authorized_configurations(&Credentials::new("alice", "x"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_missing_mapping_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider_at(&dir.path().join("absent.xml"), staff_verifier);

        let result = provider.authorized_configurations(&Credentials::new("alice", "correct"));
        assert!(matches!(result, Err(ProviderError::MappingUnavailable(_))));
        assert!(provider
            .resolve_authorized_configurations("alice", ["staff"])
            .is_none());
        assert_eq!(provider.service_name(), DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn test_resolve_without_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unix-user-mapping.xml");
        std::fs::write(&path, MAPPING).unwrap();

        let provider = provider_at(&path, staff_verifier);
        assert_eq!(provider.service_name(), "guac-login");
        assert_eq!(provider.identifier(), "pam");

        let configs = provider
            .resolve_authorized_configurations("bob", Vec::<String>::new())
            .unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
