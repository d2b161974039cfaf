//! The resolved mapping store and the authorization-resolution algorithm.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{ConfigurationEntry, Principal, UnresolvedReference};

/// Service name used when the document does not set one.
pub const DEFAULT_SERVICE_NAME: &str = "guacamole";

/// Mapping of user and group names to connection configurations.
///
/// Built wholesale by the parser and immutable afterwards; readers share it
/// behind an `Arc` and a reload publishes a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDocument {
    service_name: String,
    configs: HashMap<String, ConfigurationEntry>,
    users: HashMap<String, BTreeSet<String>>,
    groups: HashMap<String, BTreeSet<String>>,
}

/// Entity counts, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingSummary {
    pub configs: usize,
    pub users: usize,
    pub groups: usize,
}

impl Default for MappingDocument {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            configs: HashMap::new(),
            users: HashMap::new(),
            groups: HashMap::new(),
        }
    }
}

impl MappingDocument {
    /// The name of the external authentication service profile.
    ///
    /// For PAM this is the name of the policy file in `/etc/pam.d`.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn configs(&self) -> &HashMap<String, ConfigurationEntry> {
        &self.configs
    }

    pub fn config(&self, name: &str) -> Option<&ConfigurationEntry> {
        self.configs.get(name)
    }

    pub fn users(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.users
    }

    pub fn groups(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.groups
    }

    /// Configuration names referenced by a user, if the user is mapped.
    pub fn user_refs(&self, user: &str) -> Option<&BTreeSet<String>> {
        self.users.get(user)
    }

    /// Configuration names referenced by a group, if the group is mapped.
    pub fn group_refs(&self, group: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(group)
    }

    pub fn summary(&self) -> MappingSummary {
        MappingSummary {
            configs: self.configs.len(),
            users: self.users.len(),
            groups: self.groups.len(),
        }
    }

    /// Return copies of every configuration the identity is entitled to.
    ///
    /// The candidate set is the union of the user's references and those of
    /// each listed group. Names without a definition are dropped. An empty
    /// result means no connections are granted.
    pub fn resolve<I, S>(&self, user: &str, groups: I) -> BTreeMap<String, ConfigurationEntry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut candidates: BTreeSet<&str> = BTreeSet::new();

        if let Some(refs) = self.users.get(user) {
            candidates.extend(refs.iter().map(String::as_str));
        }

        for group in groups {
            if let Some(refs) = self.groups.get(group.as_ref()) {
                candidates.extend(refs.iter().map(String::as_str));
            }
        }

        candidates
            .into_iter()
            .filter_map(|name| {
                self.configs
                    .get(name)
                    .map(|entry| (name.to_string(), entry.clone()))
            })
            .collect()
    }

    /// Every referenced configuration name that has no definition, together
    /// with the users and groups referencing it. Sorted by name.
    pub fn unresolved_references(&self) -> Vec<UnresolvedReference> {
        let mut dangling: BTreeMap<&str, BTreeSet<Principal>> = BTreeMap::new();

        let users = self
            .users
            .iter()
            .map(|(name, refs)| (Principal::User(name.clone()), refs));
        let groups = self
            .groups
            .iter()
            .map(|(name, refs)| (Principal::Group(name.clone()), refs));

        for (principal, refs) in users.chain(groups) {
            for config_name in refs {
                if !self.configs.contains_key(config_name) {
                    dangling
                        .entry(config_name.as_str())
                        .or_default()
                        .insert(principal.clone());
                }
            }
        }

        dangling
            .into_iter()
            .map(|(config_name, principals)| UnresolvedReference {
                config_name: config_name.to_string(),
                referenced_by: principals.into_iter().collect(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Construction (parser only)
// ---------------------------------------------------------------------------

impl MappingDocument {
    pub(crate) fn set_service_name(&mut self, service_name: String) {
        self.service_name = service_name;
    }

    pub(crate) fn insert_config(&mut self, name: String, entry: ConfigurationEntry) {
        self.configs.insert(name, entry);
    }

    pub(crate) fn insert_user(&mut self, name: String, refs: BTreeSet<String>) {
        self.users.insert(name, refs);
    }

    pub(crate) fn insert_group(&mut self, name: String, refs: BTreeSet<String>) {
        self.groups.insert(name, refs);
    }
}
