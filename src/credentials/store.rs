//! Credential store implementations

use crate::credentials::{Credential, CredentialError, CredentialStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// In-memory credential store (for testing or embedding)
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, credential_ref: impl Into<String>, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(credential_ref.into(), credential);
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn lookup(&self, credential_ref: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(self.credentials.read().await.get(credential_ref).cloned())
    }
}

/// Credentials read from a YAML file mapping reference -> credential
///
/// ```yaml
/// jira-acme:
///   provider: jira_server
///   hostname: https://jira.acme.test
///   auth:
///     type: basic
///     username: importer
///     token: "..."
/// ```
pub struct FileCredentialStore {
    credentials: HashMap<String, Credential>,
}

impl FileCredentialStore {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CredentialError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CredentialError::Store(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CredentialError> {
        // serde_yaml errors can quote the offending value, so only the location is kept
        let credentials: HashMap<String, Credential> = serde_yaml::from_str(yaml).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .unwrap_or_else(|| "unknown location".to_string());
            CredentialError::Store(format!("invalid credentials file at {}", location))
        })?;
        Ok(Self { credentials })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn lookup(&self, credential_ref: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(self.credentials.get(credential_ref).cloned())
    }
}
