//! Credential resolution for source systems

pub mod store;

use crate::core::{JobRequest, Provider};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

pub use store::{FileCredentialStore, InMemoryCredentialStore};

/// Secret string that never prints its value
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw secret, for building request headers only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Provider-specific secret material
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialAuth {
    /// Username/email plus API token or password
    Basic { username: String, token: Secret },
    /// Personal access token
    Bearer { token: Secret },
    /// OAuth app credentials with a current access token
    #[serde(rename = "oauth")]
    OAuth {
        client_id: String,
        client_secret: Secret,
        access_token: Secret,
        #[serde(default)]
        callback_url: Option<String>,
    },
}

impl CredentialAuth {
    fn secrets(&self) -> Vec<&Secret> {
        match self {
            CredentialAuth::Basic { token, .. } => vec![token],
            CredentialAuth::Bearer { token } => vec![token],
            CredentialAuth::OAuth {
                client_secret,
                access_token,
                ..
            } => vec![client_secret, access_token],
        }
    }
}

/// Usable credentials for one job's source connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub provider: Provider,
    pub auth: CredentialAuth,
    /// Source base URL (e.g. `https://jira.example.com`)
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Credential {
    pub fn new(provider: Provider, auth: CredentialAuth) -> Self {
        Self {
            provider,
            auth,
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Scrub this credential's secrets from a message
    pub fn redact(&self, message: &str) -> String {
        redact(message, Some(self))
    }
}

/// Error types for credential resolution
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("no credential found for reference '{credential_ref}'")]
    Missing { credential_ref: String },

    #[error("credential '{credential_ref}' is for {found}, job expects {expected}")]
    Mismatch {
        credential_ref: String,
        expected: Provider,
        found: Provider,
    },

    #[error("credential '{credential_ref}' is unusable: {reason}")]
    Invalid { credential_ref: String, reason: String },

    #[error("credential store unavailable: {0}")]
    Store(String),
}

/// Lookup of stored credentials by reference
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, credential_ref: &str) -> Result<Option<Credential>, CredentialError>;
}

/// Resolves and validates credentials for a job
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, request: &JobRequest) -> Result<Credential, CredentialError> {
        let credential_ref = request.credential_ref.as_str();
        debug!("Resolving credential {} for job {}", credential_ref, request.job_id);

        let credential = self
            .store
            .lookup(credential_ref)
            .await?
            .ok_or_else(|| CredentialError::Missing {
                credential_ref: credential_ref.to_string(),
            })?;

        if credential.provider != request.provider {
            warn!(
                "Credential {} belongs to {}, job {} imports from {}",
                credential_ref, credential.provider, request.job_id, request.provider
            );
            return Err(CredentialError::Mismatch {
                credential_ref: credential_ref.to_string(),
                expected: request.provider,
                found: credential.provider,
            });
        }

        if credential.auth.secrets().iter().any(|s| s.is_empty()) {
            return Err(CredentialError::Invalid {
                credential_ref: credential_ref.to_string(),
                reason: "empty secret".to_string(),
            });
        }

        Ok(credential)
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(bearer|basic|token|api[_-]?key|access_token|password)([=:\s]+)[A-Za-z0-9._~+/=-]+")
            .expect("static regex")
    })
}

/// Remove secret material from a human-readable message
///
/// Known secrets of `credential` are replaced verbatim, then anything shaped like
/// an auth header or token parameter is masked.
pub fn redact(message: &str, credential: Option<&Credential>) -> String {
    let mut out = message.to_string();
    if let Some(credential) = credential {
        for secret in credential.auth.secrets() {
            if !secret.is_empty() {
                out = out.replace(secret.expose(), "***");
            }
        }
    }
    token_pattern().replace_all(&out, "$1$2***").into_owned()
}
