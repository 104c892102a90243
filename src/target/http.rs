//! HTTP client for the product REST API

use crate::core::{config::TargetConfig, EntityKind, ResolvedRef, TargetEntity, TargetError};
use crate::credentials::Secret;
use crate::execution::waiter::{AsyncSignal, AsyncStatus, SignalError};
use crate::target::{ProjectSettings, TargetApi, TargetScope};
use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpTargetConfig {
    pub base_url: String,
    pub api_key: Secret,
}

impl HttpTargetConfig {
    pub fn new(base_url: impl Into<String>, api_key: Secret) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Base URL from config, API key from the configured environment variable
    pub fn from_config(config: &TargetConfig) -> anyhow::Result<Self> {
        let Some(base_url) = config.base_url.clone() else {
            bail!("target.base_url is not configured");
        };
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("Environment variable {} is not set", config.api_key_env))?;
        if api_key.is_empty() {
            bail!("Environment variable {} is empty", config.api_key_env);
        }
        Ok(Self::new(base_url, Secret::new(api_key)))
    }
}

impl fmt::Debug for HttpTargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTargetConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    is_issue_type_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ImportJobResponse {
    status: String,
}

/// Product REST API client
pub struct HttpTargetClient {
    config: HttpTargetConfig,
    client: Client,
}

impl HttpTargetClient {
    pub fn new(config: HttpTargetConfig) -> Result<Self, TargetError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TargetError::malformed(format!("failed to build http client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn project_url(&self, scope: &TargetScope) -> String {
        format!(
            "{}/api/v1/workspaces/{}/projects/{}/",
            self.base(),
            scope.workspace_id,
            scope.project_id
        )
    }

    fn collection_url(&self, scope: &TargetScope, kind: EntityKind) -> String {
        format!("{}{}/", self.project_url(scope), collection(kind))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-API-Key", self.config.api_key.expose())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TargetError> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| TargetError::transient(format!("request failed: {}", e.without_url())))
    }
}

/// REST collection holding entities of `kind`
fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "members",
        EntityKind::Label => "labels",
        EntityKind::Module => "modules",
        EntityKind::Board => "boards",
        EntityKind::Cycle => "cycles",
        EntityKind::IssueType => "issue-types",
        EntityKind::IssueProperty => "issue-properties",
        EntityKind::IssuePropertyOption => "issue-property-options",
        EntityKind::Issue => "issues",
        EntityKind::IssueComment => "issue-comments",
        EntityKind::IssueRelation => "issue-relations",
        EntityKind::CycleIssue => "cycle-issues",
        EntityKind::ModuleIssue => "module-issues",
    }
}

/// Map a non-success response to a target error
async fn status_error(response: Response) -> TargetError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body.chars().take(200).collect::<String>());
    if status.is_server_error() {
        TargetError::transient(message)
    } else {
        TargetError::rejected(status.as_u16(), message)
    }
}

/// Request body for a create call
fn create_body(entity: &TargetEntity, refs: &[ResolvedRef]) -> Value {
    let mut body = entity.attributes.clone();
    body.insert("name".into(), Value::String(entity.name.clone()));
    body.insert("external_id".into(), Value::String(entity.external_id.clone()));
    body.insert(
        "external_source".into(),
        Value::String(entity.external_source.clone()),
    );

    let mut references = Map::new();
    for r in refs {
        match references.get_mut(&r.role) {
            Some(Value::Array(ids)) => ids.push(Value::String(r.target_id.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(r.target_id.clone())]);
            }
            None => {
                references.insert(r.role.clone(), Value::String(r.target_id.clone()));
            }
        }
    }
    body.insert("references".into(), Value::Object(references));
    Value::Object(body)
}

/// First `id` in a lookup response (a bare list or a `results` page)
fn first_id(body: &Value) -> Option<String> {
    let items = body
        .as_array()
        .or_else(|| body.get("results").and_then(Value::as_array))?;
    items
        .first()
        .and_then(|item| item.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait]
impl TargetApi for HttpTargetClient {
    async fn project_settings(&self, scope: &TargetScope) -> Result<ProjectSettings, TargetError> {
        let response = self.send(self.client.get(self.project_url(scope))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ProjectSettings {
                exists: false,
                issue_types_enabled: false,
            });
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let project: ProjectResponse = response
            .json()
            .await
            .map_err(|e| TargetError::malformed(format!("invalid project response: {}", e)))?;
        Ok(ProjectSettings {
            exists: true,
            issue_types_enabled: project.is_issue_type_enabled,
        })
    }

    async fn find_by_external_id(
        &self,
        scope: &TargetScope,
        kind: EntityKind,
        external_source: &str,
        external_id: &str,
    ) -> Result<Option<String>, TargetError> {
        debug!("Looking up {} {} in target", kind, external_id);
        let request = self
            .client
            .get(self.collection_url(scope, kind))
            .query(&[("external_source", external_source), ("external_id", external_id)]);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| TargetError::malformed(format!("invalid lookup response: {}", e)))?;
        Ok(first_id(&body))
    }

    async fn create(
        &self,
        scope: &TargetScope,
        entity: &TargetEntity,
        refs: &[ResolvedRef],
    ) -> Result<String, TargetError> {
        let request = self
            .client
            .post(self.collection_url(scope, entity.kind))
            .json(&create_body(entity, refs));
        let response = self.send(request).await?;

        // Created concurrently (or by an earlier attempt whose response was lost)
        if response.status() == StatusCode::CONFLICT {
            return self
                .find_by_external_id(scope, entity.kind, &entity.external_source, &entity.external_id)
                .await?
                .ok_or_else(|| {
                    TargetError::rejected(409, format!("{} {} conflicts but cannot be found", entity.kind, entity.external_id))
                });
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| TargetError::malformed(format!("invalid create response: {}", e)))?;
        Ok(created.id)
    }
}

#[async_trait]
impl AsyncSignal for HttpTargetClient {
    async fn poll_status(&self, job_id: Uuid) -> Result<AsyncStatus, SignalError> {
        let url = format!("{}/api/v1/import-jobs/{}/", self.base(), job_id);
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| SignalError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SignalError::Transient(status.to_string()));
        }
        if !status.is_success() {
            return Err(SignalError::Fatal(status.to_string()));
        }
        let job: ImportJobResponse = response
            .json()
            .await
            .map_err(|e| SignalError::Fatal(format!("invalid import job response: {}", e)))?;

        let done = !matches!(job.status.as_str(), "queued" | "processing" | "running");
        Ok(AsyncStatus { done })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityKind;

    #[test]
    fn test_create_body_groups_refs_by_role() {
        let entity = TargetEntity::new(EntityKind::Issue, "p_r_1", "JIRA", "Fix login")
            .with_attr("priority", "high");
        let refs = vec![
            ResolvedRef {
                role: "label".into(),
                kind: EntityKind::Label,
                target_id: "l1".into(),
            },
            ResolvedRef {
                role: "label".into(),
                kind: EntityKind::Label,
                target_id: "l2".into(),
            },
            ResolvedRef {
                role: "assignee".into(),
                kind: EntityKind::User,
                target_id: "u1".into(),
            },
        ];

        let body = create_body(&entity, &refs);
        assert_eq!(body["name"], "Fix login");
        assert_eq!(body["external_id"], "p_r_1");
        assert_eq!(body["priority"], "high");
        assert_eq!(body["references"]["label"], serde_json::json!(["l1", "l2"]));
        assert_eq!(body["references"]["assignee"], "u1");
    }

    #[test]
    fn test_first_id_accepts_list_and_page() {
        assert_eq!(first_id(&serde_json::json!([{"id": "a"}])), Some("a".into()));
        assert_eq!(
            first_id(&serde_json::json!({"results": [{"id": 7}]})),
            Some("7".into())
        );
        assert_eq!(first_id(&serde_json::json!({"results": []})), None);
    }

    #[test]
    fn test_config_debug_hides_key() {
        let config = HttpTargetConfig::new("https://plane.example", Secret::new("sk-live-123"));
        assert!(!format!("{:?}", config).contains("sk-live-123"));
    }
}
