//! Job context - per-job state threaded through every step

use crate::core::{
    entity::EntityIdMap,
    job::{JobCheckpoint, JobRequest, ProjectFlags},
    state::StepWarning,
};
use crate::credentials::Credential;
use crate::source::SourceClient;
use crate::target::{TargetApi, TargetScope};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Runtime state of one job
///
/// Owned by exactly one running job. Steps read the request and credential,
/// and the loaders extend the id map and the stored step data.
pub struct JobContext {
    pub request: JobRequest,

    /// Resolved once at job start; never persisted
    pub credential: Credential,

    pub source: Arc<dyn SourceClient>,

    pub target: Arc<dyn TargetApi>,

    /// Source external id -> target id, per entity kind
    pub id_map: EntityIdMap,

    /// Records kept by steps for their dependents (step name -> records)
    pub step_data: BTreeMap<String, Vec<Value>>,

    pub flags: ProjectFlags,

    /// Items excluded from a batch during this run
    pub warnings: Vec<StepWarning>,
}

impl JobContext {
    pub fn new(
        request: JobRequest,
        credential: Credential,
        source: Arc<dyn SourceClient>,
        target: Arc<dyn TargetApi>,
    ) -> Self {
        Self {
            request,
            credential,
            source,
            target,
            id_map: EntityIdMap::new(),
            step_data: BTreeMap::new(),
            flags: ProjectFlags::default(),
            warnings: Vec::new(),
        }
    }

    /// Restore the state a previous run checkpointed
    pub fn restore(mut self, checkpoint: &JobCheckpoint) -> Self {
        self.id_map = checkpoint.id_map.clone();
        self.step_data = checkpoint.step_data.clone();
        self.flags = checkpoint.flags;
        self
    }

    /// Copy the resumable state into a checkpoint
    pub fn fill_checkpoint(&self, checkpoint: &mut JobCheckpoint) {
        checkpoint.id_map = self.id_map.clone();
        checkpoint.step_data = self.step_data.clone();
        checkpoint.flags = self.flags;
    }

    /// Namespaced external id: `{project_id}_{resource_id}_{source_id}`
    pub fn external_id(&self, source_id: &str) -> String {
        format!("{}_{}_{}", self.request.project_id, self.resource_id(), source_id)
    }

    /// Source instance id, falling back to the project key
    pub fn resource_id(&self) -> &str {
        let source = &self.request.source;
        source
            .resource_id
            .as_deref()
            .or(source.project_key.as_deref())
            .unwrap_or("default")
    }

    pub fn external_source(&self) -> &'static str {
        self.request.provider.external_source()
    }

    pub fn scope(&self) -> TargetScope {
        TargetScope::new(&self.request.workspace_id, &self.request.project_id)
    }

    /// Source base URL (job setting wins over the credential)
    pub fn source_url(&self) -> Option<&str> {
        self.request
            .source
            .hostname
            .as_deref()
            .or(self.credential.hostname.as_deref())
            .map(|h| h.trim_end_matches('/'))
    }

    /// Page size for a step, honoring per-job overrides
    pub fn page_size(&self, step: &str, default: u32) -> u32 {
        self.request
            .page_sizes
            .get(step)
            .copied()
            .filter(|size| *size > 0)
            .unwrap_or(default)
    }

    pub fn record_data(&mut self, step: &str, value: Value) {
        self.step_data.entry(step.to_string()).or_default().push(value);
    }

    pub fn data(&self, step: &str) -> &[Value] {
        self.step_data.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record an item excluded from a batch
    pub fn warn(&mut self, step: &str, message: impl Into<String>) {
        let message = self.credential.redact(&message.into());
        warn!("[{}] [{}] {}", self.request.job_id, step, message);
        self.warnings.push(StepWarning {
            step: step.to_string(),
            message,
            at: chrono::Utc::now(),
        });
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.request.job_id)
            .field("provider", &self.request.provider)
            .field("credential", &"<redacted>")
            .field("mapped_entities", &self.id_map.len())
            .field("step_data", &self.step_data.keys().collect::<Vec<_>>())
            .field("flags", &self.flags)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityKind, Provider, SourceSettings};
    use crate::credentials::{CredentialAuth, Secret};
    use crate::source::{PageRequest, RawPage, SourceError};
    use crate::target::InMemoryTarget;
    use async_trait::async_trait;

    struct NoSource;

    #[async_trait]
    impl SourceClient for NoSource {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<RawPage, SourceError> {
            Ok(RawPage::last(Vec::new()))
        }
    }

    fn context() -> JobContext {
        let request = JobRequest::new(Provider::JiraServer, "acme", "proj", "cred")
            .with_source(SourceSettings {
                project_key: Some("ENG".into()),
                resource_id: Some("site".into()),
                ..Default::default()
            })
            .with_page_size("issues", 25);
        let credential = Credential::new(
            Provider::JiraServer,
            CredentialAuth::Bearer {
                token: Secret::new("pat-123456"),
            },
        )
        .with_hostname("https://jira.acme.test/");
        JobContext::new(request, credential, Arc::new(NoSource), Arc::new(InMemoryTarget::new()))
    }

    #[test]
    fn test_external_id_and_scope() {
        let ctx = context();
        assert_eq!(ctx.external_id("10001"), "proj_site_10001");
        assert_eq!(ctx.external_source(), "JIRA_SERVER");
        assert_eq!(ctx.scope(), TargetScope::new("acme", "proj"));
        assert_eq!(ctx.source_url(), Some("https://jira.acme.test"));
    }

    #[test]
    fn test_page_size_override() {
        let ctx = context();
        assert_eq!(ctx.page_size("issues", 50), 25);
        assert_eq!(ctx.page_size("labels", 50), 50);
    }

    #[test]
    fn test_warnings_are_redacted() {
        let mut ctx = context();
        ctx.warn("issues", "skipped item fetched with pat-123456");
        assert_eq!(ctx.warnings.len(), 1);
        assert!(!ctx.warnings[0].message.contains("pat-123456"));
    }

    #[test]
    fn test_checkpoint_roundtrip_and_debug() {
        let mut ctx = context();
        ctx.id_map.insert(EntityKind::Label, "bug", "label-1");
        ctx.record_data("boards", serde_json::json!({"id": 1}));
        ctx.flags.issue_types_enabled = true;

        let mut checkpoint = JobCheckpoint::default();
        ctx.fill_checkpoint(&mut checkpoint);
        let restored = context().restore(&checkpoint);
        assert_eq!(restored.id_map.get(EntityKind::Label, "bug"), Some("label-1"));
        assert_eq!(restored.data("boards").len(), 1);
        assert!(restored.flags.issue_types_enabled);

        let printed = format!("{:?}", restored);
        assert!(!printed.contains("pat-123456"));
    }
}
