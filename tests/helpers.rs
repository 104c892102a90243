//! Test harness: scripted source, in-memory target and store around a real runner

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use silo::core::config::SiloConfig;
use silo::core::{Cursor, JobRequest, JobResult, Provider, SourceFetchError, SourceSettings};
use silo::credentials::{Credential, CredentialAuth, CredentialResolver, InMemoryCredentialStore, Secret};
use silo::execution::{AsyncSignal, ExecutionEvent, PipelineRunner, StepRegistry};
use silo::persistence::{InMemoryJobStore, JobStore};
use silo::source::{PageRequest, RawPage, SourceClient, SourceError, SourceFactory};
use silo::target::InMemoryTarget;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const CREDENTIAL_REF: &str = "jira-test";
pub const SECRET_TOKEN: &str = "s3cret-api-token";
pub const JIRA_URL: &str = "https://jira.example.test";

struct CancelHook {
    resource: String,
    offset: u64,
    store: Arc<dyn JobStore>,
    job_id: Uuid,
}

/// Source serving fixed records per resource, paged by offset (or token)
pub struct ScriptedSource {
    records: HashMap<&'static str, Vec<Value>>,
    failures: Mutex<HashMap<(String, u64), VecDeque<SourceError>>>,
    fetched: Mutex<Vec<(String, Cursor)>>,
    cancel_hook: Mutex<Option<CancelHook>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            cancel_hook: Mutex::new(None),
        }
    }

    /// Serve `records` for the resource named `resource` (e.g. "issues")
    pub fn with(mut self, resource: &'static str, records: Vec<Value>) -> Self {
        self.records.insert(resource, records);
        self
    }

    /// Answer the next fetches of `resource` at `offset` with these errors, in order
    pub fn fail_at(&self, resource: &str, offset: u64, errors: Vec<SourceError>) {
        self.failures
            .lock()
            .unwrap()
            .entry((resource.to_string(), offset))
            .or_default()
            .extend(errors);
    }

    /// Request cancellation of `job_id` while the page at `offset` is fetched
    pub fn cancel_during(&self, resource: &str, offset: u64, store: Arc<dyn JobStore>, job_id: Uuid) {
        *self.cancel_hook.lock().unwrap() = Some(CancelHook {
            resource: resource.to_string(),
            offset,
            store,
            job_id,
        });
    }

    /// Cursors requested for a resource, failed attempts included
    pub fn fetched(&self, resource: &str) -> Vec<Cursor> {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == resource)
            .map(|(_, cursor)| cursor.clone())
            .collect()
    }

    pub fn fetch_count(&self, resource: &str) -> usize {
        self.fetched(resource).len()
    }
}

fn position(cursor: &Cursor) -> u64 {
    match cursor {
        Cursor::Token { token } => token.as_deref().and_then(|t| t.parse().ok()).unwrap_or(0),
        other => other.offset(),
    }
}

fn advance(cursor: &Cursor, to: u64) -> Cursor {
    match cursor {
        Cursor::Token { .. } => Cursor::Token {
            token: Some(to.to_string()),
        },
        _ => Cursor::Offset { start_at: to },
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, SourceError> {
        let name = request.resource.name();
        let offset = position(&request.cursor);
        self.fetched
            .lock()
            .unwrap()
            .push((name.to_string(), request.cursor.clone()));

        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(name.to_string(), offset))
            .and_then(VecDeque::pop_front);
        if let Some(err) = injected {
            return Err(err);
        }

        let hook = {
            let mut guard = self.cancel_hook.lock().unwrap();
            match guard.as_ref() {
                Some(hook) if hook.resource == name && hook.offset == offset => guard.take(),
                _ => None,
            }
        };
        if let Some(hook) = hook {
            hook.store.request_cancel(hook.job_id).await.unwrap();
        }

        let all = self.records.get(name).cloned().unwrap_or_default();
        let start = (offset as usize).min(all.len());
        let end = (start + request.page_size as usize).min(all.len());
        let has_more = end < all.len();
        Ok(RawPage {
            records: all[start..end].to_vec(),
            has_more,
            next_cursor: has_more.then(|| advance(&request.cursor, end as u64)),
            total: Some(all.len() as u64),
        })
    }
}

/// Hands every job the same scripted source
pub struct ScriptedFactory(pub Arc<ScriptedSource>);

impl SourceFactory for ScriptedFactory {
    fn create(
        &self,
        _request: &JobRequest,
        _credential: &Credential,
    ) -> Result<Arc<dyn SourceClient>, SourceFetchError> {
        Ok(self.0.clone())
    }
}

/// Config with short backoffs so retry scenarios stay quick
pub fn fast_config() -> SiloConfig {
    let mut config = SiloConfig::default();
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.wait_for_async.poll_interval_secs = 1;
    config.wait_for_async.max_wait_secs = 30;
    config
}

pub fn credential(provider: Provider) -> Credential {
    Credential::new(
        provider,
        CredentialAuth::Basic {
            username: "importer@example.test".to_string(),
            token: Secret::new(SECRET_TOKEN),
        },
    )
    .with_hostname(JIRA_URL)
}

pub fn request(provider: Provider, project_id: &str) -> JobRequest {
    JobRequest::new(provider, "ws-1", project_id, CREDENTIAL_REF).with_source(SourceSettings {
        project_key: Some("PRJ".to_string()),
        project_id: Some("10000".to_string()),
        resource_id: None,
        hostname: None,
    })
}

pub fn server_request() -> JobRequest {
    request(Provider::JiraServer, "proj")
}

pub fn user(n: usize) -> Value {
    json!({
        "name": format!("user{}", n),
        "emailAddress": format!("user{}@example.com", n),
        "displayName": format!("User {}", n),
        "active": true
    })
}

pub fn users(count: usize) -> Vec<Value> {
    (1..=count).map(user).collect()
}

pub fn labels(names: &[&str]) -> Vec<Value> {
    names.iter().map(|n| json!(n)).collect()
}

pub fn issue(n: usize) -> Value {
    json!({
        "id": (10_000 + n).to_string(),
        "key": format!("PRJ-{}", n),
        "fields": {
            "summary": format!("Issue {}", n),
            "labels": ["backend"],
            "assignee": { "emailAddress": "user1@example.com" },
            "priority": { "name": "High" }
        }
    })
}

pub fn issue_with_parent(n: usize, parent: usize) -> Value {
    let mut value = issue(n);
    value["fields"]["parent"] = json!({ "id": (10_000 + parent).to_string() });
    value
}

pub fn issues(count: usize) -> Vec<Value> {
    (1..=count).map(issue).collect()
}

/// An issue payload with no `fields` object
pub fn malformed_issue(key: &str) -> Value {
    json!({ "id": "999999", "key": key })
}

/// External id the importer gives the `n`-th fixture issue in project `proj`
pub fn issue_external_id(n: usize) -> String {
    format!("proj_PRJ_{}", 10_000 + n)
}

/// A runner wired to in-memory collaborators
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub target: Arc<InMemoryTarget>,
    pub store: Arc<InMemoryJobStore>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub runner: PipelineRunner,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl Harness {
    pub async fn new(source: ScriptedSource) -> Self {
        let target = Arc::new(InMemoryTarget::new());
        Self::with_parts(source, target.clone(), target, fast_config()).await
    }

    pub async fn with_config(source: ScriptedSource, config: SiloConfig) -> Self {
        let target = Arc::new(InMemoryTarget::new());
        Self::with_parts(source, target.clone(), target, config).await
    }

    pub async fn with_parts(
        source: ScriptedSource,
        target: Arc<InMemoryTarget>,
        signal: Arc<dyn AsyncSignal>,
        config: SiloConfig,
    ) -> Self {
        let source = Arc::new(source);
        let store = Arc::new(InMemoryJobStore::new());
        let credentials = Arc::new(InMemoryCredentialStore::new());
        credentials.insert(CREDENTIAL_REF, credential(Provider::JiraServer)).await;
        credentials.insert("jira-cloud", credential(Provider::Jira)).await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let runner = PipelineRunner::new(
            Arc::new(StepRegistry::with_builtin_providers().unwrap()),
            &config,
            CredentialResolver::new(credentials.clone()),
            Arc::new(ScriptedFactory(source.clone())),
            target.clone(),
            signal,
            store.clone(),
        )
        .with_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            source,
            target,
            store,
            credentials,
            runner,
            events,
        }
    }

    pub async fn run(&self, request: JobRequest) -> JobResult {
        self.runner.run(request).await.unwrap()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub fn assert_completed(result: &JobResult) {
    assert!(
        result.is_success(),
        "job ended {:?}: {:?}",
        result.status,
        result.failure
    );
}
