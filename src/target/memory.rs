//! In-memory target (tests and dry runs)

use crate::core::{EntityKind, ResolvedRef, TargetEntity, TargetError};
use crate::execution::waiter::{AsyncSignal, AsyncStatus, SignalError};
use crate::target::{ProjectSettings, TargetApi, TargetScope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

type EntityKey = (TargetScope, EntityKind, String, String);

/// Entity as stored by the in-memory target
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: String,
    pub entity: TargetEntity,
    pub refs: Vec<ResolvedRef>,
}

/// Target that keeps everything in process memory
///
/// Writes are synchronous, so background processing is always reported done.
pub struct InMemoryTarget {
    entities: Mutex<HashMap<EntityKey, StoredEntity>>,
    created_order: Mutex<Vec<(EntityKind, String)>>,
    projects: Mutex<HashMap<TargetScope, ProjectSettings>>,
    default_settings: ProjectSettings,
    fail_next_creates: AtomicUsize,
    next_id: AtomicUsize,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
            created_order: Mutex::new(Vec::new()),
            projects: Mutex::new(HashMap::new()),
            default_settings: ProjectSettings {
                exists: true,
                issue_types_enabled: true,
            },
            fail_next_creates: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_project(self, scope: TargetScope, settings: ProjectSettings) -> Self {
        if let Ok(mut projects) = self.projects.lock() {
            projects.insert(scope, settings);
        }
        self
    }

    /// Settings reported for projects that were not configured explicitly
    pub fn with_default_settings(mut self, settings: ProjectSettings) -> Self {
        self.default_settings = settings;
        self
    }

    /// Make the next `n` create calls fail with a transient error
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_next_creates.store(n, Ordering::SeqCst);
    }

    /// Pre-populate an entity as if it had been created earlier
    pub fn seed(&self, scope: &TargetScope, entity: TargetEntity) -> String {
        let id = self.allocate_id(entity.kind);
        let key = (
            scope.clone(),
            entity.kind,
            entity.external_source.clone(),
            entity.external_id.clone(),
        );
        if let Ok(mut entities) = self.entities.lock() {
            entities.insert(
                key,
                StoredEntity {
                    id: id.clone(),
                    entity,
                    refs: Vec::new(),
                },
            );
        }
        id
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities
            .lock()
            .map(|e| e.values().filter(|s| s.entity.kind == kind).count())
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entities.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn get(&self, kind: EntityKind, external_id: &str) -> Option<StoredEntity> {
        self.entities.lock().ok().and_then(|e| {
            e.values()
                .find(|s| s.entity.kind == kind && s.entity.external_id == external_id)
                .cloned()
        })
    }

    /// Created entities in creation order
    pub fn created_order(&self) -> Vec<(EntityKind, String)> {
        self.created_order.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn allocate_id(&self, kind: EntityKind) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", kind, n)
    }

    fn poisoned() -> TargetError {
        TargetError::transient("in-memory target lock poisoned")
    }
}

impl Default for InMemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetApi for InMemoryTarget {
    async fn project_settings(&self, scope: &TargetScope) -> Result<ProjectSettings, TargetError> {
        let projects = self.projects.lock().map_err(|_| Self::poisoned())?;
        Ok(projects
            .get(scope)
            .cloned()
            .unwrap_or_else(|| self.default_settings.clone()))
    }

    async fn find_by_external_id(
        &self,
        scope: &TargetScope,
        kind: EntityKind,
        external_source: &str,
        external_id: &str,
    ) -> Result<Option<String>, TargetError> {
        let entities = self.entities.lock().map_err(|_| Self::poisoned())?;
        let key = (
            scope.clone(),
            kind,
            external_source.to_string(),
            external_id.to_string(),
        );
        Ok(entities.get(&key).map(|s| s.id.clone()))
    }

    async fn create(
        &self,
        scope: &TargetScope,
        entity: &TargetEntity,
        refs: &[ResolvedRef],
    ) -> Result<String, TargetError> {
        let pending_failures = self.fail_next_creates.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next_creates.store(pending_failures - 1, Ordering::SeqCst);
            return Err(TargetError::transient("injected create failure"));
        }

        let key = (
            scope.clone(),
            entity.kind,
            entity.external_source.clone(),
            entity.external_id.clone(),
        );
        let mut entities = self.entities.lock().map_err(|_| Self::poisoned())?;
        if let Some(existing) = entities.get(&key) {
            return Ok(existing.id.clone());
        }

        let id = self.allocate_id(entity.kind);
        entities.insert(
            key,
            StoredEntity {
                id: id.clone(),
                entity: entity.clone(),
                refs: refs.to_vec(),
            },
        );
        drop(entities);

        if let Ok(mut order) = self.created_order.lock() {
            order.push((entity.kind, entity.external_id.clone()));
        }
        Ok(id)
    }
}

#[async_trait]
impl AsyncSignal for InMemoryTarget {
    async fn poll_status(&self, _job_id: Uuid) -> Result<AsyncStatus, SignalError> {
        Ok(AsyncStatus { done: true })
    }
}
