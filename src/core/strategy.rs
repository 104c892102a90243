//! Built-in strategies shared by provider step tables

use crate::core::{
    context::JobContext,
    entity::{EntityKind, EntityRef, RefMode, ResolvedRef, TargetEntity},
    error::{LoadError, PullError, SourceFetchError, StepError, TransformError},
    page::{Cursor, PullResult},
    step::{LoadResult, LoadStrategy, PreRunStrategy, PullStrategy, TransformStrategy},
};
use crate::source::{PageRequest, SourceResource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Key under which a step's deferred references are stored
pub fn pending_key(step: &str) -> String {
    format!("{}:pending", step)
}

/// A deferred reference waiting for a relation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelation {
    pub source_kind: EntityKind,
    pub source_external_id: String,
    pub role: String,
    pub kind: EntityKind,
    pub external_id: String,
}

impl PendingRelation {
    pub fn from_value(value: &Value) -> Result<Self, TransformError> {
        serde_json::from_value(value.clone())
            .map_err(|e| TransformError::invalid("pending relation", e.to_string()))
    }
}

/// Pages through one source resource
pub struct ResourcePull {
    resource: fn(&JobContext) -> Result<SourceResource, PullError>,
    initial: Cursor,
}

impl ResourcePull {
    pub fn new(resource: fn(&JobContext) -> Result<SourceResource, PullError>) -> Self {
        Self {
            resource,
            initial: Cursor::start(),
        }
    }

    /// Use a different first cursor (e.g. token pagination)
    pub fn starting_at(mut self, cursor: Cursor) -> Self {
        self.initial = cursor;
        self
    }
}

#[async_trait]
impl PullStrategy for ResourcePull {
    fn initial_cursor(&self) -> Cursor {
        self.initial.clone()
    }

    async fn pull(
        &self,
        ctx: &JobContext,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<PullResult<Value>, PullError> {
        let request = PageRequest {
            resource: (self.resource)(ctx)?,
            cursor: cursor.clone(),
            page_size,
        };
        debug!("Pulling {} at {}", request.resource.name(), cursor);

        let page = ctx
            .source
            .fetch_page(&request)
            .await
            .map_err(|e| ctx.source.to_pull_error(e))?;

        Ok(PullResult {
            items: page.records,
            has_more: page.has_more,
            cursor: cursor.clone(),
            next_cursor: page.next_cursor,
            max_results: page_size,
        })
    }
}

/// Pages through an inner resource for each record an earlier step stored
///
/// Uses [`Cursor::Nested`]: `outer` indexes the stored records, `inner` is the
/// offset within the current one.
pub struct NestedResourcePull {
    outer_step: String,
    resource: fn(&JobContext, &Value) -> Option<SourceResource>,
    filter: fn(&Value) -> bool,
}

impl NestedResourcePull {
    pub fn new(
        outer_step: impl Into<String>,
        resource: fn(&JobContext, &Value) -> Option<SourceResource>,
    ) -> Self {
        Self {
            outer_step: outer_step.into(),
            resource,
            filter: |_| true,
        }
    }

    /// Only visit stored records matching `filter`
    pub fn only(mut self, filter: fn(&Value) -> bool) -> Self {
        self.filter = filter;
        self
    }
}

#[async_trait]
impl PullStrategy for NestedResourcePull {
    fn initial_cursor(&self) -> Cursor {
        Cursor::nested_start()
    }

    async fn pull(
        &self,
        ctx: &JobContext,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<PullResult<Value>, PullError> {
        let (outer, inner) = match cursor {
            Cursor::Nested { outer, inner } => (*outer, *inner),
            other => {
                return Err(SourceFetchError::malformed(format!(
                    "nested pull expects a nested cursor, got {}",
                    other
                ))
                .into())
            }
        };

        let parents: Vec<&Value> = ctx
            .data(&self.outer_step)
            .iter()
            .filter(|v| (self.filter)(v))
            .collect();
        let Some(parent) = parents.get(outer).copied() else {
            return Ok(PullResult::empty(cursor.clone()));
        };
        let has_next_parent = outer + 1 < parents.len();
        let next_parent = Cursor::Nested {
            outer: outer + 1,
            inner: 0,
        };

        let Some(resource) = (self.resource)(ctx, parent) else {
            debug!("No inner resource for {} #{}", self.outer_step, outer);
            return Ok(PullResult {
                items: Vec::new(),
                has_more: has_next_parent,
                cursor: cursor.clone(),
                next_cursor: has_next_parent.then_some(next_parent),
                max_results: page_size,
            });
        };

        let request = PageRequest {
            resource,
            cursor: Cursor::Offset { start_at: inner },
            page_size,
        };
        let page = ctx
            .source
            .fetch_page(&request)
            .await
            .map_err(|e| ctx.source.to_pull_error(e))?;

        let next_cursor = if page.has_more {
            Some(Cursor::Nested {
                outer,
                inner: inner + page.records.len() as u64,
            })
        } else if has_next_parent {
            Some(next_parent)
        } else {
            None
        };

        Ok(PullResult {
            items: page.records,
            has_more: next_cursor.is_some(),
            cursor: cursor.clone(),
            next_cursor,
            max_results: page_size,
        })
    }
}

/// Pages through records an earlier step stored in the context
pub struct StoredDataPull {
    key: String,
    filter: fn(&Value) -> bool,
}

impl StoredDataPull {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            filter: |_| true,
        }
    }

    /// Deferred references recorded by `step`
    pub fn pending_relations(step: &str, filter: fn(&Value) -> bool) -> Self {
        Self {
            key: pending_key(step),
            filter,
        }
    }
}

#[async_trait]
impl PullStrategy for StoredDataPull {
    async fn pull(
        &self,
        ctx: &JobContext,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<PullResult<Value>, PullError> {
        let start = cursor.offset() as usize;
        let matching: Vec<&Value> = ctx.data(&self.key).iter().filter(|v| (self.filter)(v)).collect();
        let end = (start + page_size.max(1) as usize).min(matching.len());
        let items: Vec<Value> = matching
            .get(start..end)
            .map(|slice| slice.iter().map(|v| (*v).clone()).collect())
            .unwrap_or_default();

        Ok(PullResult::offset(items, start as u64, page_size, end < matching.len()))
    }
}

/// Turns pending relations into relation entities
pub struct PendingRelationTransform {
    kind: fn(&PendingRelation) -> Option<EntityKind>,
}

impl PendingRelationTransform {
    pub fn new(kind: fn(&PendingRelation) -> Option<EntityKind>) -> Self {
        Self { kind }
    }
}

impl TransformStrategy for PendingRelationTransform {
    fn transform(&self, ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
        let pending = PendingRelation::from_value(item)?;
        let kind = (self.kind)(&pending).ok_or_else(|| TransformError::Unsupported {
            entity: "relation",
            reason: format!("no relation for role '{}'", pending.role),
        })?;

        let external_id = format!(
            "{}|{}|{}",
            pending.source_external_id, pending.role, pending.external_id
        );
        Ok(TargetEntity::new(kind, external_id, ctx.external_source(), pending.role.clone())
            .with_attr("relation_type", pending.role.as_str())
            .with_ref(EntityRef::required("source", pending.source_kind, &pending.source_external_id))
            .with_ref(EntityRef::required(&pending.role, pending.kind, &pending.external_id)))
    }
}

/// Idempotent "find by external id, else create" loader
///
/// Required references that cannot be resolved exclude the entity with a
/// warning, optional ones are dropped, deferred ones are recorded as pending
/// relations under [`pending_key`].
pub struct CreateOrFindLoader;

#[async_trait]
impl LoadStrategy for CreateOrFindLoader {
    async fn load(
        &self,
        ctx: &mut JobContext,
        step: &str,
        entities: Vec<TargetEntity>,
    ) -> Result<LoadResult, LoadError> {
        let scope = ctx.scope();
        let mut result = LoadResult::default();

        for entity in entities {
            if ctx.id_map.contains(entity.kind, &entity.external_id) {
                result.existing += 1;
                continue;
            }

            let mut resolved = Vec::new();
            let mut deferred = Vec::new();
            let mut unresolved = None;
            for reference in &entity.references {
                if reference.mode == RefMode::Deferred {
                    deferred.push(reference);
                    continue;
                }
                match ctx.id_map.get(reference.kind, &reference.external_id) {
                    Some(target_id) => resolved.push(ResolvedRef {
                        role: reference.role.clone(),
                        kind: reference.kind,
                        target_id: target_id.to_string(),
                    }),
                    None if reference.mode == RefMode::Required => {
                        unresolved = Some(reference);
                        break;
                    }
                    None => debug!(
                        "Dropping unresolved {} reference '{}' on {} '{}'",
                        reference.role, reference.external_id, entity.kind, entity.external_id
                    ),
                }
            }

            if let Some(reference) = unresolved {
                ctx.warn(
                    step,
                    format!(
                        "skipping {} '{}': {} '{}' was not imported",
                        entity.kind, entity.external_id, reference.kind, reference.external_id
                    ),
                );
                result.skipped += 1;
                continue;
            }

            let found = ctx
                .target
                .find_by_external_id(&scope, entity.kind, &entity.external_source, &entity.external_id)
                .await
                .map_err(|source| LoadError::Lookup {
                    kind: entity.kind,
                    external_id: entity.external_id.clone(),
                    source,
                })?;

            let target_id = match found {
                Some(id) => {
                    result.existing += 1;
                    id
                }
                None => {
                    let id = ctx
                        .target
                        .create(&scope, &entity, &resolved)
                        .await
                        .map_err(|source| LoadError::Write {
                            kind: entity.kind,
                            external_id: entity.external_id.clone(),
                            source,
                        })?;
                    result.created += 1;
                    id
                }
            };

            let pending: Vec<Value> = deferred
                .into_iter()
                .map(|reference| {
                    json!(PendingRelation {
                        source_kind: entity.kind,
                        source_external_id: entity.external_id.clone(),
                        role: reference.role.clone(),
                        kind: reference.kind,
                        external_id: reference.external_id.clone(),
                    })
                })
                .collect();
            ctx.id_map.insert(entity.kind, entity.external_id, target_id);
            for value in pending {
                ctx.record_data(&pending_key(step), value);
            }
        }

        Ok(result)
    }
}

/// [`CreateOrFindLoader`] that also keeps every mapped entity in the step data
///
/// For steps whose output later steps iterate (e.g. properties and their options).
pub struct RecordingLoader;

#[async_trait]
impl LoadStrategy for RecordingLoader {
    async fn load(
        &self,
        ctx: &mut JobContext,
        step: &str,
        entities: Vec<TargetEntity>,
    ) -> Result<LoadResult, LoadError> {
        let candidates = entities.clone();
        let result = CreateOrFindLoader.load(ctx, step, entities).await?;

        for entity in candidates {
            if !ctx.id_map.contains(entity.kind, &entity.external_id) {
                continue;
            }
            let recorded = ctx
                .data(step)
                .iter()
                .any(|v| v.get("external_id").and_then(Value::as_str) == Some(entity.external_id.as_str()));
            if !recorded {
                ctx.record_data(step, json!(entity));
            }
        }
        Ok(result)
    }
}

/// Keeps entities in the context for dependent steps without writing them
pub struct StepDataLoader;

#[async_trait]
impl LoadStrategy for StepDataLoader {
    async fn load(
        &self,
        ctx: &mut JobContext,
        step: &str,
        entities: Vec<TargetEntity>,
    ) -> Result<LoadResult, LoadError> {
        let mut result = LoadResult::default();
        for entity in entities {
            let already = ctx
                .data(step)
                .iter()
                .any(|v| v.get("external_id").and_then(Value::as_str) == Some(entity.external_id.as_str()));
            if already {
                result.existing += 1;
                continue;
            }
            ctx.record_data(step, json!(entity));
            result.created += 1;
        }
        Ok(result)
    }
}

/// Checks the target project and records its settings
pub struct ProjectConfigurationCheck;

#[async_trait]
impl PreRunStrategy for ProjectConfigurationCheck {
    async fn run(&self, ctx: &mut JobContext) -> Result<(), StepError> {
        let scope = ctx.scope();
        let settings = ctx
            .target
            .project_settings(&scope)
            .await
            .map_err(|e| StepError::PreRun(e.to_string()))?;

        if !settings.exists {
            return Err(StepError::PreRun(format!(
                "target project '{}' does not exist in workspace '{}'",
                scope.project_id, scope.workspace_id
            )));
        }

        ctx.flags.issue_types_enabled = settings.issue_types_enabled;
        info!(
            "Target project {} checked (issue types enabled: {})",
            scope.project_id, settings.issue_types_enabled
        );
        Ok(())
    }
}
