//! Jira Server and Jira Cloud importers

pub mod client;
pub mod models;
pub mod transform;

pub use client::{JiraClient, JiraFlavor, JiraSourceFactory};

use crate::core::strategy::{
    pending_key, CreateOrFindLoader, NestedResourcePull, PendingRelation, PendingRelationTransform,
    ProjectConfigurationCheck, RecordingLoader, ResourcePull, StepDataLoader, StoredDataPull,
};
use crate::core::{
    Cursor, EntityKind, JobContext, PipelineError, Provider, PullError, SourceFetchError, Step,
    StepCondition, StepDescriptor, StepKind, StepPipeline, TransformFn,
};
use crate::source::SourceResource;
use serde_json::Value;

fn project_key(ctx: &JobContext) -> Result<String, PullError> {
    ctx.request
        .source
        .project_key
        .clone()
        .ok_or_else(|| SourceFetchError::malformed("job has no source project_key").into())
}

fn project_id(ctx: &JobContext) -> Result<String, PullError> {
    ctx.request
        .source
        .project_id
        .clone()
        .ok_or_else(|| SourceFetchError::malformed("job has no source project_id").into())
}

/// Sprints of one stored board; kanban boards have none
fn board_sprints(_ctx: &JobContext, board: &Value) -> Option<SourceResource> {
    let attributes = board.get("attributes")?;
    if attributes.get("board_type").and_then(Value::as_str) == Some("kanban") {
        return None;
    }
    let board_id = attributes.get("source_id")?.as_str()?;
    Some(SourceResource::Sprints {
        board_id: board_id.to_string(),
    })
}

fn is_option_property(property: &Value) -> bool {
    property
        .pointer("/attributes/property_type")
        .and_then(Value::as_str)
        == Some("OPTION")
}

/// Options of one stored select-like property
fn property_options(ctx: &JobContext, property: &Value) -> Option<SourceResource> {
    let field_id = property.pointer("/attributes/source_field")?.as_str()?;
    Some(SourceResource::FieldOptions {
        field_id: field_id.to_string(),
        project_id: ctx.request.source.project_id.clone()?,
    })
}

fn has_comments(pending: &Value) -> bool {
    pending_role(pending) == Some("comments")
}

/// Comment thread of one issue, keyed by the Jira issue id
fn issue_comments(_ctx: &JobContext, pending: &Value) -> Option<SourceResource> {
    let issue_id = pending.get("external_id")?.as_str()?;
    Some(SourceResource::IssueComments {
        issue_id: issue_id.to_string(),
    })
}

fn pending_role(value: &Value) -> Option<&str> {
    value.get("role").and_then(Value::as_str)
}

fn is_issue_relation(value: &Value) -> bool {
    matches!(pending_role(value), Some("parent" | "link"))
}

fn is_issue_association(value: &Value) -> bool {
    matches!(pending_role(value), Some("cycle" | "module"))
}

fn relation_kind(pending: &PendingRelation) -> Option<EntityKind> {
    match pending.role.as_str() {
        "parent" | "link" => Some(EntityKind::IssueRelation),
        _ => None,
    }
}

fn association_kind(pending: &PendingRelation) -> Option<EntityKind> {
    match pending.role.as_str() {
        "cycle" => Some(EntityKind::CycleIssue),
        "module" => Some(EntityKind::ModuleIssue),
        _ => None,
    }
}

/// Steps shared by both flavors; `issues` differs only in its first cursor
fn steps(issues_start: Cursor) -> Vec<Step> {
    vec![
        Step::pre_run(
            StepDescriptor::new("project_configuration", StepKind::PreRun),
            ProjectConfigurationCheck,
        ),
        Step::etl(
            StepDescriptor::new("users", StepKind::Entity).page_size(100),
            ResourcePull::new(|_| Ok(SourceResource::Users)),
            TransformFn(transform::user),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("labels", StepKind::Entity).page_size(100),
            ResourcePull::new(|_| Ok(SourceResource::Labels)),
            TransformFn(transform::label),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("modules", StepKind::Entity),
            ResourcePull::new(|ctx| {
                Ok(SourceResource::Components {
                    project_key: project_key(ctx)?,
                })
            }),
            TransformFn(transform::module),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("boards", StepKind::Entity),
            ResourcePull::new(|ctx| {
                Ok(SourceResource::Boards {
                    project_key: project_key(ctx)?,
                })
            }),
            TransformFn(transform::board),
            StepDataLoader,
        ),
        Step::etl(
            StepDescriptor::new("cycles", StepKind::Entity)
                .depends_on("boards")
                .page_size(100),
            NestedResourcePull::new("boards", board_sprints),
            TransformFn(transform::cycle),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("issue_types", StepKind::Entity).when(StepCondition::IssueTypesEnabled),
            ResourcePull::new(|ctx| {
                Ok(SourceResource::IssueTypes {
                    project_id: project_id(ctx)?,
                })
            }),
            TransformFn(transform::issue_type),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new(transform::PROPERTIES_STEP, StepKind::Entity)
                .depends_on("issue_types")
                .when(StepCondition::IssueTypesEnabled),
            ResourcePull::new(|_| Ok(SourceResource::CustomFields)),
            TransformFn(transform::issue_property),
            RecordingLoader,
        ),
        Step::etl(
            StepDescriptor::new("issue_property_options", StepKind::Entity)
                .depends_on(transform::PROPERTIES_STEP)
                .when(StepCondition::IssueTypesEnabled),
            NestedResourcePull::new(transform::PROPERTIES_STEP, property_options).only(is_option_property),
            TransformFn(transform::issue_property_option),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("issues", StepKind::Issue)
                .depends_on("users")
                .depends_on("labels"),
            ResourcePull::new(|ctx| {
                Ok(SourceResource::Issues {
                    project_key: project_key(ctx)?,
                })
            })
            .starting_at(issues_start),
            TransformFn(transform::issue),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("issue_comments", StepKind::Issue)
                .depends_on("issues")
                .page_size(100),
            NestedResourcePull::new(pending_key("issues"), issue_comments).only(has_comments),
            TransformFn(transform::issue_comment),
            CreateOrFindLoader,
        ),
        Step::wait_for_async(StepDescriptor::new("wait_for_issue_processing", StepKind::WaitForAsync)),
        Step::etl(
            StepDescriptor::new("issue_relations", StepKind::Relation)
                .depends_on("issues")
                .page_size(100),
            StoredDataPull::pending_relations("issues", is_issue_relation),
            PendingRelationTransform::new(relation_kind),
            CreateOrFindLoader,
        ),
        Step::etl(
            StepDescriptor::new("issue_associations", StepKind::Relation)
                .depends_on("issues")
                .depends_on("cycles")
                .depends_on("modules")
                .page_size(100),
            StoredDataPull::pending_relations("issues", is_issue_association),
            PendingRelationTransform::new(association_kind),
            CreateOrFindLoader,
        ),
    ]
}

/// Jira Server / Data Center: offset-paginated issue search
pub fn server_pipeline() -> Result<StepPipeline, PipelineError> {
    StepPipeline::new(Provider::JiraServer, steps(Cursor::start()))
}

/// Jira Cloud: token-paginated issue search
pub fn cloud_pipeline() -> Result<StepPipeline, PipelineError> {
    StepPipeline::new(Provider::Jira, steps(Cursor::first_token()))
}
