//! Jira -> target entity transforms
//!
//! Pure functions of (context, raw record). They never touch the network and
//! never mutate the context.

use crate::core::{EntityKind, EntityRef, JobContext, TargetEntity, TransformError};
use crate::providers::jira::models::{
    JiraBoard, JiraComment, JiraComponent, JiraField, JiraFieldOption, JiraIssue, JiraIssueType,
    JiraSprint, JiraUser,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Label added to every imported issue
pub const IMPORTED_LABEL: &str = "JIRA IMPORTED";

const EMPTY_DESCRIPTION: &str = "<p></p>";

/// Step whose recorded properties the issue transform reads values for
pub const PROPERTIES_STEP: &str = "issue_properties";

/// Workspace roles
const ROLE_ADMIN: u32 = 20;
const ROLE_MEMBER: u32 = 15;

fn parse<T: DeserializeOwned>(entity: &'static str, item: &Value) -> Result<T, TransformError> {
    serde_json::from_value(item.clone()).map_err(|e| TransformError::invalid(entity, e.to_string()))
}

/// Date part of a Jira timestamp (`2024-03-01T09:00:00.000+0000` -> `2024-03-01`)
fn date_only(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .and_then(|v| v.get(..10))
        .map(str::to_string)
}

pub fn user(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let user: JiraUser = parse("user", item)?;
    // Cloud hides emails for privacy; app and bot accounts have none
    let email = user
        .email_address
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| TransformError::Unsupported {
            entity: "user",
            reason: format!(
                "'{}' has no email address",
                user.display_name
                    .as_deref()
                    .or(user.account_id.as_deref())
                    .or(user.name.as_deref())
                    .unwrap_or("unknown")
            ),
        })?;

    let display_name = user
        .display_name
        .clone()
        .or_else(|| user.name.clone())
        .unwrap_or_else(|| email.clone());
    let (first_name, last_name) = match display_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (display_name.clone(), String::new()),
    };
    let role = if user.is_admin() { ROLE_ADMIN } else { ROLE_MEMBER };

    Ok(TargetEntity::new(EntityKind::User, &email, ctx.external_source(), &display_name)
        .with_attr("email", email.as_str())
        .with_attr("display_name", user.name.clone().unwrap_or_else(|| display_name.clone()))
        .with_attr("first_name", first_name)
        .with_attr("last_name", last_name)
        .with_attr("role", role)
        .with_attr("is_active", user.active))
}

pub fn label(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let name = item
        .as_str()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TransformError::invalid("label", "label is not a non-empty string"))?;
    Ok(TargetEntity::new(EntityKind::Label, name, ctx.external_source(), name))
}

pub fn module(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let component: JiraComponent = parse("component", item)?;
    Ok(TargetEntity::new(
        EntityKind::Module,
        ctx.external_id(&component.id),
        ctx.external_source(),
        &component.name,
    )
    .with_attr("description", component.description))
}

pub fn board(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let board: JiraBoard = parse("board", item)?;
    Ok(TargetEntity::new(
        EntityKind::Board,
        ctx.external_id(&board.id),
        ctx.external_source(),
        &board.name,
    )
    .with_attr("source_id", board.id.as_str())
    .with_attr("board_type", board.board_type))
}

pub fn cycle(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let sprint: JiraSprint = parse("sprint", item)?;
    Ok(TargetEntity::new(
        EntityKind::Cycle,
        ctx.external_id(&sprint.id),
        ctx.external_source(),
        &sprint.name,
    )
    .with_attr("start_date", date_only(sprint.start_date.as_deref()))
    .with_attr("end_date", date_only(sprint.end_date.as_deref()))
    .with_attr("description", sprint.goal)
    .with_attr("status", sprint.state))
}

pub fn issue_type(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let issue_type: JiraIssueType = parse("issue type", item)?;
    let is_epic = issue_type.name.to_lowercase().contains("epic");
    Ok(TargetEntity::new(
        EntityKind::IssueType,
        ctx.external_id(&issue_type.id),
        ctx.external_source(),
        &issue_type.name,
    )
    .with_attr("description", issue_type.description)
    .with_attr("is_epic", is_epic)
    .with_attr("is_subtask", issue_type.subtask)
    .with_attr("is_active", true))
}

/// Target property type for a Jira custom field plugin key
///
/// Returns `(property_type, relation_type, is_multi)`.
fn property_type(custom: &str) -> Option<(&'static str, Option<&'static str>, bool)> {
    let key = custom.rsplit(':').next().unwrap_or(custom);
    let mapped = match key {
        "textfield" | "textarea" | "url" => ("TEXT", None, false),
        "float" => ("DECIMAL", None, false),
        "datepicker" | "datetime" => ("DATETIME", None, false),
        "select" | "radiobuttons" => ("OPTION", None, false),
        "multiselect" | "multicheckboxes" | "labels" => ("OPTION", None, true),
        "userpicker" => ("RELATION", Some("USER"), false),
        "multiuserpicker" => ("RELATION", Some("USER"), true),
        _ => return None,
    };
    Some(mapped)
}

pub fn issue_property(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let field: JiraField = parse("custom field", item)?;
    if !field.custom {
        return Err(TransformError::Unsupported {
            entity: "custom field",
            reason: format!("'{}' is a system field", field.id),
        });
    }
    let plugin = field
        .schema
        .as_ref()
        .and_then(|s| s.custom.as_deref())
        .ok_or(TransformError::missing("custom field", "schema.custom"))?;
    let (kind, relation, is_multi) = property_type(plugin).ok_or_else(|| TransformError::Unsupported {
        entity: "custom field",
        reason: format!("field type '{}' has no property equivalent", plugin),
    })?;

    let field_id = field.id.strip_prefix("customfield_").unwrap_or(&field.id);
    Ok(TargetEntity::new(
        EntityKind::IssueProperty,
        ctx.external_id(field_id),
        ctx.external_source(),
        &field.name,
    )
    .with_attr("display_name", field.name.as_str())
    .with_attr("source_field", field.id.as_str())
    .with_attr("field_type", plugin)
    .with_attr("property_type", kind)
    .with_attr("relation_type", relation)
    .with_attr("is_multi", is_multi)
    .with_attr("is_required", false)
    .with_attr("is_active", true))
}

pub fn issue_property_option(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let option: JiraFieldOption = parse("field option", item)?;
    let field_id = option
        .field_id
        .as_deref()
        .ok_or(TransformError::missing("field option", "fieldId"))?;
    Ok(TargetEntity::new(
        EntityKind::IssuePropertyOption,
        ctx.external_id(&option.id),
        ctx.external_source(),
        &option.value,
    )
    .with_attr("is_active", !option.disabled)
    .with_ref(EntityRef::required(
        "property",
        EntityKind::IssueProperty,
        ctx.external_id(field_id),
    )))
}

/// Comment HTML: rendered body, else a plain-text body, else empty
fn comment_html(comment: &JiraComment) -> String {
    if let Some(rendered) = comment.rendered_body.as_deref().filter(|b| !b.trim().is_empty()) {
        return rendered.to_string();
    }
    match comment.body.as_ref().and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => format!("<p>{}</p>", text.trim()),
        _ => EMPTY_DESCRIPTION.to_string(),
    }
}

pub fn issue_comment(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let comment: JiraComment = parse("comment", item)?;
    let issue_id = comment
        .issue_id
        .as_deref()
        .ok_or(TransformError::missing("comment", "issueId"))?;

    let mut entity = TargetEntity::new(
        EntityKind::IssueComment,
        ctx.external_id(&comment.id),
        ctx.external_source(),
        "",
    )
    .with_attr("comment_html", comment_html(&comment))
    .with_attr("created_at", comment.created.clone())
    .with_ref(EntityRef::required("issue", EntityKind::Issue, ctx.external_id(issue_id)));

    if let Some(author) = &comment.author {
        entity = entity.with_attr(
            "actor",
            author.email_address.clone().or_else(|| author.display_name.clone()),
        );
        if let Some(email) = author.email_address.as_deref() {
            entity = entity.with_ref(EntityRef::optional("actor", EntityKind::User, email));
        }
    }
    Ok(entity)
}

/// One custom-field value in target shape
fn property_value(value: impl Into<Value>, external_id: Option<String>) -> Value {
    match external_id {
        Some(id) => json!({ "value": value.into(), "external_id": id }),
        None => json!({ "value": value.into() }),
    }
}

fn option_value(ctx: &JobContext, option: &Value) -> Option<Value> {
    let id = match option.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let label = option.get("value").and_then(Value::as_str).unwrap_or(&id).to_string();
    Some(property_value(label, Some(ctx.external_id(&id))))
}

fn user_value(user: &Value) -> Option<Value> {
    let id = user
        .get("emailAddress")
        .or_else(|| user.get("accountId"))
        .or_else(|| user.get("name"))
        .and_then(Value::as_str)?;
    let name = user.get("displayName").and_then(Value::as_str).unwrap_or(id);
    Some(property_value(name, Some(id.to_string())))
}

fn each(raw: &Value, single: impl Fn(&Value) -> Option<Value>) -> Vec<Value> {
    raw.as_array()
        .map(|items| items.iter().filter_map(single).collect())
        .unwrap_or_default()
}

/// Values of one custom field on an issue, by the field's plugin key
fn field_values(ctx: &JobContext, field_type: &str, raw: &Value, rendered: Option<&Value>) -> Vec<Value> {
    let key = field_type.rsplit(':').next().unwrap_or(field_type);
    match key {
        "textfield" | "url" | "datepicker" | "datetime" => {
            raw.as_str().map(|s| vec![property_value(s, None)]).unwrap_or_default()
        }
        "textarea" => rendered
            .and_then(Value::as_str)
            .or_else(|| raw.as_str())
            .map(|s| vec![property_value(s, None)])
            .unwrap_or_default(),
        "float" => raw
            .as_f64()
            .map(|n| vec![property_value(n.to_string(), None)])
            .unwrap_or_default(),
        "select" | "radiobuttons" => option_value(ctx, raw).into_iter().collect(),
        "multiselect" | "multicheckboxes" => each(raw, |v: &Value| option_value(ctx, v)),
        "labels" => each(raw, |v: &Value| v.as_str().map(|s| property_value(s, None))),
        "userpicker" => user_value(raw).into_iter().collect(),
        "multiuserpicker" => each(raw, user_value),
        _ => Vec::new(),
    }
}

/// Custom-field values keyed by property external id
///
/// Only fields the properties step imported are read.
fn property_values(ctx: &JobContext, fields: &Value, rendered: Option<&Value>) -> serde_json::Map<String, Value> {
    let mut values = serde_json::Map::new();
    for property in ctx.data(PROPERTIES_STEP) {
        let Some(external_id) = property.get("external_id").and_then(Value::as_str) else {
            continue;
        };
        let attributes = property.get("attributes");
        let field = attributes.and_then(|a| a.get("source_field")).and_then(Value::as_str);
        let field_type = attributes.and_then(|a| a.get("field_type")).and_then(Value::as_str);
        let (Some(field), Some(field_type)) = (field, field_type) else {
            continue;
        };
        let Some(raw) = fields.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let found = field_values(ctx, field_type, raw, rendered.and_then(|r| r.get(field)));
        if !found.is_empty() {
            values.insert(external_id.to_string(), Value::Array(found));
        }
    }
    values
}

/// Jira priority name -> target priority
fn priority(name: Option<&str>) -> &'static str {
    match name.map(str::to_lowercase).as_deref() {
        Some("highest" | "blocker" | "critical") => "urgent",
        Some("high" | "major") => "high",
        Some("medium") => "medium",
        Some("low" | "lowest" | "minor" | "trivial") => "low",
        _ => "none",
    }
}

pub fn issue(ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
    let issue: JiraIssue = parse("issue", item)?;
    let fields = &issue.fields;

    let name = fields
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled");
    let description = issue
        .rendered_fields
        .as_ref()
        .and_then(|r| r.description.as_deref())
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(EMPTY_DESCRIPTION);

    let mut labels = fields.labels.clone();
    labels.push(IMPORTED_LABEL.to_string());

    let mut entity = TargetEntity::new(
        EntityKind::Issue,
        ctx.external_id(&issue.id),
        ctx.external_source(),
        name,
    )
    .with_attr("description_html", description)
    .with_attr("priority", priority(fields.priority.as_ref().map(|p| p.name.as_str())))
    .with_attr("state", fields.status.as_ref().map(|s| s.name.clone()))
    .with_attr("labels", labels)
    .with_attr("target_date", date_only(fields.duedate.as_deref()))
    .with_attr("created_at", fields.created.clone())
    .with_attr("source_key", issue.key.as_str());

    let values = property_values(ctx, &item["fields"], item.get("renderedFields"));
    if !values.is_empty() {
        entity = entity.with_attr("property_values", Value::Object(values));
    }

    if let Some(url) = ctx.source_url() {
        entity = entity.with_attr(
            "links",
            json!([{ "name": "Linked Jira Issue", "url": format!("{}/browse/{}", url, issue.key) }]),
        );
    }

    if let Some(issue_type) = &fields.issuetype {
        entity = entity.with_ref(EntityRef::optional(
            "type",
            EntityKind::IssueType,
            ctx.external_id(&issue_type.id),
        ));
    }
    for (role, person) in [("assignee", &fields.assignee), ("reporter", &fields.reporter)] {
        if let Some(email) = person.as_ref().and_then(|p| p.email_address.as_deref()) {
            entity = entity.with_ref(EntityRef::optional(role, EntityKind::User, email));
        }
    }
    for label in &fields.labels {
        entity = entity.with_ref(EntityRef::optional("label", EntityKind::Label, label.trim()));
    }

    if let Some(parent) = &fields.parent {
        entity = entity.with_ref(EntityRef::deferred(
            "parent",
            EntityKind::Issue,
            ctx.external_id(&parent.id),
        ));
    }
    for link in &fields.issuelinks {
        if let Some(outward) = &link.outward_issue {
            entity = entity.with_ref(EntityRef::deferred(
                "link",
                EntityKind::Issue,
                ctx.external_id(&outward.id),
            ));
        }
    }
    for sprint in fields.sprint.iter().chain(&fields.closed_sprints) {
        let cycle = EntityRef::deferred("cycle", EntityKind::Cycle, ctx.external_id(&sprint.id));
        if !entity.references.contains(&cycle) {
            entity = entity.with_ref(cycle);
        }
    }
    for component in &fields.components {
        entity = entity.with_ref(EntityRef::deferred(
            "module",
            EntityKind::Module,
            ctx.external_id(&component.id),
        ));
    }
    // Comments are fetched per issue by a later step
    if fields.comment.as_ref().is_some_and(|c| c.total > 0) {
        entity = entity.with_ref(EntityRef::deferred("comments", EntityKind::IssueComment, &issue.id));
    }

    Ok(entity)
}
