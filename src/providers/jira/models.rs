//! Jira REST payloads (the subset the importer reads)

use serde::Deserialize;
use serde_json::Value;

/// Jira ids arrive as strings on most endpoints and as numbers on the agile API
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected id, got {}", other))),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraUser {
    /// Server username
    #[serde(default)]
    pub name: Option<String>,
    /// Cloud account id
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub groups: Option<JiraGroups>,
    #[serde(default)]
    pub avatar_urls: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl JiraUser {
    pub fn is_admin(&self) -> bool {
        self.groups
            .as_ref()
            .map(|g| g.items.iter().any(|group| group.name.to_lowercase().contains("admin")))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JiraGroups {
    #[serde(default)]
    pub items: Vec<JiraGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraGroup {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraComponent {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraBoard {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    /// `scrum`, `kanban` or `simple`
    #[serde(rename = "type", default)]
    pub board_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraSprint {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraIssueType {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subtask: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub schema: Option<JiraFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraFieldSchema {
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    /// Plugin key such as `com.atlassian.jira.plugin.system.customfieldtypes:select`
    #[serde(default)]
    pub custom: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraIssue {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub key: String,
    pub fields: JiraIssueFields,
    #[serde(default)]
    pub rendered_fields: Option<JiraRenderedFields>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraIssueFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub issuetype: Option<JiraIdRef>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
    #[serde(default)]
    pub reporter: Option<JiraUser>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<JiraNamed>,
    #[serde(default)]
    pub status: Option<JiraNamed>,
    #[serde(default)]
    pub parent: Option<JiraIdRef>,
    #[serde(default)]
    pub issuelinks: Vec<JiraIssueLink>,
    #[serde(default)]
    pub components: Vec<JiraIdRef>,
    #[serde(default)]
    pub sprint: Option<JiraIdRef>,
    #[serde(default)]
    pub closed_sprints: Vec<JiraIdRef>,
    #[serde(default)]
    pub duedate: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub comment: Option<JiraCommentSummary>,
}

/// Comments embedded in a search result; `total` may exceed the embedded list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JiraCommentSummary {
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraComment {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    /// Wiki markup on Server, a document tree on Cloud
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub rendered_body: Option<String>,
    #[serde(default)]
    pub author: Option<JiraUser>,
    #[serde(default)]
    pub created: Option<String>,
    /// Added by the client; the comment endpoint does not repeat it
    #[serde(default)]
    pub issue_id: Option<String>,
}

/// Option of a select-like custom field
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraFieldOption {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
    /// Added by the client: numeric id of the owning field
    #[serde(default)]
    pub field_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraRenderedFields {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraIdRef {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraNamed {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraIssueLink {
    #[serde(rename = "type", default)]
    pub link_type: Option<JiraNamed>,
    #[serde(default)]
    pub outward_issue: Option<JiraIdRef>,
}

/// `{ values, isLast }` envelope of paginated endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesPage {
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub is_last: Option<bool>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Server `/customFields/{id}/options` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsPage {
    #[serde(default)]
    pub options: Vec<Value>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// `/issue/{id}/comment` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    #[serde(default)]
    pub comments: Vec<Value>,
    #[serde(default)]
    pub start_at: u64,
    #[serde(default)]
    pub total: u64,
}

/// Server `/search` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub issues: Vec<Value>,
    #[serde(default)]
    pub start_at: u64,
    #[serde(default)]
    pub total: u64,
}

/// Cloud `/search/jql` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSearchPage {
    #[serde(default)]
    pub issues: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub is_last: Option<bool>,
}
