//! Target-side entity model and the source-to-target id map

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of entity created in the target workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Label,
    Module,
    Board,
    Cycle,
    IssueType,
    IssueProperty,
    IssuePropertyOption,
    Issue,
    IssueComment,
    IssueRelation,
    CycleIssue,
    ModuleIssue,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Label => "label",
            EntityKind::Module => "module",
            EntityKind::Board => "board",
            EntityKind::Cycle => "cycle",
            EntityKind::IssueType => "issue_type",
            EntityKind::IssueProperty => "issue_property",
            EntityKind::IssuePropertyOption => "issue_property_option",
            EntityKind::Issue => "issue",
            EntityKind::IssueComment => "issue_comment",
            EntityKind::IssueRelation => "issue_relation",
            EntityKind::CycleIssue => "cycle_issue",
            EntityKind::ModuleIssue => "module_issue",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reference to another entity is resolved at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefMode {
    /// Item cannot be created without it
    Required,
    /// Dropped when it cannot be resolved
    Optional,
    /// Resolved by a later relation step once both ends exist
    Deferred,
}

/// Reference from one entity to another, by source-side external id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Field the resolved id is written to (e.g. `type_id`, `assignees`)
    pub role: String,
    pub kind: EntityKind,
    pub external_id: String,
    pub mode: RefMode,
}

impl EntityRef {
    pub fn new(role: impl Into<String>, kind: EntityKind, external_id: impl Into<String>, mode: RefMode) -> Self {
        Self {
            role: role.into(),
            kind,
            external_id: external_id.into(),
            mode,
        }
    }

    pub fn required(role: impl Into<String>, kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self::new(role, kind, external_id, RefMode::Required)
    }

    pub fn optional(role: impl Into<String>, kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self::new(role, kind, external_id, RefMode::Optional)
    }

    pub fn deferred(role: impl Into<String>, kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self::new(role, kind, external_id, RefMode::Deferred)
    }
}

/// A reference after lookup in the id map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRef {
    pub role: String,
    pub kind: EntityKind,
    pub target_id: String,
}

/// An entity in target shape, ready to be loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub kind: EntityKind,

    /// Stable id derived from the source entity, used for idempotent loads
    pub external_id: String,

    pub external_source: String,

    pub name: String,

    /// Kind-specific payload fields
    #[serde(default)]
    pub attributes: Map<String, Value>,

    #[serde(default)]
    pub references: Vec<EntityRef>,
}

impl TargetEntity {
    pub fn new(
        kind: EntityKind,
        external_id: impl Into<String>,
        external_source: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            external_source: external_source.into(),
            name: name.into(),
            attributes: Map::new(),
            references: Vec::new(),
        }
    }

    /// Set an attribute, skipping nulls
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.attributes.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_ref(mut self, reference: EntityRef) -> Self {
        self.references.push(reference);
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Mapping from source external ids to created target ids, per entity kind
///
/// Built incrementally as steps complete and persisted with the job checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdMap {
    entries: BTreeMap<EntityKind, HashMap<String, String>>,
}

impl EntityIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping; returns true if the external id was not mapped before
    pub fn insert(&mut self, kind: EntityKind, external_id: impl Into<String>, target_id: impl Into<String>) -> bool {
        self.entries
            .entry(kind)
            .or_default()
            .insert(external_id.into(), target_id.into())
            .is_none()
    }

    pub fn get(&self, kind: EntityKind, external_id: &str) -> Option<&str> {
        self.entries
            .get(&kind)
            .and_then(|m| m.get(external_id))
            .map(String::as_str)
    }

    pub fn contains(&self, kind: EntityKind, external_id: &str) -> bool {
        self.get(kind, external_id).is_some()
    }

    /// Total number of mappings across all kinds
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn len_of(&self, kind: EntityKind) -> usize {
        self.entries.get(&kind).map(HashMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
