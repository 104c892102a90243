//! Target write API - where transformed entities are created

pub mod http;
pub mod memory;

use crate::core::{EntityKind, ResolvedRef, TargetEntity, TargetError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::{HttpTargetClient, HttpTargetConfig};
pub use memory::InMemoryTarget;

/// Workspace/project the job writes into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetScope {
    pub workspace_id: String,
    pub project_id: String,
}

impl TargetScope {
    pub fn new(workspace_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            project_id: project_id.into(),
        }
    }
}

/// Configuration of the target project relevant to an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub exists: bool,
    #[serde(default)]
    pub issue_types_enabled: bool,
}

/// The product's entity-creation API
///
/// Implementations must make "find by external id, else create" safe to
/// repeat: creating an entity whose `(kind, external_source, external_id)`
/// already exists must not produce a second copy.
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn project_settings(&self, scope: &TargetScope) -> Result<ProjectSettings, TargetError>;

    async fn find_by_external_id(
        &self,
        scope: &TargetScope,
        kind: EntityKind,
        external_source: &str,
        external_id: &str,
    ) -> Result<Option<String>, TargetError>;

    /// Create the entity and return its target id
    async fn create(
        &self,
        scope: &TargetScope,
        entity: &TargetEntity,
        refs: &[ResolvedRef],
    ) -> Result<String, TargetError>;
}
