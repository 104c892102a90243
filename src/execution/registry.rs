//! Step registry - provider -> validated step pipeline

use crate::core::{PipelineError, Provider, StepPipeline};
use crate::providers::jira;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("no importer registered for provider '{0}'")]
    UnsupportedProvider(Provider),

    #[error(transparent)]
    InvalidPipeline(#[from] PipelineError),
}

/// Step pipelines per provider
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    pipelines: HashMap<Provider, StepPipeline>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Jira Server and Jira Cloud pipelines
    pub fn with_builtin_providers() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(jira::server_pipeline()?);
        registry.register(jira::cloud_pipeline()?);
        Ok(registry)
    }

    /// Register (or replace) the pipeline for its provider
    pub fn register(&mut self, pipeline: StepPipeline) -> &mut Self {
        self.pipelines.insert(pipeline.provider(), pipeline);
        self
    }

    pub fn steps_for(&self, provider: Provider) -> Result<&StepPipeline, RegistryError> {
        self.pipelines
            .get(&provider)
            .ok_or(RegistryError::UnsupportedProvider(provider))
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.pipelines.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}
