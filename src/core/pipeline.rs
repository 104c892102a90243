//! Validated step pipeline for one provider

use crate::core::{
    job::Provider,
    step::{Step, StepKind},
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors found while validating a step table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("{provider} pipeline has no steps")]
    Empty { provider: Provider },

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("step name '{0}' is not snake_case")]
    InvalidName(String),

    #[error("step '{step}' ({kind}) cannot run after a {previous} step")]
    PhaseOrder {
        step: String,
        kind: StepKind,
        previous: StepKind,
    },

    #[error("step '{step}' depends on '{dependency}', which does not run before it")]
    DependencyOrder { step: String, dependency: String },

    #[error("wait step '{0}' has nothing to wait for")]
    MisplacedWait(String),
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"))
}

/// Ordered, statically checked list of steps
#[derive(Debug, Clone)]
pub struct StepPipeline {
    provider: Provider,
    steps: Vec<Step>,
}

impl StepPipeline {
    pub fn new(provider: Provider, steps: Vec<Step>) -> Result<Self, PipelineError> {
        Self::validate(provider, &steps)?;
        Ok(Self { provider, steps })
    }

    fn validate(provider: Provider, steps: &[Step]) -> Result<(), PipelineError> {
        if steps.is_empty() {
            return Err(PipelineError::Empty { provider });
        }

        let mut seen = HashSet::new();
        let mut previous: Option<StepKind> = None;

        for step in steps {
            let name = step.name();
            if !name_pattern().is_match(name) {
                return Err(PipelineError::InvalidName(name.to_string()));
            }

            for dependency in &step.descriptor.depends_on {
                if !seen.contains(dependency.as_str()) {
                    return Err(PipelineError::DependencyOrder {
                        step: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if !seen.insert(name) {
                return Err(PipelineError::DuplicateStep(name.to_string()));
            }

            let kind = step.kind();
            match previous {
                None if kind == StepKind::WaitForAsync => {
                    return Err(PipelineError::MisplacedWait(name.to_string()));
                }
                Some(StepKind::WaitForAsync) if kind == StepKind::WaitForAsync => {
                    return Err(PipelineError::MisplacedWait(name.to_string()));
                }
                Some(prev) if kind.phase() < prev.phase() => {
                    return Err(PipelineError::PhaseOrder {
                        step: name.to_string(),
                        kind,
                        previous: prev,
                    });
                }
                _ => {}
            }
            previous = Some(kind);
        }

        Ok(())
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::StepDescriptor;
    use crate::core::strategy::ProjectConfigurationCheck;

    fn pre_run(name: &str) -> Step {
        Step::pre_run(StepDescriptor::new(name, StepKind::PreRun), ProjectConfigurationCheck)
    }

    fn wait(name: &str) -> Step {
        Step::wait_for_async(StepDescriptor::new(name, StepKind::WaitForAsync))
    }

    fn with_kind(name: &str, kind: StepKind) -> Step {
        let mut step = pre_run(name);
        step.descriptor.kind = kind;
        step
    }

    #[test]
    fn test_valid_pipeline() {
        let pipeline = StepPipeline::new(
            Provider::JiraServer,
            vec![
                pre_run("project_configuration"),
                with_kind("labels", StepKind::Entity),
                with_kind("issues", StepKind::Issue),
                wait("wait_for_issue_processing"),
                with_kind("issue_relations", StepKind::Relation),
            ],
        )
        .unwrap();
        assert_eq!(pipeline.len(), 5);
        assert_eq!(pipeline.position("issues"), Some(2));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_names() {
        let err = StepPipeline::new(Provider::Jira, vec![pre_run("a"), pre_run("a")]).unwrap_err();
        assert_eq!(err, PipelineError::DuplicateStep("a".into()));

        let err = StepPipeline::new(Provider::Jira, vec![pre_run("IssueTypes")]).unwrap_err();
        assert_eq!(err, PipelineError::InvalidName("IssueTypes".into()));

        let err = StepPipeline::new(Provider::Jira, vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::Empty { .. }));
    }

    #[test]
    fn test_rejects_phase_regression() {
        let err = StepPipeline::new(
            Provider::Jira,
            vec![with_kind("issues", StepKind::Issue), with_kind("labels", StepKind::Entity)],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::PhaseOrder { .. }));
    }

    #[test]
    fn test_rejects_forward_dependency() {
        let mut cycles = with_kind("cycles", StepKind::Entity);
        cycles.descriptor.depends_on.push("boards".into());
        let err = StepPipeline::new(
            Provider::Jira,
            vec![cycles, with_kind("boards", StepKind::Entity)],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyOrder { .. }));
    }

    #[test]
    fn test_rejects_misplaced_wait() {
        let err = StepPipeline::new(Provider::Jira, vec![wait("wait")]).unwrap_err();
        assert!(matches!(err, PipelineError::MisplacedWait(_)));

        let err = StepPipeline::new(
            Provider::Jira,
            vec![with_kind("issues", StepKind::Issue), wait("w1"), wait("w2")],
        )
        .unwrap_err();
        assert_eq!(err, PipelineError::MisplacedWait("w2".into()));
    }
}
