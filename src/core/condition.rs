//! Step run conditions

use crate::core::job::ProjectFlags;
use serde::{Deserialize, Serialize};

/// When a step runs at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    #[default]
    Always,
    /// Only when the target project has issue types turned on
    IssueTypesEnabled,
}

impl StepCondition {
    pub fn is_met(&self, flags: &ProjectFlags) -> bool {
        match self {
            StepCondition::Always => true,
            StepCondition::IssueTypesEnabled => flags.issue_types_enabled,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            StepCondition::Always => "always",
            StepCondition::IssueTypesEnabled => "issue types enabled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_types_condition() {
        let off = ProjectFlags::default();
        let on = ProjectFlags {
            issue_types_enabled: true,
        };

        assert!(StepCondition::Always.is_met(&off));
        assert!(!StepCondition::IssueTypesEnabled.is_met(&off));
        assert!(StepCondition::IssueTypesEnabled.is_met(&on));
    }
}
