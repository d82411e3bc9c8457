//! Validation report types.

use super::estimate::DeploymentEstimate;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Known-safe statement.
    Info,
    /// Needs an explicit approval.
    Warning,
    /// Blocks execution.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// The operation an issue was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRef {
    pub phase: Phase,
    pub ordinal: u32,
    pub object_name: String,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub recommendation: String,
    pub related_operation: OperationRef,
}

/// Overall result, the maximum issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallResult {
    Safe,
    Warnings,
    Blocked,
}

impl OverallResult {
    /// Process exit code for this result.
    pub fn exit_code(self) -> i32 {
        match self {
            OverallResult::Safe => 0,
            OverallResult::Warnings => 1,
            OverallResult::Blocked => 2,
        }
    }

    fn from_max(severity: Option<Severity>) -> Self {
        match severity {
            Some(Severity::Error) => OverallResult::Blocked,
            Some(Severity::Warning) => OverallResult::Warnings,
            Some(Severity::Info) | None => OverallResult::Safe,
        }
    }
}

impl std::fmt::Display for OverallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallResult::Safe => write!(f, "SAFE"),
            OverallResult::Warnings => write!(f, "WARNINGS"),
            OverallResult::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Result of classifying a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub overall_result: OverallResult,
    pub estimate: DeploymentEstimate,
    pub approval_phases: Vec<Phase>,
    pub operation_count: usize,
}

impl ValidationReport {
    /// Build a report, deriving counts and the overall result from the issues.
    pub fn new(
        issues: Vec<ValidationIssue>,
        estimate: DeploymentEstimate,
        approval_phases: Vec<Phase>,
        operation_count: usize,
    ) -> Self {
        let count = |severity| issues.iter().filter(|i| i.severity == severity).count();
        let error_count = count(Severity::Error);
        let warning_count = count(Severity::Warning);
        let info_count = count(Severity::Info);
        let overall_result = OverallResult::from_max(issues.iter().map(|i| i.severity).max());
        Self {
            issues,
            error_count,
            warning_count,
            info_count,
            overall_result,
            estimate,
            approval_phases,
            operation_count,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.overall_result.exit_code()
    }

    pub fn is_blocked(&self) -> bool {
        self.overall_result == OverallResult::Blocked
    }

    /// Whether execution needs an explicit approval.
    pub fn requires_approval(&self) -> bool {
        self.overall_result == OverallResult::Warnings || !self.approval_phases.is_empty()
    }

    /// Human-readable reason for [`requires_approval`](Self::requires_approval).
    pub fn approval_reason(&self) -> Option<String> {
        let mut reasons = Vec::new();
        if self.overall_result == OverallResult::Warnings {
            reasons.push(format!("{} warning(s)", self.warning_count));
        }
        if !self.approval_phases.is_empty() {
            let phases: Vec<String> = self.approval_phases.iter().map(Phase::to_string).collect();
            reasons.push(format!("operations in approval phase(s) {}", phases.join(", ")));
        }
        (!reasons.is_empty()).then(|| reasons.join("; "))
    }

    /// First error-severity issue in plan order.
    pub fn first_error(&self) -> Option<&ValidationIssue> {
        self.issues.iter().find(|i| i.severity == Severity::Error)
    }

    /// Issues of one severity.
    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity) -> ValidationIssue {
        ValidationIssue {
            severity,
            category: "c".to_string(),
            description: "d".to_string(),
            recommendation: "r".to_string(),
            related_operation: OperationRef {
                phase: Phase::CREATE_TABLES,
                ordinal: 1,
                object_name: "dbo.t".to_string(),
            },
        }
    }

    #[test]
    fn test_overall_result_is_max_severity() {
        let cases = [
            (vec![], OverallResult::Safe),
            (vec![Severity::Info, Severity::Info], OverallResult::Safe),
            (vec![Severity::Info, Severity::Warning], OverallResult::Warnings),
            (vec![Severity::Warning, Severity::Error, Severity::Info], OverallResult::Blocked),
        ];
        for (severities, expected) in cases {
            let issues = severities.into_iter().map(issue).collect();
            let report = ValidationReport::new(issues, DeploymentEstimate::default(), vec![], 1);
            assert_eq!(report.overall_result, expected);
            assert_eq!(report.is_blocked(), report.error_count > 0);
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(OverallResult::Safe.exit_code(), 0);
        assert_eq!(OverallResult::Warnings.exit_code(), 1);
        assert_eq!(OverallResult::Blocked.exit_code(), 2);
    }

    #[test]
    fn test_approval_reason() {
        let report = ValidationReport::new(
            vec![issue(Severity::Info)],
            DeploymentEstimate::default(),
            vec![Phase::new(16).unwrap()],
            1,
        );
        assert!(report.requires_approval());
        assert_eq!(
            report.approval_reason().unwrap(),
            "operations in approval phase(s) 16"
        );

        let safe = ValidationReport::new(vec![], DeploymentEstimate::default(), vec![], 0);
        assert!(!safe.requires_approval());
        assert!(safe.approval_reason().is_none());
    }
}
