//! Reverse-intent plans.
//!
//! No reversal SQL is ever generated. Rolling back means classifying what
//! the newer deployments did: additive operations are acknowledged, while
//! anything the rules flag as a warning or error is listed for a
//! hand-authored reversal.

use super::compiled::CompiledDeployment;
use crate::phase::Phase;
use crate::plan::DeploymentPlan;
use crate::validate::{RiskClassifier, Severity, TargetMetadata};
use serde::Serialize;

/// What a rollback does with one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalAction {
    /// Additive; nothing to undo by hand.
    Acknowledged,
    /// Needs a hand-authored reversal script.
    ManualReversalRequired,
}

/// One operation of a rolled-back deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversalItem {
    pub version: String,
    pub phase: Phase,
    pub ordinal: u32,
    pub object_name: String,
    pub action: ReversalAction,
    /// Why a manual reversal is needed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// Result of a rollback or restore request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReverseIntentReport {
    /// Version the database should return to; `None` means before the
    /// first deployment.
    pub target_version: Option<String>,
    /// Versions being reverted, newest first.
    pub reverted_versions: Vec<String>,
    pub items: Vec<ReversalItem>,
}

impl ReverseIntentReport {
    /// Classify the operations of `deployments` (newest first).
    pub fn build(
        target_version: Option<String>,
        deployments: &[CompiledDeployment],
        classifier: &RiskClassifier,
    ) -> Self {
        let mut items = Vec::new();
        for deployment in deployments {
            let plan = DeploymentPlan::new(
                deployment.source_descriptor_version(),
                deployment.operations().iter().map(|op| op.to_operation()).collect(),
                Vec::new(),
                0,
            );
            let report = classifier.classify(&plan, &TargetMetadata::new());

            // Undo newest operations first
            for op in deployment.operations().iter().rev() {
                let reasons: Vec<String> = report
                    .issues
                    .iter()
                    .filter(|i| {
                        i.severity >= Severity::Warning
                            && i.related_operation.phase == op.phase
                            && i.related_operation.ordinal == op.ordinal
                    })
                    .map(|i| i.description.clone())
                    .collect();
                let action = if reasons.is_empty() {
                    ReversalAction::Acknowledged
                } else {
                    ReversalAction::ManualReversalRequired
                };
                items.push(ReversalItem {
                    version: deployment.version().to_string(),
                    phase: op.phase,
                    ordinal: op.ordinal,
                    object_name: op.object_name.clone(),
                    action,
                    reasons,
                });
            }
        }

        let report = Self {
            target_version,
            reverted_versions: deployments.iter().map(|d| d.version().to_string()).collect(),
            items,
        };
        tracing::info!(
            target = report.target_version.as_deref().unwrap_or("<initial>"),
            reverted = report.reverted_versions.len(),
            acknowledged = report.acknowledged_count(),
            manual = report.manual_count(),
            "reverse-intent plan built"
        );
        report
    }

    pub fn acknowledged_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.action == ReversalAction::Acknowledged)
            .count()
    }

    pub fn manual_count(&self) -> usize {
        self.items.len() - self.acknowledged_count()
    }

    pub fn requires_manual_reversal(&self) -> bool {
        self.manual_count() > 0
    }

    /// Items that need a hand-authored reversal.
    pub fn manual_items(&self) -> impl Iterator<Item = &ReversalItem> {
        self.items
            .iter()
            .filter(|i| i.action == ReversalAction::ManualReversalRequired)
    }

    /// 0 when fully acknowledged, 1 when manual reversal is required.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.requires_manual_reversal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Operation, PlanBuilder};
    use crate::validate::RuleSet;
    use chrono::Utc;

    fn compiled(sequence: u64, statements: &[(u8, &str)]) -> CompiledDeployment {
        let plan = statements
            .iter()
            .enumerate()
            .fold(PlanBuilder::new(1), |b, (i, (phase, sql))| {
                b.with_operation(Operation::entity(Phase::new(*phase).unwrap(), format!("op{i}"), *sql))
            })
            .build()
            .unwrap();
        CompiledDeployment::from_plan(&plan, sequence, Utc::now())
    }

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(RuleSet::standard().unwrap())
    }

    #[test]
    fn test_additive_deployment_is_acknowledged() {
        let newer = compiled(
            2,
            &[
                (1, "CREATE TABLE dbo.Foo (Id INT)"),
                (6, "CREATE INDEX ix ON dbo.Foo (Id)"),
            ],
        );
        let report = ReverseIntentReport::build(Some("000001-aaaaaaaaaaaa".to_string()), &[newer], &classifier());

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[0].phase.number(), 6);
        assert_eq!(report.acknowledged_count(), 2);
        assert!(!report.requires_manual_reversal());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_locking_changes_need_manual_reversal() {
        let newer = compiled(
            3,
            &[
                (1, "ALTER TABLE dbo.Orders ALTER COLUMN Total DECIMAL(18, 2) NOT NULL"),
                (1, "ALTER TABLE dbo.Orders ADD Note NVARCHAR(100) NULL"),
            ],
        );
        let older = compiled(2, &[(6, "CREATE INDEX ix_total ON dbo.Orders (Total)")]);
        let report = ReverseIntentReport::build(None, &[newer, older], &classifier());

        assert_eq!(report.reverted_versions.len(), 2);
        let manual: Vec<&str> = report.manual_items().map(|i| i.object_name.as_str()).collect();
        assert_eq!(manual, vec!["op0", "op0"]);
        assert_eq!(report.acknowledged_count(), 1);
        assert_eq!(report.exit_code(), 1);
    }
}
