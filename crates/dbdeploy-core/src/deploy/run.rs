//! Deployment run state machine.

use super::target::RestorePoint;
use crate::error::{DeployError, Result};
use crate::plan::DeploymentPlan;
use crate::validate::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a deployment run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Plan built, not yet validated.
    Planned,
    /// Validation report attached.
    Validated,
    /// Validation found errors. Terminal.
    Blocked,
    /// Waiting for an explicit approval.
    AwaitingApproval,
    /// Cleared to execute.
    Approved,
    /// Statements are being applied.
    Executing,
    /// Transaction committed. Terminal.
    Committed,
    /// Transaction rolled back. Terminal.
    RolledBack,
}

impl RunState {
    /// Check if no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked | Self::Committed | Self::RolledBack)
    }

    /// Check whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, to),
            (Planned, Validated)
                | (Validated, Blocked)
                | (Validated, AwaitingApproval)
                | (Validated, Approved)
                | (AwaitingApproval, Approved)
                | (Approved, Executing)
                | (Executing, Committed)
                | (Executing, RolledBack)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planned => write!(f, "planned"),
            Self::Validated => write!(f, "validated"),
            Self::Blocked => write!(f, "blocked"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Approved => write!(f, "approved"),
            Self::Executing => write!(f, "executing"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// An explicit go-ahead from a person or policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub reason: String,
}

impl Approval {
    pub fn new(approver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approver: approver.into(),
            reason: reason.into(),
        }
    }
}

/// One attempt to deploy a plan.
///
/// The run exists only in memory; its outcome is written to the run journal.
#[derive(Debug)]
pub struct DeploymentRun {
    id: String,
    state: RunState,
    plan: DeploymentPlan,
    report: Option<ValidationReport>,
    approval: Option<Approval>,
    restore_point: Option<RestorePoint>,
    started_at: DateTime<Utc>,
}

impl DeploymentRun {
    /// Start a run for a plan.
    pub fn new(plan: DeploymentPlan) -> Self {
        let started_at = Utc::now();
        Self {
            id: generate_run_id(&plan, started_at),
            state: RunState::Planned,
            plan,
            report: None,
            approval: None,
            restore_point: None,
            started_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    pub fn restore_point(&self) -> Option<&RestorePoint> {
        self.restore_point.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn transition(&mut self, to: RunState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(DeployError::InvalidTransition { from: self.state, to });
        }
        tracing::debug!(run = %self.id, from = %self.state, to = %to, "run transition");
        self.state = to;
        Ok(())
    }

    /// Attach a validation report and move to the state it dictates.
    pub fn validate(&mut self, report: ValidationReport) -> Result<RunState> {
        self.transition(RunState::Validated)?;
        let next = if report.is_blocked() {
            RunState::Blocked
        } else if report.requires_approval() {
            RunState::AwaitingApproval
        } else {
            RunState::Approved
        };
        self.report = Some(report);
        self.transition(next)?;
        Ok(next)
    }

    /// Record an approval for a run waiting on one.
    pub fn approve(&mut self, approval: Approval) -> Result<()> {
        self.transition(RunState::Approved)?;
        tracing::info!(
            run = %self.id,
            approver = %approval.approver,
            reason = %approval.reason,
            "deployment approved"
        );
        self.approval = Some(approval);
        Ok(())
    }

    pub(crate) fn begin_execution(&mut self) -> Result<()> {
        self.transition(RunState::Executing)
    }

    pub(crate) fn set_restore_point(&mut self, point: RestorePoint) {
        self.restore_point = Some(point);
    }

    pub(crate) fn finish(&mut self, committed: bool) -> Result<()> {
        self.transition(if committed {
            RunState::Committed
        } else {
            RunState::RolledBack
        })
    }

    /// The error a run that cannot execute should report.
    pub fn gate_error(&self) -> Option<DeployError> {
        let report = self.report.as_ref()?;
        match self.state {
            RunState::Blocked => {
                let error = report.first_error()?;
                let op = self.plan.operations().iter().find(|op| {
                    op.phase() == error.related_operation.phase
                        && op.ordinal_within_phase() == error.related_operation.ordinal
                })?;
                Some(DeployError::ValidationBlocked {
                    error_count: report.error_count,
                    phase: op.phase(),
                    object_name: op.object_name().to_string(),
                    statement: op.statement_text().to_string(),
                    description: error.description.clone(),
                })
            }
            RunState::AwaitingApproval => Some(DeployError::ApprovalRequired {
                reason: report
                    .approval_reason()
                    .unwrap_or_else(|| "approval required".to_string()),
            }),
            _ => None,
        }
    }
}

/// Timestamp plus plan hash, hex-encoded.
fn generate_run_id(plan: &DeploymentPlan, started_at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&started_at.timestamp_micros().to_be_bytes());
    hasher.update(&plan.descriptor_version().to_be_bytes());
    for op in plan.operations() {
        hasher.update(op.statement_text().as_bytes());
    }
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::plan::{Operation, PlanBuilder};
    use crate::validate::{RiskClassifier, RuleSet, TargetMetadata};

    fn run(statements: &[(u8, &str)]) -> DeploymentRun {
        let plan = statements
            .iter()
            .enumerate()
            .fold(PlanBuilder::new(1), |b, (i, (phase, sql))| {
                b.with_operation(Operation::entity(Phase::new(*phase).unwrap(), format!("op{i}"), *sql))
            })
            .build()
            .unwrap();
        DeploymentRun::new(plan)
    }

    fn validate(run: &mut DeploymentRun) -> RunState {
        let classifier = RiskClassifier::new(RuleSet::standard().unwrap());
        let report = classifier.classify(run.plan(), &TargetMetadata::new());
        run.validate(report).unwrap()
    }

    #[test]
    fn test_transition_table() {
        use RunState::*;
        assert!(Planned.can_transition_to(Validated));
        assert!(Validated.can_transition_to(Approved));
        assert!(AwaitingApproval.can_transition_to(Approved));
        assert!(Executing.can_transition_to(RolledBack));

        assert!(!Planned.can_transition_to(Executing));
        assert!(!Blocked.can_transition_to(Approved));
        assert!(!AwaitingApproval.can_transition_to(Executing));
        assert!(!Committed.can_transition_to(Executing));
        for state in [Blocked, Committed, RolledBack] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_safe_plan_is_approved() {
        let mut run = run(&[(1, "CREATE TABLE dbo.Foo (Id INT)")]);
        assert_eq!(validate(&mut run), RunState::Approved);
        assert!(run.gate_error().is_none());
    }

    #[test]
    fn test_warnings_wait_for_approval() {
        let mut run = run(&[(1, "ALTER TABLE dbo.Foo ALTER COLUMN Bar BIGINT NULL")]);
        assert_eq!(validate(&mut run), RunState::AwaitingApproval);
        assert!(matches!(run.gate_error(), Some(DeployError::ApprovalRequired { .. })));

        run.approve(Approval::new("dba", "maintenance window")).unwrap();
        assert_eq!(run.state(), RunState::Approved);
        assert_eq!(run.approval().unwrap().approver, "dba");
    }

    #[test]
    fn test_blocked_is_terminal() {
        let mut run = run(&[(1, "DROP TABLE dbo.Foo")]);
        assert_eq!(validate(&mut run), RunState::Blocked);

        let err = run.approve(Approval::new("dba", "please")).unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidTransition {
                from: RunState::Blocked,
                to: RunState::Approved
            }
        ));
        match run.gate_error() {
            Some(DeployError::ValidationBlocked { object_name, statement, .. }) => {
                assert_eq!(object_name, "op0");
                assert_eq!(statement, "DROP TABLE dbo.Foo");
            }
            other => panic!("Expected ValidationBlocked, got {other:?}"),
        }
    }

    #[test]
    fn test_approval_phase_needs_approval_even_when_safe() {
        let mut run = run(&[(16, "CREATE OR ALTER TRIGGER dbo.t ON dbo.x AFTER INSERT AS SELECT 1")]);
        assert_eq!(validate(&mut run), RunState::AwaitingApproval);
    }
}
