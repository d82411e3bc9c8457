//! Transactional plan execution.

use super::journal::{RunJournal, RunOutcome, RunRecord};
use super::run::{DeploymentRun, RunState};
use super::target::{DeploymentTarget, RestorePoint};
use crate::error::{DeployError, Result, TargetError};
use crate::phase::Phase;
use crate::plan::Operation;
use std::time::Instant;

/// What a committed run did.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub operations_applied: usize,
    pub restore_point: RestorePoint,
    pub duration_ms: u64,
}

/// Applies an approved run to a target inside one transaction.
///
/// There are no retries. Any failure rolls the transaction back, and on a
/// production target also applies the restore point.
#[derive(Default)]
pub struct DeploymentExecutor<'a> {
    journal: Option<&'a RunJournal>,
}

impl<'a> DeploymentExecutor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal the `Executing` entry and the outcome.
    pub fn with_journal(mut self, journal: &'a RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Execute an approved run.
    ///
    /// A run that is not `Approved` is refused before the target is touched.
    pub fn execute(
        &self,
        run: &mut DeploymentRun,
        target: &mut dyn DeploymentTarget,
        preceding_version: Option<&str>,
    ) -> Result<ExecutionSummary> {
        if run.state() != RunState::Approved {
            return Err(run.gate_error().unwrap_or(DeployError::InvalidTransition {
                from: run.state(),
                to: RunState::Executing,
            }));
        }

        let started = Instant::now();
        run.begin_execution()?;
        self.journal(RunRecord::for_run(run, RunOutcome::Executing))?;
        tracing::info!(
            run = %run.id(),
            target = target.name(),
            operations = run.plan().len(),
            "deployment executing"
        );

        let point = match target.capture_restore_point(preceding_version) {
            Ok(point) => point,
            Err(e) => return Err(self.abort(run, "restore point", e)),
        };
        run.set_restore_point(point.clone());

        if let Err(e) = target.begin() {
            return Err(self.abort(run, "begin", e));
        }

        let mut failure: Option<(Operation, TargetError)> = None;
        for op in run.plan().operations() {
            tracing::debug!(
                phase = op.phase().number(),
                ordinal = op.ordinal_within_phase(),
                object = op.object_name(),
                "applying operation"
            );
            if let Err(e) = target.execute(op.statement_text()) {
                failure = Some((op.clone(), e));
                break;
            }
        }

        let failure = match failure {
            Some(failure) => Some(failure),
            None => target.commit().err().map(|e| (commit_operation(run), e)),
        };

        if let Some((op, cause)) = failure {
            return Err(self.fail(run, target, &point, &op, cause));
        }

        run.finish(true)?;
        self.journal(RunRecord::for_run(run, RunOutcome::Committed))?;
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run = %run.id(),
            operations = run.plan().len(),
            duration_ms,
            "deployment committed"
        );
        Ok(ExecutionSummary {
            operations_applied: run.plan().len(),
            restore_point: point,
            duration_ms,
        })
    }

    /// Close a run that failed before its transaction opened.
    fn abort(&self, run: &mut DeploymentRun, stage: &str, cause: TargetError) -> DeployError {
        tracing::error!(run = %run.id(), stage, error = %cause, "deployment aborted");
        let error = DeployError::ExecutionAborted {
            stage: stage.to_string(),
            cause: cause.to_string(),
        };
        if let Err(e) = run.finish(false) {
            return e;
        }
        if let Err(e) = self.journal(
            RunRecord::for_run(run, RunOutcome::RolledBack { restored: false }).with_error(error.to_string()),
        ) {
            tracing::error!(error = %e, "failed to journal aborted run");
        }
        error
    }

    fn fail(
        &self,
        run: &mut DeploymentRun,
        target: &mut dyn DeploymentTarget,
        point: &RestorePoint,
        op: &Operation,
        cause: TargetError,
    ) -> DeployError {
        tracing::error!(
            phase = op.phase().number(),
            ordinal = op.ordinal_within_phase(),
            object = op.object_name(),
            error = %cause,
            "operation failed; rolling back"
        );
        if let Err(e) = target.rollback() {
            tracing::error!(error = %e, "transaction rollback failed");
        }

        let restored = target.is_production()
            && match target.restore(point) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, reference = %point.reference, "restore point not applied");
                    false
                }
            };

        let error = DeployError::ExecutionFailed {
            phase: op.phase(),
            ordinal: op.ordinal_within_phase(),
            object_name: op.object_name().to_string(),
            statement: op.statement_text().to_string(),
            cause: cause.to_string(),
            restored,
        };

        if let Err(e) = run.finish(false) {
            return e;
        }
        if let Err(e) = self.journal(
            RunRecord::for_run(run, RunOutcome::RolledBack { restored }).with_error(error.to_string()),
        ) {
            tracing::error!(error = %e, "failed to journal rolled back run");
        }
        error
    }

    fn journal(&self, record: RunRecord) -> Result<()> {
        match self.journal {
            Some(journal) => journal.record(&record),
            None => Ok(()),
        }
    }
}

/// Stand-in operation blamed for a failed commit: the last one applied.
fn commit_operation(run: &DeploymentRun) -> Operation {
    run.plan()
        .operations()
        .last()
        .cloned()
        .unwrap_or_else(|| Operation::entity(Phase::CREATE_TABLES, "", "COMMIT"))
}
