//! Deployment plans.
//!
//! A plan is the full ordered operation sequence for one run. It is built
//! fresh per invocation by [`PlanBuilder`] and is never mutated afterwards.

pub mod audit;
pub mod builder;
pub mod operation;

pub use audit::{AuditEntry, EnhancementNote, EnhancementRecord};
pub use builder::PlanBuilder;
pub use operation::{Operation, SourceKind};

use crate::ddl::SkippedChange;
use crate::error::{DeployError, Result};
use crate::phase::Phase;
use crate::repository::RepositoryLoadError;
use crate::sql::ObjectName;
use serde::Serialize;
use std::collections::BTreeMap;

/// The ordered operations of one deployment, with their audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    descriptor_version: u64,
    operations: Vec<Operation>,
    audit: Vec<AuditEntry>,
    entity_changes: usize,
}

impl DeploymentPlan {
    pub(crate) fn new(
        descriptor_version: u64,
        operations: Vec<Operation>,
        audit: Vec<AuditEntry>,
        entity_changes: usize,
    ) -> Self {
        Self {
            descriptor_version,
            operations,
            audit,
            entity_changes,
        }
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Descriptor version the plan was built from.
    pub fn descriptor_version(&self) -> u64 {
        self.descriptor_version
    }

    /// Number of descriptor changes behind the entity operations.
    pub fn entity_change_count(&self) -> usize {
        self.entity_changes
    }

    /// Audit trail.
    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Check the ordering invariants.
    ///
    /// Operations must be strictly ordered by `(phase, ordinal)` and no
    /// operation may reference an object first created by a later one.
    pub fn verify_order(&self) -> Result<()> {
        let mut first_definition: BTreeMap<&ObjectName, usize> = BTreeMap::new();
        for (i, op) in self.operations.iter().enumerate() {
            for name in op.defines() {
                first_definition.entry(name).or_insert(i);
            }
        }

        for (i, op) in self.operations.iter().enumerate() {
            if let Some(previous) = i.checked_sub(1).map(|p| &self.operations[p]) {
                if previous.position() >= op.position() {
                    return Err(DeployError::Config(format!(
                        "operations out of order: phase {} #{} follows phase {} #{}",
                        op.phase(),
                        op.ordinal_within_phase(),
                        previous.phase(),
                        previous.ordinal_within_phase()
                    )));
                }
            }
            for name in op.references() {
                if let Some(&defined_at) = first_definition.get(name) {
                    if defined_at > i {
                        return Err(DeployError::PlanOrderingViolation {
                            object: name.to_string(),
                            phase: op.phase(),
                            object_name: op.object_name().to_string(),
                            statement: op.statement_text().to_string(),
                            defined_in: self.operations[defined_at].phase(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether any operation sits in an approval-requiring phase.
    pub fn requires_approval(&self) -> bool {
        self.operations.iter().any(|op| op.phase().requires_approval())
    }

    /// Approval-requiring phases present in the plan, in order.
    pub fn approval_phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = self
            .operations
            .iter()
            .map(Operation::phase)
            .filter(|p| p.requires_approval())
            .collect();
        phases.dedup();
        phases
    }

    /// Operation count per phase.
    pub fn phase_counts(&self) -> BTreeMap<Phase, usize> {
        let mut counts = BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.phase()).or_insert(0) += 1;
        }
        counts
    }

    /// Operation count per source kind.
    pub fn source_counts(&self) -> (usize, usize) {
        let entity = self
            .operations
            .iter()
            .filter(|op| op.source_kind() == SourceKind::EntityDerived)
            .count();
        (entity, self.operations.len() - entity)
    }

    /// Scripts the enhancer could not make re-runnable.
    pub fn enhancement_notes(&self) -> Vec<EnhancementNote> {
        self.audit
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Enhancement(record) => record.skip_reason().map(|reason| EnhancementNote {
                    phase: record.phase,
                    object_name: record.object_name.clone(),
                    source_path: record.source_path.clone(),
                    reason,
                }),
                _ => None,
            })
            .collect()
    }

    /// Descriptor changes left for hand-authored scripts.
    pub fn skipped_changes(&self) -> impl Iterator<Item = &SkippedChange> {
        self.audit.iter().filter_map(|entry| match entry {
            AuditEntry::DestructiveChangeSkipped(change) => Some(change),
            _ => None,
        })
    }

    /// Repository files that were not loaded.
    pub fn load_errors(&self) -> impl Iterator<Item = &RepositoryLoadError> {
        self.audit.iter().filter_map(|entry| match entry {
            AuditEntry::LoadError(error) => Some(error),
            _ => None,
        })
    }

    /// Text as written for an operation the enhancer rewrote.
    pub fn original_text(&self, phase: Phase, ordinal: u32) -> Option<&str> {
        self.audit.iter().find_map(|entry| match entry {
            AuditEntry::Enhancement(record)
                if record.phase == phase && record.ordinal == ordinal =>
            {
                Some(record.original_text.as_str())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_order_rejects_unsorted_operations() {
        let plan = DeploymentPlan::new(
            1,
            vec![
                Operation::entity(Phase::PRIMARY_KEYS, "a", "SELECT 1").with_ordinal(1),
                Operation::entity(Phase::CREATE_TABLES, "b", "SELECT 2").with_ordinal(1),
            ],
            Vec::new(),
            0,
        );
        assert!(matches!(plan.verify_order(), Err(DeployError::Config(_))));
    }

    #[test]
    fn test_phase_counts() {
        let plan = DeploymentPlan::new(
            1,
            vec![
                Operation::entity(Phase::CREATE_TABLES, "a", "SELECT 1").with_ordinal(1),
                Operation::entity(Phase::CREATE_TABLES, "b", "SELECT 2").with_ordinal(2),
                Operation::entity(Phase::new(19).unwrap(), "c", "GRANT SELECT ON dbo.a TO r").with_ordinal(1),
            ],
            Vec::new(),
            0,
        );
        assert_eq!(plan.phase_counts()[&Phase::CREATE_TABLES], 2);
        assert_eq!(plan.source_counts(), (3, 0));
        assert_eq!(plan.approval_phases(), vec![Phase::new(19).unwrap()]);
        assert!(plan.verify_order().is_ok());
    }
}
