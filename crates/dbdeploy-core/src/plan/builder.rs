//! Deployment plan construction.

use super::audit::{AuditEntry, EnhancementRecord};
use super::operation::{Operation, SourceKind};
use super::DeploymentPlan;
use crate::ddl::EntityDdl;
use crate::enhance::enhance_operation;
use crate::error::Result;
use crate::phase::Phase;
use crate::repository::LoadedRepository;
use std::collections::BTreeMap;

/// Merges entity operations and repository scripts into a plan.
///
/// Within a phase, entity operations come first in generation order,
/// followed by scripts in repository order.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    descriptor_version: u64,
    operations: Vec<Operation>,
    audit: Vec<AuditEntry>,
    entity_changes: usize,
    enhance: bool,
}

impl PlanBuilder {
    /// Create a builder for the given descriptor version.
    pub fn new(descriptor_version: u64) -> Self {
        Self {
            descriptor_version,
            enhance: true,
            ..Self::default()
        }
    }

    /// Add entity-derived operations and their skipped changes.
    pub fn with_entity_ddl(mut self, ddl: EntityDdl) -> Self {
        self.entity_changes += ddl.change_count;
        self.operations.extend(ddl.operations);
        self.audit
            .extend(ddl.skipped.into_iter().map(AuditEntry::DestructiveChangeSkipped));
        self
    }

    /// Add repository scripts and their load errors.
    pub fn with_repository(mut self, repository: LoadedRepository) -> Self {
        self.operations.extend(
            repository
                .scripts
                .into_iter()
                .map(|s| Operation::script(s.phase, s.ordinal, &s.path, s.text)),
        );
        self.audit
            .extend(repository.errors.into_iter().map(AuditEntry::LoadError));
        self
    }

    /// Add a single operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Skip idempotency enhancement.
    pub fn without_enhancement(mut self) -> Self {
        self.enhance = false;
        self
    }

    /// Order, number, enhance and check the operations.
    ///
    /// Fails with `PlanOrderingViolation` if an operation references an
    /// object that a later operation creates.
    pub fn build(self) -> Result<DeploymentPlan> {
        let mut operations = self.operations;
        let mut audit = self.audit;

        // Stable: generation and repository order survive within a phase
        operations.sort_by_key(|op| (op.phase(), op.source_kind() != SourceKind::EntityDerived));

        let mut next_ordinal: BTreeMap<Phase, u32> = BTreeMap::new();
        let mut planned = Vec::with_capacity(operations.len());
        for op in operations {
            let ordinal = next_ordinal.entry(op.phase()).or_insert(0);
            *ordinal += 1;
            let op = op.with_ordinal(*ordinal);

            if !self.enhance {
                planned.push(op);
                continue;
            }
            let (enhanced, outcome) = enhance_operation(&op);
            if outcome.changed() || matches!(outcome, crate::enhance::EnhancementOutcome::Skipped(_)) {
                audit.push(AuditEntry::Enhancement(EnhancementRecord {
                    phase: op.phase(),
                    ordinal: op.ordinal_within_phase(),
                    object_name: op.object_name().to_string(),
                    source_path: op.source_path().map(|p| p.to_path_buf()),
                    outcome,
                    original_text: op.statement_text().to_string(),
                }));
            }
            planned.push(enhanced);
        }

        let plan = DeploymentPlan::new(self.descriptor_version, planned, audit, self.entity_changes);
        plan.verify_order()?;

        tracing::info!(
            operations = plan.len(),
            descriptor_version = plan.descriptor_version(),
            requires_approval = plan.requires_approval(),
            "deployment plan built"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::{EntityDdl, SkippedChange};
    use crate::error::DeployError;
    use crate::repository::ScriptFile;
    use crate::sql::ObjectName;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn script(phase: u8, ordinal: u32, name: &str, text: &str) -> ScriptFile {
        ScriptFile {
            phase: Phase::new(phase).unwrap(),
            ordinal,
            path: PathBuf::from(format!("{phase:02}/{name}")),
            text: text.to_string(),
        }
    }

    fn repository(scripts: Vec<ScriptFile>) -> LoadedRepository {
        LoadedRepository {
            scripts,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_entity_operations_precede_scripts() {
        let ddl = EntityDdl {
            operations: vec![
                Operation::entity(Phase::CREATE_TABLES, "dbo.foo", "CREATE TABLE dbo.Foo (Id INT)"),
                Operation::entity(Phase::PRIMARY_KEYS, "dbo.foo", "ALTER TABLE dbo.Foo ADD CONSTRAINT pk PRIMARY KEY (Id)"),
            ],
            skipped: vec![SkippedChange {
                table: ObjectName::new("dbo", "old"),
                description: "table removed from descriptors".to_string(),
            }],
            change_count: 3,
        };
        let plan = PlanBuilder::new(2)
            .with_repository(repository(vec![
                script(1, 1, "bar.sql", "CREATE TABLE dbo.Bar (Id INT)"),
                script(4, 1, "seed.sql", "INSERT INTO dbo.Foo VALUES (1)"),
            ]))
            .with_entity_ddl(ddl)
            .build()
            .unwrap();

        let order: Vec<(u8, u32, &str)> = plan
            .operations()
            .iter()
            .map(|o| (o.phase().number(), o.ordinal_within_phase(), o.object_name()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, 1, "dbo.foo"),
                (1, 2, "dbo.bar"),
                (2, 1, "dbo.foo"),
                (4, 1, "seed"),
            ]
        );
        assert_eq!(plan.skipped_changes().count(), 1);
        assert_eq!(plan.entity_change_count(), 3);
        assert!(!plan.requires_approval());
    }

    #[test]
    fn test_forward_reference_fails() {
        let err = PlanBuilder::new(1)
            .with_repository(repository(vec![
                script(4, 1, "seed_audit.sql", "INSERT INTO dbo.Audit VALUES (1)"),
                script(14, 1, "audit.sql", "CREATE VIEW dbo.Audit AS SELECT 1 AS n"),
            ]))
            .build()
            .unwrap_err();

        match err {
            DeployError::PlanOrderingViolation {
                object,
                phase,
                object_name,
                statement,
                defined_in,
            } => {
                assert_eq!(object, "dbo.audit");
                assert_eq!(phase.number(), 4);
                assert_eq!(object_name, "seed_audit");
                assert_eq!(statement, "INSERT INTO dbo.Audit VALUES (1)");
                assert_eq!(defined_in.number(), 14);
            }
            other => panic!("Expected PlanOrderingViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_enhancement_is_audited() {
        let plan = PlanBuilder::new(1)
            .with_repository(repository(vec![
                script(15, 1, "p.sql", "CREATE PROCEDURE dbo.P AS SELECT 1"),
                script(15, 2, "q.sql", "SET NOCOUNT ON; CREATE PROCEDURE dbo.Q AS SELECT 1"),
                script(16, 1, "t.sql", "CREATE OR ALTER TRIGGER dbo.T ON dbo.X AFTER INSERT AS SELECT 1"),
            ]))
            .build()
            .unwrap();

        assert!(plan.operations()[0].statement_text().starts_with("IF EXISTS"));
        let original = plan.original_text(Phase::new(15).unwrap(), 1).unwrap();
        assert_eq!(original, "CREATE PROCEDURE dbo.P AS SELECT 1");
        assert_eq!(plan.enhancement_notes().len(), 1);
        assert_eq!(plan.enhancement_notes()[0].object_name, "dbo.q");
        assert!(plan.requires_approval());
        assert_eq!(plan.approval_phases(), vec![Phase::new(16).unwrap()]);
    }

    #[test]
    fn test_load_errors_are_audited() {
        let mut repo = repository(vec![]);
        repo.errors.push(crate::repository::RepositoryLoadError {
            path: PathBuf::from("01/bad.sql"),
            phase: Phase::new(1),
            reason: "file is not valid UTF-8".to_string(),
        });
        let plan = PlanBuilder::new(1).with_repository(repo).build().unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.load_errors().count(), 1);
    }

    proptest! {
        #[test]
        fn prop_plan_is_totally_ordered(
            entries in proptest::collection::vec((1u8..=29, any::<bool>()), 0..40)
        ) {
            let mut builder = PlanBuilder::new(1).without_enhancement();
            for (i, (phase, entity)) in entries.iter().enumerate() {
                let phase = Phase::new(*phase).unwrap();
                let text = format!("SELECT {i}");
                let op = if *entity {
                    Operation::entity(phase, format!("op{i}"), text)
                } else {
                    Operation::script(phase, i as u32 + 1, &PathBuf::from(format!("op{i}.sql")), text)
                };
                builder = builder.with_operation(op);
            }
            let plan = builder.build().unwrap();

            prop_assert_eq!(plan.len(), entries.len());
            for pair in plan.operations().windows(2) {
                prop_assert!(pair[0].position() < pair[1].position());
                if pair[0].phase() == pair[1].phase() {
                    prop_assert_eq!(pair[0].ordinal_within_phase() + 1, pair[1].ordinal_within_phase());
                    prop_assert!(pair[0].source_kind() <= pair[1].source_kind());
                } else {
                    prop_assert_eq!(pair[1].ordinal_within_phase(), 1);
                }
            }
            prop_assert!(plan.verify_order().is_ok());
        }
    }
}
