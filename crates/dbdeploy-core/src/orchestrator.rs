//! The deployment pipeline.
//!
//! Loader and descriptor feed → plan builder (with enhancement) → risk
//! classifier → approval gate → executor → artifact history.

use crate::artifact::{ArtifactStore, CompiledDeployment, DeploymentSummary, ReverseIntentReport};
use crate::config::DeployConfig;
use crate::ddl::{self, EntityDdl};
use crate::deploy::{
    Approval, DeploymentExecutor, DeploymentRun, DeploymentTarget, ExecutionSummary, RunJournal, RunOutcome,
    RunRecord, RunState,
};
use crate::descriptor::{DescriptorSnapshot, SnapshotStore};
use crate::error::{DeployError, Result};
use crate::plan::{DeploymentPlan, PlanBuilder};
use crate::repository::ScriptRepository;
use crate::validate::{RiskClassifier, RuleSet, TargetMetadata, ValidationReport};
use chrono::Utc;

/// A built plan with the descriptor feed it came from.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    pub plan: DeploymentPlan,
    /// Feed to record as the deployed baseline once the plan commits.
    pub feed: Option<DescriptorSnapshot>,
}

/// What a deploy call did.
#[derive(Debug)]
pub struct DeploymentOutcome {
    pub run_id: String,
    pub state: RunState,
    pub report: ValidationReport,
    pub approval: Option<Approval>,
    /// `None` when the plan was empty.
    pub execution: Option<ExecutionSummary>,
    /// The new history entry, when something was committed.
    pub artifact: Option<CompiledDeployment>,
}

/// Runs the deployment pipeline against one state directory and history.
pub struct Deployer {
    config: DeployConfig,
    classifier: RiskClassifier,
    snapshots: SnapshotStore,
    journal: RunJournal,
    artifacts: ArtifactStore,
}

impl Deployer {
    /// Open the state database and artifact history named by `config`.
    pub fn open(config: DeployConfig) -> Result<Self> {
        let db = sled::open(&config.state_dir)?;
        let classifier = RiskClassifier::new(RuleSet::standard()?).with_default_row_count(config.default_row_count);
        Ok(Self {
            snapshots: SnapshotStore::open(&db)?,
            journal: RunJournal::open(&db)?,
            artifacts: ArtifactStore::open(&config.artifact_dir)?,
            classifier,
            config,
        })
    }

    /// Classify with a different rule set.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.classifier = RiskClassifier::new(rules).with_default_row_count(self.config.default_row_count);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    /// Build the plan for the current inputs.
    pub fn plan(&self) -> Result<PreparedPlan> {
        let feed = self
            .config
            .descriptors
            .as_deref()
            .map(DescriptorSnapshot::load)
            .transpose()?;
        let deployed = self.snapshots.deployed()?;

        let entity = match &feed {
            Some(feed) => ddl::generate(deployed.as_ref(), feed)?,
            None => EntityDdl::default(),
        };
        let repository = ScriptRepository::new(&self.config.repository).load()?;
        for error in &repository.errors {
            tracing::warn!(%error, "repository file skipped");
        }

        let descriptor_version = feed
            .as_ref()
            .or(deployed.as_ref())
            .map_or(0, |snapshot| snapshot.version);
        let mut builder = PlanBuilder::new(descriptor_version)
            .with_entity_ddl(entity)
            .with_repository(repository);
        if !self.config.enhance_scripts {
            builder = builder.without_enhancement();
        }
        Ok(PreparedPlan {
            plan: builder.build()?,
            feed,
        })
    }

    /// Classify a plan.
    pub fn validate(&self, plan: &DeploymentPlan) -> Result<ValidationReport> {
        let metadata = match &self.config.metadata {
            Some(path) => TargetMetadata::load(path)?,
            None => TargetMetadata::new(),
        };
        Ok(self.classifier.classify(plan, &metadata))
    }

    /// Validate, gate, execute and record a plan.
    ///
    /// A blocked plan or a missing approval fails before the target is
    /// touched. Only a committed run leaves a compiled deployment. A run that
    /// commits but cannot write its compiled deployment still records the
    /// descriptor baseline and fails with `ArtifactNotRecorded`.
    pub fn deploy(
        &self,
        prepared: PreparedPlan,
        target: &mut dyn DeploymentTarget,
        approval: Option<Approval>,
    ) -> Result<DeploymentOutcome> {
        let PreparedPlan { plan, feed } = prepared;
        let report = self.validate(&plan)?;
        let mut run = DeploymentRun::new(plan);

        match run.validate(report.clone())? {
            RunState::Blocked => {
                self.journal.record(&RunRecord::for_run(&run, RunOutcome::Blocked))?;
                return Err(run.gate_error().unwrap_or_else(|| DeployError::ApprovalRequired {
                    reason: "validation blocked".to_string(),
                }));
            }
            RunState::AwaitingApproval => match approval.clone() {
                Some(approval) => run.approve(approval)?,
                None => {
                    return Err(run.gate_error().unwrap_or_else(|| DeployError::ApprovalRequired {
                        reason: "approval required".to_string(),
                    }))
                }
            },
            _ => {}
        }

        if run.plan().is_empty() {
            tracing::info!("nothing to deploy");
            if let Some(feed) = &feed {
                self.snapshots.save_deployed(feed)?;
            }
            return Ok(DeploymentOutcome {
                run_id: run.id().to_string(),
                state: run.state(),
                report,
                approval: run.approval().cloned(),
                execution: None,
                artifact: None,
            });
        }

        let preceding = self.artifacts.latest_version()?;
        let execution = DeploymentExecutor::new()
            .with_journal(&self.journal)
            .execute(&mut run, target, preceding.as_deref())?;

        // The target has committed; the baseline must match it even if the
        // history write below fails.
        if let Some(feed) = &feed {
            self.snapshots.save_deployed(feed)?;
        }
        let artifact = match self.artifacts.append(run.plan(), Utc::now()) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(run = %run.id(), error = %e, "committed deployment not recorded");
                let error = DeployError::ArtifactNotRecorded {
                    run_id: run.id().to_string(),
                    cause: e.to_string(),
                };
                self.journal
                    .record(&RunRecord::for_run(&run, RunOutcome::Committed).with_error(error.to_string()))?;
                return Err(error);
            }
        };
        self.journal
            .record(&RunRecord::for_run(&run, RunOutcome::Committed).with_version(artifact.version()))?;

        Ok(DeploymentOutcome {
            run_id: run.id().to_string(),
            state: run.state(),
            report,
            approval: run.approval().cloned(),
            execution: Some(execution),
            artifact: Some(artifact),
        })
    }

    /// Reverse-intent plan for the latest deployment.
    pub fn rollback_to_previous(&self) -> Result<ReverseIntentReport> {
        let latest = self
            .artifacts
            .latest_version()?
            .ok_or_else(|| DeployError::VersionNotFound {
                version: "latest".to_string(),
            })?;
        let previous = self.artifacts.previous_version(&latest)?;
        let newer = vec![self.artifacts.load(&latest)?];
        self.reverse(previous, &newer)
    }

    /// Reverse-intent plan for every deployment newer than `version`.
    pub fn restore_from(&self, version: &str) -> Result<ReverseIntentReport> {
        let versions = self.artifacts.versions()?;
        let index = versions
            .iter()
            .position(|v| v == version)
            .ok_or_else(|| DeployError::VersionNotFound {
                version: version.to_string(),
            })?;
        let newer = versions[index + 1..]
            .iter()
            .rev()
            .map(|v| self.artifacts.load(v))
            .collect::<Result<Vec<_>>>()?;
        self.reverse(Some(version.to_string()), &newer)
    }

    fn reverse(&self, target: Option<String>, newer: &[CompiledDeployment]) -> Result<ReverseIntentReport> {
        let report = ReverseIntentReport::build(target.clone(), newer, &self.classifier);
        let outcome = if report.requires_manual_reversal() {
            RunOutcome::ManualReversalRequired
        } else {
            RunOutcome::Acknowledged
        };
        let run_id = format!("rollback-{}", Utc::now().timestamp_micros());
        self.journal.record(&RunRecord::for_rollback(run_id, target, outcome))?;
        Ok(report)
    }

    /// Past deployments, newest first.
    pub fn history(&self) -> Result<impl Iterator<Item = Result<DeploymentSummary>> + '_> {
        self.artifacts.history()
    }
}
