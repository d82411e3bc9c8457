//! dbdeploy command-line client
//!
//! Plans, validates and deploys a phase-foldered script repository, and
//! answers rollback and history questions from the compiled deployments.

mod commands;
mod formatter;

use clap::{Args as ClapArgs, Parser, Subcommand};
use dbdeploy_core::config::{DEFAULT_ARTIFACT_DIR, DEFAULT_REPOSITORY, DEFAULT_STATE_DIR};
use dbdeploy_core::validate::DEFAULT_ROW_COUNT;
use dbdeploy_core::{DeployConfig, DeployError};
use formatter::OutputFormat;
use std::path::PathBuf;

/// Exit code for input, plan and history errors.
const EXIT_ERROR: i32 = 4;

/// dbdeploy - ordered, validated schema deployments
#[derive(Parser, Debug)]
#[command(name = "dbdeploy")]
#[command(version, about = "Ordered, validated schema deployments")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub options: Options,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

/// Inputs shared by every command.
#[derive(ClapArgs, Debug, Clone)]
pub struct Options {
    /// Script repository root
    #[arg(long, global = true, default_value = DEFAULT_REPOSITORY)]
    pub repository: PathBuf,

    /// Descriptor feed (JSON)
    #[arg(long, global = true)]
    pub descriptors: Option<PathBuf>,

    /// Target metadata for estimates (JSON)
    #[arg(long, global = true)]
    pub metadata: Option<PathBuf>,

    /// Compiled deployment directory
    #[arg(long, global = true, default_value = DEFAULT_ARTIFACT_DIR)]
    pub artifacts: PathBuf,

    /// State directory (descriptor baseline and run journal)
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state: PathBuf,

    /// Rows assumed for existing tables without metadata
    #[arg(long, global = true, default_value_t = DEFAULT_ROW_COUNT)]
    pub default_row_count: u64,

    /// Deploy programmability scripts exactly as written
    #[arg(long, global = true)]
    pub no_enhance: bool,
}

impl Options {
    /// Build the orchestrator configuration.
    pub fn into_config(self) -> DeployConfig {
        let mut config = DeployConfig::new(self.repository)
            .with_artifact_dir(self.artifacts)
            .with_state_dir(self.state)
            .with_default_row_count(self.default_row_count);
        if let Some(descriptors) = self.descriptors {
            config = config.with_descriptors(descriptors);
        }
        if let Some(metadata) = self.metadata {
            config = config.with_metadata(metadata);
        }
        if self.no_enhance {
            config = config.without_enhancement();
        }
        config
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build and print the deployment plan
    Plan,

    /// Classify the plan for risk (exit 0 safe, 1 warnings, 2 blocked)
    Validate,

    /// Validate and execute the plan against a SQLite database
    Deploy {
        /// Database file
        #[arg(long)]
        database: PathBuf,

        /// Restore the platform snapshot when the run fails
        #[arg(long)]
        production: bool,

        /// Approve a plan with warnings or approval-gated phases
        #[arg(long, requires = "approver")]
        approve: bool,

        /// Who approved the deployment
        #[arg(long)]
        approver: Option<String>,

        /// Why the deployment was approved
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Reverse-intent plan for the latest deployment
    RollbackToPrevious,

    /// Reverse-intent plan for every deployment after a version
    RestoreFrom {
        /// Compiled deployment version to return to
        version: String,
    },

    /// List compiled deployments, newest first
    History {
        /// Show at most this many entries
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dbdeploy=info,dbdeploy_core=info")),
        )
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    let code = match commands::run(args.command, args.options.into_config(), &*formatter) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Exit code for a failed command.
fn exit_code_for(error: &DeployError) -> i32 {
    match error {
        DeployError::ApprovalRequired { .. } => 1,
        DeployError::ValidationBlocked { .. } => 2,
        DeployError::ExecutionFailed { .. } | DeployError::ExecutionAborted { .. } => 3,
        _ => EXIT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbdeploy_core::Phase;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_options_into_config() {
        let args = Args::try_parse_from([
            "dbdeploy",
            "--repository",
            "db",
            "--descriptors",
            "model.json",
            "--no-enhance",
            "validate",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Validate));

        let config = args.options.into_config();
        assert_eq!(config.repository, PathBuf::from("db"));
        assert_eq!(config.descriptors, Some(PathBuf::from("model.json")));
        assert_eq!(config.artifact_dir, PathBuf::from(DEFAULT_ARTIFACT_DIR));
        assert!(!config.enhance_scripts);
    }

    #[test]
    fn test_approve_requires_approver() {
        assert!(Args::try_parse_from(["dbdeploy", "deploy", "--database", "app.db", "--approve"]).is_err());

        let args = Args::try_parse_from([
            "dbdeploy",
            "deploy",
            "--database",
            "app.db",
            "--approve",
            "--approver",
            "dba",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Json);
        match args.command {
            Command::Deploy { approve, approver, .. } => {
                assert!(approve);
                assert_eq!(approver.as_deref(), Some("dba"));
            }
            other => panic!("Expected deploy, got {other:?}"),
        }
    }

    #[test]
    fn test_exit_codes() {
        let blocked = DeployError::ValidationBlocked {
            error_count: 1,
            phase: Phase::CREATE_TABLES,
            object_name: "dbo.foo".to_string(),
            statement: "DROP TABLE dbo.Foo".to_string(),
            description: "Drops a table".to_string(),
        };
        assert_eq!(exit_code_for(&blocked), 2);
        assert_eq!(
            exit_code_for(&DeployError::ApprovalRequired {
                reason: "warnings".to_string()
            }),
            1
        );
        assert_eq!(
            exit_code_for(&DeployError::ExecutionAborted {
                stage: "begin".to_string(),
                cause: "database is locked".to_string(),
            }),
            3
        );
        assert_eq!(
            exit_code_for(&DeployError::VersionNotFound {
                version: "x".to_string()
            }),
            EXIT_ERROR
        );
    }
}
