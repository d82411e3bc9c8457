//! Command dispatch.
//!
//! Each command prints its result and returns the process exit code.
//! Errors are left to the caller.

use crate::formatter::Formatter;
use crate::Command;
use dbdeploy_core::{Approval, DeployConfig, Deployer, Result, SqliteTarget};
use std::path::Path;

/// Run one command against the configured repository and history.
pub fn run(command: Command, config: DeployConfig, formatter: &dyn Formatter) -> Result<i32> {
    let deployer = Deployer::open(config)?;
    match command {
        Command::Plan => plan(&deployer, formatter),
        Command::Validate => validate(&deployer, formatter),
        Command::Deploy {
            database,
            production,
            approve,
            approver,
            reason,
        } => {
            let approval = approve.then(|| Approval::new(approver.unwrap_or_default(), reason));
            deploy(&deployer, formatter, &database, production, approval)
        }
        Command::RollbackToPrevious => {
            let report = deployer.rollback_to_previous()?;
            println!("{}", formatter.format_reverse(&report));
            Ok(report.exit_code())
        }
        Command::RestoreFrom { version } => {
            let report = deployer.restore_from(&version)?;
            println!("{}", formatter.format_reverse(&report));
            Ok(report.exit_code())
        }
        Command::History { limit } => history(&deployer, formatter, limit),
    }
}

fn plan(deployer: &Deployer, formatter: &dyn Formatter) -> Result<i32> {
    let prepared = deployer.plan()?;
    println!("{}", formatter.format_plan(&prepared.plan));
    Ok(0)
}

fn validate(deployer: &Deployer, formatter: &dyn Formatter) -> Result<i32> {
    let prepared = deployer.plan()?;
    let report = deployer.validate(&prepared.plan)?;
    println!("{}", formatter.format_report(&report));
    Ok(report.exit_code())
}

fn deploy(
    deployer: &Deployer,
    formatter: &dyn Formatter,
    database: &Path,
    production: bool,
    approval: Option<Approval>,
) -> Result<i32> {
    let prepared = deployer.plan()?;
    let report = deployer.validate(&prepared.plan)?;
    println!("{}", formatter.format_report(&report));

    let mut target = SqliteTarget::open(database)?.with_production(production);
    let outcome = deployer.deploy(prepared, &mut target, approval)?;
    println!("{}", formatter.format_outcome(&outcome));
    Ok(0)
}

fn history(deployer: &Deployer, formatter: &dyn Formatter, limit: Option<usize>) -> Result<i32> {
    let summaries = deployer
        .history()?
        .take(limit.unwrap_or(usize::MAX))
        .collect::<Result<Vec<_>>>()?;
    println!("{}", formatter.format_history(&summaries));
    Ok(0)
}
