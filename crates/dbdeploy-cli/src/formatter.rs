//! Output formatters for plans, reports and history.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use dbdeploy_core::artifact::{DeploymentSummary, ReversalAction, ReverseIntentReport};
use dbdeploy_core::{DeploymentOutcome, DeploymentPlan, ValidationReport};

/// Longest statement excerpt shown in a table cell.
const EXCERPT_LEN: usize = 60;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a deployment plan.
    fn format_plan(&self, plan: &DeploymentPlan) -> String;

    /// Format a validation report.
    fn format_report(&self, report: &ValidationReport) -> String;

    /// Format the result of a deploy.
    fn format_outcome(&self, outcome: &DeploymentOutcome) -> String;

    /// Format a rollback or restore report.
    fn format_reverse(&self, report: &ReverseIntentReport) -> String;

    /// Format deployment history.
    fn format_history(&self, history: &[DeploymentSummary]) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_plan(&self, plan: &DeploymentPlan) -> String {
        if plan.is_empty() {
            return "Nothing to deploy".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Phase", "#", "Source", "Object", "Statement"]);
        for op in plan.operations() {
            table.add_row(vec![
                Cell::new(op.phase()),
                Cell::new(op.ordinal_within_phase()),
                Cell::new(op.source_kind()),
                Cell::new(op.object_name()),
                Cell::new(excerpt(op.statement_text())),
            ]);
        }

        let (entity, script) = plan.source_counts();
        let mut output = table.to_string();
        output.push_str(&format!(
            "\n{} operation(s): {} entity-derived, {} script (descriptor version {})",
            plan.len(),
            entity,
            script,
            plan.descriptor_version()
        ));
        for note in plan.enhancement_notes() {
            output.push_str(&format!("\nnote: {note}"));
        }
        for skipped in plan.skipped_changes() {
            output.push_str(&format!(
                "\nskipped: {}: {} (needs a hand-authored script)",
                skipped.table, skipped.description
            ));
        }
        for error in plan.load_errors() {
            output.push_str(&format!("\nnot loaded: {error}"));
        }
        let approval_phases = plan.approval_phases();
        if !approval_phases.is_empty() {
            let phases: Vec<String> = approval_phases.iter().map(|p| format!("{} ({})", p, p.label())).collect();
            output.push_str(&format!("\napproval required for phase(s): {}", phases.join(", ")));
        }
        output
    }

    fn format_report(&self, report: &ValidationReport) -> String {
        let mut output = String::new();
        if !report.issues.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Severity", "Category", "Phase", "#", "Object", "Description", "Recommendation"]);
            for issue in &report.issues {
                table.add_row(vec![
                    Cell::new(issue.severity),
                    Cell::new(&issue.category),
                    Cell::new(issue.related_operation.phase),
                    Cell::new(issue.related_operation.ordinal),
                    Cell::new(&issue.related_operation.object_name),
                    Cell::new(&issue.description),
                    Cell::new(&issue.recommendation),
                ]);
            }
            output.push_str(&table.to_string());
            output.push('\n');
        }

        output.push_str(&format!(
            "Result: {} ({} error(s), {} warning(s), {} info) across {} operation(s)",
            report.overall_result, report.error_count, report.warning_count, report.info_count, report.operation_count
        ));
        output.push_str(&format!(
            "\nEstimated duration: {} ms, storage delta: {} bytes",
            report.estimate.duration_ms, report.estimate.storage_delta_bytes
        ));
        if !report.is_blocked() {
            if let Some(reason) = report.approval_reason() {
                output.push_str(&format!("\nApproval required: {reason}"));
            }
        }
        output
    }

    fn format_outcome(&self, outcome: &DeploymentOutcome) -> String {
        let mut output = format!("Run {}: {}", outcome.run_id, outcome.state);
        if let Some(approval) = &outcome.approval {
            output.push_str(&format!("\nApproved by {}", approval.approver));
            if !approval.reason.is_empty() {
                output.push_str(&format!(": {}", approval.reason));
            }
        }
        match (&outcome.execution, &outcome.artifact) {
            (Some(execution), Some(artifact)) => {
                output.push_str(&format!(
                    "\nApplied {} operation(s) in {} ms",
                    execution.operations_applied, execution.duration_ms
                ));
                output.push_str(&format!("\nCompiled deployment {}", artifact.version()));
            }
            _ => output.push_str("\nNothing to deploy"),
        }
        output
    }

    fn format_reverse(&self, report: &ReverseIntentReport) -> String {
        let target = report.target_version.as_deref().unwrap_or("<before first deployment>");
        if report.items.is_empty() {
            return format!("Nothing to revert to reach {target}");
        }

        let mut table = Table::new();
        table.set_header(vec!["Version", "Phase", "#", "Object", "Action", "Reason"]);
        for item in &report.items {
            let action = match item.action {
                ReversalAction::Acknowledged => "acknowledged",
                ReversalAction::ManualReversalRequired => "manual reversal",
            };
            table.add_row(vec![
                Cell::new(&item.version),
                Cell::new(item.phase),
                Cell::new(item.ordinal),
                Cell::new(&item.object_name),
                Cell::new(action),
                Cell::new(item.reasons.join("; ")),
            ]);
        }

        format!(
            "{table}\nTarget {target}: {} acknowledged, {} need a hand-authored reversal",
            report.acknowledged_count(),
            report.manual_count()
        )
    }

    fn format_history(&self, history: &[DeploymentSummary]) -> String {
        if history.is_empty() {
            return "No deployments".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Version", "Generated", "Descriptor", "Operations", "Entity", "Script"]);
        for summary in history {
            table.add_row(vec![
                Cell::new(&summary.version),
                Cell::new(summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
                Cell::new(summary.source_descriptor_version),
                Cell::new(summary.operation_count),
                Cell::new(summary.change_summary.entity_operations),
                Cell::new(summary.change_summary.script_operations),
            ]);
        }
        table.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_plan(&self, plan: &DeploymentPlan) -> String {
        Self::pretty(plan)
    }

    fn format_report(&self, report: &ValidationReport) -> String {
        Self::pretty(report)
    }

    fn format_outcome(&self, outcome: &DeploymentOutcome) -> String {
        Self::pretty(&serde_json::json!({
            "run_id": outcome.run_id,
            "state": outcome.state,
            "approval": outcome.approval,
            "operations_applied": outcome.execution.as_ref().map(|e| e.operations_applied),
            "duration_ms": outcome.execution.as_ref().map(|e| e.duration_ms),
            "restore_point": outcome.execution.as_ref().map(|e| &e.restore_point),
            "version": outcome.artifact.as_ref().map(|a| a.version()),
        }))
    }

    fn format_reverse(&self, report: &ReverseIntentReport) -> String {
        Self::pretty(report)
    }

    fn format_history(&self, history: &[DeploymentSummary]) -> String {
        Self::pretty(history)
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}

/// First line of a statement, shortened for a table cell.
fn excerpt(statement: &str) -> String {
    let first = statement.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let more = statement.trim().lines().count() > 1;
    if first.chars().count() > EXCERPT_LEN {
        let cut: String = first.chars().take(EXCERPT_LEN).collect();
        format!("{cut}...")
    } else if more {
        format!("{first} ...")
    } else {
        first.to_string()
    }
}
