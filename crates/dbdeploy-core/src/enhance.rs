//! Idempotency enhancement for programmability scripts.
//!
//! A script that leads with `CREATE PROCEDURE|FUNCTION|TRIGGER|VIEW <name>`
//! fails on its second run. The enhancer prefixes it with a catalog-checked
//! `DROP` so it can be re-run. Headers written `CREATE OR ALTER` or
//! `CREATE <kind> IF NOT EXISTS` are re-runnable already and are left alone,
//! which is how programmability scripts for a SQLite target are written: the
//! generated guard is T-SQL. Anything the scanner cannot read with confidence
//! is left untouched and reported.

use crate::plan::Operation;
use crate::sql::{
    create_statements, drop_statement, has_batch_separator, significant_tokens, unnamed_creates,
    CreateStatement, ObjectKind, SpannedToken,
};
use serde::Serialize;

/// Why a script was left as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The script contains `GO` batch separators.
    MultipleBatches,
    /// The script creates more than one object.
    MultipleDefinitions,
    /// Something other than `CREATE` or a drop guard comes first.
    AmbiguousLeadingClause,
    /// The created object's name could not be read.
    UnrecognizedName,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MultipleBatches => write!(f, "script contains GO batch separators"),
            SkipReason::MultipleDefinitions => write!(f, "script creates more than one object"),
            SkipReason::AmbiguousLeadingClause => {
                write!(f, "script does not start with CREATE or a drop guard")
            }
            SkipReason::UnrecognizedName => write!(f, "created object name could not be read"),
        }
    }
}

/// What the enhancer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementOutcome {
    /// A drop guard was added.
    Guarded,
    /// `CREATE OR ALTER` or `CREATE ... IF NOT EXISTS` is already re-runnable.
    AlreadyIdempotent,
    /// The script already drops the object before creating it.
    AlreadyGuarded,
    /// The script creates no programmability object.
    NotApplicable,
    /// Left as written; it will not be re-runnable.
    Skipped(SkipReason),
}

impl EnhancementOutcome {
    /// Whether the statement text changed.
    pub fn changed(self) -> bool {
        self == EnhancementOutcome::Guarded
    }
}

/// Enhanced script text and outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Enhancement {
    /// Resulting text.
    pub text: String,
    /// What happened.
    pub outcome: EnhancementOutcome,
}

impl Enhancement {
    fn unchanged(text: &str, outcome: EnhancementOutcome) -> Self {
        Self {
            text: text.to_string(),
            outcome,
        }
    }
}

/// Enhance a single script.
pub fn enhance_script(text: &str) -> Enhancement {
    let tokens = significant_tokens(text);
    let creates = create_statements(&tokens);
    let unnamed = unnamed_creates(&tokens);

    let programmable = creates.iter().any(|c| c.kind.is_programmable());
    if !programmable {
        if unnamed > 0 && tokens.first().is_some_and(|t| t.token.is_keyword("CREATE")) {
            return Enhancement::unchanged(text, EnhancementOutcome::Skipped(SkipReason::UnrecognizedName));
        }
        return Enhancement::unchanged(text, EnhancementOutcome::NotApplicable);
    }
    if has_batch_separator(text) {
        return Enhancement::unchanged(text, EnhancementOutcome::Skipped(SkipReason::MultipleBatches));
    }
    if creates.len() + unnamed > 1 {
        return Enhancement::unchanged(text, EnhancementOutcome::Skipped(SkipReason::MultipleDefinitions));
    }

    let create = &creates[0];
    if create.or_alter || create.if_not_exists {
        return Enhancement::unchanged(text, EnhancementOutcome::AlreadyIdempotent);
    }
    if create.token_index == 0 {
        return Enhancement {
            text: format!("{}\n{text}", drop_guard(text, create)),
            outcome: EnhancementOutcome::Guarded,
        };
    }

    let leads_with_guard = tokens
        .first()
        .is_some_and(|t| t.token.is_keyword("IF") || t.token.is_keyword("DROP"));
    if leads_with_guard && drops_same_object(&tokens[..create.token_index], create) {
        return Enhancement::unchanged(text, EnhancementOutcome::AlreadyGuarded);
    }
    Enhancement::unchanged(text, EnhancementOutcome::Skipped(SkipReason::AmbiguousLeadingClause))
}

/// Enhance an operation. The original operation is never modified.
pub fn enhance_operation(operation: &Operation) -> (Operation, EnhancementOutcome) {
    let enhancement = enhance_script(operation.statement_text());
    match enhancement.outcome {
        EnhancementOutcome::Guarded => {
            tracing::debug!(object = operation.object_name(), "idempotency guard added");
        }
        EnhancementOutcome::Skipped(reason) => {
            tracing::warn!(
                phase = operation.phase().number(),
                object = operation.object_name(),
                %reason,
                "script enhancement skipped; script is not re-runnable"
            );
        }
        _ => {}
    }
    (operation.rewritten(enhancement.text), enhancement.outcome)
}

fn drops_same_object(prefix: &[SpannedToken], create: &CreateStatement) -> bool {
    (0..prefix.len()).any(|i| {
        drop_statement(prefix, i)
            .is_some_and(|(kind, name)| kind == create.kind && name.name == create.name.name)
    })
}

fn drop_guard(text: &str, create: &CreateStatement) -> String {
    let raw = create.name.span.slice(text);
    let literal = raw.replace('\'', "''");
    let check = match create.kind {
        ObjectKind::Procedure => {
            format!("SELECT 1 FROM sys.procedures WHERE object_id = OBJECT_ID(N'{literal}')")
        }
        ObjectKind::View => format!("SELECT 1 FROM sys.views WHERE object_id = OBJECT_ID(N'{literal}')"),
        ObjectKind::Trigger => {
            format!("SELECT 1 FROM sys.triggers WHERE object_id = OBJECT_ID(N'{literal}')")
        }
        _ => format!(
            "SELECT 1 FROM sys.objects WHERE object_id = OBJECT_ID(N'{literal}') \
             AND type IN (N'FN', N'IF', N'TF', N'FS', N'FT')"
        ),
    };
    format!("IF EXISTS ({check}) DROP {} {raw};", create.kind.keyword())
}
