//! Compiled deployment file format.
//!
//! ```text
//! -- dbdeploy compiled deployment
//! -- format: dbdeploy-compiled/1
//! -- version: 000003-5f1c0e9a22b4
//! -- generated-at: 2026-03-01T09:30:00.000000Z
//! -- source-descriptor-version: 7
//! -- operation-count: 2
//! -- checksum: <blake3 of the body, hex>
//! -- change-summary: {"entity_operations":1,...}
//! BEGIN TRANSACTION;
//! -- @operation phase=1 ordinal=1 source=entity object=dbo.orders bytes=42
//! <statement text, exactly `bytes` bytes>
//! -- @end-operation
//! COMMIT TRANSACTION;
//! ```
//!
//! The body (from `BEGIN TRANSACTION;` to the end) is content-addressed: the
//! checksum covers it and the version ends with its first 12 hex digits.

use crate::phase::Phase;
use crate::plan::{DeploymentPlan, Operation, SourceKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format identifier written in every header.
pub const FORMAT: &str = "dbdeploy-compiled/1";

const TITLE: &str = "-- dbdeploy compiled deployment";
const BEGIN: &str = "BEGIN TRANSACTION;\n";
const COMMIT: &str = "COMMIT TRANSACTION;\n";
const OPERATION: &str = "-- @operation ";
const END_OPERATION: &str = "\n-- @end-operation\n";

/// One executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledOperation {
    pub phase: Phase,
    pub ordinal: u32,
    pub source_kind: SourceKind,
    pub object_name: String,
    pub statement_text: String,
}

impl CompiledOperation {
    /// Rebuild the plan operation, including its derived metadata.
    pub fn to_operation(&self) -> Operation {
        Operation::from_parts(
            self.phase,
            self.ordinal,
            self.source_kind,
            self.object_name.clone(),
            self.statement_text.clone(),
            None,
        )
    }
}

impl From<&Operation> for CompiledOperation {
    fn from(op: &Operation) -> Self {
        Self {
            phase: op.phase(),
            ordinal: op.ordinal_within_phase(),
            source_kind: op.source_kind(),
            object_name: op.object_name().to_string(),
            statement_text: op.statement_text().to_string(),
        }
    }
}

/// Counts describing what a deployment changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub entity_operations: usize,
    pub script_operations: usize,
    pub descriptor_changes: usize,
    /// Operation count per phase number.
    pub phases: BTreeMap<u8, usize>,
}

impl ChangeSummary {
    pub fn from_plan(plan: &DeploymentPlan) -> Self {
        let (entity_operations, script_operations) = plan.source_counts();
        Self {
            entity_operations,
            script_operations,
            descriptor_changes: plan.entity_change_count(),
            phases: plan
                .phase_counts()
                .into_iter()
                .map(|(phase, count)| (phase.number(), count))
                .collect(),
        }
    }
}

/// An immutable record of one committed deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledDeployment {
    version: String,
    generated_at: DateTime<Utc>,
    source_descriptor_version: u64,
    operations: Vec<CompiledOperation>,
    change_summary: ChangeSummary,
}

impl CompiledDeployment {
    /// Compile a committed plan as history entry number `sequence`.
    pub fn from_plan(plan: &DeploymentPlan, sequence: u64, generated_at: DateTime<Utc>) -> Self {
        let operations: Vec<CompiledOperation> = plan.operations().iter().map(CompiledOperation::from).collect();
        let checksum = checksum(&render_body(&operations));
        Self {
            version: format!("{sequence:06}-{}", &checksum[..12]),
            generated_at,
            source_descriptor_version: plan.descriptor_version(),
            operations,
            change_summary: ChangeSummary::from_plan(plan),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn source_descriptor_version(&self) -> u64 {
        self.source_descriptor_version
    }

    pub fn operations(&self) -> &[CompiledOperation] {
        &self.operations
    }

    pub fn change_summary(&self) -> &ChangeSummary {
        &self.change_summary
    }

    /// History sequence number, the version's numeric prefix.
    pub fn sequence(&self) -> Option<u64> {
        sequence_of(&self.version)
    }

    /// Render the file contents.
    pub fn render(&self) -> String {
        let body = render_body(&self.operations);
        let summary = serde_json::to_string(&self.change_summary).unwrap_or_else(|_| "{}".to_string());
        let mut out = String::with_capacity(body.len() + 512);
        out.push_str(TITLE);
        out.push('\n');
        for (key, value) in [
            ("format", FORMAT.to_string()),
            ("version", self.version.clone()),
            (
                "generated-at",
                self.generated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
            ("source-descriptor-version", self.source_descriptor_version.to_string()),
            ("operation-count", self.operations.len().to_string()),
            ("checksum", checksum(&body)),
            ("change-summary", summary),
        ] {
            out.push_str(&format!("-- {key}: {value}\n"));
        }
        out.push_str(&body);
        out
    }

    /// Parse file contents, verifying framing and checksum.
    pub fn parse(text: &str) -> Result<Self, String> {
        let body_start = text
            .find(BEGIN)
            .filter(|&i| i == 0 || text.as_bytes()[i - 1] == b'\n')
            .ok_or("missing BEGIN TRANSACTION")?;
        let header = Header::parse(&text[..body_start])?;
        let body = &text[body_start..];

        let actual = checksum(body);
        if actual != header.checksum {
            return Err(format!(
                "checksum mismatch: header {}, content {actual}",
                header.checksum
            ));
        }
        if sequence_of(&header.version).is_none() || !header.version.ends_with(&actual[..12]) {
            return Err(format!("version {} does not match content", header.version));
        }

        let operations = parse_body(body)?;
        if operations.len() != header.operation_count {
            return Err(format!(
                "operation-count {} but {} operations framed",
                header.operation_count,
                operations.len()
            ));
        }
        Ok(Self {
            version: header.version,
            generated_at: header.generated_at,
            source_descriptor_version: header.source_descriptor_version,
            operations,
            change_summary: header.change_summary,
        })
    }
}

/// Header fields of a compiled deployment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub source_descriptor_version: u64,
    pub operation_count: usize,
    pub checksum: String,
    pub change_summary: ChangeSummary,
}

impl Header {
    /// Parse the `-- key: value` lines before the body.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for line in text.lines() {
            if line == TITLE || line.trim().is_empty() {
                continue;
            }
            let entry = line
                .strip_prefix("-- ")
                .and_then(|rest| rest.split_once(": "))
                .ok_or_else(|| format!("malformed header line: {line}"))?;
            fields.insert(entry.0, entry.1);
        }
        let field = |key: &str| fields.get(key).copied().ok_or_else(|| format!("missing header '{key}'"));

        let format = field("format")?;
        if format != FORMAT {
            return Err(format!("unsupported format '{format}'"));
        }
        Ok(Self {
            version: field("version")?.to_string(),
            generated_at: DateTime::parse_from_rfc3339(field("generated-at")?)
                .map_err(|e| format!("invalid generated-at: {e}"))?
                .with_timezone(&Utc),
            source_descriptor_version: field("source-descriptor-version")?
                .parse()
                .map_err(|e| format!("invalid source-descriptor-version: {e}"))?,
            operation_count: field("operation-count")?
                .parse()
                .map_err(|e| format!("invalid operation-count: {e}"))?,
            checksum: field("checksum")?.to_string(),
            change_summary: serde_json::from_str(field("change-summary")?)
                .map_err(|e| format!("invalid change-summary: {e}"))?,
        })
    }
}

/// Numeric prefix of a version string.
pub fn sequence_of(version: &str) -> Option<u64> {
    let (sequence, hash) = version.split_once('-')?;
    if hash.len() != 12 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    sequence.parse().ok()
}

fn checksum(body: &str) -> String {
    hex::encode(blake3::hash(body.as_bytes()).as_bytes())
}

fn render_body(operations: &[CompiledOperation]) -> String {
    let mut out = String::from(BEGIN);
    for op in operations {
        out.push_str(&format!(
            "{OPERATION}phase={} ordinal={} source={} object={} bytes={}\n",
            op.phase,
            op.ordinal,
            op.source_kind,
            op.object_name,
            op.statement_text.len()
        ));
        out.push_str(&op.statement_text);
        out.push_str(END_OPERATION);
    }
    out.push_str(COMMIT);
    out
}

fn parse_body(body: &str) -> Result<Vec<CompiledOperation>, String> {
    let mut rest = body.strip_prefix(BEGIN).ok_or("missing BEGIN TRANSACTION")?;
    let mut operations = Vec::new();
    loop {
        if rest == COMMIT {
            return Ok(operations);
        }
        let line_end = rest.find('\n').ok_or("truncated operation header")?;
        let line = rest[..line_end]
            .strip_prefix(OPERATION)
            .ok_or_else(|| format!("expected operation header after operation {}", operations.len()))?;
        let (fields, bytes) = line.rsplit_once(" bytes=").ok_or("operation header without bytes")?;
        let bytes: usize = bytes.parse().map_err(|e| format!("invalid bytes: {e}"))?;
        let (fields, object_name) = fields.split_once(" object=").ok_or("operation header without object")?;

        let mut phase = None;
        let mut ordinal = None;
        let mut source_kind = None;
        for pair in fields.split(' ') {
            match pair.split_once('=') {
                Some(("phase", v)) => {
                    phase = v.parse::<u8>().ok().and_then(Phase::new);
                }
                Some(("ordinal", v)) => ordinal = v.parse::<u32>().ok(),
                Some(("source", v)) => source_kind = v.parse::<SourceKind>().ok(),
                _ => return Err(format!("unexpected operation field '{pair}'")),
            }
        }

        let text_start = line_end + 1;
        let statement_text = rest
            .get(text_start..text_start + bytes)
            .ok_or("statement text shorter than its byte count")?;
        let after = &rest[text_start + bytes..];
        rest = after
            .strip_prefix(END_OPERATION)
            .ok_or_else(|| format!("missing end of operation {}", operations.len() + 1))?;

        operations.push(CompiledOperation {
            phase: phase.ok_or("invalid phase")?,
            ordinal: ordinal.ok_or("invalid ordinal")?,
            source_kind: source_kind.ok_or("invalid source")?,
            object_name: object_name.to_string(),
            statement_text: statement_text.to_string(),
        });
    }
}
