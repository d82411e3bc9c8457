//! Entity DDL generation.
//!
//! Turns the diff between the deployed descriptor snapshot and the feed into
//! T-SQL operations, each placed in its deployment phase. Only additive
//! changes are generated. Removals and modifications that would need a drop
//! are reported as [`SkippedChange`]s so a script can be hand-authored.

use crate::descriptor::{
    CheckDescriptor, ColumnChange, ColumnDescriptor, DescriptorSnapshot, ForeignKeyDescriptor,
    IndexDescriptor, ItemChange, ReferentialAction, SchemaDiff, TableChange, TableDescriptor,
};
use crate::error::{DeployError, Result};
use crate::phase::Phase;
use crate::plan::Operation;
use crate::sql::ObjectName;
use serde::Serialize;

/// A descriptor change that was not turned into DDL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedChange {
    /// Affected table.
    pub table: ObjectName,
    /// What changed.
    pub description: String,
}

/// Output of the generator.
#[derive(Debug, Clone, Default)]
pub struct EntityDdl {
    /// Generated operations in table order; ordinals are unset.
    pub operations: Vec<Operation>,
    /// Changes that need a hand-authored script.
    pub skipped: Vec<SkippedChange>,
    /// Number of descriptor changes found.
    pub change_count: usize,
}

/// Generate entity operations for the feed.
///
/// With no deployed baseline the whole feed is new. A feed whose version
/// equals the baseline produces nothing; an older feed is rejected.
pub fn generate(deployed: Option<&DescriptorSnapshot>, feed: &DescriptorSnapshot) -> Result<EntityDdl> {
    let empty = DescriptorSnapshot::default();
    let baseline = match deployed {
        Some(d) if feed.version < d.version => {
            return Err(DeployError::DescriptorVersionRegressed {
                deployed: d.version,
                feed: feed.version,
            })
        }
        Some(d) if feed.version == d.version => {
            tracing::debug!(version = feed.version, "descriptor version unchanged");
            return Ok(EntityDdl::default());
        }
        Some(d) => d,
        None => &empty,
    };

    let diff = SchemaDiff::compute(baseline, feed);
    let mut out = EntityDdl {
        change_count: diff.change_count(),
        ..EntityDdl::default()
    };

    for change in &diff.table_changes {
        match change {
            TableChange::Added(table) => create_table(table, &mut out),
            TableChange::Removed(table) => out.skip(table.object_name(), "table removed from descriptors"),
            TableChange::Modified(m) => {
                let table = &m.current;
                for column_change in &m.column_changes {
                    alter_column(table, column_change, &mut out);
                }
                if let Some((old, new)) = &m.primary_key_changed {
                    if old.is_empty() {
                        out.push(Phase::PRIMARY_KEYS, table, None, primary_key(table, new));
                    } else {
                        out.skip(table.object_name(), "primary key changed");
                    }
                }
                for change in &m.index_changes {
                    match change {
                        ItemChange::Added(index) => add_index(table, index, &mut out),
                        ItemChange::Removed(i) => out.skip(table.object_name(), format!("index {} removed", i.name)),
                        ItemChange::Modified { to, .. } => {
                            out.skip(table.object_name(), format!("index {} modified", to.name))
                        }
                    }
                }
                for change in &m.foreign_key_changes {
                    match change {
                        ItemChange::Added(fk) => add_foreign_key(table, fk, &mut out),
                        ItemChange::Removed(fk) => {
                            out.skip(table.object_name(), format!("foreign key {} removed", fk.name))
                        }
                        ItemChange::Modified { to, .. } => {
                            out.skip(table.object_name(), format!("foreign key {} modified", to.name))
                        }
                    }
                }
                for change in &m.check_changes {
                    match change {
                        ItemChange::Added(check) => add_check(table, check, &mut out),
                        ItemChange::Removed(c) => {
                            out.skip(table.object_name(), format!("check constraint {} removed", c.name))
                        }
                        ItemChange::Modified { to, .. } => {
                            out.skip(table.object_name(), format!("check constraint {} modified", to.name))
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        from_version = diff.from_version,
        to_version = diff.to_version,
        operations = out.operations.len(),
        skipped = out.skipped.len(),
        "entity DDL generated"
    );
    Ok(out)
}

impl EntityDdl {
    fn push(&mut self, phase: Phase, table: &TableDescriptor, item: Option<&str>, statement: String) {
        let name = match item {
            Some(item) => format!("{}.{}", table.object_name(), item.to_lowercase()),
            None => table.object_name().to_string(),
        };
        self.operations.push(Operation::entity(phase, name, statement));
    }

    fn skip(&mut self, table: ObjectName, description: impl Into<String>) {
        let description = description.into();
        tracing::warn!(table = %table, change = %description, "destructive descriptor change skipped");
        self.skipped.push(SkippedChange { table, description });
    }
}

/// Quote an identifier with brackets.
pub fn quote(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

fn table_name(table: &TableDescriptor) -> String {
    format!("{}.{}", quote(table.schema_or_default()), quote(&table.name))
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn default_constraint(table: &TableDescriptor, column: &ColumnDescriptor) -> Option<String> {
    column.default.as_ref().map(|expr| {
        format!(
            "CONSTRAINT {} DEFAULT ({expr})",
            quote(&format!("DF_{}_{}", table.name, column.name))
        )
    })
}

fn column_definition(table: &TableDescriptor, column: &ColumnDescriptor) -> String {
    let mut def = format!("{} {}", quote(&column.name), column.sql_type);
    if column.identity {
        def.push_str(" IDENTITY(1,1)");
    }
    def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = default_constraint(table, column) {
        def.push(' ');
        def.push_str(&default);
    }
    def
}

fn computed_definition(column: &ColumnDescriptor) -> Option<String> {
    column.computed.as_ref().map(|c| {
        let persisted = if c.persisted { " PERSISTED" } else { "" };
        format!("{} AS ({}){persisted}", quote(&column.name), c.expression)
    })
}

fn primary_key(table: &TableDescriptor, columns: &[String]) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY CLUSTERED ({});",
        table_name(table),
        quote(&format!("PK_{}", table.name)),
        column_list(columns)
    )
}

fn create_table(table: &TableDescriptor, out: &mut EntityDdl) {
    let columns: Vec<String> = table
        .stored_columns()
        .map(|c| format!("    {}", column_definition(table, c)))
        .collect();
    out.push(
        Phase::CREATE_TABLES,
        table,
        None,
        format!("CREATE TABLE {} (\n{}\n);", table_name(table), columns.join(",\n")),
    );

    if !table.primary_key.is_empty() {
        out.push(Phase::PRIMARY_KEYS, table, None, primary_key(table, &table.primary_key));
    }
    for index in &table.indexes {
        add_index(table, index, out);
    }
    for fk in &table.foreign_keys {
        add_foreign_key(table, fk, out);
    }
    for column in table.computed_columns() {
        add_computed(table, column, out);
    }
    for check in &table.checks {
        add_check(table, check, out);
    }
}

fn alter_column(table: &TableDescriptor, change: &ColumnChange, out: &mut EntityDdl) {
    let name = table.object_name();
    match change {
        ColumnChange::Added(column) if column.computed.is_some() => add_computed(table, column, out),
        ColumnChange::Added(column) => out.push(
            Phase::CREATE_TABLES,
            table,
            Some(&column.name),
            format!("ALTER TABLE {} ADD {};", table_name(table), column_definition(table, column)),
        ),
        ColumnChange::DefinitionChanged { to, .. } => {
            let null = if to.nullable { "NULL" } else { "NOT NULL" };
            out.push(
                Phase::CREATE_TABLES,
                table,
                Some(&to.name),
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} {null};",
                    table_name(table),
                    quote(&to.name),
                    to.sql_type
                ),
            )
        }
        ColumnChange::DefaultChanged { column, from: None, to: Some(expr) } => out.push(
            Phase::COLUMN_CONSTRAINTS,
            table,
            Some(column),
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT ({expr}) FOR {};",
                table_name(table),
                quote(&format!("DF_{}_{}", table.name, column)),
                quote(column)
            ),
        ),
        ColumnChange::DefaultChanged { column, .. } => out.skip(name, format!("default of column {column} changed")),
        ColumnChange::IdentityChanged { column, .. } => out.skip(name, format!("identity of column {column} changed")),
        ColumnChange::ComputedChanged { column, .. } => {
            out.skip(name, format!("computed definition of column {column} changed"))
        }
        ColumnChange::Removed(column) => out.skip(name, format!("column {} removed", column.name)),
    }
}

/// Phase for an index: unique indexes first, then single-column, composite
/// and filtered indexes. A filter wins over the column count.
pub fn index_phase(index: &IndexDescriptor) -> Phase {
    if index.unique {
        Phase::UNIQUE_INDEXES
    } else if index.filter.is_some() {
        Phase::FILTERED_INDEXES
    } else if index.columns.len() > 1 {
        Phase::COMPOSITE_INDEXES
    } else {
        Phase::NONCLUSTERED_INDEXES
    }
}

fn add_index(table: &TableDescriptor, index: &IndexDescriptor, out: &mut EntityDdl) {
    let mut sql = format!(
        "CREATE {}NONCLUSTERED INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        table_name(table),
        column_list(&index.columns)
    );
    if !index.include.is_empty() {
        sql.push_str(&format!(" INCLUDE ({})", column_list(&index.include)));
    }
    if let Some(filter) = &index.filter {
        sql.push_str(&format!(" WHERE {filter}"));
    }
    sql.push(';');
    out.push(index_phase(index), table, Some(&index.name), sql);
}

fn add_foreign_key(table: &TableDescriptor, fk: &ForeignKeyDescriptor, out: &mut EntityDdl) {
    let unbracket = |part: &str| {
        let part = part.trim();
        part.strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .unwrap_or(part)
            .to_string()
    };
    let mut parts = fk.references_table.rsplitn(2, '.');
    let name = unbracket(parts.next().unwrap_or_default());
    let schema = parts
        .next()
        .and_then(|rest| rest.rsplit('.').next())
        .map(unbracket)
        .unwrap_or_else(|| crate::sql::objects::DEFAULT_SCHEMA.to_string());
    let referenced = format!("{}.{}", quote(&schema), quote(&name));
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        table_name(table),
        quote(&fk.name),
        column_list(&fk.columns),
        referenced,
        column_list(&fk.references_columns)
    );
    if fk.on_delete != ReferentialAction::NoAction {
        sql.push_str(" ON DELETE ");
        sql.push_str(fk.on_delete.as_sql());
    }
    sql.push(';');
    out.push(Phase::FOREIGN_KEYS, table, Some(&fk.name), sql);
}

fn add_computed(table: &TableDescriptor, column: &ColumnDescriptor, out: &mut EntityDdl) {
    if let Some(definition) = computed_definition(column) {
        out.push(
            Phase::COMPUTED_COLUMNS,
            table,
            Some(&column.name),
            format!("ALTER TABLE {} ADD {definition};", table_name(table)),
        );
    }
}

fn add_check(table: &TableDescriptor, check: &CheckDescriptor, out: &mut EntityDdl) {
    out.push(
        Phase::COLUMN_CONSTRAINTS,
        table,
        Some(&check.name),
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({});",
            table_name(table),
            quote(&check.name),
            check.expression
        ),
    );
}
