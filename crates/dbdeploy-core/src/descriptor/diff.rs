//! Descriptor diffing.
//!
//! Compares the deployed snapshot with the current feed and produces a
//! structured, deterministically ordered list of table changes.

use super::snapshot::DescriptorSnapshot;
use super::table::{
    CheckDescriptor, ColumnDescriptor, ComputedColumn, ForeignKeyDescriptor, IndexDescriptor,
    TableDescriptor,
};
use crate::sql::ObjectName;
use std::collections::{BTreeMap, BTreeSet};

/// Complete diff between two snapshots.
#[derive(Debug, Clone)]
pub struct SchemaDiff {
    /// Deployed snapshot version (0 when nothing was deployed).
    pub from_version: u64,
    /// Feed version.
    pub to_version: u64,
    /// Changes per table, ordered by table name.
    pub table_changes: Vec<TableChange>,
}

impl SchemaDiff {
    /// Compute the diff between two snapshots.
    pub fn compute(from: &DescriptorSnapshot, to: &DescriptorSnapshot) -> Self {
        let from_tables = from.tables_by_name();
        let to_tables = to.tables_by_name();

        let names: BTreeSet<&ObjectName> = from_tables.keys().chain(to_tables.keys()).collect();
        let mut table_changes = Vec::new();

        for name in names {
            match (from_tables.get(name), to_tables.get(name)) {
                (None, Some(added)) => table_changes.push(TableChange::Added((*added).clone())),
                (Some(removed), None) => {
                    table_changes.push(TableChange::Removed((*removed).clone()))
                }
                (Some(old), Some(new)) if old != new => {
                    let change = Self::diff_table(name.clone(), old, new);
                    if !change.is_empty() {
                        table_changes.push(TableChange::Modified(change));
                    }
                }
                _ => {}
            }
        }

        SchemaDiff {
            from_version: from.version,
            to_version: to.version,
            table_changes,
        }
    }

    /// Check if there are any changes.
    pub fn is_empty(&self) -> bool {
        self.table_changes.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.table_changes
            .iter()
            .map(|c| match c {
                TableChange::Modified(m) => m.change_count(),
                _ => 1,
            })
            .sum()
    }

    fn diff_table(name: ObjectName, from: &TableDescriptor, to: &TableDescriptor) -> TableModification {
        let primary_key_changed = (!same_columns(&from.primary_key, &to.primary_key))
            .then(|| (from.primary_key.clone(), to.primary_key.clone()));

        TableModification {
            table: name,
            current: to.clone(),
            column_changes: Self::diff_columns(&from.columns, &to.columns),
            primary_key_changed,
            index_changes: diff_named(&from.indexes, &to.indexes, |i| &i.name),
            foreign_key_changes: diff_named(&from.foreign_keys, &to.foreign_keys, |f| &f.name),
            check_changes: diff_named(&from.checks, &to.checks, |c| &c.name),
        }
    }

    fn diff_columns(from: &[ColumnDescriptor], to: &[ColumnDescriptor]) -> Vec<ColumnChange> {
        let mut changes = Vec::new();

        let from_map: BTreeMap<String, &ColumnDescriptor> =
            from.iter().map(|c| (c.name.to_lowercase(), c)).collect();
        let to_keys: BTreeSet<String> = to.iter().map(|c| c.name.to_lowercase()).collect();

        // Added and modified columns, in declaration order
        for column in to {
            let Some(old) = from_map.get(&column.name.to_lowercase()) else {
                changes.push(ColumnChange::Added(column.clone()));
                continue;
            };

            if old.computed != column.computed {
                changes.push(ColumnChange::ComputedChanged {
                    column: column.name.clone(),
                    from: old.computed.clone(),
                    to: column.computed.clone(),
                });
                continue;
            }

            if !old.sql_type.eq_ignore_ascii_case(&column.sql_type) || old.nullable != column.nullable
            {
                changes.push(ColumnChange::DefinitionChanged {
                    from: (*old).clone(),
                    to: column.clone(),
                });
            }

            if old.default != column.default {
                changes.push(ColumnChange::DefaultChanged {
                    column: column.name.clone(),
                    from: old.default.clone(),
                    to: column.default.clone(),
                });
            }

            if old.identity != column.identity {
                changes.push(ColumnChange::IdentityChanged {
                    column: column.name.clone(),
                    to: column.identity,
                });
            }
        }

        // Removed columns
        for column in from {
            if !to_keys.contains(&column.name.to_lowercase()) {
                changes.push(ColumnChange::Removed(column.clone()));
            }
        }

        changes
    }
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn diff_named<T, F>(from: &[T], to: &[T], name: F) -> Vec<ItemChange<T>>
where
    T: Clone + PartialEq,
    F: Fn(&T) -> &String,
{
    let from_map: BTreeMap<String, &T> = from.iter().map(|i| (name(i).to_lowercase(), i)).collect();
    let to_map: BTreeMap<String, &T> = to.iter().map(|i| (name(i).to_lowercase(), i)).collect();

    let mut changes = Vec::new();
    for (key, item) in &to_map {
        match from_map.get(key) {
            None => changes.push(ItemChange::Added((*item).clone())),
            Some(old) if *old != *item => changes.push(ItemChange::Modified {
                from: (*old).clone(),
                to: (*item).clone(),
            }),
            Some(_) => {}
        }
    }
    for (key, item) in &from_map {
        if !to_map.contains_key(key) {
            changes.push(ItemChange::Removed((*item).clone()));
        }
    }
    changes
}

/// Change to a table.
#[derive(Debug, Clone)]
pub enum TableChange {
    /// Table was added.
    Added(TableDescriptor),
    /// Table was removed.
    Removed(TableDescriptor),
    /// Table was modified.
    Modified(TableModification),
}

impl TableChange {
    /// Get the table name for this change.
    pub fn table_name(&self) -> ObjectName {
        match self {
            TableChange::Added(t) | TableChange::Removed(t) => t.object_name(),
            TableChange::Modified(m) => m.table.clone(),
        }
    }
}

/// Changes within an existing table.
#[derive(Debug, Clone)]
pub struct TableModification {
    /// Table name.
    pub table: ObjectName,
    /// The table as declared by the feed.
    pub current: TableDescriptor,
    /// Column changes.
    pub column_changes: Vec<ColumnChange>,
    /// Primary key change (old, new).
    pub primary_key_changed: Option<(Vec<String>, Vec<String>)>,
    /// Index changes.
    pub index_changes: Vec<ItemChange<IndexDescriptor>>,
    /// Foreign key changes.
    pub foreign_key_changes: Vec<ItemChange<ForeignKeyDescriptor>>,
    /// Check constraint changes.
    pub check_changes: Vec<ItemChange<CheckDescriptor>>,
}

impl TableModification {
    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Number of individual changes.
    pub fn change_count(&self) -> usize {
        self.column_changes.len()
            + usize::from(self.primary_key_changed.is_some())
            + self.index_changes.len()
            + self.foreign_key_changes.len()
            + self.check_changes.len()
    }
}

/// Change to a column.
#[derive(Debug, Clone)]
pub enum ColumnChange {
    /// Column was added.
    Added(ColumnDescriptor),
    /// Column was removed.
    Removed(ColumnDescriptor),
    /// Type or nullability changed.
    DefinitionChanged {
        /// Previous definition.
        from: ColumnDescriptor,
        /// New definition.
        to: ColumnDescriptor,
    },
    /// Default expression changed.
    DefaultChanged {
        /// Column name.
        column: String,
        /// Previous default.
        from: Option<String>,
        /// New default.
        to: Option<String>,
    },
    /// Identity flag changed.
    IdentityChanged {
        /// Column name.
        column: String,
        /// New identity flag.
        to: bool,
    },
    /// Computed definition changed (including stored <-> computed).
    ComputedChanged {
        /// Column name.
        column: String,
        /// Previous definition.
        from: Option<ComputedColumn>,
        /// New definition.
        to: Option<ComputedColumn>,
    },
}

impl ColumnChange {
    /// Get the column name for this change.
    pub fn column_name(&self) -> &str {
        match self {
            ColumnChange::Added(c) | ColumnChange::Removed(c) => &c.name,
            ColumnChange::DefinitionChanged { to, .. } => &to.name,
            ColumnChange::DefaultChanged { column, .. } => column,
            ColumnChange::IdentityChanged { column, .. } => column,
            ColumnChange::ComputedChanged { column, .. } => column,
        }
    }
}

/// Change to a named item (index, foreign key or check).
#[derive(Debug, Clone)]
pub enum ItemChange<T> {
    /// Item was added.
    Added(T),
    /// Item was removed.
    Removed(T),
    /// Item was modified.
    Modified {
        /// Previous item.
        from: T,
        /// New item.
        to: T,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::table::ForeignKeyDescriptor;

    fn orders() -> TableDescriptor {
        TableDescriptor::new("Orders")
            .with_column(ColumnDescriptor::new("Id", "INT").with_identity())
            .with_column(ColumnDescriptor::new("CustomerId", "INT"))
            .with_primary_key(&["Id"])
    }

    fn customers() -> TableDescriptor {
        TableDescriptor::new("Customers")
            .with_column(ColumnDescriptor::new("Id", "INT"))
            .with_primary_key(&["Id"])
    }

    #[test]
    fn test_diff_add_table() {
        let from = DescriptorSnapshot::new(1).with_table(orders());
        let to = DescriptorSnapshot::new(2).with_table(orders()).with_table(customers());

        let diff = SchemaDiff::compute(&from, &to);

        assert_eq!(diff.from_version, 1);
        assert_eq!(diff.to_version, 2);
        assert_eq!(diff.table_changes.len(), 1);
        match &diff.table_changes[0] {
            TableChange::Added(t) => assert_eq!(t.name, "Customers"),
            other => panic!("Expected Added table, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_remove_table() {
        let from = DescriptorSnapshot::new(1).with_table(orders()).with_table(customers());
        let to = DescriptorSnapshot::new(2).with_table(orders());

        let diff = SchemaDiff::compute(&from, &to);

        match &diff.table_changes[..] {
            [TableChange::Removed(t)] => assert_eq!(t.name, "Customers"),
            other => panic!("Expected one Removed table, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_columns() {
        let from = DescriptorSnapshot::new(1).with_table(orders());
        let to = DescriptorSnapshot::new(2).with_table(
            TableDescriptor::new("Orders")
                .with_column(ColumnDescriptor::new("Id", "INT").with_identity())
                .with_column(ColumnDescriptor::new("CustomerId", "BIGINT"))
                .with_column(ColumnDescriptor::nullable("Note", "NVARCHAR(100)"))
                .with_primary_key(&["id"]),
        );

        let diff = SchemaDiff::compute(&from, &to);

        let TableChange::Modified(m) = &diff.table_changes[0] else {
            panic!("Expected Modified table");
        };
        assert!(m.primary_key_changed.is_none());
        assert_eq!(m.column_changes.len(), 2);
        assert!(matches!(
            &m.column_changes[0],
            ColumnChange::DefinitionChanged { to, .. } if to.sql_type == "BIGINT"
        ));
        assert!(matches!(&m.column_changes[1], ColumnChange::Added(c) if c.name == "Note"));
    }

    #[test]
    fn test_diff_named_items() {
        let from = DescriptorSnapshot::new(1).with_table(
            orders().with_index(IndexDescriptor::new("ix_old", &["CustomerId"])),
        );
        let to = DescriptorSnapshot::new(2).with_table(
            orders()
                .with_index(IndexDescriptor::new("ix_new", &["CustomerId"]))
                .with_foreign_key(ForeignKeyDescriptor::new(
                    "fk_orders_customers",
                    &["CustomerId"],
                    "Customers",
                    &["Id"],
                )),
        );

        let diff = SchemaDiff::compute(&from, &to);
        let TableChange::Modified(m) = &diff.table_changes[0] else {
            panic!("Expected Modified table");
        };
        assert_eq!(m.index_changes.len(), 2);
        assert!(matches!(&m.index_changes[0], ItemChange::Added(i) if i.name == "ix_new"));
        assert!(matches!(&m.index_changes[1], ItemChange::Removed(i) if i.name == "ix_old"));
        assert_eq!(m.foreign_key_changes.len(), 1);
        assert_eq!(diff.change_count(), 3);
    }

    #[test]
    fn test_diff_no_changes() {
        let snapshot = DescriptorSnapshot::new(1).with_table(orders());
        let diff = SchemaDiff::compute(&snapshot, &snapshot);
        assert!(diff.is_empty());
        assert_eq!(diff.change_count(), 0);
    }

    #[test]
    fn test_diff_is_ordered_by_name() {
        let to = DescriptorSnapshot::new(1)
            .with_table(TableDescriptor::new("Zeta"))
            .with_table(TableDescriptor::new("Alpha"));
        let diff = SchemaDiff::compute(&DescriptorSnapshot::default(), &to);
        let names: Vec<String> = diff.table_changes.iter().map(|c| c.table_name().name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
