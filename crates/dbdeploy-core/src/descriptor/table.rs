//! Table descriptors.
//!
//! A descriptor is the declared shape of one table as seen by the domain
//! model: columns, primary key, indexes and constraints. Descriptors are read
//! from JSON (serde) and persisted as the deployed baseline (rkyv).

use crate::sql::ObjectName;

/// Declared shape of a table.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct TableDescriptor {
    /// Schema name; empty means `dbo`.
    #[serde(default)]
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key columns.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Check constraints.
    #[serde(default)]
    pub checks: Vec<CheckDescriptor>,
}

/// A column.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// SQL type as written, e.g. `NVARCHAR(100)`.
    pub sql_type: String,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// `IDENTITY(1,1)` column.
    #[serde(default)]
    pub identity: bool,
    /// Default expression, e.g. `0` or `SYSUTCDATETIME()`.
    #[serde(default)]
    pub default: Option<String>,
    /// Computed column definition; `sql_type` is ignored when set.
    #[serde(default)]
    pub computed: Option<ComputedColumn>,
}

fn default_nullable() -> bool {
    true
}

/// A computed column.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ComputedColumn {
    /// Expression computing the value.
    pub expression: String,
    /// Stored on write instead of computed on read.
    #[serde(default)]
    pub persisted: bool,
}

/// A secondary index.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct IndexDescriptor {
    /// Index name, unique within the table.
    pub name: String,
    /// Key columns.
    pub columns: Vec<String>,
    /// Unique index.
    #[serde(default)]
    pub unique: bool,
    /// Non-key columns carried in the leaf level.
    #[serde(default)]
    pub include: Vec<String>,
    /// Filter predicate for a filtered index.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Action applied to referencing rows when the referenced row is deleted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// T-SQL spelling.
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ForeignKeyDescriptor {
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table, optionally schema-qualified.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// Delete behaviour.
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

/// A check constraint.
#[derive(
    Debug,
    Clone,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct CheckDescriptor {
    /// Constraint name.
    pub name: String,
    /// Boolean expression.
    pub expression: String,
}

impl TableDescriptor {
    /// Create a table in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: String::new(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Add a check constraint.
    pub fn with_check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.checks.push(CheckDescriptor {
            name: name.into(),
            expression: expression.into(),
        });
        self
    }

    /// Normalised table name.
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.schema, &self.name)
    }

    /// Schema as it should be written in DDL.
    pub fn schema_or_default(&self) -> &str {
        if self.schema.is_empty() {
            crate::sql::objects::DEFAULT_SCHEMA
        } else {
            &self.schema
        }
    }

    /// Get a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Computed columns.
    pub fn computed_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.computed.is_some())
    }

    /// Stored (non-computed) columns.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.computed.is_none())
    }
}

impl ColumnDescriptor {
    /// Create a NOT NULL column.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: false,
            identity: false,
            default: None,
            computed: None,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, sql_type)
        }
    }

    /// Create a computed column.
    pub fn computed(name: impl Into<String>, expression: impl Into<String>, persisted: bool) -> Self {
        Self {
            nullable: true,
            computed: Some(ComputedColumn {
                expression: expression.into(),
                persisted,
            }),
            ..Self::new(name, "")
        }
    }

    /// Mark as `IDENTITY(1,1)`.
    pub fn with_identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Set a default expression.
    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }
}

impl IndexDescriptor {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            include: Vec::new(),
            filter: None,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Add included columns.
    pub fn with_include(mut self, columns: &[&str]) -> Self {
        self.include = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a filter predicate.
    pub fn with_filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }
}

impl ForeignKeyDescriptor {
    /// Create a foreign key with `NO ACTION` on delete.
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        references_table: impl Into<String>,
        references_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
        }
    }

    /// Set the delete behaviour.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = TableDescriptor::new("Orders")
            .with_schema("Sales")
            .with_column(ColumnDescriptor::new("Id", "INT").with_identity())
            .with_column(ColumnDescriptor::nullable("Note", "NVARCHAR(200)"))
            .with_column(ColumnDescriptor::computed("Total", "Qty * Price", true))
            .with_primary_key(&["Id"]);

        assert_eq!(table.object_name(), ObjectName::new("sales", "orders"));
        assert_eq!(table.stored_columns().count(), 2);
        assert_eq!(table.computed_columns().count(), 1);
        assert!(table.column("note").is_some_and(|c| c.nullable));
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "name": "Customers",
            "columns": [
                {"name": "Id", "sql_type": "INT", "nullable": false},
                {"name": "Email", "sql_type": "NVARCHAR(256)"}
            ],
            "foreign_keys": [
                {"name": "fk_x", "columns": ["Id"], "references_table": "dbo.Parent",
                 "references_columns": ["Id"], "on_delete": "set_null"}
            ]
        }"#;
        let table: TableDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(table.schema_or_default(), "dbo");
        assert!(!table.columns[0].nullable);
        assert!(table.columns[1].nullable);
        assert!(table.indexes.is_empty());
        assert_eq!(table.foreign_keys[0].on_delete, ReferentialAction::SetNull);
    }
}
