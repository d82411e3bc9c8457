//! Versioned descriptor snapshots.

use super::table::TableDescriptor;
use crate::error::{DeployError, Result};
use crate::sql::ObjectName;
use std::collections::BTreeMap;
use std::path::Path;

/// A versioned set of table descriptors.
///
/// The version is supplied by the descriptor feed (typically the domain
/// model's build number) and must never go backwards between deployments.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct DescriptorSnapshot {
    /// Monotonic descriptor version.
    pub version: u64,
    /// Table descriptors.
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

impl DescriptorSnapshot {
    /// Create an empty snapshot.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            tables: Vec::new(),
        }
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.push(table);
        self
    }

    /// Parse a snapshot from JSON, rejecting duplicate table names.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: DescriptorSnapshot = serde_json::from_str(json)?;
        let mut seen = BTreeMap::new();
        for table in &snapshot.tables {
            if seen.insert(table.object_name(), ()).is_some() {
                return Err(DeployError::Deserialization(format!(
                    "duplicate table descriptor '{}'",
                    table.object_name()
                )));
            }
        }
        Ok(snapshot)
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Tables keyed by normalised name.
    pub fn tables_by_name(&self) -> BTreeMap<ObjectName, &TableDescriptor> {
        self.tables.iter().map(|t| (t.object_name(), t)).collect()
    }

    /// Get a table by name.
    pub fn table(&self, name: &ObjectName) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| &t.object_name() == name)
    }

    /// Serialize the snapshot for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| DeployError::Serialization(e.to_string()))
    }

    /// Deserialize a stored snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| DeployError::Deserialization(e.to_string()))
    }
}
