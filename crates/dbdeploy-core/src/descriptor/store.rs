//! Deployed descriptor baseline persistence.

use super::snapshot::DescriptorSnapshot;
use crate::error::Result;

/// Stores the descriptor snapshot of the last committed deployment, plus
/// every committed snapshot keyed by version.
pub struct SnapshotStore {
    tree: sled::Tree,
}

impl SnapshotStore {
    /// Tree name for descriptor snapshots.
    pub const TREE_NAME: &'static str = "descriptor:snapshots";

    const DEPLOYED_KEY: &'static [u8] = b"deployed";

    /// Open or create the snapshot store.
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// The deployed baseline, if any deployment has committed.
    pub fn deployed(&self) -> Result<Option<DescriptorSnapshot>> {
        match self.tree.get(Self::DEPLOYED_KEY)? {
            Some(bytes) => Ok(Some(DescriptorSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record a committed snapshot as the new baseline.
    pub fn save_deployed(&self, snapshot: &DescriptorSnapshot) -> Result<()> {
        let value = snapshot.to_bytes()?;
        self.tree.insert(Self::version_key(snapshot.version), value.clone())?;
        self.tree.insert(Self::DEPLOYED_KEY, value)?;
        self.tree.flush()?;
        tracing::debug!(version = snapshot.version, "descriptor baseline saved");
        Ok(())
    }

    /// Load a committed snapshot by version.
    pub fn load(&self, version: u64) -> Result<Option<DescriptorSnapshot>> {
        match self.tree.get(Self::version_key(version))? {
            Some(bytes) => Ok(Some(DescriptorSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn version_key(version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(b"version:");
        key.extend_from_slice(&version.to_be_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::table::{ColumnDescriptor, TableDescriptor};

    #[test]
    fn test_snapshot_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = SnapshotStore::open(&db).unwrap();

        assert!(store.deployed().unwrap().is_none());

        let v1 = DescriptorSnapshot::new(1)
            .with_table(TableDescriptor::new("Foo").with_column(ColumnDescriptor::new("Id", "INT")));
        let v2 = v1.clone().with_table(TableDescriptor::new("Bar"));
        let v2 = DescriptorSnapshot { version: 2, ..v2 };

        store.save_deployed(&v1).unwrap();
        store.save_deployed(&v2).unwrap();

        assert_eq!(store.deployed().unwrap(), Some(v2));
        assert_eq!(store.load(1).unwrap(), Some(v1));
        assert!(store.load(9).unwrap().is_none());
    }
}
