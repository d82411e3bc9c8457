//! Schema descriptor feed.
//!
//! Descriptors declare the tables the domain model expects. The feed is a
//! versioned [`DescriptorSnapshot`]; the snapshot of the last committed
//! deployment is kept in a [`SnapshotStore`] and diffed against the feed to
//! derive entity DDL.

pub mod diff;
pub mod snapshot;
pub mod store;
pub mod table;

pub use diff::{ColumnChange, ItemChange, SchemaDiff, TableChange, TableModification};
pub use snapshot::DescriptorSnapshot;
pub use store::SnapshotStore;
pub use table::{
    CheckDescriptor, ColumnDescriptor, ComputedColumn, ForeignKeyDescriptor, IndexDescriptor,
    ReferentialAction, TableDescriptor,
};
