//! # rowsync Core
//!
//! Schema model, change tracking and orchestration for rowsync.
//!
//! This crate provides:
//! - The schema model ([`SyncSet`], [`SyncTable`], [`SyncColumn`]) with
//!   name-based and structural equality
//! - Row buffers ([`SyncRow`]) and their compact wire container
//! - The batch manager: bounded, optionally disk-backed changeset parts
//! - The [`CoreProvider`] contract and an in-memory implementation
//! - Change capture, conflict-aware apply, snapshots and migration
//!
//! ## Usage
//!
//! ```
//! use rowsync_core::{DataType, MemoryProvider, SyncColumn, SyncSet, SyncTable};
//! use rowsync_codec::Value;
//!
//! let mut table = SyncTable::new("Product");
//! table.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
//! table.add_column(SyncColumn::new("Name", DataType::Text)).unwrap();
//! table.set_primary_keys(["Id"]).unwrap();
//! let schema = SyncSet::new().with_table(table).unwrap();
//!
//! let store = MemoryProvider::with_schema("local", &schema).unwrap();
//! store
//!     .upsert("Product", vec![Value::Integer(1), Value::Text("Bike".into())])
//!     .unwrap();
//! assert_eq!(store.row_count("Product").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
mod changes;
mod compare;
mod conflict;
mod container;
mod context;
pub mod converter;
mod error;
mod migration;
pub mod orchestrator;
pub mod provider;
mod result;
mod row;
pub mod schema;
mod scope;

pub use batch::{BatchBuilder, BatchInfo, BatchLimit, BatchPartInfo, BatchPartTableInfo};
pub use changes::{
    DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied, TableChangesSelected,
};
pub use compare::{NamedItem, StringComparison};
pub use conflict::{ConflictPolicy, ConflictResolution, ConflictType, SyncConflict};
pub use container::{ContainerSet, ContainerTable};
pub use context::{SyncContext, SyncDirection, SyncProgress, SyncStage, SyncType};
pub use converter::{ConverterRegistry, HexBytesConverter, RowConverter};
pub use error::{CoreError, CoreResult};
pub use migration::{AddedColumn, MigrationPlan};
pub use orchestrator::{
    ApplyOptions, BaseOrchestrator, BatchOptions, CapturedChanges, ServerChanges, ServerOptions,
    ServerOrchestrator,
};
pub use provider::{CoreProvider, MemoryProvider, TrackedRow};
pub use result::SyncResult;
pub use row::{RowState, SyncRow};
pub use schema::{
    DataType, SyncColumn, SyncFilter, SyncRelation, SyncSet, SyncSetup, SyncTable, TableKey,
};
pub use scope::ScopeInfo;
