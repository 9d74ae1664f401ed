//! Schema model: tables, columns, relations, filters and sets.

mod column;
mod filter;
mod relation;
mod set;
mod table;

pub use column::{DataType, SyncColumn};
pub use filter::SyncFilter;
pub use relation::SyncRelation;
pub use set::{SyncSet, SyncSetup};
pub use table::{SyncTable, TableKey};
