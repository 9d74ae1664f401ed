//! Scope metadata kept by each side.

use crate::compare::StringComparison;
use crate::schema::{SyncSet, SyncSetup};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-side metadata of a named synchronization scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Identity of this side for the scope; stamped as the origin of rows
    /// it sends.
    pub id: Uuid,
    /// Scope name.
    pub name: String,
    /// Schema, `None` until bootstrapped.
    pub schema: Option<SyncSet>,
    /// Tables selected for the scope.
    pub setup: SyncSetup,
    /// Schema version, bumped on every migration.
    pub version: u32,
    /// Server timestamp of the last successful download.
    pub last_server_sync_timestamp: Option<i64>,
    /// Local timestamp after the last successful apply.
    pub last_sync_timestamp: Option<i64>,
    /// True until the scope has been saved once.
    #[serde(skip)]
    pub is_new: bool,
}

impl ScopeInfo {
    /// Creates a new, unsaved scope.
    pub fn new(name: impl Into<String>, setup: SyncSetup) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schema: None,
            setup,
            version: 0,
            last_server_sync_timestamp: None,
            last_sync_timestamp: None,
            is_new: true,
        }
    }

    /// Returns true if the scope has no usable schema yet.
    #[must_use]
    pub fn needs_schema(&self) -> bool {
        self.is_new || !self.schema.as_ref().is_some_and(SyncSet::has_tables)
    }

    /// Compares the setup and schema with another side's scope.
    ///
    /// Returns `(setup_matches, schema_matches)`.
    #[must_use]
    pub fn compare_with(&self, other: &ScopeInfo) -> (bool, bool) {
        let cmp = self
            .schema
            .as_ref()
            .map_or(StringComparison::default(), |s| s.comparison);
        let setup = self.setup.equals_with(&other.setup, cmp);
        let schema = match (&self.schema, &other.schema) {
            (Some(a), Some(b)) => a.equals_by_properties(b),
            (None, None) => true,
            _ => false,
        };
        (setup, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn, SyncTable};

    fn schema(extra: bool) -> SyncSet {
        let mut t = SyncTable::new("Customer");
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        if extra {
            t.add_column(SyncColumn::new("Email", DataType::Text)).unwrap();
        }
        t.set_primary_keys(["Id"]).unwrap();
        SyncSet::new().with_table(t).unwrap()
    }

    #[test]
    fn new_scope_needs_schema() {
        let mut scope = ScopeInfo::new("default", SyncSetup::default());
        assert!(scope.needs_schema());
        scope.is_new = false;
        scope.schema = Some(SyncSet::new());
        assert!(scope.needs_schema());
        scope.schema = Some(schema(false));
        assert!(!scope.needs_schema());
    }

    #[test]
    fn structural_comparison() {
        let mut a = ScopeInfo::new("s", SyncSetup::new(["Customer"]));
        let mut b = ScopeInfo::new("s", SyncSetup::new(["customer"]));
        a.schema = Some(schema(false));
        b.schema = Some(schema(false));
        assert_eq!(a.compare_with(&b), (true, true));
        b.schema = Some(schema(true));
        assert_eq!(a.compare_with(&b), (true, false));
        b.setup = SyncSetup::new(["Customer", "Order"]);
        assert_eq!(a.compare_with(&b), (false, false));
    }
}
