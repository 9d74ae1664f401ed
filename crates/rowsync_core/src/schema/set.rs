//! Schema sets and setup.

use super::filter::SyncFilter;
use super::relation::SyncRelation;
use super::table::{SyncTable, TableKey};
use crate::compare::{items_eq, NamedItem, StringComparison};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// The tables to synchronize for a scope.
///
/// An empty setup means every table the store exposes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSetup {
    /// Tables in synchronization order.
    pub tables: Vec<TableKey>,
}

impl SyncSetup {
    /// Creates a setup from table names without a schema namespace.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| TableKey::new(t, ""))
                .collect(),
        }
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, key: TableKey) -> Self {
        self.tables.push(key);
        self
    }

    /// Returns true if no table is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compares two setups table by table under the given policy.
    #[must_use]
    pub fn equals_with(&self, other: &SyncSetup, cmp: StringComparison) -> bool {
        self.tables.len() == other.tables.len()
            && self
                .tables
                .iter()
                .zip(&other.tables)
                .all(|(a, b)| a.matches(b, cmp))
    }
}

/// An ordered, name-unique set of tables with their relations and filters.
///
/// Tables are owned by value. Everything else refers to a table by its
/// [`TableKey`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncSet {
    tables: Vec<SyncTable>,
    /// Relations between tables of this set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<SyncRelation>,
    /// Row filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<SyncFilter>,
    /// Name comparison policy for this set.
    #[serde(default)]
    pub comparison: StringComparison,
}

impl SyncSet {
    /// Creates an empty set with the default comparison policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set with the given comparison policy.
    #[must_use]
    pub fn with_comparison(comparison: StringComparison) -> Self {
        Self {
            comparison,
            ..Self::default()
        }
    }

    /// Tables in set order.
    #[must_use]
    pub fn tables(&self) -> &[SyncTable] {
        &self.tables
    }

    /// Returns true if the set has at least one table.
    #[must_use]
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Appends a table.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTable` if a table with the same key exists.
    pub fn add_table(&mut self, table: SyncTable) -> CoreResult<()> {
        if self.table_by_key(&table.key()).is_some() {
            return Err(CoreError::DuplicateTable {
                table: table.key().to_string(),
            });
        }
        self.tables.push(table);
        Ok(())
    }

    /// Builder-style [`add_table`](Self::add_table).
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTable` if a table with the same key exists.
    pub fn with_table(mut self, table: SyncTable) -> CoreResult<Self> {
        self.add_table(table)?;
        Ok(self)
    }

    /// Looks up a table by name and schema.
    #[must_use]
    pub fn table(&self, table_name: &str, schema_name: &str) -> Option<&SyncTable> {
        self.table_by_key(&TableKey::new(table_name, schema_name))
    }

    /// Looks up a table by key.
    #[must_use]
    pub fn table_by_key(&self, key: &TableKey) -> Option<&SyncTable> {
        self.tables
            .iter()
            .find(|t| t.key().matches(key, self.comparison))
    }

    /// Looks up a table by key, mutably.
    pub fn table_by_key_mut(&mut self, key: &TableKey) -> Option<&mut SyncTable> {
        let cmp = self.comparison;
        self.tables.iter_mut().find(|t| t.key().matches(key, cmp))
    }

    /// Resolves a key or fails with `TableNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the key does not match any table.
    pub fn resolve(&self, key: &TableKey) -> CoreResult<&SyncTable> {
        self.table_by_key(key)
            .ok_or_else(|| CoreError::table_not_found(key.to_string()))
    }

    /// Returns the subset of tables listed by `setup`, in setup order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the setup lists an unknown table.
    pub fn project(&self, setup: &SyncSetup) -> CoreResult<SyncSet> {
        if setup.is_empty() {
            return Ok(self.clone());
        }
        let mut set = SyncSet::with_comparison(self.comparison);
        for key in &setup.tables {
            set.add_table(self.resolve(key)?.clone())?;
        }
        set.relations = self
            .relations
            .iter()
            .filter(|r| {
                set.table_by_key(&r.parent_table).is_some()
                    && set.table_by_key(&r.child_table).is_some()
            })
            .cloned()
            .collect();
        set.filters = self
            .filters
            .iter()
            .filter(|f| set.table_by_key(&f.table).is_some())
            .cloned()
            .collect();
        Ok(set)
    }

    /// Returns a copy of the set with untransferable columns removed.
    #[must_use]
    pub fn sanitized(&self) -> SyncSet {
        SyncSet {
            tables: self.tables.iter().map(SyncTable::sanitized).collect(),
            relations: self.relations.clone(),
            filters: self.filters.clone(),
            comparison: self.comparison,
        }
    }

    /// Filters declared for a table.
    pub fn filters_for<'a>(&'a self, key: &'a TableKey) -> impl Iterator<Item = &'a SyncFilter> {
        self.filters
            .iter()
            .filter(move |f| f.table.matches(key, self.comparison))
    }

    /// Full structural comparison, matching tables by name.
    #[must_use]
    pub fn equals_by_properties(&self, other: &SyncSet) -> bool {
        let cmp = self.comparison;
        items_eq(cmp, &self.tables, &other.tables)
            && items_eq(cmp, &self.relations, &other.relations)
            && items_eq(cmp, &self.filters, &other.filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn};

    fn table(name: &str) -> SyncTable {
        let mut t = SyncTable::new(name);
        t.add_column(SyncColumn::new("Id", DataType::Integer)).unwrap();
        t.set_primary_keys(["Id"]).unwrap();
        t
    }

    #[test]
    fn unique_by_name() {
        let mut set = SyncSet::new();
        set.add_table(table("Product")).unwrap();
        assert!(matches!(
            set.add_table(table("PRODUCT")),
            Err(CoreError::DuplicateTable { .. })
        ));

        let mut ordinal = SyncSet::with_comparison(StringComparison::Ordinal);
        ordinal.add_table(table("Product")).unwrap();
        ordinal.add_table(table("PRODUCT")).unwrap();
        assert_eq!(ordinal.tables().len(), 2);
    }

    #[test]
    fn projection_follows_setup_order() {
        let set = SyncSet::new()
            .with_table(table("A"))
            .unwrap()
            .with_table(table("B"))
            .unwrap();
        let projected = set.project(&SyncSetup::new(["b", "a"])).unwrap();
        let names: Vec<_> = projected.tables().iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert!(set.project(&SyncSetup::new(["C"])).is_err());
        assert_eq!(set.project(&SyncSetup::default()).unwrap(), set);
    }

    #[test]
    fn properties_ignore_table_order() {
        let ab = SyncSet::new()
            .with_table(table("A"))
            .unwrap()
            .with_table(table("B"))
            .unwrap();
        let ba = SyncSet::new()
            .with_table(table("B"))
            .unwrap()
            .with_table(table("A"))
            .unwrap();
        assert!(ab.equals_by_properties(&ba));

        let mut changed = ab.clone();
        changed
            .table_by_key_mut(&TableKey::new("A", ""))
            .unwrap()
            .add_column(SyncColumn::new("Extra", DataType::Text))
            .unwrap();
        assert!(!ab.equals_by_properties(&changed));
    }

    #[test]
    fn setup_comparison() {
        let a = SyncSetup::new(["Customer", "Order"]);
        let b = SyncSetup::new(["customer", "order"]);
        assert!(a.equals_with(&b, StringComparison::CaseInsensitive));
        assert!(!a.equals_with(&b, StringComparison::Ordinal));
    }
}
