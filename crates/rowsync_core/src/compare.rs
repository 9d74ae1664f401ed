//! Name comparison policy and two-level equality for schema items.

use serde::{Deserialize, Serialize};

/// How identifying names are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StringComparison {
    /// Unicode case-insensitive comparison (default).
    #[default]
    CaseInsensitive,
    /// Exact comparison.
    Ordinal,
}

impl StringComparison {
    /// Compares two names under this policy.
    #[must_use]
    pub fn equals(self, a: &str, b: &str) -> bool {
        match self {
            StringComparison::Ordinal => a == b,
            StringComparison::CaseInsensitive => {
                a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
            }
        }
    }
}

/// Equality for named schema entities.
///
/// `equals_by_name` compares only the identifying fields and is used to
/// match an item across schema versions. `equals_by_properties` compares
/// the full structure and is used to detect that a migration is needed.
/// Properties equality always implies name equality.
pub trait NamedItem {
    /// Compares identifying fields under the given policy.
    fn equals_by_name_with(&self, other: &Self, cmp: StringComparison) -> bool;

    /// Compares the full structure under the given policy.
    fn equals_by_properties_with(&self, other: &Self, cmp: StringComparison) -> bool;

    /// Compares identifying fields under the default policy.
    fn equals_by_name(&self, other: &Self) -> bool {
        self.equals_by_name_with(other, StringComparison::default())
    }

    /// Compares the full structure under the default policy.
    fn equals_by_properties(&self, other: &Self) -> bool {
        self.equals_by_properties_with(other, StringComparison::default())
    }
}

/// Compares two name lists pairwise, in order.
pub(crate) fn names_eq(cmp: StringComparison, a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| cmp.equals(x, y))
}

/// Compares two item lists as sets matched by name, then by properties.
pub(crate) fn items_eq<T: NamedItem>(cmp: StringComparison, a: &[T], b: &[T]) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| {
            b.iter()
                .find(|y| x.equals_by_name_with(y, cmp))
                .is_some_and(|y| x.equals_by_properties_with(y, cmp))
        })
}
