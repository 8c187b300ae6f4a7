//! Migration units and the globally ordered unit set

use std::collections::HashMap;

use crate::definitions::{MigrationDirection, Version};
use crate::error::{MigrateResult, MigrationError};
use crate::schema_builder::{SchemaBuilder, SchemaObject, Statement};

/// Represents a database migration
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    /// Sortable identifier
    pub version: Version,
    /// Human-readable name
    pub name: String,
    /// Statements applying the migration, in authored order
    pub up: Vec<Statement>,
    /// Statements reverting the migration, in authored order
    pub down: Vec<Statement>,
}

impl MigrationUnit {
    pub fn new(version: Version, name: impl Into<String>, up: Vec<Statement>, down: Vec<Statement>) -> Self {
        Self {
            version,
            name: name.into(),
            up,
            down,
        }
    }

    /// Build a unit from two schema builder callbacks
    pub fn build<U, D>(version: &str, name: &str, up: U, down: D) -> MigrateResult<Self>
    where
        U: FnOnce(&mut SchemaBuilder),
        D: FnOnce(&mut SchemaBuilder),
    {
        let mut up_builder = SchemaBuilder::new();
        up(&mut up_builder);
        let mut down_builder = SchemaBuilder::new();
        down(&mut down_builder);

        Ok(Self::new(
            Version::parse(version)?,
            name,
            up_builder.into_statements(),
            down_builder.into_statements(),
        ))
    }

    pub fn statements(&self, direction: MigrationDirection) -> &[Statement] {
        match direction {
            MigrationDirection::Up => &self.up,
            MigrationDirection::Down => &self.down,
        }
    }

    /// True when reverting discards data (drops a table or a column)
    pub fn destructive_down(&self) -> bool {
        self.down.iter().flat_map(|s| s.drops.iter()).any(|object| {
            matches!(object, SchemaObject::Table(_) | SchemaObject::Column { .. })
        })
    }
}

/// The globally ordered list of known units
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
    positions: HashMap<String, usize>,
}

impl MigrationSet {
    /// Sort units by version, rejecting duplicates
    pub fn new(mut units: Vec<MigrationUnit>) -> MigrateResult<Self> {
        units.sort_by(|a, b| a.version.cmp(&b.version));

        let mut positions = HashMap::with_capacity(units.len());
        for (position, unit) in units.iter().enumerate() {
            if positions
                .insert(unit.version.as_str().to_string(), position)
                .is_some()
            {
                return Err(MigrationError::DuplicateVersion(unit.version.to_string()));
            }
        }

        Ok(Self { units, positions })
    }

    /// Combine two sets into one ordered set
    pub fn merge(self, other: MigrationSet) -> MigrateResult<Self> {
        let mut units = self.units;
        units.extend(other.units);
        Self::new(units)
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationUnit> {
        self.units.iter()
    }

    pub fn get(&self, version: &str) -> Option<&MigrationUnit> {
        self.position(version).map(|position| &self.units[position])
    }

    /// Index of a version within the ordered set
    pub fn position(&self, version: &str) -> Option<usize> {
        self.positions.get(version).copied()
    }

    /// Resolve a version that must be known
    pub fn require(&self, version: &str) -> MigrateResult<&MigrationUnit> {
        self.get(version)
            .ok_or_else(|| MigrationError::UnknownVersion(version.to_string()))
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a MigrationUnit;
    type IntoIter = std::slice::Iter<'a, MigrationUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(version: &str) -> MigrationUnit {
        MigrationUnit::build(
            version,
            version,
            |schema| {
                schema.raw("SELECT 1;");
            },
            |_| {},
        )
        .unwrap()
    }

    #[test]
    fn test_set_sorts_by_version() {
        let set = MigrationSet::new(vec![unit("20-b"), unit("3-a"), unit("100-c")]).unwrap();
        let versions: Vec<&str> = set.iter().map(|u| u.version.as_str()).collect();
        assert_eq!(versions, vec!["3-a", "20-b", "100-c"]);
        assert_eq!(set.position("20-b"), Some(1));
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let result = MigrationSet::new(vec![unit("1-a"), unit("1-a")]);
        assert!(matches!(result, Err(MigrationError::DuplicateVersion(v)) if v == "1-a"));
    }

    #[test]
    fn test_merge_keeps_global_order() {
        let left = MigrationSet::new(vec![unit("1-a"), unit("5-e")]).unwrap();
        let right = MigrationSet::new(vec![unit("3-c")]).unwrap();
        let merged = left.merge(right).unwrap();
        assert_eq!(merged.position("3-c"), Some(1));
        assert!(matches!(merged.require("9-z"), Err(MigrationError::UnknownVersion(_))));
    }

    #[test]
    fn test_destructive_down_detection() {
        let safe = MigrationUnit::build(
            "1-index",
            "index",
            |schema| {
                schema.create_index("t", &["a"], Some("t_a_idx"));
            },
            |schema| {
                schema.drop_index("t", "t_a_idx");
            },
        )
        .unwrap();
        assert!(!safe.destructive_down());

        let lossy = MigrationUnit::build(
            "2-column",
            "column",
            |schema| {
                schema.add_column("t", "b", "boolean", |c| {
                    c.not_null().default("false");
                });
            },
            |schema| {
                schema.drop_column("t", "b");
            },
        )
        .unwrap();
        assert!(lossy.destructive_down());
    }
}
