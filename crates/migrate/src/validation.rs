//! Static validation of a migration set
//!
//! Treats the ordered units as a build sequence: every object a statement
//! requires must exist by the time the statement runs, and every object a
//! unit's `up` creates must be removed again by its `down`.

use std::collections::HashSet;
use std::fmt;

use crate::migration::{MigrationSet, MigrationUnit};
use crate::schema_builder::SchemaObject;

/// A single problem found in a migration set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Statement requires an object nothing has created yet
    MissingDependency {
        version: String,
        statement: usize,
        object: SchemaObject,
    },
    /// `up` creates an object `down` never removes
    Residue { version: String, object: SchemaObject },
    /// Unit has statements without dependency metadata
    Unchecked { version: String, statements: usize },
}

impl ValidationIssue {
    /// Unchecked units are reported but do not fail validation
    pub fn is_error(&self) -> bool {
        !matches!(self, ValidationIssue::Unchecked { .. })
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingDependency {
                version,
                statement,
                object,
            } => write!(
                f,
                "{}: statement #{} requires {} which no earlier statement creates",
                version, statement, object
            ),
            ValidationIssue::Residue { version, object } => {
                write!(f, "{}: {} created by up is not removed by down", version, object)
            }
            ValidationIssue::Unchecked { version, statements } => write!(
                f,
                "{}: {} raw statement(s) could not be checked",
                version, statements
            ),
        }
    }
}

/// Outcome of validating a migration set
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.is_error())
    }
}

/// Validates units against a set of pre-existing schema objects
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    external_tables: HashSet<String>,
    external_functions: HashSet<SchemaObject>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator knowing the base schema the built-in units build on
    pub fn for_builtin() -> Self {
        let mut validator = Self::new();
        for table in crate::units::EXTERNAL_TABLES {
            validator = validator.with_external_table(table);
        }
        for function in crate::units::EXTERNAL_FUNCTIONS {
            validator = validator.with_external_function(function);
        }
        validator
    }

    /// Table (and everything on it) owned outside the migration set
    pub fn with_external_table(mut self, table: &str) -> Self {
        self.external_tables.insert(table.to_string());
        self
    }

    pub fn with_external_function(mut self, function: &str) -> Self {
        self.external_functions.insert(SchemaObject::function(function));
        self
    }

    fn is_external(&self, object: &SchemaObject) -> bool {
        match object {
            SchemaObject::Function(_) => self.external_functions.contains(object),
            other => other
                .owner_table()
                .map_or(false, |table| self.external_tables.contains(table)),
        }
    }

    pub fn validate(&self, set: &MigrationSet) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut existing: HashSet<SchemaObject> = HashSet::new();

        for unit in set {
            self.check_dependencies(unit, &mut existing, &mut report);
            check_residue(unit, &mut report);
        }

        report
    }

    fn check_dependencies(
        &self,
        unit: &MigrationUnit,
        existing: &mut HashSet<SchemaObject>,
        report: &mut ValidationReport,
    ) {
        let opaque = unit.up.iter().filter(|s| s.is_opaque()).count();
        if opaque > 0 {
            report.issues.push(ValidationIssue::Unchecked {
                version: unit.version.to_string(),
                statements: opaque,
            });
        }

        for (index, statement) in unit.up.iter().enumerate() {
            for object in &statement.requires {
                if !existing.contains(object) && !self.is_external(object) {
                    report.issues.push(ValidationIssue::MissingDependency {
                        version: unit.version.to_string(),
                        statement: index,
                        object: object.clone(),
                    });
                }
            }
            existing.extend(statement.creates.iter().cloned());
        }
    }
}

fn check_residue(unit: &MigrationUnit, report: &mut ValidationReport) {
    let dropped: HashSet<&SchemaObject> = unit.down.iter().flat_map(|s| s.drops.iter()).collect();
    let dropped_tables: HashSet<&str> = dropped
        .iter()
        .filter_map(|object| match object {
            SchemaObject::Table(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for object in unit.up.iter().flat_map(|s| s.creates.iter()) {
        let removed = dropped.contains(object)
            || object
                .owner_table()
                .map_or(false, |table| dropped_tables.contains(table));
        if !removed {
            report.issues.push(ValidationIssue::Residue {
                version: unit.version.to_string(),
                object: object.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units;

    #[test]
    fn test_builtin_units_validate() {
        let set = units::builtin().unwrap();
        let report = SchemaValidator::for_builtin().validate(&set);
        let errors: Vec<String> = report.errors().map(|e| e.to_string()).collect();
        assert!(report.is_valid(), "unexpected issues: {:#?}", errors);
    }

    #[test]
    fn test_missing_base_table_is_reported() {
        let set = units::builtin().unwrap();
        let validator = SchemaValidator::new()
            .with_external_table("user")
            .with_external_table("asset")
            .with_external_table("album")
            .with_external_function("uuid_generate_v4")
            .with_external_function("immich_uuid_v7")
            .with_external_function("updated_at");

        let report = validator.validate(&set);
        assert!(!report.is_valid());
        assert!(report.errors().any(|issue| matches!(
            issue,
            ValidationIssue::MissingDependency { object: SchemaObject::Table(t), .. } if t == "shared_link"
        )));
    }

    #[test]
    fn test_reference_to_later_unit_is_reported() {
        let early = MigrationUnit::build(
            "1-index",
            "index",
            |schema| {
                schema.create_index("gadget", &["name"], Some("gadget_name_idx"));
            },
            |schema| {
                schema.drop_index("gadget", "gadget_name_idx");
            },
        )
        .unwrap();
        let late = MigrationUnit::build(
            "2-table",
            "table",
            |schema| {
                schema.create_table("gadget", |table| {
                    table.column("name", "text");
                });
            },
            |schema| {
                schema.drop_table("gadget");
            },
        )
        .unwrap();

        let set = MigrationSet::new(vec![late, early]).unwrap();
        let report = SchemaValidator::new().validate(&set);
        assert!(report.errors().any(|issue| matches!(
            issue,
            ValidationIssue::MissingDependency { version, statement: 0, .. } if version == "1-index"
        )));
    }

    #[test]
    fn test_residue_is_reported() {
        let leaky = MigrationUnit::build(
            "1-leaky",
            "leaky",
            |schema| {
                schema.create_function("public.noop", |function| {
                    function.body("BEGIN RETURN NULL; END");
                });
            },
            |_| {},
        )
        .unwrap();

        let set = MigrationSet::new(vec![leaky]).unwrap();
        let report = SchemaValidator::new().validate(&set);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::Residue {
                version: "1-leaky".to_string(),
                object: SchemaObject::function("noop"),
            }]
        );
    }

    #[test]
    fn test_raw_statements_are_unchecked_not_errors() {
        let raw = MigrationUnit::build(
            "1-raw",
            "raw",
            |schema| {
                schema.raw("CREATE TABLE things (id int);");
            },
            |schema| {
                schema.raw("DROP TABLE things;");
            },
        )
        .unwrap();

        let set = MigrationSet::new(vec![raw]).unwrap();
        let report = SchemaValidator::new().validate(&set);
        assert!(report.is_valid());
        assert_eq!(report.issues.len(), 1);
    }
}
