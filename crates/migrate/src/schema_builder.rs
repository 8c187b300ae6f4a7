//! Schema Builder - DSL for PostgreSQL schema changes
//!
//! Provides a fluent interface for building the DDL statements that make up a
//! migration unit. Every statement records which schema objects it creates,
//! requires and drops so that a set of units can be checked statically.

use std::fmt;

/// Quote a PostgreSQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a PostgreSQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn normalize_function(name: &str) -> String {
    name.trim_end_matches("()")
        .trim_start_matches("public.")
        .to_string()
}

/// A named object in the database schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaObject {
    Table(String),
    Column { table: String, column: String },
    Index { table: String, name: String },
    Constraint { table: String, name: String },
    Trigger { table: String, name: String },
    Function(String),
}

impl SchemaObject {
    pub fn table(name: &str) -> Self {
        SchemaObject::Table(name.to_string())
    }

    pub fn column(table: &str, column: &str) -> Self {
        SchemaObject::Column {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// Function names are compared without the `public.` schema and call parens
    pub fn function(name: &str) -> Self {
        SchemaObject::Function(normalize_function(name))
    }

    /// Table that owns this object; dropping it drops the object too
    pub fn owner_table(&self) -> Option<&str> {
        match self {
            SchemaObject::Table(name) => Some(name),
            SchemaObject::Column { table, .. }
            | SchemaObject::Index { table, .. }
            | SchemaObject::Constraint { table, .. }
            | SchemaObject::Trigger { table, .. } => Some(table),
            SchemaObject::Function(_) => None,
        }
    }
}

impl fmt::Display for SchemaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaObject::Table(name) => write!(f, "table {}", quote_ident(name)),
            SchemaObject::Column { table, column } => {
                write!(f, "column {}.{}", quote_ident(table), quote_ident(column))
            }
            SchemaObject::Index { name, .. } => write!(f, "index {}", quote_ident(name)),
            SchemaObject::Constraint { table, name } => {
                write!(f, "constraint {} on {}", quote_ident(name), quote_ident(table))
            }
            SchemaObject::Trigger { table, name } => {
                write!(f, "trigger {} on {}", quote_ident(name), quote_ident(table))
            }
            SchemaObject::Function(name) => write!(f, "function {}()", name),
        }
    }
}

/// One executable statement plus its static dependency metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub creates: Vec<SchemaObject>,
    pub requires: Vec<SchemaObject>,
    pub drops: Vec<SchemaObject>,
}

impl Statement {
    /// Statement without dependency metadata
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: Vec::new(),
        }
    }

    /// True when no dependency metadata was recorded
    pub fn is_opaque(&self) -> bool {
        self.creates.is_empty() && self.requires.is_empty() && self.drops.is_empty()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Referential action for foreign keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Foreign key definition shared by CREATE TABLE and ALTER TABLE
#[derive(Debug, Clone)]
pub struct ForeignKey {
    column: String,
    references_table: String,
    references_column: String,
    on_update: Option<ReferentialAction>,
    on_delete: Option<ReferentialAction>,
}

impl ForeignKey {
    pub fn new(column: &str, references_table: &str, references_column: &str) -> Self {
        Self {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
            on_update: None,
            on_delete: None,
        }
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(&self.column),
            quote_ident(&self.references_table),
            quote_ident(&self.references_column)
        );
        if let Some(action) = self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.as_sql());
        }
        if let Some(action) = self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.as_sql());
        }
        sql
    }

    fn requires(&self, table: &str) -> Vec<SchemaObject> {
        let mut requires = vec![
            SchemaObject::table(&self.references_table),
            SchemaObject::column(&self.references_table, &self.references_column),
        ];
        if self.references_table != table {
            requires.push(SchemaObject::column(table, &self.column));
        }
        requires
    }
}

/// Column definition inside CREATE TABLE or ADD COLUMN
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    name: String,
    column_type: String,
    not_null: bool,
    default: Option<String>,
    default_function: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, column_type: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type: column_type.to_string(),
            not_null: false,
            default: None,
            default_function: None,
        }
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.not_null = true;
        self
    }

    /// Default given as a SQL expression
    pub fn default(&mut self, expression: &str) -> &mut Self {
        self.default = Some(expression.to_string());
        self
    }

    /// Default produced by calling a database function
    pub fn default_call(&mut self, function: &str) -> &mut Self {
        self.default = Some(format!("{}()", function));
        self.default_function = Some(function.to_string());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type);
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    fn requires(&self) -> Option<SchemaObject> {
        self.default_function.as_deref().map(SchemaObject::function)
    }
}

/// Basic schema operations for migrations
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    statements: Vec<Statement>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);

        self.statements.push(table_builder.into_statement());
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!("DROP TABLE IF EXISTS {};", quote_ident(table_name)),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::table(table_name)],
        });
        self
    }

    /// Add a column to existing table
    pub fn add_column<F>(
        &mut self,
        table_name: &str,
        column_name: &str,
        column_type: &str,
        callback: F,
    ) -> &mut Self
    where
        F: FnOnce(&mut ColumnDefinition),
    {
        let mut column = ColumnDefinition::new(column_name, column_type);
        callback(&mut column);

        let mut requires = vec![SchemaObject::table(table_name)];
        requires.extend(column.requires());
        self.statements.push(Statement {
            sql: format!(
                "ALTER TABLE {} ADD COLUMN {};",
                quote_ident(table_name),
                column.to_sql()
            ),
            creates: vec![SchemaObject::column(table_name, column_name)],
            requires,
            drops: Vec::new(),
        });
        self
    }

    /// Drop a column from existing table
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                quote_ident(table_name),
                quote_ident(column_name)
            ),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::column(table_name, column_name)],
        });
        self
    }

    /// Add a named foreign key to an existing table
    pub fn add_foreign_key(
        &mut self,
        table_name: &str,
        constraint_name: &str,
        foreign_key: ForeignKey,
    ) -> &mut Self {
        let mut requires = vec![SchemaObject::table(table_name)];
        requires.extend(foreign_key.requires(table_name));
        self.statements.push(Statement {
            sql: format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {};",
                quote_ident(table_name),
                quote_ident(constraint_name),
                foreign_key.to_sql()
            ),
            creates: vec![SchemaObject::Constraint {
                table: table_name.to_string(),
                name: constraint_name.to_string(),
            }],
            requires,
            drops: Vec::new(),
        });
        self
    }

    /// Drop a named constraint
    pub fn drop_constraint(&mut self, table_name: &str, constraint_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                quote_ident(table_name),
                quote_ident(constraint_name)
            ),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::Constraint {
                table: table_name.to_string(),
                name: constraint_name.to_string(),
            }],
        });
        self
    }

    /// Create an index
    pub fn create_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        let default_name = format!("idx_{}_{}", table_name, column_names.join("_"));
        let index_name = index_name.unwrap_or(&default_name);
        let columns: Vec<String> = column_names.iter().map(|c| quote_ident(c)).collect();

        let mut requires = vec![SchemaObject::table(table_name)];
        requires.extend(
            column_names
                .iter()
                .map(|column| SchemaObject::column(table_name, column)),
        );
        self.statements.push(Statement {
            sql: format!(
                "CREATE INDEX {} ON {} ({});",
                quote_ident(index_name),
                quote_ident(table_name),
                columns.join(", ")
            ),
            creates: vec![SchemaObject::Index {
                table: table_name.to_string(),
                name: index_name.to_string(),
            }],
            requires,
            drops: Vec::new(),
        });
        self
    }

    /// Drop an index
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!("DROP INDEX IF EXISTS {};", quote_ident(index_name)),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::Index {
                table: table_name.to_string(),
                name: index_name.to_string(),
            }],
        });
        self
    }

    /// Attach a comment to a column
    pub fn comment_on_column(&mut self, table_name: &str, column_name: &str, comment: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!(
                "COMMENT ON COLUMN {}.{} IS {};",
                quote_ident(table_name),
                quote_ident(column_name),
                quote_literal(comment)
            ),
            creates: Vec::new(),
            requires: vec![SchemaObject::column(table_name, column_name)],
            drops: Vec::new(),
        });
        self
    }

    /// Create or replace a function
    pub fn create_function<F>(&mut self, function_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut FunctionBuilder),
    {
        let mut function = FunctionBuilder::new(function_name);
        callback(&mut function);

        self.statements.push(function.into_statement());
        self
    }

    /// Drop a function taking no arguments
    pub fn drop_function(&mut self, function_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!("DROP FUNCTION IF EXISTS {}();", function_name),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::function(function_name)],
        });
        self
    }

    /// Create or replace a trigger
    pub fn create_trigger<F>(&mut self, trigger_name: &str, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TriggerBuilder),
    {
        let mut trigger = TriggerBuilder::new(trigger_name, table_name);
        callback(&mut trigger);

        self.statements.push(trigger.into_statement());
        self
    }

    /// Drop a trigger
    pub fn drop_trigger(&mut self, table_name: &str, trigger_name: &str) -> &mut Self {
        self.statements.push(Statement {
            sql: format!(
                "DROP TRIGGER IF EXISTS {} ON {};",
                quote_ident(trigger_name),
                quote_ident(table_name)
            ),
            creates: Vec::new(),
            requires: Vec::new(),
            drops: vec![SchemaObject::Trigger {
                table: table_name.to_string(),
                name: trigger_name.to_string(),
            }],
        });
        self
    }

    /// Append a statement verbatim
    pub fn raw(&mut self, sql: &str) -> &mut Self {
        self.statements.push(Statement::raw(sql));
        self
    }

    /// Get all SQL statements
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.iter().map(|s| s.sql.clone()).collect()
    }

    /// All statements as a single SQL string
    pub fn build(&self) -> String {
        self.to_sql().join("\n")
    }

    /// Consume the builder, yielding the statements in authored order
    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

/// Table builder for CREATE TABLE statements
pub struct TableBuilder {
    table_name: String,
    columns: Vec<ColumnDefinition>,
    constraints: Vec<(String, String)>,
    requires: Vec<SchemaObject>,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            requires: Vec::new(),
        }
    }

    /// Add a column
    pub fn column(&mut self, name: &str, column_type: &str) -> &mut ColumnDefinition {
        self.columns.push(ColumnDefinition::new(name, column_type));
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    /// Add a named primary key constraint
    pub fn primary_key(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        self.constraints
            .push((name.to_string(), format!("PRIMARY KEY ({})", columns.join(", "))));
        self
    }

    /// Add a named foreign key constraint
    pub fn foreign_key(&mut self, name: &str, foreign_key: ForeignKey) -> &mut Self {
        self.requires.extend(
            foreign_key
                .requires(&self.table_name)
                .into_iter()
                .filter(|object| object.owner_table() != Some(self.table_name.as_str())),
        );
        self.constraints.push((name.to_string(), foreign_key.to_sql()));
        self
    }

    /// Add a named unique constraint
    pub fn unique(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        self.constraints
            .push((name.to_string(), format!("UNIQUE ({})", columns.join(", "))));
        self
    }

    /// Build the CREATE TABLE SQL
    pub fn to_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDefinition::to_sql).collect();
        parts.extend(
            self.constraints
                .iter()
                .map(|(name, body)| format!("CONSTRAINT {} {}", quote_ident(name), body)),
        );

        format!(
            "CREATE TABLE {} (\n  {}\n);",
            quote_ident(&self.table_name),
            parts.join(",\n  ")
        )
    }

    fn into_statement(self) -> Statement {
        let sql = self.to_sql();
        let table = self.table_name.as_str();

        let mut creates = vec![SchemaObject::table(table)];
        creates.extend(self.columns.iter().map(|c| SchemaObject::column(table, &c.name)));
        creates.extend(self.constraints.iter().map(|(name, _)| SchemaObject::Constraint {
            table: table.to_string(),
            name: name.clone(),
        }));

        let mut requires = self.requires.clone();
        requires.extend(self.columns.iter().filter_map(ColumnDefinition::requires));

        Statement {
            sql,
            creates,
            requires,
            drops: Vec::new(),
        }
    }
}

/// Builder for CREATE OR REPLACE FUNCTION
pub struct FunctionBuilder {
    name: String,
    returns: String,
    language: String,
    body: String,
    uses_tables: Vec<String>,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            returns: "trigger".to_string(),
            language: "plpgsql".to_string(),
            body: String::new(),
            uses_tables: Vec::new(),
        }
    }

    pub fn returns(&mut self, return_type: &str) -> &mut Self {
        self.returns = return_type.to_string();
        self
    }

    pub fn language(&mut self, language: &str) -> &mut Self {
        self.language = language.to_string();
        self
    }

    /// Function body placed between `$function$` quotes
    pub fn body(&mut self, body: &str) -> &mut Self {
        self.body = body.trim_matches('\n').to_string();
        self
    }

    /// Record a table the body reads or writes
    pub fn uses_table(&mut self, table: &str) -> &mut Self {
        self.uses_tables.push(table.to_string());
        self
    }

    pub fn to_sql(&self) -> String {
        format!(
            "CREATE OR REPLACE FUNCTION {}()\n  RETURNS {}\n  LANGUAGE {}\n  AS $function$\n{}\n$function$;",
            self.name, self.returns, self.language, self.body
        )
    }

    fn into_statement(self) -> Statement {
        Statement {
            sql: self.to_sql(),
            creates: vec![SchemaObject::function(&self.name)],
            requires: self.uses_tables.iter().map(|t| SchemaObject::table(t)).collect(),
            drops: Vec::new(),
        }
    }
}

/// Trigger timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

/// Builder for CREATE OR REPLACE TRIGGER
pub struct TriggerBuilder {
    name: String,
    table: String,
    timing: TriggerTiming,
    events: Vec<&'static str>,
    old_table: Option<String>,
    for_each_row: bool,
    when: Option<String>,
    function: String,
}

impl TriggerBuilder {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            timing: TriggerTiming::After,
            events: Vec::new(),
            old_table: None,
            for_each_row: true,
            when: None,
            function: String::new(),
        }
    }

    pub fn before(&mut self) -> &mut Self {
        self.timing = TriggerTiming::Before;
        self
    }

    pub fn after(&mut self) -> &mut Self {
        self.timing = TriggerTiming::After;
        self
    }

    pub fn on_delete(&mut self) -> &mut Self {
        self.events.push("DELETE");
        self
    }

    pub fn on_update(&mut self) -> &mut Self {
        self.events.push("UPDATE");
        self
    }

    pub fn on_insert(&mut self) -> &mut Self {
        self.events.push("INSERT");
        self
    }

    /// Expose deleted rows to a statement-level trigger as a transition table
    pub fn referencing_old_table(&mut self, alias: &str) -> &mut Self {
        self.old_table = Some(alias.to_string());
        self
    }

    pub fn for_each_row(&mut self) -> &mut Self {
        self.for_each_row = true;
        self
    }

    pub fn for_each_statement(&mut self) -> &mut Self {
        self.for_each_row = false;
        self
    }

    pub fn when(&mut self, condition: &str) -> &mut Self {
        self.when = Some(condition.to_string());
        self
    }

    pub fn execute_function(&mut self, function: &str) -> &mut Self {
        self.function = function.to_string();
        self
    }

    pub fn to_sql(&self) -> String {
        let timing = match self.timing {
            TriggerTiming::Before => "BEFORE",
            TriggerTiming::After => "AFTER",
        };
        let mut lines = vec![
            format!("CREATE OR REPLACE TRIGGER {}", quote_ident(&self.name)),
            format!("  {} {} ON {}", timing, self.events.join(" OR "), quote_ident(&self.table)),
        ];
        if let Some(alias) = &self.old_table {
            lines.push(format!("  REFERENCING OLD TABLE AS {}", alias));
        }
        lines.push(if self.for_each_row {
            "  FOR EACH ROW".to_string()
        } else {
            "  FOR EACH STATEMENT".to_string()
        });
        if let Some(condition) = &self.when {
            lines.push(format!("  WHEN ({})", condition));
        }
        lines.push(format!("  EXECUTE FUNCTION {}();", self.function));
        lines.join("\n")
    }

    fn into_statement(self) -> Statement {
        Statement {
            sql: self.to_sql(),
            creates: vec![SchemaObject::Trigger {
                table: self.table.clone(),
                name: self.name.clone(),
            }],
            requires: vec![
                SchemaObject::table(&self.table),
                SchemaObject::function(&self.function),
            ],
            drops: Vec::new(),
        }
    }
}
