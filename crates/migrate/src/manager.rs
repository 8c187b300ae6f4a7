//! Migration Manager - File system operations for migrations
//!
//! Handles creating, loading, and parsing SQL migration files. A file is named
//! after its version (`<unix-millis>-<Label>.sql`) and holds an up section and
//! a down section.

use chrono::Utc;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::definitions::Version;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationSet, MigrationUnit};
use crate::schema_builder::{SchemaObject, Statement};

/// Migration manager for creating and loading SQL file migrations
#[derive(Debug, Clone)]
pub struct MigrationManager {
    migrations_dir: PathBuf,
}

impl MigrationManager {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Create a new migration file, returning its path
    pub fn create_migration(&self, name: &str) -> MigrateResult<PathBuf> {
        let label = to_label(name);
        if label.is_empty() {
            return Err(MigrationError::Parse(format!(
                "migration name '{}' has no usable characters",
                name
            )));
        }

        fs::create_dir_all(&self.migrations_dir)?;

        let version = format!("{}-{}", Utc::now().timestamp_millis(), label);
        let filepath = self.migrations_dir.join(format!("{}.sql", version));
        if filepath.exists() {
            return Err(MigrationError::DuplicateVersion(version));
        }

        fs::write(&filepath, create_migration_template(name, &version))?;
        Ok(filepath)
    }

    /// Load all migration files from the migrations directory
    pub fn load_migrations(&self) -> MigrateResult<MigrationSet> {
        if !self.migrations_dir.exists() {
            return MigrationSet::new(Vec::new());
        }

        let mut units = Vec::new();
        for entry in fs::read_dir(&self.migrations_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "sql") {
                units.push(parse_migration_file(&path)?);
            }
        }

        MigrationSet::new(units)
    }
}

/// Parse a migration file into a unit
pub fn parse_migration_file(path: &Path) -> MigrateResult<MigrationUnit> {
    let content = fs::read_to_string(path)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MigrationError::Parse(format!("invalid migration filename: {}", path.display())))?;
    let version = Version::parse(stem)?;

    let parsed = parse_migration_content(&content)
        .map_err(|e| MigrationError::Parse(format!("{}: {}", path.display(), e)))?;
    let name = parsed
        .name
        .unwrap_or_else(|| version.label().replace(|c: char| c == '_' || c == '-', " "));

    Ok(MigrationUnit::new(
        version,
        name,
        split_sql_statements(&parsed.up)?
            .into_iter()
            .map(Statement::raw)
            .collect(),
        tokenize_statements(&parsed.down)?
            .into_iter()
            .map(SqlChunk::into_statement)
            .collect(),
    ))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedContent {
    name: Option<String>,
    up: String,
    down: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Up,
    Down,
}

fn parse_migration_content(content: &str) -> Result<ParsedContent, String> {
    let mut parsed = ParsedContent::default();
    let mut up_lines = Vec::new();
    let mut down_lines = Vec::new();
    let mut section = Section::Header;

    for line in content.lines() {
        let trimmed = line.trim().to_lowercase();

        if let Some(comment) = trimmed.strip_prefix("--") {
            let comment = comment.trim();
            if comment == "up" || comment.starts_with("up migration") {
                section = Section::Up;
                continue;
            }
            if comment == "down" || comment.starts_with("down migration") {
                section = Section::Down;
                continue;
            }
            if section == Section::Header {
                if let Some(name) = line.trim()[2..].trim().strip_prefix("Migration:") {
                    parsed.name = Some(name.trim().to_string());
                }
                continue;
            }
        }

        match section {
            Section::Up => up_lines.push(line),
            Section::Down => down_lines.push(line),
            Section::Header => {
                if !line.trim().is_empty() {
                    return Err("SQL found before the '-- Up migration' marker".to_string());
                }
            }
        }
    }

    if section == Section::Header {
        return Err("missing '-- Up migration' marker".to_string());
    }

    parsed.up = up_lines.join("\n");
    parsed.down = down_lines.join("\n");
    Ok(parsed)
}

/// One statement cut from a SQL file, with its tokens
#[derive(Debug)]
struct SqlChunk {
    sql: String,
    tokens: Vec<Token>,
}

impl SqlChunk {
    /// Raw statement that records the tables and columns it drops
    fn into_statement(self) -> Statement {
        let drops = dropped_objects(&self.tokens);
        Statement {
            drops,
            ..Statement::raw(self.sql)
        }
    }
}

/// Byte offset of a 1-based tokenizer location
fn byte_offset(sql: &str, line_starts: &[usize], location: &Location) -> usize {
    let line_start = line_starts
        .get((location.line as usize).saturating_sub(1))
        .copied()
        .unwrap_or(sql.len());
    sql[line_start..]
        .char_indices()
        .nth((location.column as usize).saturating_sub(1))
        .map_or(sql.len(), |(offset, _)| line_start + offset)
}

/// Tokenize `sql` and cut it into statements on top-level semicolons
///
/// Statement text is sliced from the source, so it stays exactly as written.
/// Leading comments and comment-only statements are dropped.
fn tokenize_statements(sql: &str) -> MigrateResult<Vec<SqlChunk>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| MigrationError::Parse(format!("failed to tokenize SQL: {}", e)))?;

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(offset, _)| offset + 1))
        .collect();
    let offsets: Vec<usize> = tokens
        .iter()
        .map(|t| byte_offset(sql, &line_starts, &t.location))
        .collect();
    let end_of = |index: usize| offsets.get(index + 1).copied().unwrap_or(sql.len());

    let mut chunks = Vec::new();
    let mut start: Option<usize> = None;
    let mut last_code_end = 0;
    let mut current = Vec::new();

    for (index, located) in tokens.into_iter().enumerate() {
        match located.token {
            Token::Whitespace(_) => continue,
            Token::SemiColon => {
                if let Some(begin) = start.take() {
                    chunks.push(SqlChunk {
                        sql: sql[begin..end_of(index)].to_string(),
                        tokens: std::mem::take(&mut current),
                    });
                }
            }
            token => {
                start.get_or_insert(offsets[index]);
                last_code_end = end_of(index);
                current.push(token);
            }
        }
    }

    if let Some(begin) = start {
        chunks.push(SqlChunk {
            sql: format!("{};", &sql[begin..last_code_end]),
            tokens: current,
        });
    }

    Ok(chunks)
}

/// Split SQL into statements on top-level semicolons
///
/// Each returned statement ends with a semicolon.
pub fn split_sql_statements(sql: &str) -> MigrateResult<Vec<String>> {
    Ok(tokenize_statements(sql)?
        .into_iter()
        .map(|chunk| chunk.sql)
        .collect())
}

fn keyword(token: Option<&Token>) -> Option<Keyword> {
    match token {
        Some(Token::Word(word)) if word.quote_style.is_none() => Some(word.keyword),
        _ => None,
    }
}

/// Read a possibly schema-qualified name, returning its last part
fn object_name(tokens: &[Token], mut index: usize) -> Option<(String, usize)> {
    let mut name = match tokens.get(index) {
        Some(Token::Word(word)) => word.value.clone(),
        _ => return None,
    };
    index += 1;
    while let (Some(Token::Period), Some(Token::Word(word))) =
        (tokens.get(index), tokens.get(index + 1))
    {
        name = word.value.clone();
        index += 2;
    }
    Some((name, index))
}

fn skip_if_exists(tokens: &[Token], index: usize) -> usize {
    if keyword(tokens.get(index)) == Some(Keyword::IF)
        && keyword(tokens.get(index + 1)) == Some(Keyword::EXISTS)
    {
        index + 2
    } else {
        index
    }
}

/// Tables and columns a statement removes: `DROP TABLE` and `ALTER TABLE ... DROP [COLUMN]`
fn dropped_objects(tokens: &[Token]) -> Vec<SchemaObject> {
    let mut objects = Vec::new();
    match (keyword(tokens.first()), keyword(tokens.get(1))) {
        (Some(Keyword::DROP), Some(Keyword::TABLE)) => {
            let mut index = skip_if_exists(tokens, 2);
            while let Some((table, next)) = object_name(tokens, index) {
                objects.push(SchemaObject::table(&table));
                if tokens.get(next) != Some(&Token::Comma) {
                    break;
                }
                index = next + 1;
            }
        }
        (Some(Keyword::ALTER), Some(Keyword::TABLE)) => {
            let mut index = skip_if_exists(tokens, 2);
            if keyword(tokens.get(index)) == Some(Keyword::ONLY) {
                index += 1;
            }
            let Some((table, mut index)) = object_name(tokens, index) else {
                return objects;
            };

            // Actions are separated by top-level commas
            let mut depth = 0usize;
            let mut action_start = true;
            while index < tokens.len() {
                if action_start && keyword(tokens.get(index)) == Some(Keyword::DROP) {
                    let mut at = index + 1;
                    match keyword(tokens.get(at)) {
                        Some(Keyword::CONSTRAINT) => at = tokens.len(),
                        Some(Keyword::COLUMN) => at += 1,
                        _ => {}
                    }
                    at = skip_if_exists(tokens, at);
                    if let Some(Token::Word(column)) = tokens.get(at) {
                        objects.push(SchemaObject::column(&table, &column.value));
                    }
                }
                action_start = false;
                match &tokens[index] {
                    Token::LParen => depth += 1,
                    Token::RParen => depth = depth.saturating_sub(1),
                    Token::Comma if depth == 0 => action_start = true,
                    _ => {}
                }
                index += 1;
            }
        }
        _ => {}
    }
    objects
}

/// Turn a free-form name into a version label, e.g. `add events` -> `Add-Events`
fn to_label(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Create migration template content
fn create_migration_template(name: &str, version: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- Version: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\n\n\
         -- Down migration\n\n",
        name,
        version,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::RevertTarget;
    use crate::memory::MemoryStore;
    use crate::runner::{MigrationRunner, RunnerOptions};
    use tempfile::TempDir;

    #[test]
    fn test_split_respects_dollar_quotes() {
        let sql = r#"
CREATE OR REPLACE FUNCTION public.touch()
  RETURNS trigger
  LANGUAGE plpgsql
  AS $function$
BEGIN
  NEW."updatedAt" = now();
  RETURN NEW;
END
$function$;
CREATE TABLE "a" ("id" int);
"#;
        let statements = split_sql_statements(sql).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("RETURN NEW;\nEND\n$function$;"));
        assert_eq!(statements[1], "CREATE TABLE \"a\" (\"id\" int);");
    }

    #[test]
    fn test_split_respects_quotes_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');\n-- trailing; comment\n/* block; */\nSELECT \"odd;name\" FROM t";
        let statements = split_sql_statements(sql).unwrap();
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES ('a;b', 'it''s');".to_string(),
                "SELECT \"odd;name\" FROM t;".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_respects_escape_strings() {
        let sql = "INSERT INTO t VALUES (E'a\\'; b');\nSELECT 2;";
        let statements = split_sql_statements(sql).unwrap();
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES (E'a\\'; b');".to_string(),
                "SELECT 2;".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_drops_comment_only_statements() {
        assert!(split_sql_statements("-- nothing here\n;\n  ").unwrap().is_empty());
        assert_eq!(split_sql_statements("SELECT $1;").unwrap(), vec!["SELECT $1;".to_string()]);
        assert!(matches!(
            split_sql_statements("SELECT 'unterminated"),
            Err(MigrationError::Parse(_))
        ));
    }

    fn drops(sql: &str) -> Vec<SchemaObject> {
        tokenize_statements(sql)
            .unwrap()
            .into_iter()
            .flat_map(|chunk| chunk.into_statement().drops)
            .collect()
    }

    #[test]
    fn test_detects_dropped_tables_and_columns() {
        assert_eq!(
            drops("DROP TABLE IF EXISTS public.things, \"Other\" CASCADE;"),
            vec![SchemaObject::table("things"), SchemaObject::table("Other")]
        );
        assert_eq!(
            drops("ALTER TABLE ONLY things DROP COLUMN IF EXISTS a, ADD COLUMN b int, DROP c;"),
            vec![SchemaObject::column("things", "a"), SchemaObject::column("things", "c")]
        );
        assert!(drops("ALTER TABLE things DROP CONSTRAINT things_pk;").is_empty());
        assert!(drops("DROP INDEX things_idx; DROP TRIGGER t ON things;").is_empty());
        assert!(drops("-- DROP TABLE things;\nSELECT 'DROP TABLE things';").is_empty());
    }

    #[test]
    fn test_create_and_load_migration() {
        let temp_dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(temp_dir.path());

        let path = manager.create_migration("add tags table").unwrap();
        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(filename.ends_with("-Add-Tags-Table.sql"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("-- Migration: add tags table"));
        assert!(content.contains("-- Up migration"));
        assert!(content.contains("-- Down migration"));

        let set = manager.load_migrations().unwrap();
        assert_eq!(set.len(), 1);
        let unit = &set.units()[0];
        assert_eq!(unit.name, "add tags table");
        assert!(unit.up.is_empty());
        assert!(unit.down.is_empty());
    }

    #[test]
    fn test_load_migrations_in_version_order() {
        let temp_dir = TempDir::new().unwrap();
        let manager = MigrationManager::new(temp_dir.path());

        fs::write(
            temp_dir.path().join("1700000000002-Second.sql"),
            "-- Up migration\nCREATE TABLE two (id int);\n-- Down migration\nDROP TABLE two;\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("1700000000001-First.sql"),
            "-- Up migration\nCREATE TABLE one (id int);\nCREATE INDEX one_id ON one (id);\n-- Down migration\nDROP TABLE one;\n",
        )
        .unwrap();
        fs::write(temp_dir.path().join("README.md"), "ignored").unwrap();

        let set = manager.load_migrations().unwrap();
        let versions: Vec<&str> = set.iter().map(|u| u.version.as_str()).collect();
        assert_eq!(versions, vec!["1700000000001-First", "1700000000002-Second"]);
        assert_eq!(set.units()[0].up.len(), 2);
        assert_eq!(set.units()[0].name, "First");
        assert_eq!(set.units()[1].down[0].sql, "DROP TABLE two;");
    }

    #[tokio::test]
    async fn test_file_unit_destructive_revert_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("1700000000001-Things.sql"),
            "-- Up migration\nCREATE TABLE things (id int);\n-- Down migration\nDROP TABLE things;\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("1700000000002-Things-Note.sql"),
            "-- Up migration\nALTER TABLE things ADD COLUMN note text;\n-- Down migration\nALTER TABLE things DROP COLUMN note;\n",
        )
        .unwrap();

        let set = MigrationManager::new(temp_dir.path()).load_migrations().unwrap();
        assert!(set.iter().all(|unit| unit.destructive_down()));

        let runner = MigrationRunner::new(MemoryStore::new(), set).with_options(RunnerOptions {
            allow_destructive_revert: false,
        });
        runner.apply_forward(None).await.unwrap();

        let err = runner.revert(RevertTarget::All).await.unwrap_err();
        assert!(matches!(err, MigrationError::DestructiveRevert(ref v) if v == "1700000000002-Things-Note"));
        assert_eq!(runner.store().ledger().len(), 2);
    }

    #[test]
    fn test_missing_directory_yields_empty_set() {
        let manager = MigrationManager::new("/definitely/not/here");
        assert!(manager.load_migrations().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_sql_without_sections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("1700000000001-Bad.sql");
        fs::write(&path, "CREATE TABLE bad (id int);").unwrap();
        assert!(matches!(parse_migration_file(&path), Err(MigrationError::Parse(_))));
    }

    #[test]
    fn test_label() {
        assert_eq!(to_label("add events"), "Add-Events");
        assert_eq!(to_label("AddAllowSubscribe"), "AddAllowSubscribe");
        assert_eq!(to_label("  --  "), "");
    }
}
