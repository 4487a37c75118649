//! In-process catalog backend.
//!
//! [`MemoryServer`] plays the database: it hands out sessions, answers the
//! catalog queries of [`MetadataSource`] from an object model, and applies
//! the DDL this crate generates to that model. Statements inside
//! `BEGIN TRANSACTION` run against a staged copy that only replaces the
//! committed model on `COMMIT`. Failure injection covers refused logins,
//! transport resets, killed sessions and failing statements.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::catalog::{Connector, MetadataSource, RowSet, Session};
use crate::classify::{name_parts, Classifier, KeywordClassifier, Scanner};
use crate::ddl;
use crate::error::{FsError, Result};
use crate::object::{
    unix_now, ColumnDetails, ConstraintDetails, DatabaseObject, ForeignKeyDetails, IdentitySpec,
    IndexDetails, ObjectDetails, ObjectKind,
};
use crate::path::ObjectPath;
use crate::pool::PooledSession;

type ApplyResult<T> = std::result::Result<T, String>;

#[derive(Debug, Clone)]
struct ObjectNode {
    object: DatabaseObject,
    children: Vec<DatabaseObject>,
}

#[derive(Debug, Clone)]
struct SchemaNode {
    object: DatabaseObject,
    objects: Vec<ObjectNode>,
}

/// Schemas, their objects and module sources.
#[derive(Debug, Clone, Default)]
struct CatalogModel {
    next_id: i64,
    schemas: Vec<SchemaNode>,
    sources: HashMap<i64, String>,
}

impl CatalogModel {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn schema(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.iter().find(|s| s.object.name == name)
    }

    fn schema_mut(&mut self, name: &str) -> ApplyResult<&mut SchemaNode> {
        self.schemas
            .iter_mut()
            .find(|s| s.object.name == name)
            .ok_or_else(|| format!("schema '{}' does not exist", name))
    }

    fn object_mut(&mut self, schema: &str, name: &str) -> ApplyResult<&mut ObjectNode> {
        self.schema_mut(schema)?
            .objects
            .iter_mut()
            .find(|o| o.object.name == name)
            .ok_or_else(|| format!("object '{}.{}' does not exist", schema, name))
    }

    fn add_schema(&mut self, name: &str) -> ApplyResult<i64> {
        if self.schema(name).is_some() {
            return Err(format!("schema '{}' already exists", name));
        }
        let id = self.allocate();
        let mut object = DatabaseObject::catalog(id, name, ObjectKind::Schema);
        object.schema_id = id;
        self.schemas.push(SchemaNode {
            object,
            objects: Vec::new(),
        });
        Ok(id)
    }

    fn add_object(&mut self, schema: &str, name: &str, kind: ObjectKind, source: Option<String>) -> ApplyResult<i64> {
        let id = self.allocate();
        let node = self.schema_mut(schema)?;
        if node.objects.iter().any(|o| o.object.name == name) {
            return Err(format!("there is already an object named '{}' in schema '{}'", name, schema));
        }
        let mut object = DatabaseObject::catalog(id, name, kind);
        object.schema_id = node.object.object_id;
        object.parent_id = node.object.object_id;
        if let Some(text) = &source {
            object.length = text.len() as u64;
        }
        node.objects.push(ObjectNode {
            object,
            children: Vec::new(),
        });
        if let Some(text) = source {
            self.sources.insert(id, text);
        }
        Ok(id)
    }

    fn add_child(&mut self, schema: &str, table: &str, mut child: DatabaseObject, source: Option<String>) -> ApplyResult<i64> {
        let id = self.allocate();
        let node = self.object_mut(schema, table)?;
        if node.children.iter().any(|c| c.name == child.name) {
            return Err(format!("'{}' already exists in '{}.{}'", child.name, schema, table));
        }
        child.object_id = id;
        child.parent_id = node.object.object_id;
        child.schema_id = node.object.schema_id;
        if let Some(text) = &source {
            child.length = text.len() as u64;
        }
        node.children.push(child);
        if let Some(text) = source {
            self.sources.insert(id, text);
        }
        Ok(id)
    }

    fn child_mut(&mut self, schema: &str, table: &str, name: &str) -> ApplyResult<&mut DatabaseObject> {
        self.object_mut(schema, table)?
            .children
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| format!("'{}' does not exist in '{}.{}'", name, schema, table))
    }

    fn remove_child(&mut self, schema: &str, table: &str, name: &str, kinds: &[ObjectKind]) -> ApplyResult<()> {
        let node = self.object_mut(schema, table)?;
        let before = node.children.len();
        node.children
            .retain(|c| !(c.name == name && kinds.contains(&c.kind)));
        if node.children.len() == before {
            return Err(format!("'{}' is not a constraint or column of '{}.{}'", name, schema, table));
        }
        Ok(())
    }

    /// Finds a table-scoped object by name anywhere in a schema.
    fn find_scoped(&mut self, schema: &str, name: &str, kinds: &[ObjectKind]) -> ApplyResult<(String, String)> {
        let node = self.schema_mut(schema)?;
        node.objects
            .iter()
            .find_map(|o| {
                o.children
                    .iter()
                    .find(|c| c.name == name && kinds.contains(&c.kind))
                    .map(|_| (schema.to_string(), o.object.name.clone()))
            })
            .ok_or_else(|| format!("object '{}.{}' does not exist", schema, name))
    }

    /// Applies one batch of generated DDL.
    fn apply(&mut self, sql: &str) -> ApplyResult<()> {
        for statement in split_statements(sql) {
            self.apply_one(&statement)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, sql: &str) -> ApplyResult<()> {
        if let Ok(class) = KeywordClassifier.classify(sql) {
            if let Some(spans) = &class.module {
                return self.apply_module(sql, class.kind, spans);
            }
        }

        let mut sc = Scanner::new(sql);
        if sc.eat_sequence(&["CREATE", "SCHEMA"]) {
            let name = single(sc.name())?;
            return self.add_schema(&name).map(|_| ());
        }
        if sc.eat_sequence(&["CREATE", "TABLE"]) {
            let (schema, table) = pair(sc.name())?;
            return self.create_table(&schema, &table, sc.rest_text());
        }
        if sc.eat_sequence(&["ALTER", "TABLE"]) {
            let (schema, table) = pair(sc.name())?;
            return self.alter_table(&schema, &table, &mut sc);
        }
        if sc.eat_keyword("CREATE") {
            let unique = sc.eat_keyword("UNIQUE");
            if sc.eat_sequence(&["NONCLUSTERED", "INDEX"]) {
                let name = single(sc.name())?;
                if !sc.eat_keyword("ON") {
                    return Err("expected ON".into());
                }
                let (schema, table) = pair(sc.name())?;
                let mut text = String::new();
                if unique {
                    text.push_str("UNIQUE ");
                }
                text.push_str(&format!(
                    "NONCLUSTERED INDEX ON {} {}\n",
                    ddl::qualified(&schema, &table),
                    sc.rest_text()
                ));
                let mut child = DatabaseObject::catalog(0, name, ObjectKind::Index);
                child.details = ObjectDetails::Index(IndexDetails {
                    is_unique: unique,
                    ..Default::default()
                });
                child.set_definition(text);
                return self.add_child(&schema, &table, child, None).map(|_| ());
            }
            return Err(format!("unsupported statement: {}", sql));
        }
        if sc.eat_sequence(&["DROP", "INDEX"]) {
            let name = single(sc.name())?;
            if !sc.eat_keyword("ON") {
                return Err("expected ON".into());
            }
            let (schema, table) = pair(sc.name())?;
            return self.remove_child(&schema, &table, &name, &[ObjectKind::Index]);
        }
        if sc.eat_sequence(&["DROP", "SCHEMA"]) {
            let name = single(sc.name())?;
            let node = self
                .schema(&name)
                .ok_or_else(|| format!("schema '{}' does not exist", name))?;
            if !node.objects.is_empty() {
                return Err(format!("cannot drop schema '{}', it is not empty", name));
            }
            self.schemas.retain(|s| s.object.name != name);
            return Ok(());
        }
        if sc.eat_keyword("DROP") {
            return self.drop_object(&mut sc);
        }
        if sc.eat_sequence(&["ALTER", "SCHEMA"]) {
            let target = single(sc.name())?;
            if !sc.eat_keyword("TRANSFER") {
                return Err("expected TRANSFER".into());
            }
            let (schema, name) = pair(sc.name())?;
            let mut node = {
                let source = self.schema_mut(&schema)?;
                let idx = source
                    .objects
                    .iter()
                    .position(|o| o.object.name == name)
                    .ok_or_else(|| format!("object '{}.{}' does not exist", schema, name))?;
                source.objects.remove(idx)
            };
            let destination = self.schema_mut(&target)?;
            if destination.objects.iter().any(|o| o.object.name == name) {
                return Err(format!("there is already an object named '{}' in schema '{}'", name, target));
            }
            node.object.schema_id = destination.object.object_id;
            node.object.parent_id = destination.object.object_id;
            destination.objects.push(node);
            return Ok(());
        }
        if sc.eat_sequence(&["EXEC", "sp_rename"]) {
            return self.sp_rename(&mut sc);
        }
        Err(format!("unsupported statement: {}", sql))
    }

    fn create_table(&mut self, schema: &str, table: &str, body: &str) -> ApplyResult<()> {
        let inner = body
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| "expected column list".to_string())?;
        let clauses: Vec<&str> = split_top_level(inner, ',')
            .into_iter()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if clauses.is_empty() {
            return Err(format!("table '{}.{}' must have at least one column", schema, table));
        }
        self.add_object(schema, table, ObjectKind::Table, None)?;
        for clause in clauses {
            let mut sc = Scanner::new(clause);
            let name = single(sc.name())?;
            let column = column_object(&name, sc.rest_text());
            self.add_child(schema, table, column, None)?;
        }
        Ok(())
    }

    fn alter_table(&mut self, schema: &str, table: &str, sc: &mut Scanner<'_>) -> ApplyResult<()> {
        if sc.eat_sequence(&["DROP", "COLUMN"]) {
            let name = single(sc.name())?;
            return self.remove_child(schema, table, &name, &[ObjectKind::Column]);
        }
        if sc.eat_sequence(&["DROP", "CONSTRAINT"]) {
            let name = single(sc.name())?;
            return self.remove_child(
                schema,
                table,
                &name,
                &[
                    ObjectKind::CheckConstraint,
                    ObjectKind::DefaultConstraint,
                    ObjectKind::PrimaryKey,
                    ObjectKind::Unique,
                    ObjectKind::ForeignKey,
                ],
            );
        }
        if sc.eat_sequence(&["ALTER", "COLUMN"]) {
            let name = single(sc.name())?;
            let replacement = column_object(&name, sc.rest_text());
            let column = self.child_mut(schema, table, &name)?;
            column.details = replacement.details;
            if let Some(text) = replacement.definition {
                column.set_definition(text);
            }
            return Ok(());
        }

        let mut disabled = false;
        if sc.eat_keyword("WITH") {
            disabled = sc.eat_keyword("NOCHECK");
            if !disabled && !sc.eat_keyword("CHECK") {
                return Err("expected CHECK or NOCHECK".into());
            }
        }
        if !sc.eat_keyword("ADD") {
            return Err("unsupported ALTER TABLE form".into());
        }
        if !sc.eat_keyword("CONSTRAINT") {
            let name = single(sc.name())?;
            let column = column_object(&name, sc.rest_text());
            return self.add_child(schema, table, column, None).map(|_| ());
        }

        let name = single(sc.name())?;
        let check = if disabled { "WITH NOCHECK" } else { "WITH CHECK" };
        let (kind, text, details) = if sc.eat_keyword("CHECK") {
            let not_for_replication = sc.eat_sequence(&["NOT", "FOR", "REPLICATION"]);
            let nfr = if not_for_replication { "NOT FOR REPLICATION " } else { "" };
            let body = sc.rest_text();
            (
                ObjectKind::CheckConstraint,
                format!("{} CONSTRAINT CHECK {}{}\n", check, nfr, body),
                ObjectDetails::Constraint(ConstraintDetails {
                    column_name: None,
                    expression: body.to_string(),
                    disabled,
                    not_for_replication,
                }),
            )
        } else if sc.eat_keyword("DEFAULT") {
            let body = sc.rest_text();
            (
                ObjectKind::DefaultConstraint,
                format!("CONSTRAINT DEFAULT {}\n", body),
                ObjectDetails::Constraint(ConstraintDetails {
                    expression: body.to_string(),
                    ..Default::default()
                }),
            )
        } else if sc.eat_sequence(&["PRIMARY", "KEY"]) {
            (
                ObjectKind::PrimaryKey,
                format!("CONSTRAINT PRIMARY KEY {}\n", sc.rest_text()),
                ObjectDetails::Index(IndexDetails {
                    is_unique: true,
                    ..Default::default()
                }),
            )
        } else if sc.eat_keyword("UNIQUE") {
            (
                ObjectKind::Unique,
                format!("CONSTRAINT UNIQUE {}\n", sc.rest_text()),
                ObjectDetails::Index(IndexDetails {
                    is_unique: true,
                    ..Default::default()
                }),
            )
        } else if sc.eat_sequence(&["FOREIGN", "KEY"]) {
            (
                ObjectKind::ForeignKey,
                format!("{} CONSTRAINT FOREIGN KEY {}\n", check, sc.rest_text()),
                ObjectDetails::ForeignKey(ForeignKeyDetails {
                    disabled,
                    ..Default::default()
                }),
            )
        } else {
            return Err("unsupported constraint".into());
        };

        let mut child = DatabaseObject::catalog(0, name, kind);
        child.details = details;
        child.set_definition(text);
        self.add_child(schema, table, child, None).map(|_| ())
    }

    fn apply_module(&mut self, sql: &str, kind: ObjectKind, spans: &crate::classify::ModuleSpans) -> ApplyResult<()> {
        let keyword = sql[spans.keyword.clone()].to_ascii_uppercase();
        let (schema, name) = pair(Some(name_parts(&sql[spans.name.clone()])))?;
        let creating = keyword == "CREATE";
        let or_alter = keyword.contains(' ');

        if kind == ObjectKind::Trigger {
            let target = spans
                .target
                .clone()
                .ok_or_else(|| "trigger without table".to_string())?;
            let (_, table) = pair(Some(name_parts(&sql[target])))?;
            let exists = self.child_mut(&schema, &table, &name).is_ok();
            return match (exists, creating) {
                (true, true) => Err(format!("trigger '{}' already exists", name)),
                (false, false) if !or_alter => Err(format!("trigger '{}' does not exist", name)),
                (true, _) => {
                    let id = self.child_mut(&schema, &table, &name)?.object_id;
                    self.sources.insert(id, sql.to_string());
                    Ok(())
                }
                (false, _) => {
                    let child = DatabaseObject::catalog(0, name, ObjectKind::Trigger);
                    self.add_child(&schema, &table, child, Some(sql.to_string()))
                        .map(|_| ())
                }
            };
        }

        let existing = self
            .schema_mut(&schema)?
            .objects
            .iter()
            .find(|o| o.object.name == name)
            .map(|o| o.object.object_id);
        match (existing, creating) {
            (Some(_), true) => Err(format!("there is already an object named '{}'", name)),
            (None, false) if !or_alter => Err(format!("'{}' does not exist", name)),
            (Some(id), _) => {
                self.sources.insert(id, sql.to_string());
                let node = self.object_mut(&schema, &name)?;
                node.object.length = sql.len() as u64;
                node.object.modify_time = unix_now();
                Ok(())
            }
            (None, _) => self
                .add_object(&schema, &name, kind, Some(sql.to_string()))
                .map(|_| ()),
        }
    }

    fn drop_object(&mut self, sc: &mut Scanner<'_>) -> ApplyResult<()> {
        let kind = if sc.eat_keyword("TABLE") {
            ObjectKind::Table
        } else if sc.eat_keyword("VIEW") {
            ObjectKind::View
        } else if sc.eat_keyword("PROCEDURE") || sc.eat_keyword("PROC") {
            ObjectKind::Procedure
        } else if sc.eat_keyword("FUNCTION") {
            ObjectKind::Function
        } else if sc.eat_keyword("TRIGGER") {
            ObjectKind::Trigger
        } else {
            return Err("unsupported DROP".into());
        };
        let (schema, name) = pair(sc.name())?;

        if kind == ObjectKind::Trigger {
            let (schema, table) = self.find_scoped(&schema, &name, &[ObjectKind::Trigger])?;
            return self.remove_child(&schema, &table, &name, &[ObjectKind::Trigger]);
        }

        let node = self.schema_mut(&schema)?;
        let idx = node
            .objects
            .iter()
            .position(|o| o.object.name == name && o.object.kind == kind)
            .ok_or_else(|| format!("cannot drop '{}.{}', it does not exist", schema, name))?;
        let removed = node.objects.remove(idx);
        self.sources.remove(&removed.object.object_id);
        Ok(())
    }

    fn sp_rename(&mut self, sc: &mut Scanner<'_>) -> ApplyResult<()> {
        let source = sc
            .string_literal()
            .ok_or_else(|| "expected source name".to_string())?;
        if !sc.eat_char(',') {
            return Err("expected new name".into());
        }
        let new_name = sc
            .string_literal()
            .ok_or_else(|| "expected new name".to_string())?;
        let object_type = if sc.eat_char(',') {
            sc.string_literal().map(|t| t.to_ascii_uppercase())
        } else {
            None
        };

        let parts = name_parts(&source);
        match (object_type.as_deref(), parts.as_slice()) {
            (Some("COLUMN") | Some("INDEX"), [schema, table, old]) => {
                let clash = self.child_mut(schema, table, &new_name).is_ok();
                if clash {
                    return Err(format!("'{}' already exists", new_name));
                }
                self.child_mut(schema, table, old)?.name = new_name;
                Ok(())
            }
            (None | Some("OBJECT"), [schema, old]) => {
                if let Ok(node) = self.object_mut(schema, old) {
                    node.object.name = new_name;
                    return Ok(());
                }
                let scoped = [
                    ObjectKind::CheckConstraint,
                    ObjectKind::DefaultConstraint,
                    ObjectKind::PrimaryKey,
                    ObjectKind::Unique,
                    ObjectKind::ForeignKey,
                    ObjectKind::Trigger,
                ];
                let (schema, table) = self.find_scoped(schema, old, &scoped)?;
                self.child_mut(&schema, &table, old)?.name = new_name;
                Ok(())
            }
            _ => Err(format!("cannot rename '{}'", source)),
        }
    }
}

fn single(parts: Option<Vec<String>>) -> ApplyResult<String> {
    match parts.as_deref() {
        Some([name]) => Ok(name.clone()),
        _ => Err("expected a single name".into()),
    }
}

fn pair(parts: Option<Vec<String>>) -> ApplyResult<(String, String)> {
    match parts.as_deref() {
        Some([schema, name]) => Ok((schema.clone(), name.clone())),
        Some([name]) => Ok(("dbo".to_string(), name.clone())),
        _ => Err("expected schema-qualified name".into()),
    }
}

/// Builds a column object from `<type> [IDENTITY (s, i)] [NOT] NULL`.
fn column_object(name: &str, definition: &str) -> DatabaseObject {
    let upper = definition.to_ascii_uppercase();
    let type_name = definition
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_string();
    let identity = upper.find("IDENTITY").map(|at| {
        let args = definition[at + "IDENTITY".len()..].trim_start();
        let (seed, increment) = args
            .strip_prefix('(')
            .and_then(|a| a.split_once(')'))
            .and_then(|(inner, _)| inner.split_once(','))
            .map(|(s, i)| (s.trim().to_string(), i.trim().to_string()))
            .unwrap_or_else(|| ("1".to_string(), "1".to_string()));
        IdentitySpec {
            seed,
            increment,
            not_for_replication: upper.contains("NOT FOR REPLICATION"),
        }
    });
    let mut column = DatabaseObject::catalog(0, name, ObjectKind::Column);
    column.details = ObjectDetails::Column(ColumnDetails {
        type_name,
        max_length: 0,
        precision: 0,
        scale: 0,
        nullable: !upper.contains("NOT NULL"),
        identity,
    });
    column.set_definition(format!("COLUMN {}\n", definition.trim()));
    column
}

/// Splits on `sep` outside parentheses and quotes.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            c if c == sep && depth == 0 && !quoted => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Splits a batch at lines that open a new statement. Modules are one statement.
fn split_statements(sql: &str) -> Vec<String> {
    if matches!(KeywordClassifier.classify(sql), Ok(class) if class.module.is_some()) {
        return vec![sql.to_string()];
    }
    const OPENERS: [&str; 4] = ["ALTER ", "CREATE ", "DROP ", "EXEC "];
    let mut statements: Vec<String> = Vec::new();
    for line in sql.lines() {
        let opens = OPENERS.iter().any(|o| line.starts_with(o));
        match statements.last_mut() {
            Some(current) if !opens => {
                current.push('\n');
                current.push_str(line);
            }
            _ => statements.push(line.to_string()),
        }
    }
    statements
}

/// Catalog seed as read from TOML.
#[derive(Debug, Deserialize)]
struct CatalogSpec {
    #[serde(default)]
    schemas: Vec<SchemaSpec>,
}

#[derive(Debug, Deserialize)]
struct SchemaSpec {
    name: String,
    #[serde(default)]
    tables: Vec<TableSpec>,
    #[serde(default)]
    views: Vec<String>,
    #[serde(default)]
    procedures: Vec<ModuleSpec>,
    #[serde(default)]
    functions: Vec<ModuleSpec>,
}

#[derive(Debug, Deserialize)]
struct TableSpec {
    name: String,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
    #[serde(default)]
    triggers: Vec<ModuleSpec>,
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(default)]
    length: i32,
    #[serde(default)]
    identity: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ModuleSpec {
    name: String,
    text: String,
}

struct Transaction {
    model: CatalogModel,
    statements: Vec<String>,
}

#[derive(Default)]
struct ServerState {
    catalog: CatalogModel,
    /// Every statement received, catalog queries included
    statements: Vec<String>,
    /// DDL that reached the committed catalog
    committed: Vec<String>,
    connects: usize,
    open_sessions: usize,
    next_session: usize,
    /// Sessions opened in an older epoch are dead
    epoch: u64,
    refuse_connects: usize,
    transport_failures: usize,
    fail_patterns: Vec<String>,
}

/// In-process stand-in for a database server.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a server from a TOML catalog description.
    ///
    /// ```toml
    /// [[schemas]]
    /// name = "dbo"
    /// [[schemas.tables]]
    /// name = "orders"
    /// columns = [{ name = "id", type = "int", nullable = false, identity = true }]
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let spec: CatalogSpec = toml::from_str(toml_str)
            .map_err(|e| FsError::Config(format!("Invalid catalog TOML: {}", e)))?;
        let server = Self::new();
        for schema in &spec.schemas {
            server.add_schema(&schema.name)?;
            for table in &schema.tables {
                server.add_table(&schema.name, &table.name)?;
                for column in &table.columns {
                    let identity = column.identity.then(|| IdentitySpec {
                        seed: "1".into(),
                        increment: "1".into(),
                        not_for_replication: false,
                    });
                    server.add_column(
                        &schema.name,
                        &table.name,
                        &column.name,
                        ColumnDetails {
                            type_name: column.type_name.clone(),
                            max_length: column.length,
                            precision: 0,
                            scale: 0,
                            nullable: column.nullable,
                            identity,
                        },
                    )?;
                }
                for trigger in &table.triggers {
                    server.add_trigger(&schema.name, &table.name, &trigger.name, &trigger.text)?;
                }
            }
            for view in &schema.views {
                server.add_view(&schema.name, view)?;
            }
            for module in &schema.procedures {
                server.add_module(&schema.name, &module.name, ObjectKind::Procedure, &module.text)?;
            }
            for module in &schema.functions {
                server.add_module(&schema.name, &module.name, ObjectKind::Function, &module.text)?;
            }
        }
        Ok(server)
    }

    /// Reads a TOML catalog description from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FsError::Config(format!("Failed to read catalog file: {}", e)))?;
        Self::from_toml(&content)
    }

    fn seed<T>(&self, f: impl FnOnce(&mut CatalogModel) -> ApplyResult<T>) -> Result<T> {
        f(&mut self.state.lock().catalog).map_err(FsError::Config)
    }

    pub fn add_schema(&self, name: &str) -> Result<i64> {
        self.seed(|c| c.add_schema(name))
    }

    pub fn add_table(&self, schema: &str, name: &str) -> Result<i64> {
        self.seed(|c| c.add_object(schema, name, ObjectKind::Table, None))
    }

    pub fn add_view(&self, schema: &str, name: &str) -> Result<i64> {
        self.seed(|c| c.add_object(schema, name, ObjectKind::View, None))
    }

    /// Adds a procedure or function with its source text.
    pub fn add_module(&self, schema: &str, name: &str, kind: ObjectKind, text: &str) -> Result<i64> {
        self.seed(|c| c.add_object(schema, name, kind, Some(text.to_string())))
    }

    pub fn add_trigger(&self, schema: &str, table: &str, name: &str, text: &str) -> Result<i64> {
        let child = DatabaseObject::catalog(0, name, ObjectKind::Trigger);
        self.seed(|c| c.add_child(schema, table, child, Some(text.to_string())))
    }

    pub fn add_column(&self, schema: &str, table: &str, name: &str, column: ColumnDetails) -> Result<i64> {
        let mut child = DatabaseObject::catalog(0, name, ObjectKind::Column);
        let text = ddl::column_text(&column);
        child.details = ObjectDetails::Column(column);
        child.set_definition(text);
        self.seed(|c| c.add_child(schema, table, child, None))
    }

    /// Adds a check or default constraint.
    pub fn add_constraint(
        &self,
        schema: &str,
        table: &str,
        name: &str,
        kind: ObjectKind,
        constraint: ConstraintDetails,
    ) -> Result<i64> {
        let mut child = DatabaseObject::catalog(0, name, kind);
        let text = ddl::constraint_text(kind, &constraint);
        child.details = ObjectDetails::Constraint(constraint);
        child.set_definition(text);
        self.seed(|c| c.add_child(schema, table, child, None))
    }

    /// Adds a primary key, unique constraint or index.
    pub fn add_index(&self, schema: &str, table: &str, name: &str, kind: ObjectKind, index: IndexDetails) -> Result<i64> {
        let mut child = DatabaseObject::catalog(0, name, kind);
        let text = ddl::index_text(schema, table, kind, &index);
        child.details = ObjectDetails::Index(index);
        child.set_definition(text);
        self.seed(|c| c.add_child(schema, table, child, None))
    }

    pub fn add_foreign_key(&self, schema: &str, table: &str, name: &str, fk: ForeignKeyDetails) -> Result<i64> {
        let mut child = DatabaseObject::catalog(0, name, ObjectKind::ForeignKey);
        let text = ddl::foreign_key_text(&fk);
        child.details = ObjectDetails::ForeignKey(fk);
        child.set_definition(text);
        self.seed(|c| c.add_child(schema, table, child, None))
    }

    /// Next `count` logins fail.
    pub fn refuse_connections(&self, count: usize) {
        self.state.lock().refuse_connects = count;
    }

    /// Next `count` statements fail with a transport error and break their session.
    pub fn fail_transport(&self, count: usize) {
        self.state.lock().transport_failures = count;
    }

    /// Marks every open session dead.
    pub fn kill_sessions(&self) {
        self.state.lock().epoch += 1;
    }

    /// Statements containing `pattern` fail with an execution error.
    pub fn fail_statements_containing(&self, pattern: &str) {
        self.state.lock().fail_patterns.push(pattern.to_string());
    }

    pub fn clear_statement_failures(&self) {
        self.state.lock().fail_patterns.clear();
    }

    /// DDL statements that reached the committed catalog, in order.
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    /// Looks a path up in the committed catalog.
    pub fn lookup(&self, path: &str) -> Option<DatabaseObject> {
        let path = ObjectPath::parse(path).ok()?;
        let state = self.state.lock();
        let segments = path.segments();
        let schema = state.catalog.schema(segments.first()?)?;
        let Some(name) = segments.get(1) else {
            return Some(schema.object.clone());
        };
        let node = schema.objects.iter().find(|o| &o.object.name == name)?;
        match segments.get(2) {
            None => Some(node.object.clone()),
            Some(child) => node.children.iter().find(|c| &c.name == child).cloned(),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Module source as committed.
    pub fn source_of(&self, path: &str) -> Option<String> {
        let object = self.lookup(path)?;
        self.state.lock().catalog.sources.get(&object.object_id).cloned()
    }

    fn snapshot(&self) -> CatalogModel {
        self.state.lock().catalog.clone()
    }
}

impl Connector for MemoryServer {
    fn connect(&self) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(FsError::ConnectionFailed("login failed".into()));
        }
        state.connects += 1;
        state.open_sessions += 1;
        let id = state.next_session;
        state.next_session += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            id,
            epoch: state.epoch,
            tx: None,
            closed: false,
            broken: false,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<ServerState>>,
    id: usize,
    epoch: u64,
    tx: Option<Transaction>,
    closed: bool,
    broken: bool,
}

impl Session for MemorySession {
    fn execute(&mut self, sql: &str) -> Result<RowSet> {
        let mut state = self.state.lock();
        if self.closed || self.broken || self.epoch < state.epoch {
            return Err(FsError::SessionDead { slot: self.id });
        }
        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            self.broken = true;
            return Err(FsError::ConnectionFailed("connection reset by peer".into()));
        }
        state.statements.push(sql.to_string());
        let failure = |message: String| FsError::ExecutionFailed {
            statement: sql.to_string(),
            message,
        };
        if let Some(pattern) = state.fail_patterns.iter().find(|p| sql.contains(p.as_str())) {
            return Err(failure(format!("injected failure on '{}'", pattern)));
        }

        let command = sql.trim().to_ascii_uppercase();
        match command.as_str() {
            "BEGIN TRANSACTION" | "BEGIN TRAN" => {
                self.tx = Some(Transaction {
                    model: state.catalog.clone(),
                    statements: Vec::new(),
                });
                return Ok(RowSet::default());
            }
            "COMMIT" | "COMMIT TRANSACTION" => {
                let tx = self.tx.take().ok_or_else(|| FsError::ExecutionFailed {
                    statement: sql.to_string(),
                    message: "COMMIT without BEGIN TRANSACTION".into(),
                })?;
                state.catalog = tx.model;
                state.committed.extend(tx.statements);
                return Ok(RowSet::default());
            }
            "ROLLBACK" | "ROLLBACK TRANSACTION" => {
                self.tx = None;
                return Ok(RowSet::default());
            }
            _ => {}
        }
        if command.starts_with("SELECT") {
            return Ok(RowSet::default());
        }

        match self.tx.as_mut() {
            Some(tx) => {
                tx.model.apply(sql).map_err(failure)?;
                tx.statements.push(sql.to_string());
            }
            None => {
                state.catalog.apply(sql).map_err(failure)?;
                state.committed.push(sql.to_string());
            }
        }
        debug!("Session {} applied: {}", self.id, sql);
        Ok(RowSet::default())
    }

    fn is_dead(&self) -> bool {
        self.closed || self.broken || self.epoch < self.state.lock().epoch
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tx = None;
            self.state.lock().open_sessions -= 1;
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

fn matches_name(object: &DatabaseObject, name: Option<&str>) -> bool {
    name.map_or(true, |n| object.name == n)
}

impl MetadataSource for MemoryServer {
    fn fetch_schemas(&self, conn: &mut PooledSession<'_>, name: Option<&str>) -> Result<Vec<DatabaseObject>> {
        conn.execute("SELECT name, schema_id FROM sys.schemas")?;
        let catalog = self.snapshot();
        Ok(catalog
            .schemas
            .iter()
            .map(|s| s.object.clone())
            .filter(|o| matches_name(o, name))
            .collect())
    }

    fn fetch_schema_objects(
        &self,
        conn: &mut PooledSession<'_>,
        schema: &DatabaseObject,
        name: Option<&str>,
    ) -> Result<Vec<DatabaseObject>> {
        conn.execute(&format!(
            "SELECT name, object_id, type FROM sys.objects WHERE schema_id = {} AND parent_object_id = 0",
            schema.object_id
        ))?;
        let catalog = self.snapshot();
        Ok(catalog
            .schemas
            .iter()
            .filter(|s| s.object.object_id == schema.object_id)
            .flat_map(|s| s.objects.iter().map(|o| o.object.clone()))
            .filter(|o| matches_name(o, name))
            .collect())
    }

    fn fetch_table_objects(
        &self,
        conn: &mut PooledSession<'_>,
        schema: &DatabaseObject,
        table: &DatabaseObject,
        name: Option<&str>,
    ) -> Result<Vec<DatabaseObject>> {
        conn.execute(&format!(
            "SELECT name, column_id FROM sys.columns WHERE object_id = {}",
            table.object_id
        ))?;
        let catalog = self.snapshot();
        Ok(catalog
            .schemas
            .iter()
            .filter(|s| s.object.object_id == schema.object_id)
            .flat_map(|s| s.objects.iter())
            .filter(|o| o.object.object_id == table.object_id)
            .flat_map(|o| o.children.iter().cloned())
            .filter(|o| matches_name(o, name))
            .collect())
    }

    fn fetch_object_text(&self, conn: &mut PooledSession<'_>, object: &DatabaseObject) -> Result<String> {
        conn.execute(&format!("SELECT definition FROM sys.sql_modules WHERE object_id = {}", object.object_id))?;
        self.state
            .lock()
            .catalog
            .sources
            .get(&object.object_id)
            .cloned()
            .ok_or_else(|| FsError::ExecutionFailed {
                statement: "sp_helptext".into(),
                message: format!("no source text for object {}", object.object_id),
            })
    }
}
