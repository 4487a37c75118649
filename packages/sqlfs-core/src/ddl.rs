//! DDL text generation.
//!
//! Two directions live here: file texts built from catalog metadata (what a
//! read returns for a column, constraint, index or foreign key), and the
//! statements a written text turns into. Statements stay structured until the
//! deploy queue renders them, because coalescing may flip an object between
//! create and alter after the statement was queued.

use crate::classify::{Classification, ModuleSpans};
use crate::error::{FsError, Result};
use crate::object::{
    ColumnDetails, ConstraintDetails, DatabaseObject, ForeignKeyAction, ForeignKeyDetails,
    IndexDetails, ObjectKind,
};
use crate::path::ObjectPath;

/// Brackets an identifier, doubling any closing bracket.
pub fn quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `[schema].[name]`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote(schema), quote(name))
}

/// Single-quoted string literal.
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Structured statement held by a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateSchema {
        schema: String,
    },
    /// Column clauses are folded in when the queue is finalized
    CreateTable {
        schema: String,
        table: String,
    },
    Column {
        schema: String,
        table: String,
        name: String,
        definition: String,
    },
    /// Check or default constraint
    Constraint {
        schema: String,
        table: String,
        name: String,
        kind: ObjectKind,
        body: String,
        disabled: bool,
        not_for_replication: bool,
    },
    /// Primary key or unique constraint
    Key {
        schema: String,
        table: String,
        name: String,
        primary: bool,
        body: String,
    },
    Index {
        schema: String,
        table: String,
        name: String,
        unique: bool,
        body: String,
    },
    ForeignKey {
        schema: String,
        table: String,
        name: String,
        body: String,
        disabled: bool,
    },
    Module {
        schema: String,
        name: String,
        /// Owning table for triggers
        table: Option<String>,
        text: String,
        spans: ModuleSpans,
    },
    /// Drops and renames, rendered when queued
    Raw(String),
}

impl Statement {
    /// Builds the statement for a classified fragment written at `path`.
    ///
    /// # Arguments
    /// * `path` - Depth 2 for procedures and functions, depth 3 for table-scoped objects
    /// * `text` - Full written text
    /// * `class` - Classifier output for `text`
    ///
    /// # Returns
    /// `Result<Statement>`, `Unsupported` when the fragment does not belong at this depth.
    pub fn for_fragment(path: &ObjectPath, text: &str, class: &Classification) -> Result<Statement> {
        let (schema, name) = match (path.schema(), path.name()) {
            (Some(schema), Some(name)) if path.depth() >= 2 => (schema.to_string(), name.to_string()),
            _ => return Err(FsError::unsupported(path.key(), "files live below a schema")),
        };
        let table = path.table().map(str::to_string);
        let body = class.body_text(text).to_string();

        let scoped = |table: Option<String>| {
            table.ok_or_else(|| {
                FsError::unsupported(path.key(), format!("{:?} must live in a table", class.kind))
            })
        };

        let statement = match class.kind {
            ObjectKind::Column => Statement::Column {
                schema,
                table: scoped(table)?,
                name,
                definition: body,
            },
            ObjectKind::CheckConstraint | ObjectKind::DefaultConstraint => Statement::Constraint {
                schema,
                table: scoped(table)?,
                name,
                kind: class.kind,
                body,
                disabled: class.disabled,
                not_for_replication: class.not_for_replication,
            },
            ObjectKind::PrimaryKey | ObjectKind::Unique => Statement::Key {
                schema,
                table: scoped(table)?,
                name,
                primary: class.kind == ObjectKind::PrimaryKey,
                body,
            },
            ObjectKind::Index => Statement::Index {
                schema,
                table: scoped(table)?,
                name,
                unique: class.unique,
                body,
            },
            ObjectKind::ForeignKey => Statement::ForeignKey {
                schema,
                table: scoped(table)?,
                name,
                body,
                disabled: class.disabled,
            },
            ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger => {
                let spans = class
                    .module
                    .clone()
                    .ok_or_else(|| FsError::parse_failed(path.key(), "module without name span"))?;
                let table = if class.kind == ObjectKind::Trigger {
                    Some(scoped(table)?)
                } else if table.is_some() {
                    return Err(FsError::unsupported(
                        path.key(),
                        "procedures and functions live directly in a schema",
                    ));
                } else {
                    None
                };
                Statement::Module {
                    schema,
                    name,
                    table,
                    text: text.to_string(),
                    spans,
                }
            }
            other => {
                return Err(FsError::unsupported(
                    path.key(),
                    format!("{:?} cannot be written as a file", other),
                ))
            }
        };
        Ok(statement)
    }

    /// Renders the executable SQL.
    ///
    /// # Arguments
    /// * `deployed` - Whether the target object already exists in the database
    ///
    /// # Returns
    /// `None` when nothing has to run (creating a directory that already exists).
    pub fn render(&self, deployed: bool) -> Option<String> {
        let sql = match self {
            Statement::CreateSchema { schema } => {
                if deployed {
                    return None;
                }
                format!("CREATE SCHEMA {}", quote(schema))
            }
            Statement::CreateTable { schema, table } => {
                if deployed {
                    return None;
                }
                create_table(schema, table, &[])
            }
            Statement::Column {
                schema,
                table,
                name,
                definition,
            } => {
                let verb = if deployed { "ALTER COLUMN" } else { "ADD" };
                format!(
                    "ALTER TABLE {} {} {} {}",
                    qualified(schema, table),
                    verb,
                    quote(name),
                    definition
                )
            }
            Statement::Constraint {
                schema,
                table,
                name,
                kind,
                body,
                disabled,
                not_for_replication,
            } => {
                let mut sql = redefine_prefix(schema, table, name, deployed);
                if *kind == ObjectKind::CheckConstraint {
                    sql.push_str(check_option(*disabled));
                    sql.push(' ');
                }
                sql.push_str(&format!("ADD CONSTRAINT {} ", quote(name)));
                if *kind == ObjectKind::CheckConstraint {
                    sql.push_str("CHECK ");
                    if *not_for_replication {
                        sql.push_str("NOT FOR REPLICATION ");
                    }
                } else {
                    sql.push_str("DEFAULT ");
                }
                sql.push_str(body);
                sql
            }
            Statement::Key {
                schema,
                table,
                name,
                primary,
                body,
            } => {
                let mut sql = redefine_prefix(schema, table, name, deployed);
                let head = if *primary { "PRIMARY KEY" } else { "UNIQUE" };
                sql.push_str(&format!("ADD CONSTRAINT {} {} {}", quote(name), head, body));
                sql
            }
            Statement::Index {
                schema,
                table,
                name,
                unique,
                body,
            } => {
                let mut sql = String::new();
                if deployed {
                    sql.push_str(&format!(
                        "DROP INDEX {} ON {}\n",
                        quote(name),
                        qualified(schema, table)
                    ));
                }
                sql.push_str("CREATE ");
                if *unique {
                    sql.push_str("UNIQUE ");
                }
                sql.push_str(&format!(
                    "NONCLUSTERED INDEX {} ON {} {}",
                    quote(name),
                    qualified(schema, table),
                    body
                ));
                sql
            }
            Statement::ForeignKey {
                schema,
                table,
                name,
                body,
                disabled,
            } => {
                let mut sql = redefine_prefix(schema, table, name, deployed);
                sql.push_str(check_option(*disabled));
                sql.push_str(&format!(" ADD CONSTRAINT {} FOREIGN KEY {}", quote(name), body));
                sql
            }
            Statement::Module {
                schema,
                name,
                table,
                text,
                spans,
            } => render_module(schema, name, table.as_deref(), text, spans, deployed),
            Statement::Raw(sql) => sql.clone(),
        };
        Some(sql.trim_end().to_string())
    }

    /// Clause used when a column is folded into its table's `CREATE TABLE`.
    pub fn column_clause(&self) -> Option<String> {
        match self {
            Statement::Column {
                name, definition, ..
            } => Some(format!("{} {}", quote(name), definition.trim_end())),
            _ => None,
        }
    }
}

fn check_option(disabled: bool) -> &'static str {
    if disabled {
        "WITH NOCHECK"
    } else {
        "WITH CHECK"
    }
}

/// `ALTER TABLE [s].[t] ` preceded by a drop when the constraint exists.
fn redefine_prefix(schema: &str, table: &str, name: &str, deployed: bool) -> String {
    let target = qualified(schema, table);
    let mut sql = String::new();
    if deployed {
        sql.push_str(&format!("ALTER TABLE {} DROP CONSTRAINT {}\n", target, quote(name)));
    }
    sql.push_str(&format!("ALTER TABLE {} ", target));
    sql
}

fn render_module(
    schema: &str,
    name: &str,
    table: Option<&str>,
    text: &str,
    spans: &ModuleSpans,
    deployed: bool,
) -> String {
    let keyword = if deployed { "ALTER" } else { "CREATE" };
    let mut sql = String::with_capacity(text.len() + 16);
    sql.push_str(&text[..spans.keyword.start]);
    sql.push_str(keyword);
    sql.push_str(&text[spans.keyword.end..spans.name.start]);
    sql.push_str(&qualified(schema, name));
    match (&spans.target, table) {
        (Some(target), Some(table)) => {
            sql.push_str(&text[spans.name.end..target.start]);
            sql.push_str(&qualified(schema, table));
            sql.push_str(&text[target.end..]);
        }
        _ => sql.push_str(&text[spans.name.end..]),
    }
    sql
}

/// Closes a `CREATE TABLE` statement around its folded column clauses.
pub fn create_table(schema: &str, table: &str, clauses: &[String]) -> String {
    let mut sql = format!("CREATE TABLE {} (", qualified(schema, table));
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str("\n  ");
        sql.push_str(clause);
    }
    sql.push_str("\n)");
    sql
}

/// Generates the drop statement for an object at `path`.
///
/// # Arguments
/// * `path` - Location of the object, supplies schema and owning table
/// * `object` - The object being dropped
///
/// # Returns
/// `Result<String>`, `Unsupported` for kinds without a drop form.
pub fn drop_statement(path: &ObjectPath, object: &DatabaseObject) -> Result<String> {
    let schema = path
        .schema()
        .ok_or_else(|| FsError::unsupported(path.key(), "cannot drop the database root"))?;
    let owning_table = || {
        path.table()
            .ok_or_else(|| FsError::unsupported(path.key(), "table-scoped object outside a table"))
    };

    let sql = match object.kind {
        ObjectKind::Column => format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified(schema, owning_table()?),
            quote(&object.name)
        ),
        ObjectKind::CheckConstraint
        | ObjectKind::DefaultConstraint
        | ObjectKind::ForeignKey
        | ObjectKind::PrimaryKey
        | ObjectKind::Unique => format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            qualified(schema, owning_table()?),
            quote(&object.name)
        ),
        ObjectKind::Schema => format!("DROP SCHEMA {}", quote(&object.name)),
        ObjectKind::Index => format!(
            "DROP INDEX {} ON {}",
            quote(&object.name),
            qualified(schema, owning_table()?)
        ),
        kind @ (ObjectKind::Table
        | ObjectKind::View
        | ObjectKind::Function
        | ObjectKind::Procedure
        | ObjectKind::Trigger) => {
            let keyword = kind.drop_keyword().unwrap_or("TABLE");
            format!("DROP {} {}", keyword, qualified(schema, &object.name))
        }
        other => {
            return Err(FsError::unsupported(
                path.key(),
                format!("no drop statement for {:?}", other),
            ))
        }
    };
    Ok(sql)
}

/// Generates the in-place rename for an object that exists in the database.
///
/// Schema-level objects moving between schemas are transferred first, then
/// renamed inside the new schema.
pub fn rename_statement(old: &ObjectPath, new: &ObjectPath, kind: ObjectKind) -> Result<String> {
    let (Some(old_schema), Some(old_name), Some(new_schema), Some(new_name)) =
        (old.schema(), old.name(), new.schema(), new.name())
    else {
        return Err(FsError::unsupported(old.key(), "cannot rename the root"));
    };
    if kind == ObjectKind::Trigger && old_name.starts_with('#') {
        return Err(FsError::unsupported(old.key(), "temporary triggers cannot be renamed"));
    }

    let mut statements = Vec::new();
    match old.depth() {
        2 => {
            if old_schema != new_schema {
                statements.push(format!(
                    "ALTER SCHEMA {} TRANSFER {}",
                    quote(new_schema),
                    qualified(old_schema, old_name)
                ));
            }
            if old_name != new_name {
                statements.push(format!(
                    "EXEC sp_rename {}, {}",
                    literal(&qualified(new_schema, old_name)),
                    literal(new_name)
                ));
            }
        }
        3 => {
            let table = old
                .table()
                .ok_or_else(|| FsError::unsupported(old.key(), "missing owning table"))?;
            let object_type = match kind {
                ObjectKind::Column => Some("COLUMN"),
                ObjectKind::Index => Some("INDEX"),
                _ => None,
            };
            let source = match object_type {
                Some(_) => format!("{}.{}", qualified(old_schema, table), quote(old_name)),
                None => qualified(old_schema, old_name),
            };
            let mut sql = format!("EXEC sp_rename {}, {}", literal(&source), literal(new_name));
            if let Some(object_type) = object_type {
                sql.push_str(&format!(", {}", literal(object_type)));
            }
            statements.push(sql);
        }
        _ => return Err(FsError::unsupported(old.key(), "schemas cannot be renamed")),
    }
    Ok(statements.join("\n"))
}

/// File text of a column: `COLUMN <type>[(size)] [IDENTITY (s, i)] NULL|NOT NULL`.
pub fn column_text(column: &ColumnDetails) -> String {
    let type_name = column.type_name.as_str();
    let mut text = format!("COLUMN {}", type_name);

    if type_name == "float" {
        text.push_str(&format!("({})", column.precision));
    }
    if type_name == "numeric" || type_name == "decimal" {
        text.push_str(&format!("({}, {})", column.precision, column.scale));
    }
    if type_name.ends_with("char") || type_name.ends_with("binary") {
        if column.max_length < 0 {
            text.push_str("(MAX)");
        } else if type_name == "nvarchar" || type_name == "nchar" {
            text.push_str(&format!("({})", column.max_length / 2));
        } else {
            text.push_str(&format!("({})", column.max_length));
        }
    }

    if let Some(identity) = &column.identity {
        text.push_str(&format!(" IDENTITY ({}, {})", identity.seed, identity.increment));
        if identity.not_for_replication {
            text.push_str(" NOT FOR REPLICATION");
        }
    }
    text.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    text.push('\n');
    text
}

/// File text of a check or default constraint.
pub fn constraint_text(kind: ObjectKind, constraint: &ConstraintDetails) -> String {
    let mut text = String::new();
    if kind == ObjectKind::DefaultConstraint {
        text.push_str(&format!(
            "CONSTRAINT DEFAULT {} FOR {}",
            constraint.expression,
            quote(constraint.column_name.as_deref().unwrap_or_default())
        ));
    } else {
        text.push_str(check_option(constraint.disabled));
        text.push_str(" CONSTRAINT CHECK ");
        if constraint.not_for_replication {
            text.push_str("NOT FOR REPLICATION ");
        }
        text.push_str(&format!("({})", constraint.expression));
    }
    text.push('\n');
    text
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

/// File text of a primary key, unique constraint or index.
pub fn index_text(schema: &str, table: &str, kind: ObjectKind, index: &IndexDetails) -> String {
    let mut text = String::new();
    match kind {
        ObjectKind::PrimaryKey => text.push_str("CONSTRAINT PRIMARY KEY CLUSTERED "),
        ObjectKind::Unique => text.push_str("CONSTRAINT UNIQUE NONCLUSTERED "),
        _ => {
            if index.is_unique {
                text.push_str("UNIQUE ");
            }
            text.push_str(&format!("NONCLUSTERED INDEX ON {} ", qualified(schema, table)));
        }
    }
    text.push_str(&format!("( {} ) ", index.columns));
    if let Some(included) = &index.included_columns {
        text.push_str(&format!("INCLUDE ( {} ) ", included));
    }
    if let Some(filter) = &index.filter {
        text.push_str(&format!("WHERE {} ", filter));
    }
    text.push_str(&format!(
        "WITH ( PAD_INDEX = {}, IGNORE_DUP_KEY = {}, ALLOW_ROW_LOCKS = {}, ALLOW_PAGE_LOCKS = {}",
        on_off(index.is_padded),
        on_off(index.ignore_dup_key),
        on_off(index.allow_row_locks),
        on_off(index.allow_page_locks)
    ));
    if index.fill_factor > 0 {
        text.push_str(&format!(", FILLFACTOR = {}", index.fill_factor));
    }
    text.push_str(" )");
    if let Some(space) = &index.data_space {
        text.push_str(&format!(" ON {}", quote(space)));
    }
    text.push('\n');
    text
}

fn action_clause(event: &str, action: ForeignKeyAction) -> String {
    match action {
        ForeignKeyAction::NoAction => String::new(),
        other => format!(" ON {} {}", event, other.as_sql()),
    }
}

/// File text of a foreign key.
pub fn foreign_key_text(fk: &ForeignKeyDetails) -> String {
    let mut text = format!(
        "{} CONSTRAINT FOREIGN KEY ({}) REFERENCES {} ({})",
        check_option(fk.disabled),
        fk.columns,
        fk.referenced_object,
        fk.referenced_columns
    );
    text.push_str(&action_clause("UPDATE", fk.on_update));
    text.push_str(&action_clause("DELETE", fk.on_delete));
    if fk.not_for_replication {
        text.push_str(" NOT FOR REPLICATION");
    }
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, KeywordClassifier};
    use crate::object::IdentitySpec;

    fn path(raw: &str) -> ObjectPath {
        ObjectPath::parse(raw).unwrap()
    }

    fn statement(raw: &str, text: &str) -> Statement {
        let class = KeywordClassifier.classify(text).unwrap();
        Statement::for_fragment(&path(raw), text, &class).unwrap()
    }

    #[test]
    fn quoting_escapes_brackets() {
        assert_eq!(quote("a]b"), "[a]]b]");
        assert_eq!(qualified("dbo", "t"), "[dbo].[t]");
    }

    #[test]
    fn column_add_versus_alter() {
        let stmt = statement("/dbo/orders/qty", "COLUMN int NOT NULL\n");
        assert_eq!(
            stmt.render(false).unwrap(),
            "ALTER TABLE [dbo].[orders] ADD [qty] int NOT NULL"
        );
        assert_eq!(
            stmt.render(true).unwrap(),
            "ALTER TABLE [dbo].[orders] ALTER COLUMN [qty] int NOT NULL"
        );
        assert_eq!(stmt.column_clause().unwrap(), "[qty] int NOT NULL");
    }

    #[test]
    fn create_table_folds_clauses() {
        let sql = create_table("dbo", "t", &["[a] int NULL".into(), "[b] int NULL".into()]);
        assert_eq!(sql, "CREATE TABLE [dbo].[t] (\n  [a] int NULL,\n  [b] int NULL\n)");
    }

    #[test]
    fn check_constraint_redefinition_drops_first() {
        let stmt = statement("/dbo/orders/ck_qty", "WITH NOCHECK CONSTRAINT CHECK ([qty] > 0)");
        assert_eq!(
            stmt.render(false).unwrap(),
            "ALTER TABLE [dbo].[orders] WITH NOCHECK ADD CONSTRAINT [ck_qty] CHECK ([qty] > 0)"
        );
        assert_eq!(
            stmt.render(true).unwrap(),
            "ALTER TABLE [dbo].[orders] DROP CONSTRAINT [ck_qty]\n\
             ALTER TABLE [dbo].[orders] WITH NOCHECK ADD CONSTRAINT [ck_qty] CHECK ([qty] > 0)"
        );
    }

    #[test]
    fn default_and_key_constraints() {
        let stmt = statement("/dbo/orders/df_qty", "CONSTRAINT DEFAULT ((0)) FOR [qty]");
        assert_eq!(
            stmt.render(false).unwrap(),
            "ALTER TABLE [dbo].[orders] ADD CONSTRAINT [df_qty] DEFAULT ((0)) FOR [qty]"
        );
        let stmt = statement("/dbo/orders/pk", "CONSTRAINT PRIMARY KEY CLUSTERED ( [id] ASC )");
        assert_eq!(
            stmt.render(false).unwrap(),
            "ALTER TABLE [dbo].[orders] ADD CONSTRAINT [pk] PRIMARY KEY CLUSTERED ( [id] ASC )"
        );
    }

    #[test]
    fn index_recreated_when_deployed() {
        let stmt = statement("/dbo/orders/ix", "UNIQUE NONCLUSTERED INDEX ON [dbo].[orders] ( [a] ASC )");
        assert_eq!(
            stmt.render(true).unwrap(),
            "DROP INDEX [ix] ON [dbo].[orders]\n\
             CREATE UNIQUE NONCLUSTERED INDEX [ix] ON [dbo].[orders] ( [a] ASC )"
        );
    }

    #[test]
    fn module_name_and_keyword_rewritten() {
        let stmt = statement("/sales/get_orders", "create procedure dbo.old_name AS SELECT 1\n");
        assert_eq!(
            stmt.render(false).unwrap(),
            "CREATE procedure [sales].[get_orders] AS SELECT 1"
        );
        assert_eq!(
            stmt.render(true).unwrap(),
            "ALTER procedure [sales].[get_orders] AS SELECT 1"
        );
    }

    #[test]
    fn trigger_target_rewritten() {
        let stmt = statement(
            "/dbo/orders/audit",
            "CREATE TRIGGER x ON other AFTER INSERT AS SELECT 1",
        );
        assert_eq!(
            stmt.render(false).unwrap(),
            "CREATE TRIGGER [dbo].[audit] ON [dbo].[orders] AFTER INSERT AS SELECT 1"
        );
    }

    #[test]
    fn fragments_must_match_their_depth() {
        let text = "COLUMN int NULL";
        let class = KeywordClassifier.classify(text).unwrap();
        assert!(matches!(
            Statement::for_fragment(&path("/dbo/qty"), text, &class),
            Err(FsError::Unsupported { .. })
        ));
        let text = "CREATE PROCEDURE p AS SELECT 1";
        let class = KeywordClassifier.classify(text).unwrap();
        assert!(Statement::for_fragment(&path("/dbo/orders/p"), text, &class).is_err());
    }

    #[test]
    fn drop_statements_per_kind() {
        let column = DatabaseObject::catalog(1, "qty", ObjectKind::Column);
        assert_eq!(
            drop_statement(&path("/dbo/orders/qty"), &column).unwrap(),
            "ALTER TABLE [dbo].[orders] DROP COLUMN [qty]"
        );
        let fk = DatabaseObject::catalog(2, "fk", ObjectKind::ForeignKey);
        assert_eq!(
            drop_statement(&path("/dbo/orders/fk"), &fk).unwrap(),
            "ALTER TABLE [dbo].[orders] DROP CONSTRAINT [fk]"
        );
        let schema = DatabaseObject::catalog(5, "sales", ObjectKind::Schema);
        assert_eq!(drop_statement(&path("/sales"), &schema).unwrap(), "DROP SCHEMA [sales]");
        let view = DatabaseObject::catalog(3, "v", ObjectKind::View);
        assert_eq!(drop_statement(&path("/dbo/v"), &view).unwrap(), "DROP VIEW [dbo].[v]");
        let index = DatabaseObject::catalog(4, "ix", ObjectKind::Index);
        assert_eq!(
            drop_statement(&path("/dbo/orders/ix"), &index).unwrap(),
            "DROP INDEX [ix] ON [dbo].[orders]"
        );
        let placeholder = DatabaseObject::local("tmp", ObjectKind::TempPlaceholder);
        assert!(drop_statement(&path("/dbo/tmp"), &placeholder).is_err());
    }

    #[test]
    fn renames() {
        assert_eq!(
            rename_statement(&path("/dbo/orders"), &path("/sales/orders2"), ObjectKind::Table).unwrap(),
            "ALTER SCHEMA [sales] TRANSFER [dbo].[orders]\nEXEC sp_rename '[sales].[orders]', 'orders2'"
        );
        assert_eq!(
            rename_statement(&path("/dbo/t/o'ld"), &path("/dbo/t/new"), ObjectKind::Column).unwrap(),
            "EXEC sp_rename '[dbo].[t].[o''ld]', 'new', 'COLUMN'"
        );
        assert_eq!(
            rename_statement(&path("/dbo/t/ck"), &path("/dbo/t/ck2"), ObjectKind::CheckConstraint).unwrap(),
            "EXEC sp_rename '[dbo].[ck]', 'ck2'"
        );
        assert!(rename_statement(&path("/dbo/t/#tr"), &path("/dbo/t/tr"), ObjectKind::Trigger).is_err());
        assert!(rename_statement(&path("/dbo"), &path("/sales"), ObjectKind::Schema).is_err());
    }

    #[test]
    fn catalog_file_texts() {
        let column = ColumnDetails {
            type_name: "nvarchar".into(),
            max_length: 100,
            precision: 0,
            scale: 0,
            nullable: true,
            identity: None,
        };
        assert_eq!(column_text(&column), "COLUMN nvarchar(50) NULL\n");

        let column = ColumnDetails {
            type_name: "int".into(),
            max_length: 4,
            precision: 10,
            scale: 0,
            nullable: false,
            identity: Some(IdentitySpec {
                seed: "1".into(),
                increment: "1".into(),
                not_for_replication: true,
            }),
        };
        assert_eq!(
            column_text(&column),
            "COLUMN int IDENTITY (1, 1) NOT FOR REPLICATION NOT NULL\n"
        );

        let fk = ForeignKeyDetails {
            columns: "[customer_id]".into(),
            referenced_object: "[dbo].[customers]".into(),
            referenced_columns: "[id]".into(),
            on_delete: ForeignKeyAction::Cascade,
            ..Default::default()
        };
        assert_eq!(
            foreign_key_text(&fk),
            "WITH CHECK CONSTRAINT FOREIGN KEY ([customer_id]) REFERENCES [dbo].[customers] ([id]) ON DELETE CASCADE\n"
        );

        let index = IndexDetails {
            columns: "[id] ASC".into(),
            allow_row_locks: true,
            allow_page_locks: true,
            ..Default::default()
        };
        assert_eq!(
            index_text("dbo", "t", ObjectKind::PrimaryKey, &index),
            "CONSTRAINT PRIMARY KEY CLUSTERED ( [id] ASC ) WITH ( PAD_INDEX = OFF, IGNORE_DUP_KEY = OFF, ALLOW_ROW_LOCKS = ON, ALLOW_PAGE_LOCKS = ON )\n"
        );
    }

    #[test]
    fn catalog_texts_classify_back_to_their_kind() {
        let constraint = ConstraintDetails {
            column_name: Some("qty".into()),
            expression: "([qty]>(0))".into(),
            ..Default::default()
        };
        let text = constraint_text(ObjectKind::CheckConstraint, &constraint);
        let class = KeywordClassifier.classify(&text).unwrap();
        assert_eq!(class.kind, ObjectKind::CheckConstraint);

        let index = IndexDetails {
            columns: "[a] ASC".into(),
            ..Default::default()
        };
        let text = index_text("dbo", "t", ObjectKind::Index, &index);
        let class = KeywordClassifier.classify(&text).unwrap();
        assert_eq!(class.kind, ObjectKind::Index);
    }
}
