//! Schema objects and their filesystem projection.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Kind of a schema entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// The database root directory
    Database,
    Schema,
    Table,
    View,
    Column,
    CheckConstraint,
    DefaultConstraint,
    PrimaryKey,
    Unique,
    Index,
    ForeignKey,
    Procedure,
    Function,
    Trigger,
    /// Empty file created locally, kind not yet known
    TempPlaceholder,
}

impl ObjectKind {
    /// Directories are the root, schemas, tables and views.
    pub fn is_directory(self) -> bool {
        matches!(
            self,
            ObjectKind::Database | ObjectKind::Schema | ObjectKind::Table | ObjectKind::View
        )
    }

    /// Objects living directly under a table or view.
    pub fn is_table_scoped(self) -> bool {
        matches!(
            self,
            ObjectKind::Column
                | ObjectKind::CheckConstraint
                | ObjectKind::DefaultConstraint
                | ObjectKind::PrimaryKey
                | ObjectKind::Unique
                | ObjectKind::Index
                | ObjectKind::ForeignKey
                | ObjectKind::Trigger
        )
    }

    /// Stored modules whose text carries their own name.
    pub fn is_module(self) -> bool {
        matches!(
            self,
            ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger
        )
    }

    /// Maps a `sys.objects` type code to a kind.
    ///
    /// Index and column rows come from their own catalog views and use the
    /// pseudo codes `$X` and `$L`.
    pub fn from_catalog_code(code: &str) -> Option<ObjectKind> {
        let kind = match code.trim() {
            "U" | "S" | "IT" => ObjectKind::Table,
            "V" => ObjectKind::View,
            "C" => ObjectKind::CheckConstraint,
            "D" => ObjectKind::DefaultConstraint,
            "PK" => ObjectKind::PrimaryKey,
            "UQ" => ObjectKind::Unique,
            "F" => ObjectKind::ForeignKey,
            "P" | "PC" => ObjectKind::Procedure,
            "FN" | "IF" | "TF" | "FS" | "FT" | "AF" => ObjectKind::Function,
            "TR" | "TA" => ObjectKind::Trigger,
            "$X" => ObjectKind::Index,
            "$L" => ObjectKind::Column,
            _ => return None,
        };
        Some(kind)
    }

    /// Keyword used in `DROP <keyword>` statements for schema-level objects.
    pub fn drop_keyword(self) -> Option<&'static str> {
        match self {
            ObjectKind::Schema => Some("SCHEMA"),
            ObjectKind::Table => Some("TABLE"),
            ObjectKind::View => Some("VIEW"),
            ObjectKind::Procedure => Some("PROCEDURE"),
            ObjectKind::Function => Some("FUNCTION"),
            ObjectKind::Trigger => Some("TRIGGER"),
            ObjectKind::Index => Some("INDEX"),
            _ => None,
        }
    }
}

/// Identity specification of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    pub seed: String,
    pub increment: String,
    pub not_for_replication: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDetails {
    pub type_name: String,
    /// Byte length as reported by the catalog, -1 for MAX
    pub max_length: i32,
    pub precision: u8,
    pub scale: u8,
    pub nullable: bool,
    pub identity: Option<IdentitySpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexDetails {
    /// Key columns, already bracketed and ordered (`[a] ASC, [b] DESC`)
    pub columns: String,
    pub included_columns: Option<String>,
    pub is_unique: bool,
    pub is_padded: bool,
    pub ignore_dup_key: bool,
    pub allow_row_locks: bool,
    pub allow_page_locks: bool,
    pub fill_factor: u8,
    pub filter: Option<String>,
    pub data_space: Option<String>,
}

/// Referential action codes as stored in `sys.foreign_keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// 1 CASCADE, 2 SET NULL, 3 SET DEFAULT, anything else NO ACTION.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ForeignKeyAction::Cascade,
            2 => ForeignKeyAction::SetNull,
            3 => ForeignKeyAction::SetDefault,
            _ => ForeignKeyAction::NoAction,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForeignKeyDetails {
    pub columns: String,
    /// Bracketed `[schema].[table]` of the referenced table
    pub referenced_object: String,
    pub referenced_columns: String,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
    pub disabled: bool,
    pub not_for_replication: bool,
}

/// Check and default constraint flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstraintDetails {
    pub column_name: Option<String>,
    /// Constraint expression as stored in the catalog
    pub expression: String,
    pub disabled: bool,
    pub not_for_replication: bool,
}

/// Kind-specific payload of a [`DatabaseObject`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum ObjectDetails {
    #[default]
    None,
    Column(ColumnDetails),
    Index(IndexDetails),
    ForeignKey(ForeignKeyDetails),
    Constraint(ConstraintDetails),
}

/// Authoritative or pending representation of one schema entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseObject {
    /// 0 while the object exists only locally
    pub object_id: i64,
    pub parent_id: i64,
    pub schema_id: i64,
    pub name: String,
    pub kind: ObjectKind,
    /// Definition text, `None` until loaded
    pub definition: Option<String>,
    pub length: u64,
    /// Seconds since the Unix epoch
    pub create_time: i64,
    pub modify_time: i64,
    pub details: ObjectDetails,
}

impl DatabaseObject {
    /// Creates a local object that the database has not seen yet.
    pub fn local(name: impl Into<String>, kind: ObjectKind) -> Self {
        let now = unix_now();
        Self {
            object_id: 0,
            parent_id: 0,
            schema_id: 0,
            name: name.into(),
            kind,
            definition: None,
            length: 0,
            create_time: now,
            modify_time: now,
            details: ObjectDetails::None,
        }
    }

    /// Creates an object known to the database.
    pub fn catalog(object_id: i64, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            object_id,
            ..Self::local(name, kind)
        }
    }

    /// The synthetic root directory.
    pub fn root() -> Self {
        Self::catalog(0, "/", ObjectKind::Database)
    }

    /// True once the object exists in the database.
    pub fn is_deployed(&self) -> bool {
        self.object_id != 0
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == ObjectKind::TempPlaceholder
    }

    /// Identity columns must never be dropped and rebuilt silently.
    pub fn is_identity_column(&self) -> bool {
        match &self.details {
            ObjectDetails::Column(column) => column.identity.is_some(),
            _ => false,
        }
    }

    /// Replaces the definition text and keeps `length` in step.
    pub fn set_definition(&mut self, text: String) {
        self.length = text.len() as u64;
        self.definition = Some(text);
        self.modify_time = unix_now();
    }
}

/// Whether a projected node is a directory or a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Directory,
    File,
}

/// Read-only snapshot of a [`DatabaseObject`] handed to the filesystem adapter.
///
/// The text sits behind a reader/writer lock so an adapter can share one
/// snapshot between concurrent readers while refreshing it.
#[derive(Debug)]
pub struct FileSystemObject {
    pub name: String,
    pub object_id: i64,
    pub file_type: FileType,
    pub length: u64,
    pub create_time: i64,
    pub modify_time: i64,
    /// When this snapshot was taken
    pub cached_time: Instant,
    definition: RwLock<Option<String>>,
}

impl FileSystemObject {
    pub fn definition(&self) -> Option<String> {
        self.definition.read().clone()
    }

    /// Swaps in fresh text, updating the reported length.
    pub fn refresh_definition(&mut self, text: Option<String>) {
        self.length = text.as_ref().map_or(0, |t| t.len() as u64);
        *self.definition.write() = text;
        self.cached_time = Instant::now();
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

impl From<&DatabaseObject> for FileSystemObject {
    fn from(object: &DatabaseObject) -> Self {
        let file_type = if object.kind.is_directory() {
            FileType::Directory
        } else {
            FileType::File
        };
        Self {
            name: object.name.clone(),
            object_id: object.object_id,
            file_type,
            length: object.length,
            create_time: object.create_time,
            modify_time: object.modify_time,
            cached_time: Instant::now(),
            definition: RwLock::new(object.definition.clone()),
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_codes_map_to_kinds() {
        assert_eq!(ObjectKind::from_catalog_code("U "), Some(ObjectKind::Table));
        assert_eq!(ObjectKind::from_catalog_code("TF"), Some(ObjectKind::Function));
        assert_eq!(ObjectKind::from_catalog_code("PK"), Some(ObjectKind::PrimaryKey));
        assert_eq!(ObjectKind::from_catalog_code("SQ"), None);
    }

    #[test]
    fn placeholder_is_local() {
        let placeholder = DatabaseObject::local("new_file", ObjectKind::TempPlaceholder);
        assert!(placeholder.is_placeholder());
        assert!(!placeholder.is_deployed());
    }

    #[test]
    fn projection_copies_the_object() {
        let mut object = DatabaseObject::catalog(42, "orders", ObjectKind::Table);
        object.set_definition("unused".into());
        let projection = FileSystemObject::from(&object);
        object.set_definition("changed later".into());

        assert!(projection.is_dir());
        assert_eq!(projection.object_id, 42);
        assert_eq!(projection.definition().as_deref(), Some("unused"));
        assert_eq!(projection.length, 6);
    }

    #[test]
    fn identity_detection() {
        let mut column = DatabaseObject::catalog(1, "id", ObjectKind::Column);
        assert!(!column.is_identity_column());
        column.details = ObjectDetails::Column(ColumnDetails {
            type_name: "int".into(),
            max_length: 4,
            precision: 10,
            scale: 0,
            nullable: false,
            identity: Some(IdentitySpec {
                seed: "1".into(),
                increment: "1".into(),
                not_for_replication: false,
            }),
        });
        assert!(column.is_identity_column());
    }

    #[test]
    fn foreign_key_action_codes() {
        assert_eq!(ForeignKeyAction::from_code(1).as_sql(), "CASCADE");
        assert_eq!(ForeignKeyAction::from_code(2).as_sql(), "SET NULL");
        assert_eq!(ForeignKeyAction::from_code(3).as_sql(), "SET DEFAULT");
        assert_eq!(ForeignKeyAction::from_code(7).as_sql(), "NO ACTION");
    }
}
