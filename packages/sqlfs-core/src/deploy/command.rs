//! Deploy queue entries.

use std::fmt;

use crate::ddl::Statement;
use crate::object::{DatabaseObject, ObjectKind};
use crate::path::ObjectPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    CreateOrAlter,
    Drop,
    Rename,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployAction::CreateOrAlter => "create-or-alter",
            DeployAction::Drop => "drop",
            DeployAction::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// One pending DDL operation.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub action: DeployAction,
    pub path: ObjectPath,
    /// Rename target
    pub path2: Option<ObjectPath>,
    pub kind: ObjectKind,
    /// Snapshot of the object when the command was queued; `object_id`
    /// decides between create and alter at render time
    pub object: DatabaseObject,
    pub statement: Statement,
    /// Superseded, must not execute
    pub disabled: bool,
    /// Directory drop that disabled this command; a re-create of the
    /// command's parent directory re-enables it
    pub disabled_by_dir: Option<ObjectPath>,
    /// Refers to an identity column, never dropped and re-created
    pub identity_protected: bool,
    /// Already covered by an earlier statement
    pub already_executed: bool,
    /// Table whose `CREATE TABLE` carries this column
    pub folded_into: Option<ObjectPath>,
}

impl PendingCommand {
    fn new(action: DeployAction, path: ObjectPath, object: DatabaseObject, statement: Statement) -> Self {
        Self {
            action,
            path,
            path2: None,
            kind: object.kind,
            identity_protected: object.is_identity_column(),
            object,
            statement,
            disabled: false,
            disabled_by_dir: None,
            already_executed: false,
            folded_into: None,
        }
    }

    pub fn create_or_alter(path: ObjectPath, object: DatabaseObject, statement: Statement) -> Self {
        Self::new(DeployAction::CreateOrAlter, path, object, statement)
    }

    /// `sql` comes from [`crate::ddl::drop_statement`].
    pub fn drop(path: ObjectPath, object: DatabaseObject, sql: String) -> Self {
        Self::new(DeployAction::Drop, path, object, Statement::Raw(sql))
    }

    /// `sql` comes from [`crate::ddl::rename_statement`].
    pub fn rename(old: ObjectPath, new: ObjectPath, object: DatabaseObject, sql: String) -> Self {
        let mut command = Self::new(DeployAction::Rename, old, object, Statement::Raw(sql));
        command.path2 = Some(new);
        command
    }

    /// Marks the command as touching an identity column.
    pub fn with_identity(mut self, identity: bool) -> Self {
        self.identity_protected |= identity;
        self
    }

    /// Executable SQL for the current deployment state.
    pub fn sql(&self) -> Option<String> {
        self.statement.render(self.object.is_deployed())
    }

    /// Neither superseded nor covered elsewhere.
    pub fn is_runnable(&self) -> bool {
        !self.disabled && !self.already_executed
    }

    /// True when either path of the command is `path`.
    pub fn touches(&self, path: &ObjectPath) -> bool {
        &self.path == path || self.path2.as_ref() == Some(path)
    }

    pub fn is_create_table(&self) -> bool {
        self.action == DeployAction::CreateOrAlter && matches!(self.statement, Statement::CreateTable { .. })
    }
}

impl fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.action, self.kind, self.path)?;
        if let Some(target) = &self.path2 {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}
