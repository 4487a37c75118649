//! Ordered queue of pending DDL with coalescing.
//!
//! Commands stay in causal order. A path index points at the most recent
//! command touching each path, so merge candidates are found without
//! scanning the queue.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::command::{DeployAction, PendingCommand};
use crate::ddl;
use crate::object::{DatabaseObject, ObjectKind};
use crate::path::ObjectPath;

/// How [`DeployQueue::push`] placed a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesced {
    Appended,
    /// Column carried by its table's `CREATE TABLE`
    Folded,
    /// Replaced the previous create-or-alter of the same path
    Merged,
    /// Cancelled the pending drop of the same path; the create now alters
    /// the object that was about to be dropped
    DropCancelled { object_id: i64 },
    /// Drop and re-create of an identity column, neither will run
    IdentityProtected,
    /// Drop of an object the database never saw; its creates were disabled
    Suppressed,
}

/// One statement of a drained batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Command summary for logs
    pub label: String,
    pub sql: String,
}

/// Commands drained from the queue for one flush.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<BatchItem>,
    /// Paths of every drained command, both sides of renames
    pub processed: Vec<ObjectPath>,
    /// Drained commands that had nothing to execute
    pub skipped: usize,
    /// Commands left queued behind an empty `CREATE TABLE`
    pub deferred: usize,
    /// The drained commands themselves, for [`DeployQueue::restore`]
    pub commands: Vec<PendingCommand>,
    /// Paths of objects this batch creates
    pub created: Vec<ObjectPath>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DeployQueue {
    commands: Vec<PendingCommand>,
    last: HashMap<ObjectPath, usize>,
    /// Objects created by the batch currently being deployed
    in_flight: HashSet<ObjectPath>,
}

impl DeployQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingCommand> {
        self.commands.iter()
    }

    /// Number of commands that would execute if flushed now.
    pub fn runnable(&self) -> usize {
        self.commands.iter().filter(|c| c.is_runnable()).count()
    }

    /// Most recent command touching `path`.
    pub fn last_for(&self, path: &ObjectPath) -> Option<&PendingCommand> {
        self.last.get(path).map(|&idx| &self.commands[idx])
    }

    /// True while any queued command touches `path`.
    pub fn references(&self, path: &ObjectPath) -> bool {
        self.last.contains_key(path)
    }

    /// True while the batch being deployed creates `path`.
    pub fn is_in_flight(&self, path: &ObjectPath) -> bool {
        self.in_flight.contains(path)
    }

    fn append(&mut self, command: PendingCommand) {
        let idx = self.commands.len();
        self.last.insert(command.path.clone(), idx);
        if let Some(target) = &command.path2 {
            self.last.insert(target.clone(), idx);
        }
        self.commands.push(command);
    }

    fn reindex(&mut self) {
        self.last.clear();
        for (idx, command) in self.commands.iter().enumerate() {
            self.last.insert(command.path.clone(), idx);
            if let Some(target) = &command.path2 {
                self.last.insert(target.clone(), idx);
            }
        }
    }

    /// Index of the latest command whose own path is `path`.
    fn own_last(&self, path: &ObjectPath) -> Option<usize> {
        self.last
            .get(path)
            .copied()
            .filter(|&idx| &self.commands[idx].path == path)
    }

    /// True when `table` has a queued, never-deployed `CREATE TABLE`.
    fn has_open_create_table(&self, table: &ObjectPath) -> bool {
        self.own_last(table).is_some_and(|idx| {
            let command = &self.commands[idx];
            command.is_create_table() && !command.disabled && !command.object.is_deployed()
        })
    }

    /// Adds a command, coalescing it with what is already queued.
    pub fn push(&mut self, command: PendingCommand) -> Coalesced {
        let outcome = match command.action {
            DeployAction::CreateOrAlter => self.push_create(command),
            DeployAction::Drop => self.push_drop(command),
            DeployAction::Rename => {
                self.append(command);
                Coalesced::Appended
            }
        };
        debug!("Queue push: {:?} ({} queued)", outcome, self.commands.len());
        outcome
    }

    fn push_create(&mut self, mut command: PendingCommand) -> Coalesced {
        if command.kind == ObjectKind::Column && !command.object.is_deployed() {
            if let Some(table) = command.path.parent() {
                if self.has_open_create_table(&table) {
                    command.folded_into = Some(table);
                    command.already_executed = true;
                }
            }
        }

        if let Some(idx) = self.own_last(&command.path) {
            let existing = &mut self.commands[idx];
            if !existing.disabled {
                match existing.action {
                    DeployAction::CreateOrAlter => {
                        let kind_changed = existing.kind != command.kind;
                        existing.statement = command.statement;
                        existing.object = command.object;
                        existing.kind = command.kind;
                        existing.identity_protected |= command.identity_protected;
                        if kind_changed {
                            existing.object.object_id = 0;
                        }
                        if existing.kind != ObjectKind::Column && existing.folded_into.take().is_some() {
                            existing.already_executed = false;
                        } else if existing.folded_into.is_none() && command.folded_into.is_some() {
                            existing.folded_into = command.folded_into;
                            existing.already_executed = true;
                        }
                        return Coalesced::Merged;
                    }
                    DeployAction::Drop if existing.kind == command.kind => {
                        let object_id = existing.object.object_id;
                        command.object.object_id = object_id;
                        command.folded_into = None;
                        if existing.identity_protected || command.identity_protected {
                            existing.already_executed = true;
                            command.already_executed = true;
                            command.identity_protected = true;
                            self.append(command);
                            return Coalesced::IdentityProtected;
                        }
                        command.already_executed = false;
                        self.commands.remove(idx);
                        self.reindex();
                        self.append(command);
                        return Coalesced::DropCancelled { object_id };
                    }
                    _ => {}
                }
            }
        }

        let folded = command.folded_into.is_some();
        self.append(command);
        if folded {
            Coalesced::Folded
        } else {
            Coalesced::Appended
        }
    }

    fn push_drop(&mut self, command: PendingCommand) -> Coalesced {
        let is_dir = command.kind.is_directory();

        if let Some(idx) = self.own_last(&command.path) {
            let previous = &mut self.commands[idx];
            if previous.action == DeployAction::CreateOrAlter {
                previous.disabled = true;
            }
        }

        // An object the running flush creates needs a real drop afterwards
        if !command.object.is_deployed() && !self.in_flight.contains(&command.path) {
            if is_dir {
                for queued in self.commands.iter_mut() {
                    if queued.path.is_descendant_of(&command.path) {
                        queued.disabled = true;
                        queued.disabled_by_dir = None;
                    }
                }
            }
            return Coalesced::Suppressed;
        }

        if is_dir {
            let schema_drop = command.kind == ObjectKind::Schema;
            for queued in self.commands.iter_mut() {
                let exempt = queued.kind == ObjectKind::ForeignKey
                    || (schema_drop && queued.path.depth() == 2);
                if queued.path.is_descendant_of(&command.path) && !queued.disabled && !exempt {
                    queued.disabled = true;
                    queued.disabled_by_dir = Some(command.path.clone());
                }
            }
        }
        self.append(command);
        Coalesced::Appended
    }

    /// Re-enables commands a directory drop disabled whose parent is `dir`.
    ///
    /// Called when `dir` is created again.
    ///
    /// # Returns
    /// The re-enabled commands' paths and object snapshots.
    pub fn reenable_under(&mut self, dir: &ObjectPath) -> Vec<(DeployAction, ObjectPath, DatabaseObject)> {
        let mut revived = Vec::new();
        for command in self.commands.iter_mut() {
            if command.disabled
                && command.disabled_by_dir.is_some()
                && command.path.parent().as_ref() == Some(dir)
            {
                command.disabled = false;
                command.disabled_by_dir = None;
                revived.push((command.action, command.path.clone(), command.object.clone()));
            }
        }
        if !revived.is_empty() {
            debug!("Re-enabled {} command(s) under {}", revived.len(), dir);
        }
        revived
    }

    /// Suspends a pending drop of an identity column at `path`.
    ///
    /// A new file over the dropped column must never turn into a drop and
    /// re-create pair.
    ///
    /// # Returns
    /// `true` if a drop was suspended.
    pub fn protect_identity_drop(&mut self, path: &ObjectPath) -> bool {
        match self.own_last(path) {
            Some(idx) => {
                let command = &mut self.commands[idx];
                let protect = command.action == DeployAction::Drop
                    && command.identity_protected
                    && command.is_runnable();
                if protect {
                    command.already_executed = true;
                }
                protect
            }
            None => false,
        }
    }

    /// Disables the latest create-or-alter of `path` and everything queued
    /// below it. Used when a local edit is abandoned.
    pub fn disable_path(&mut self, path: &ObjectPath) {
        if let Some(idx) = self.own_last(path) {
            if self.commands[idx].action == DeployAction::CreateOrAlter {
                self.commands[idx].disabled = true;
            }
        }
        for command in self.commands.iter_mut() {
            if command.path.is_descendant_of(path) {
                command.disabled = true;
            }
        }
    }

    /// Drains everything that can run now.
    ///
    /// Open `CREATE TABLE` statements are closed around the clauses of the
    /// columns folded into them. A table with no clauses stays queued, along
    /// with every later command below it, until a column arrives.
    pub fn take_batch(&mut self) -> Batch {
        let commands = std::mem::take(&mut self.commands);
        self.last.clear();

        let mut clauses: HashMap<&ObjectPath, Vec<String>> = HashMap::new();
        for command in &commands {
            if let (Some(table), false) = (&command.folded_into, command.disabled) {
                if let Some(clause) = command.statement.column_clause() {
                    clauses.entry(table).or_default().push(clause);
                }
            }
        }
        let clauses: HashMap<ObjectPath, Vec<String>> = clauses
            .into_iter()
            .map(|(table, list)| (table.clone(), list))
            .collect();

        let mut batch = Batch::default();
        let mut deferred_dirs: Vec<ObjectPath> = Vec::new();
        let mut kept = Vec::new();

        for command in commands {
            let under_deferred = deferred_dirs
                .iter()
                .any(|dir| &command.path == dir || command.path.is_descendant_of(dir));
            if under_deferred {
                kept.push(command);
                continue;
            }

            let sql = if command.is_create_table() && command.is_runnable() && !command.object.is_deployed() {
                match (clauses.get(&command.path), command.path.schema(), command.path.name()) {
                    (Some(list), Some(schema), Some(table)) if !list.is_empty() => {
                        Some(ddl::create_table(schema, table, list))
                    }
                    _ => {
                        debug!("Deferring empty table {}", command.path);
                        deferred_dirs.push(command.path.clone());
                        kept.push(command);
                        continue;
                    }
                }
            } else if command.is_runnable() {
                command.sql()
            } else {
                None
            };

            let creates = command.action == DeployAction::CreateOrAlter
                && !command.disabled
                && !command.object.is_deployed()
                && (sql.is_some() || command.folded_into.is_some());
            if creates {
                batch.created.push(command.path.clone());
            }
            match sql {
                Some(sql) => batch.items.push(BatchItem {
                    label: command.to_string(),
                    sql,
                }),
                None => batch.skipped += 1,
            }
            batch.processed.push(command.path.clone());
            if let Some(target) = &command.path2 {
                batch.processed.push(target.clone());
            }
            batch.commands.push(command);
        }

        batch.deferred = kept.len();
        self.commands = kept;
        self.in_flight = batch.created.iter().cloned().collect();
        self.reindex();
        batch
    }

    /// Puts back the commands of a batch that never reached the database.
    ///
    /// The drained commands go ahead of everything queued since the drain,
    /// and the newer commands are coalesced against them again.
    pub fn restore(&mut self, drained: Vec<PendingCommand>) {
        let newer = std::mem::take(&mut self.commands);
        self.last.clear();
        self.in_flight.clear();
        let restored = drained.len();
        for command in drained {
            self.append(command);
        }
        for mut command in newer {
            if command.disabled {
                self.append(command);
                continue;
            }
            if command.folded_into.take().is_some() {
                command.already_executed = false;
            }
            if command.is_runnable() {
                self.push(command);
            } else {
                self.append(command);
            }
        }
        debug!("Restored {} command(s) ahead of {} queued", restored, self.commands.len().saturating_sub(restored));
    }

    /// Gives the queued commands of a freshly created object its database id,
    /// so they render as alters and drops of the existing object.
    pub fn adopt_id(&mut self, path: &ObjectPath, object_id: i64) {
        for command in self.commands.iter_mut() {
            if &command.path == path && !command.object.is_deployed() {
                command.object.object_id = object_id;
            }
        }
    }

    /// Ends the flight of a committed batch.
    pub fn land(&mut self) {
        self.in_flight.clear();
    }

    /// Ends the flight of a rolled back batch: drops queued meanwhile for
    /// objects that were never created have nothing left to drop.
    pub fn abort_flight(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for command in self.commands.iter_mut() {
            if command.action == DeployAction::Drop
                && !command.object.is_deployed()
                && in_flight.contains(&command.path)
            {
                command.disabled = true;
            }
        }
    }

    /// Drops every queued command.
    pub fn clear(&mut self) -> usize {
        let dropped = self.commands.len();
        self.commands.clear();
        self.last.clear();
        self.in_flight.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, KeywordClassifier};
    use crate::ddl::{drop_statement, Statement};
    use crate::object::{ColumnDetails, IdentitySpec, ObjectDetails};

    fn path(raw: &str) -> ObjectPath {
        ObjectPath::parse(raw).unwrap()
    }

    fn write(raw: &str, object_id: i64, text: &str) -> PendingCommand {
        let path = path(raw);
        let class = KeywordClassifier.classify(text).unwrap();
        let statement = Statement::for_fragment(&path, text, &class).unwrap();
        let mut object = DatabaseObject::catalog(object_id, path.name().unwrap(), class.kind);
        object.set_definition(text.to_string());
        PendingCommand::create_or_alter(path, object, statement).with_identity(class.identity)
    }

    fn mkdir(raw: &str) -> PendingCommand {
        let path = path(raw);
        let name = path.name().unwrap().to_string();
        let (object, statement) = if path.depth() == 1 {
            (
                DatabaseObject::local(name.clone(), ObjectKind::Schema),
                Statement::CreateSchema { schema: name },
            )
        } else {
            (
                DatabaseObject::local(name.clone(), ObjectKind::Table),
                Statement::CreateTable {
                    schema: path.schema().unwrap().to_string(),
                    table: name,
                },
            )
        };
        PendingCommand::create_or_alter(path, object, statement)
    }

    fn remove(raw: &str, object: DatabaseObject) -> PendingCommand {
        let path = path(raw);
        let sql = drop_statement(&path, &object).unwrap();
        PendingCommand::drop(path, object, sql)
    }

    fn sqls(batch: &Batch) -> Vec<&str> {
        batch.items.iter().map(|i| i.sql.as_str()).collect()
    }

    #[test]
    fn restored_batch_absorbs_newer_edits() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/p", 0, "CREATE PROCEDURE p AS SELECT 1"));
        let batch = queue.take_batch();
        assert_eq!(batch.created, vec![path("/dbo/p")]);
        assert!(queue.is_in_flight(&path("/dbo/p")));

        assert_eq!(queue.push(write("/dbo/p", 0, "CREATE PROCEDURE p AS SELECT 2")), Coalesced::Appended);
        queue.restore(batch.commands);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_in_flight(&path("/dbo/p")));
        assert_eq!(sqls(&queue.take_batch()), vec!["CREATE PROCEDURE [dbo].[p] AS SELECT 2"]);
    }

    #[test]
    fn edits_during_flight_follow_the_deployed_object() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/p", 0, "CREATE PROCEDURE p AS SELECT 1"));
        queue.take_batch();

        queue.push(write("/dbo/p", 0, "CREATE PROCEDURE p AS SELECT 2"));
        queue.adopt_id(&path("/dbo/p"), 77);
        queue.land();
        assert_eq!(sqls(&queue.take_batch()), vec!["ALTER PROCEDURE [dbo].[p] AS SELECT 2"]);
    }

    #[test]
    fn drop_during_flight_is_kept_until_the_flight_ends() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/p", 0, "CREATE PROCEDURE p AS SELECT 1"));
        queue.take_batch();

        let local = DatabaseObject::local("p", ObjectKind::Procedure);
        assert_eq!(queue.push(remove("/dbo/p", local)), Coalesced::Appended);
        queue.abort_flight();
        let batch = queue.take_batch();
        assert!(batch.items.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn second_write_replaces_first() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/t/qty", 5, "COLUMN int NULL"));
        assert_eq!(queue.push(write("/dbo/t/qty", 5, "COLUMN bigint NULL")), Coalesced::Merged);
        assert_eq!(queue.len(), 1);
        let batch = queue.take_batch();
        assert_eq!(sqls(&batch), vec!["ALTER TABLE [dbo].[t] ALTER COLUMN [qty] bigint NULL"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn kind_change_turns_alter_into_create() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/t/ck", 9, "WITH CHECK CONSTRAINT CHECK ([a] > 0)"));
        queue.push(write("/dbo/t/ck", 9, "CONSTRAINT DEFAULT ((0)) FOR [a]"));
        let batch = queue.take_batch();
        assert_eq!(
            sqls(&batch),
            vec!["ALTER TABLE [dbo].[t] ADD CONSTRAINT [ck] DEFAULT ((0)) FOR [a]"]
        );
    }

    #[test]
    fn columns_fold_into_new_table() {
        let mut queue = DeployQueue::new();
        queue.push(mkdir("/dbo/items"));
        assert_eq!(queue.push(write("/dbo/items/id", 0, "COLUMN int NOT NULL")), Coalesced::Folded);
        assert_eq!(queue.push(write("/dbo/items/name", 0, "COLUMN nvarchar(20) NULL")), Coalesced::Folded);
        queue.push(write("/dbo/items/id", 0, "COLUMN bigint NOT NULL"));

        let batch = queue.take_batch();
        assert_eq!(
            sqls(&batch),
            vec!["CREATE TABLE [dbo].[items] (\n  [id] bigint NOT NULL,\n  [name] nvarchar(20) NULL\n)"]
        );
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.processed.len(), 3);
    }

    #[test]
    fn empty_table_is_deferred_with_its_children() {
        let mut queue = DeployQueue::new();
        queue.push(mkdir("/dbo/items"));
        queue.push(write("/dbo/items/ck", 0, "WITH CHECK CONSTRAINT CHECK ([id] > 0)"));
        queue.push(write("/dbo/other/qty", 3, "COLUMN int NULL"));

        let batch = queue.take_batch();
        assert_eq!(sqls(&batch), vec!["ALTER TABLE [dbo].[other] ALTER COLUMN [qty] int NULL"]);
        assert_eq!(batch.deferred, 2);
        assert!(queue.references(&path("/dbo/items")));

        queue.push(write("/dbo/items/id", 0, "COLUMN int NOT NULL"));
        let batch = queue.take_batch();
        assert_eq!(
            sqls(&batch),
            vec![
                "CREATE TABLE [dbo].[items] (\n  [id] int NOT NULL\n)",
                "ALTER TABLE [dbo].[items] WITH CHECK ADD CONSTRAINT [ck] CHECK ([id] > 0)",
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn recreate_cancels_drop_and_alters() {
        let mut queue = DeployQueue::new();
        let column = DatabaseObject::catalog(11, "qty", ObjectKind::Column);
        queue.push(remove("/dbo/t/qty", column));
        let outcome = queue.push(write("/dbo/t/qty", 0, "COLUMN int NOT NULL"));
        assert_eq!(outcome, Coalesced::DropCancelled { object_id: 11 });
        assert_eq!(queue.len(), 1);
        let batch = queue.take_batch();
        assert_eq!(sqls(&batch), vec!["ALTER TABLE [dbo].[t] ALTER COLUMN [qty] int NOT NULL"]);
    }

    #[test]
    fn identity_column_is_never_rebuilt() {
        let mut queue = DeployQueue::new();
        let mut column = DatabaseObject::catalog(11, "id", ObjectKind::Column);
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
        queue.push(remove("/dbo/t/id", column));
        assert!(queue.protect_identity_drop(&path("/dbo/t/id")));
        let outcome = queue.push(write("/dbo/t/id", 0, "COLUMN int IDENTITY (1, 1) NOT NULL"));
        assert_eq!(outcome, Coalesced::IdentityProtected);
        assert_eq!(queue.runnable(), 0);

        let batch = queue.take_batch();
        assert!(batch.is_empty());
        assert_eq!(batch.skipped, 2);
    }

    #[test]
    fn schema_drop_disables_and_table_create_reenables() {
        let mut queue = DeployQueue::new();
        queue.push(mkdir("/sales/t2"));
        queue.push(write("/sales/t2/id", 0, "COLUMN int NOT NULL"));
        queue.push(write("/sales/orders/qty", 4, "COLUMN int NULL"));
        queue.push(write("/sales/orders/fk", 0, "WITH CHECK CONSTRAINT FOREIGN KEY ([c]) REFERENCES [dbo].[c] ([id])"));

        let schema = DatabaseObject::catalog(2, "sales", ObjectKind::Schema);
        queue.push(remove("/sales", schema));
        let disabled: Vec<String> = queue
            .iter()
            .filter(|c| c.disabled)
            .map(|c| c.path.key())
            .collect();
        assert_eq!(disabled, vec!["/sales/t2/id", "/sales/orders/qty"]);

        let revived = queue.reenable_under(&path("/sales/t2"));
        assert_eq!(revived.len(), 1);
        assert_eq!(revived[0].1, path("/sales/t2/id"));
        assert!(queue.iter().any(|c| c.path == path("/sales/orders/qty") && c.disabled));
    }

    #[test]
    fn dropping_local_object_suppresses_its_create() {
        let mut queue = DeployQueue::new();
        queue.push(mkdir("/dbo/scratch"));
        queue.push(write("/dbo/scratch/a", 0, "COLUMN int NULL"));
        let outcome = queue.push(remove("/dbo/scratch", DatabaseObject::local("scratch", ObjectKind::Table)));
        assert_eq!(outcome, Coalesced::Suppressed);
        assert_eq!(queue.runnable(), 0);
        let batch = queue.take_batch();
        assert!(batch.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn drop_after_alter_disables_alter() {
        let mut queue = DeployQueue::new();
        queue.push(write("/dbo/p", 8, "ALTER PROCEDURE p AS SELECT 2"));
        queue.push(remove("/dbo/p", DatabaseObject::catalog(8, "p", ObjectKind::Procedure)));
        let batch = queue.take_batch();
        assert_eq!(sqls(&batch), vec!["DROP PROCEDURE [dbo].[p]"]);
    }

    #[test]
    fn renames_index_both_paths() {
        let mut queue = DeployQueue::new();
        let table = DatabaseObject::catalog(3, "a", ObjectKind::Table);
        queue.push(PendingCommand::rename(
            path("/dbo/a"),
            path("/dbo/b"),
            table,
            "EXEC sp_rename '[dbo].[a]', 'b'".into(),
        ));
        assert!(queue.references(&path("/dbo/a")));
        assert!(queue.references(&path("/dbo/b")));
        let batch = queue.take_batch();
        assert_eq!(batch.processed, vec![path("/dbo/a"), path("/dbo/b")]);
    }
}
