//! Filesystem operations over the schema tree.
//!
//! [`FsSession`] is what a filesystem adapter drives. Reads go through the
//! [`Resolver`]; mutations update the overlay and queue DDL in one critical
//! section shared with the deploy engine, then nudge the engine. Nothing is
//! sent to the database from a mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use sqlfs_core::ddl::{self, Statement};
use sqlfs_core::path::MAX_DEPTH;
use sqlfs_core::{
    Classifier, Coalesced, ConnectionPool, Connector, DatabaseObject, DeployAction, FileSystemObject, FlushReport, FsConfig,
    FsError, KeywordClassifier, MemoryServer, MetadataSource, ObjectKind, ObjectPath, PendingCommand, Result,
};
use tracing::{debug, info, warn};

use crate::engine::{DeployEngine, EngineStats};
use crate::overlay::{Overlay, SharedOverlay};
use crate::resolver::Resolver;

/// Diagnostic snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub engine: EngineStats,
    pub cached: usize,
    pub pending: usize,
    pub tombstoned: usize,
    /// Commands waiting in the deploy queue, disabled ones included
    pub queued: usize,
    pub pool_size: usize,
    pub pool_available: usize,
}

/// One mounted database.
pub struct FsSession {
    config: Arc<FsConfig>,
    pool: Arc<ConnectionPool>,
    overlay: SharedOverlay,
    resolver: Resolver,
    classifier: Arc<dyn Classifier>,
    engine: DeployEngine,
    closed: AtomicBool,
}

impl FsSession {
    /// Connects the pool and starts the deploy engine.
    ///
    /// # Arguments
    /// * `config` - Validated profile
    /// * `connector` - Opens database sessions
    /// * `metadata` - Catalog queries
    /// * `classifier` - Recognizes written definitions
    ///
    /// # Returns
    /// `Result<FsSession>`; a login failure on any slot aborts startup.
    pub fn open(
        config: FsConfig,
        connector: Arc<dyn Connector>,
        metadata: Arc<dyn MetadataSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(ConnectionPool::connect(connector, config.pool_size())?);
        let overlay = Overlay::shared();
        let engine = DeployEngine::start(
            Arc::clone(&overlay),
            Arc::clone(&pool),
            Arc::clone(&metadata),
            config.deploy_interval(),
        );
        let resolver = Resolver::new(
            Arc::clone(&pool),
            metadata,
            Arc::clone(&overlay),
            engine.handle(),
            Arc::clone(&config),
        );
        info!(
            "Mounted database {} with {} session(s)",
            config.dbname.as_deref().unwrap_or("?"),
            pool.size()
        );

        Ok(Self {
            config,
            pool,
            overlay,
            resolver,
            classifier,
            engine,
            closed: AtomicBool::new(false),
        })
    }

    /// Mounts an in-process [`MemoryServer`] with the keyword classifier.
    pub fn with_memory(config: FsConfig, server: &MemoryServer) -> Result<Self> {
        Self::open(
            config,
            Arc::new(server.clone()),
            Arc::new(server.clone()),
            Arc::new(KeywordClassifier),
        )
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FsError::ShutDown("filesystem session"));
        }
        Ok(())
    }

    fn parse(&self, raw: &str) -> Result<ObjectPath> {
        self.ensure_open()?;
        ObjectPath::parse(raw)
    }

    /// Resolves the parent of `path` and checks it is a directory.
    fn parent_directory(&self, path: &ObjectPath) -> Result<DatabaseObject> {
        let parent = path
            .parent()
            .ok_or_else(|| FsError::unsupported(path.key(), "the root has no parent"))?;
        let object = self.resolver.resolve(&parent)?;
        if !object.kind.is_directory() {
            return Err(FsError::unsupported(path.key(), "parent is not a directory"));
        }
        Ok(object)
    }

    pub fn lookup(&self, raw: &str) -> Result<FileSystemObject> {
        let path = self.parse(raw)?;
        let object = self.resolver.resolve(&path)?;
        Ok(FileSystemObject::from(&object))
    }

    pub fn list(&self, raw: &str) -> Result<Vec<FileSystemObject>> {
        let path = self.parse(raw)?;
        let listing = self.resolver.list(&path)?;
        Ok(listing
            .iter()
            .map(|(_, object)| FileSystemObject::from(object))
            .collect())
    }

    /// Definition text of a file, pending edits included.
    pub fn read(&self, raw: &str) -> Result<String> {
        let path = self.parse(raw)?;
        self.resolver.read(&path)
    }

    /// Replaces the definition of a file.
    ///
    /// The text is classified and turned into a create-or-alter command. A
    /// text the classifier rejects abandons the edit: a file that existed
    /// only locally disappears, a database object keeps its current state.
    ///
    /// # Returns
    /// `ParseFailed` for unrecognized text, `Unsupported` when the text does
    /// not belong at this depth.
    pub fn write(&self, raw: &str, text: &str) -> Result<()> {
        let path = self.parse(raw)?;
        self.write_path(&path, text)
    }

    fn write_path(&self, path: &ObjectPath, text: &str) -> Result<()> {
        if path.depth() < 2 || path.depth() > MAX_DEPTH {
            return Err(FsError::unsupported(path.key(), "files live in a schema or a table"));
        }
        self.parent_directory(path)?;
        let existing = self.resolver.try_resolve(path)?;
        if existing.as_ref().is_some_and(|o| o.kind.is_directory()) {
            return Err(FsError::unsupported(path.key(), "is a directory"));
        }

        let prepared = self
            .classifier
            .classify(text)
            .map_err(|reason| FsError::parse_failed(path.key(), reason))
            .and_then(|class| Statement::for_fragment(path, text, &class).map(|statement| (class, statement)));
        let (class, statement) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Write to {} abandoned: {}", path, e);
                self.abandon(path, existing.as_ref());
                return Err(e);
            }
        };

        let name = path.name().unwrap_or_default();
        let mut object = existing
            .clone()
            .unwrap_or_else(|| DatabaseObject::local(name, class.kind));
        // A deployed object cannot be altered into another kind
        let replaced = match &existing {
            Some(old) if old.is_deployed() && old.kind != class.kind && !old.is_placeholder() => {
                object.object_id = 0;
                Some(PendingCommand::drop(path.clone(), old.clone(), ddl::drop_statement(path, old)?))
            }
            _ => None,
        };
        object.kind = class.kind;
        object.set_definition(text.to_string());
        let command = PendingCommand::create_or_alter(path.clone(), object.clone(), statement)
            .with_identity(class.identity);

        {
            let mut overlay = self.overlay.lock();
            if let Some(drop) = replaced {
                overlay.queue.push(drop);
            }
            let outcome = overlay.queue.push(command);
            if let Some(queued) = overlay.queue.last_for(path) {
                object.object_id = queued.object.object_id;
            }
            overlay.cache.set_pending(path.clone(), object);
            debug!("Write {} queued as {:?}", path, outcome);
        }
        self.engine.handle().touched();
        Ok(())
    }

    fn abandon(&self, path: &ObjectPath, existing: Option<&DatabaseObject>) {
        if existing.is_some_and(DatabaseObject::is_deployed) {
            return;
        }
        let mut overlay = self.overlay.lock();
        if overlay.queue.is_in_flight(path) {
            return;
        }
        overlay.cache.remove(path);
        overlay.queue.disable_path(path);
    }

    /// Creates an empty file whose kind is decided by its first write.
    pub fn create_node(&self, raw: &str) -> Result<()> {
        let path = self.parse(raw)?;
        if path.depth() < 2 || path.depth() > MAX_DEPTH {
            return Err(FsError::unsupported(path.key(), "files live in a schema or a table"));
        }
        self.parent_directory(&path)?;
        if self.resolver.try_resolve(&path)?.is_some() {
            return Err(FsError::AlreadyExists { path: path.key() });
        }

        let name = path.name().unwrap_or_default();
        let placeholder = DatabaseObject::local(name, ObjectKind::TempPlaceholder);
        let mut overlay = self.overlay.lock();
        if overlay.queue.protect_identity_drop(&path) {
            info!("Pending drop of identity column {} suspended", path);
        }
        overlay.cache.set_pending(path, placeholder);
        Ok(())
    }

    /// Creates a schema (depth 1) or a table (depth 2).
    ///
    /// Commands a drop of this directory disabled are re-enabled, so removing
    /// and re-creating a directory restores its queued children.
    pub fn create_dir(&self, raw: &str) -> Result<()> {
        let path = self.parse(raw)?;
        let kind = match path.depth() {
            1 => ObjectKind::Schema,
            2 => ObjectKind::Table,
            _ => {
                return Err(FsError::unsupported(
                    path.key(),
                    "directories are schemas or tables",
                ))
            }
        };
        let parent = self.parent_directory(&path)?;
        if kind == ObjectKind::Table && parent.kind != ObjectKind::Schema {
            return Err(FsError::unsupported(path.key(), "tables live in a schema"));
        }
        if self.resolver.try_resolve(&path)?.is_some() {
            return Err(FsError::AlreadyExists { path: path.key() });
        }

        let mut object = DatabaseObject::local(path.name().unwrap_or_default(), kind);
        let command = directory_command(&path, object.clone())?;
        {
            let mut overlay = self.overlay.lock();
            for (action, child, child_object) in overlay.queue.reenable_under(&path) {
                match action {
                    DeployAction::Drop => overlay.cache.tombstone(child, child_object),
                    DeployAction::CreateOrAlter => overlay.cache.set_pending(child, child_object),
                    DeployAction::Rename => {}
                }
            }
            let outcome = overlay.queue.push(command);
            if let Some(queued) = overlay.queue.last_for(&path) {
                object.object_id = queued.object.object_id;
            }
            overlay.cache.set_pending(path.clone(), object);
            debug!("Directory {} queued as {:?}", path, outcome);
        }
        self.engine.handle().touched();
        Ok(())
    }

    /// Removes a file or a directory.
    ///
    /// The path is masked immediately; a drop is queued for objects the
    /// database knows. Directory removal drops the whole subtree with it.
    pub fn remove(&self, raw: &str) -> Result<()> {
        let path = self.parse(raw)?;
        if path.is_root() {
            return Err(FsError::unsupported(path.key(), "cannot remove the root"));
        }
        let object = self.resolver.resolve(&path)?;

        if object.is_placeholder() {
            self.overlay.lock().cache.remove(&path);
            return Ok(());
        }

        let command = PendingCommand::drop(path.clone(), object.clone(), ddl::drop_statement(&path, &object)?);
        {
            let mut overlay = self.overlay.lock();
            let outcome = overlay.queue.push(command);
            if object.kind.is_directory() {
                overlay.cache.evict_descendants(&path);
            }
            if outcome == Coalesced::Suppressed {
                overlay.cache.remove(&path);
            } else {
                overlay.cache.tombstone(path.clone(), object);
            }
            debug!("Remove {} queued as {:?}", path, outcome);
        }
        self.engine.handle().touched();
        Ok(())
    }

    /// Renames a file or directory within its level of the tree.
    ///
    /// Schemas cannot be renamed and table-scoped objects stay in their
    /// table. An object already at the target is dropped first. Stored
    /// modules are recreated under the new name because their text carries
    /// it; objects that exist only locally are re-queued at the new path.
    pub fn rename(&self, raw_old: &str, raw_new: &str) -> Result<()> {
        let old = self.parse(raw_old)?;
        let new = self.parse(raw_new)?;
        if old.depth() != new.depth() {
            return Err(FsError::unsupported(old.key(), "cannot move across levels"));
        }
        match old.depth() {
            0 => return Err(FsError::unsupported(old.key(), "cannot rename the root")),
            1 => return Err(FsError::unsupported(old.key(), "schemas cannot be renamed")),
            3 if old.parent() != new.parent() => {
                return Err(FsError::unsupported(old.key(), "cannot move into another table"))
            }
            _ => {}
        }
        if old == new {
            return Ok(());
        }

        let mut object = self.resolver.resolve(&old)?;
        self.parent_directory(&new)?;
        if !object.kind.is_directory() && object.definition.is_none() {
            let text = self.resolver.load_text(&old, &object)?;
            object.set_definition(text);
        }
        let occupant = self.resolver.try_resolve(&new)?;
        let occupant_drop = match &occupant {
            Some(existing) if !existing.is_placeholder() => Some(PendingCommand::drop(
                new.clone(),
                existing.clone(),
                ddl::drop_statement(&new, existing)?,
            )),
            _ => None,
        };

        // The running flush is creating it; treat it as deployed
        let in_flight = self.overlay.lock().queue.is_in_flight(&old);
        let plan = if !object.is_deployed() && !in_flight {
            self.plan_relocation(&old, &new, object)?
        } else if object.kind.is_module() {
            self.plan_module_rename(&old, &new, object)?
        } else {
            let sql = ddl::rename_statement(&old, &new, object.kind)?;
            let mut renamed = object.clone();
            renamed.name = new.name().unwrap_or_default().to_string();
            RenamePlan {
                commands: vec![PendingCommand::rename(old.clone(), new.clone(), object.clone(), sql)],
                tombstone: Some(object),
                placed: vec![(new.clone(), renamed)],
            }
        };

        {
            let mut overlay = self.overlay.lock();
            if let Some(drop) = occupant_drop {
                overlay.queue.push(drop);
            }
            if occupant.as_ref().is_some_and(|o| o.kind.is_directory()) {
                overlay.cache.evict_descendants(&new);
            }
            if plan.tombstone.is_none() {
                overlay.queue.disable_path(&old);
            }
            for command in plan.commands {
                overlay.queue.push(command);
            }
            overlay.cache.evict_descendants(&old);
            match plan.tombstone {
                Some(dropped) => overlay.cache.tombstone(old.clone(), dropped),
                None => {
                    overlay.cache.remove(&old);
                }
            }
            for (path, mut placed) in plan.placed {
                if let Some(queued) = overlay.queue.last_for(&path) {
                    if queued.action == DeployAction::CreateOrAlter {
                        placed.object_id = queued.object.object_id;
                    }
                }
                overlay.cache.set_pending(path, placed);
            }
        }
        info!("Rename {} -> {} queued", old, new);
        self.engine.handle().touched();
        Ok(())
    }

    /// Drop of the old module plus a create under the new name.
    fn plan_module_rename(&self, old: &ObjectPath, new: &ObjectPath, object: DatabaseObject) -> Result<RenamePlan> {
        let text = object.definition.clone().unwrap_or_default();
        let mut created = DatabaseObject::local(new.name().unwrap_or_default(), object.kind);
        created.set_definition(text.clone());
        let create = self.fragment_command(new, &created, &text)?;
        let drop = PendingCommand::drop(old.clone(), object.clone(), ddl::drop_statement(old, &object)?);
        Ok(RenamePlan {
            commands: vec![drop, create],
            tombstone: Some(object),
            placed: vec![(new.clone(), created)],
        })
    }

    /// Re-queues a local object, and its pending children, at the new path.
    fn plan_relocation(&self, old: &ObjectPath, new: &ObjectPath, object: DatabaseObject) -> Result<RenamePlan> {
        let children = self
            .overlay
            .lock()
            .cache
            .descendants(old)
            .into_iter()
            .filter_map(|(path, entry)| entry.live().cloned().map(|o| (path, o)))
            .collect::<Vec<_>>();

        let mut plan = RenamePlan::default();
        let moved = std::iter::once((old.clone(), object)).chain(children);
        for (path, mut item) in moved {
            let target = rebase(&path, old, new);
            item.name = target.name().unwrap_or_default().to_string();
            let command = match item.kind {
                ObjectKind::TempPlaceholder => None,
                ObjectKind::Schema | ObjectKind::Table => Some(directory_command(&target, item.clone())?),
                ObjectKind::View | ObjectKind::Database => {
                    return Err(FsError::unsupported(path.key(), "cannot re-create this directory"))
                }
                _ => {
                    let text = item.definition.clone().unwrap_or_default();
                    Some(self.fragment_command(&target, &item, &text)?)
                }
            };
            plan.commands.extend(command);
            plan.placed.push((target, item));
        }
        Ok(plan)
    }

    fn fragment_command(&self, path: &ObjectPath, object: &DatabaseObject, text: &str) -> Result<PendingCommand> {
        let class = self
            .classifier
            .classify(text)
            .map_err(|reason| FsError::parse_failed(path.key(), reason))?;
        let statement = Statement::for_fragment(path, text, &class)?;
        Ok(PendingCommand::create_or_alter(path.clone(), object.clone(), statement).with_identity(class.identity))
    }

    /// Cuts a file's text to `length` bytes.
    ///
    /// Non-empty remainders are written back like any edit. Truncating to
    /// zero, the usual first step of an editor save, only updates the overlay.
    pub fn truncate(&self, raw: &str, length: u64) -> Result<()> {
        let path = self.parse(raw)?;
        let object = self.resolver.resolve(&path)?;
        let text = self.resolver.load_text(&path, &object)?;

        let mut cut = usize::try_from(length).unwrap_or(usize::MAX).min(text.len());
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == text.len() {
            return Ok(());
        }
        if cut > 0 {
            return self.write_path(&path, &text[..cut]);
        }

        let mut emptied = object;
        emptied.set_definition(String::new());
        self.overlay.lock().cache.set_pending(path, emptied);
        Ok(())
    }

    /// Deploys the queue now instead of waiting for the idle interval.
    pub fn flush_now(&self) -> Result<FlushReport> {
        self.ensure_open()?;
        self.engine.flush_now()
    }

    /// Queued commands, in deploy order, rendered for display.
    pub fn pending_commands(&self) -> Vec<String> {
        self.overlay
            .lock()
            .queue
            .iter()
            .filter(|c| c.is_runnable())
            .map(ToString::to_string)
            .collect()
    }

    pub fn last_report(&self) -> Option<Arc<FlushReport>> {
        self.engine.last_report()
    }

    pub fn stats(&self) -> SessionStats {
        let (counts, queued) = {
            let overlay = self.overlay.lock();
            (overlay.cache.counts(), overlay.queue.len())
        };
        SessionStats {
            engine: self.engine.stats(),
            cached: counts.cached,
            pending: counts.pending,
            tombstoned: counts.tombstoned,
            queued,
            pool_size: self.pool.size(),
            pool_available: self.pool.available(),
        }
    }

    /// Stops the engine, discarding undeployed commands, and closes the pool.
    ///
    /// # Returns
    /// Number of discarded commands. `Busy` when pool slots were still
    /// checked out after the configured timeout.
    pub fn shutdown(&self) -> Result<usize> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(FsError::ShutDown("filesystem session"));
        }
        let discarded = self.engine.shutdown()?;
        self.pool.shutdown(self.config.shutdown_timeout())?;
        info!("Unmounted, {} command(s) discarded", discarded);
        Ok(discarded)
    }
}

/// Queue and overlay changes a rename applies in one step.
#[derive(Default)]
struct RenamePlan {
    commands: Vec<PendingCommand>,
    /// Object hidden at the old path; `None` for local objects, which simply move
    tombstone: Option<DatabaseObject>,
    /// Objects appearing under the new path
    placed: Vec<(ObjectPath, DatabaseObject)>,
}

fn directory_command(path: &ObjectPath, object: DatabaseObject) -> Result<PendingCommand> {
    let statement = match (object.kind, path.schema(), path.name()) {
        (ObjectKind::Schema, Some(schema), _) => Statement::CreateSchema {
            schema: schema.to_string(),
        },
        (ObjectKind::Table, Some(schema), Some(table)) if path.depth() == 2 => Statement::CreateTable {
            schema: schema.to_string(),
            table: table.to_string(),
        },
        _ => return Err(FsError::unsupported(path.key(), "not a directory path")),
    };
    Ok(PendingCommand::create_or_alter(path.clone(), object, statement))
}

/// `path` with its `from` prefix replaced by `to`.
fn rebase(path: &ObjectPath, from: &ObjectPath, to: &ObjectPath) -> ObjectPath {
    let tail = path.segments().iter().skip(from.depth());
    ObjectPath::from_segments(to.segments().iter().chain(tail).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_keeps_the_tail() {
        let path = ObjectPath::parse("/dbo/old/id").unwrap();
        let from = ObjectPath::parse("/dbo/old").unwrap();
        let to = ObjectPath::parse("/dbo/new").unwrap();
        assert_eq!(rebase(&path, &from, &to), ObjectPath::parse("/dbo/new/id").unwrap());
        assert_eq!(rebase(&from, &from, &to), to);
    }

    #[test]
    fn directory_commands_by_depth() {
        let schema = ObjectPath::parse("/sales").unwrap();
        let command = directory_command(&schema, DatabaseObject::local("sales", ObjectKind::Schema)).unwrap();
        assert_eq!(command.sql().as_deref(), Some("CREATE SCHEMA [sales]"));

        let column = ObjectPath::parse("/sales/t/c").unwrap();
        assert!(directory_command(&column, DatabaseObject::local("c", ObjectKind::Table)).is_err());
    }
}
