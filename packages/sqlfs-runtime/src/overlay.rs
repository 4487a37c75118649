//! Shared overlay state: the object cache and the deploy queue behind one lock.

use std::sync::Arc;

use parking_lot::Mutex;
use sqlfs_core::{DeployQueue, ObjectCache, ObjectPath};

/// Cache and queue mutated together by filesystem operations and the engine.
#[derive(Debug, Default)]
pub struct Overlay {
    pub cache: ObjectCache,
    pub queue: DeployQueue,
}

/// Handle shared by the session, the resolver and the deploy engine.
pub type SharedOverlay = Arc<Mutex<Overlay>>;

impl Overlay {
    pub fn shared() -> SharedOverlay {
        Arc::new(Mutex::new(Overlay::default()))
    }

    /// Lets the database become the truth again for paths a flush drained.
    ///
    /// Entries of drained paths are dropped unless a newer command still
    /// targets them, and tombstones nothing queued refers to are cleared.
    /// Runs after commits and rollbacks alike.
    pub fn settle(&mut self, processed: &[ObjectPath]) {
        let mut released = 0;
        for path in processed {
            if !self.queue.references(path) && self.cache.remove(path).is_some() {
                released += 1;
            }
        }
        let queue = &self.queue;
        self.cache.clear_tombstones(|path| queue.references(path));
        tracing::debug!("Settled {} overlay entries after flush", released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlfs_core::ddl::Statement;
    use sqlfs_core::{DatabaseObject, Entry, ObjectKind, PendingCommand};

    fn path(raw: &str) -> ObjectPath {
        ObjectPath::parse(raw).unwrap()
    }

    #[test]
    fn settle_keeps_paths_with_newer_commands() {
        let mut overlay = Overlay::default();
        overlay
            .cache
            .set_pending(path("/a"), DatabaseObject::local("a", ObjectKind::Schema));
        overlay
            .cache
            .set_pending(path("/b"), DatabaseObject::local("b", ObjectKind::Schema));
        overlay
            .cache
            .tombstone(path("/c"), DatabaseObject::catalog(9, "c", ObjectKind::Schema));
        overlay.queue.push(PendingCommand::create_or_alter(
            path("/b"),
            DatabaseObject::local("b", ObjectKind::Schema),
            Statement::CreateSchema {
                schema: "b".to_string(),
            },
        ));

        overlay.settle(&[path("/a"), path("/b")]);
        assert!(overlay.cache.get(&path("/a")).is_none());
        assert!(matches!(overlay.cache.get(&path("/b")), Some(Entry::Pending(_))));
        assert!(overlay.cache.get(&path("/c")).is_none());
    }
}
