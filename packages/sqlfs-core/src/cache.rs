//! Path-keyed object cache with a pending overlay and tombstones.
//!
//! One map holds every known path. An entry is either memoized database
//! state, a local change waiting for deployment, or a tombstone for a path
//! that is the subject of a pending drop or the source of a pending rename.
//! Pending and tombstoned entries always win over the database.

use std::collections::HashMap;

use tracing::debug;

use crate::object::DatabaseObject;
use crate::path::ObjectPath;

/// What a tombstone remembers about the object it hides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropInfo {
    pub object: DatabaseObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Fetched from the database
    Cached(DatabaseObject),
    /// Created or modified locally, not yet deployed
    Pending(DatabaseObject),
    /// Pending drop or rename source; resolves to not found
    Tombstoned(DropInfo),
}

impl Entry {
    /// The object a lookup sees, `None` for tombstones.
    pub fn live(&self) -> Option<&DatabaseObject> {
        match self {
            Entry::Cached(object) | Entry::Pending(object) => Some(object),
            Entry::Tombstoned(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstoned(_))
    }
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub cached: usize,
    pub pending: usize,
    pub tombstoned: usize,
}

#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: HashMap<ObjectPath, Entry>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ObjectPath) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Live object at `path`, pending or cached.
    pub fn live(&self, path: &ObjectPath) -> Option<&DatabaseObject> {
        self.entries.get(path).and_then(Entry::live)
    }

    pub fn is_tombstoned(&self, path: &ObjectPath) -> bool {
        self.entries.get(path).is_some_and(Entry::is_tombstone)
    }

    /// Memoizes a fetched object unless the path already has an entry.
    ///
    /// A local change that landed while the fetch was in flight must not be
    /// overwritten by older database state.
    ///
    /// # Returns
    /// `true` if the object was stored.
    pub fn memoize(&mut self, path: ObjectPath, object: DatabaseObject) -> bool {
        if self.entries.contains_key(&path) {
            return false;
        }
        debug!("Cache fill {}", path);
        self.entries.insert(path, Entry::Cached(object));
        true
    }

    /// Replaces a memoized object, typically after loading its text.
    ///
    /// Pending entries and tombstones are left alone.
    pub fn refresh(&mut self, path: &ObjectPath, object: DatabaseObject) {
        if let Some(entry) = self.entries.get_mut(path) {
            if matches!(entry, Entry::Cached(_)) {
                *entry = Entry::Cached(object);
            }
        }
    }

    /// Stores a local change. Replaces whatever the path held before,
    /// including a tombstone.
    pub fn set_pending(&mut self, path: ObjectPath, object: DatabaseObject) {
        debug!("Pending {}", path);
        self.entries.insert(path, Entry::Pending(object));
    }

    /// Masks `path` until the next flush settles it.
    pub fn tombstone(&mut self, path: ObjectPath, object: DatabaseObject) {
        debug!("Tombstone {}", path);
        self.entries
            .insert(path, Entry::Tombstoned(DropInfo { object }));
    }

    /// Stamps the database id on a local object the last flush created.
    pub fn adopt_id(&mut self, path: &ObjectPath, object_id: i64) {
        let object = match self.entries.get_mut(path) {
            Some(Entry::Pending(object)) | Some(Entry::Tombstoned(DropInfo { object })) => object,
            _ => return,
        };
        if !object.is_deployed() {
            debug!("Adopted id {} for {}", object_id, path);
            object.object_id = object_id;
        }
    }

    pub fn remove(&mut self, path: &ObjectPath) -> Option<Entry> {
        self.entries.remove(path)
    }

    /// Every entry strictly below `dir`.
    pub fn descendants(&self, dir: &ObjectPath) -> Vec<(ObjectPath, Entry)> {
        let mut found: Vec<(ObjectPath, Entry)> = self
            .entries
            .iter()
            .filter(|(path, _)| path.is_descendant_of(dir))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        found.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));
        found
    }

    /// Drops every cached and pending entry strictly below `dir`.
    ///
    /// Tombstones stay until their drop is deployed, so a directory that is
    /// removed and created again still masks what was dropped inside it.
    ///
    /// # Returns
    /// Number of entries evicted.
    pub fn evict_descendants(&mut self, dir: &ObjectPath) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|path, entry| entry.is_tombstone() || !path.is_descendant_of(dir));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Evicted {} entries below {}", evicted, dir);
        }
        evicted
    }

    /// Pending objects whose parent directory is `dir`, ordered by path.
    pub fn pending_children(&self, dir: &ObjectPath) -> Vec<(ObjectPath, DatabaseObject)> {
        let mut children: Vec<(ObjectPath, DatabaseObject)> = self
            .entries
            .iter()
            .filter_map(|(path, entry)| match entry {
                Entry::Pending(object) if path.parent().as_ref() == Some(dir) => {
                    Some((path.clone(), object.clone()))
                }
                _ => None,
            })
            .collect();
        children.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));
        children
    }

    /// Removes every tombstone for which `keep` returns false.
    pub fn clear_tombstones(&mut self, mut keep: impl FnMut(&ObjectPath) -> bool) {
        self.entries
            .retain(|path, entry| !entry.is_tombstone() || keep(path));
    }

    pub fn counts(&self) -> CacheCounts {
        let mut counts = CacheCounts::default();
        for entry in self.entries.values() {
            match entry {
                Entry::Cached(_) => counts.cached += 1,
                Entry::Pending(_) => counts.pending += 1,
                Entry::Tombstoned(_) => counts.tombstoned += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;

    fn path(raw: &str) -> ObjectPath {
        ObjectPath::parse(raw).unwrap()
    }

    #[test]
    fn tombstone_hides_and_pending_replaces() {
        let mut cache = ObjectCache::new();
        let table = DatabaseObject::catalog(7, "orders", ObjectKind::Table);
        assert!(cache.memoize(path("/dbo/orders"), table.clone()));
        assert!(cache.live(&path("/dbo/orders")).is_some());

        cache.tombstone(path("/dbo/orders"), table.clone());
        assert!(cache.live(&path("/dbo/orders")).is_none());
        assert!(cache.is_tombstoned(&path("/dbo/orders")));

        // A fetch racing the drop must not resurrect the path.
        assert!(!cache.memoize(path("/dbo/orders"), table));

        cache.set_pending(path("/dbo/orders"), DatabaseObject::local("orders", ObjectKind::Table));
        assert!(!cache.is_tombstoned(&path("/dbo/orders")));
        assert!(cache.get(&path("/dbo/orders")).unwrap().is_pending());
    }

    #[test]
    fn refresh_only_touches_cached_entries() {
        let mut cache = ObjectCache::new();
        let mut proc_ = DatabaseObject::catalog(3, "p", ObjectKind::Procedure);
        cache.set_pending(path("/dbo/p"), proc_.clone());
        proc_.set_definition("CREATE PROCEDURE p AS SELECT 1".into());
        cache.refresh(&path("/dbo/p"), proc_);
        assert!(cache.live(&path("/dbo/p")).unwrap().definition.is_none());
    }

    #[test]
    fn directory_eviction_and_children() {
        let mut cache = ObjectCache::new();
        cache.memoize(path("/dbo"), DatabaseObject::catalog(1, "dbo", ObjectKind::Schema));
        cache.memoize(path("/dbo/t"), DatabaseObject::catalog(2, "t", ObjectKind::Table));
        cache.memoize(path("/dbo/t/a"), DatabaseObject::catalog(3, "a", ObjectKind::Column));
        cache.set_pending(path("/dbo/t/b"), DatabaseObject::local("b", ObjectKind::Column));
        cache.set_pending(path("/dbo/u"), DatabaseObject::local("u", ObjectKind::Table));

        let children = cache.pending_children(&path("/dbo/t"));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, path("/dbo/t/b"));

        cache.tombstone(path("/dbo/t/c"), DatabaseObject::catalog(4, "c", ObjectKind::Column));
        assert_eq!(cache.descendants(&path("/dbo/t")).len(), 3);
        assert_eq!(cache.evict_descendants(&path("/dbo/t")), 2);
        assert!(cache.is_tombstoned(&path("/dbo/t/c")));
        assert!(cache.live(&path("/dbo/t")).is_some());
        assert_eq!(
            cache.counts(),
            CacheCounts {
                cached: 2,
                pending: 1,
                tombstoned: 1
            }
        );
    }

    #[test]
    fn adopted_id_marks_local_objects_deployed() {
        let mut cache = ObjectCache::new();
        cache.set_pending(path("/dbo/p"), DatabaseObject::local("p", ObjectKind::Procedure));
        cache.set_pending(path("/dbo/q"), DatabaseObject::catalog(5, "q", ObjectKind::Procedure));
        cache.adopt_id(&path("/dbo/p"), 40);
        cache.adopt_id(&path("/dbo/q"), 41);
        assert_eq!(cache.live(&path("/dbo/p")).unwrap().object_id, 40);
        assert_eq!(cache.live(&path("/dbo/q")).unwrap().object_id, 5);
    }

    #[test]
    fn clear_tombstones_keeps_referenced_paths() {
        let mut cache = ObjectCache::new();
        cache.tombstone(path("/dbo/a"), DatabaseObject::catalog(1, "a", ObjectKind::Table));
        cache.tombstone(path("/dbo/b"), DatabaseObject::catalog(2, "b", ObjectKind::Table));
        cache.clear_tombstones(|p| p == &path("/dbo/b"));
        assert!(!cache.is_tombstoned(&path("/dbo/a")));
        assert!(cache.is_tombstoned(&path("/dbo/b")));
        assert_eq!(cache.len(), 1);
    }
}
