//! Path resolution over the overlay and the catalog.
//!
//! Every lookup consults the overlay first: a tombstone anywhere on the path
//! hides it, a pending or cached entry answers without a round trip. Only the
//! missing suffix of the path is fetched, one segment at a time, on a single
//! pooled session. Fetched objects are memoized unless a concurrent mutation
//! claimed the path in the meantime.

use std::sync::Arc;

use sqlfs_core::path::MAX_DEPTH;
use sqlfs_core::{
    ConnectionPool, DatabaseObject, Entry, FsConfig, FsError, MetadataSource, ObjectPath, PooledSession, Result,
};
use tracing::{debug, trace};

use crate::engine::EngineHandle;
use crate::overlay::SharedOverlay;

pub struct Resolver {
    pool: Arc<ConnectionPool>,
    metadata: Arc<dyn MetadataSource>,
    overlay: SharedOverlay,
    engine: EngineHandle,
    config: Arc<FsConfig>,
}

/// What the overlay alone knows about a path.
enum Known {
    /// Every segment was answered; the last object is the target
    Complete(DatabaseObject),
    /// Segments from `start` on must be fetched
    Partial {
        chain: Vec<DatabaseObject>,
        start: usize,
    },
}

impl Resolver {
    pub fn new(
        pool: Arc<ConnectionPool>,
        metadata: Arc<dyn MetadataSource>,
        overlay: SharedOverlay,
        engine: EngineHandle,
        config: Arc<FsConfig>,
    ) -> Self {
        Self {
            pool,
            metadata,
            overlay,
            engine,
            config,
        }
    }

    /// Resolves `path` to the object a filesystem operation should see.
    ///
    /// # Returns
    /// `NotFound` for absent or tombstoned paths (or any tombstoned ancestor),
    /// `ResolutionFailed` when the transport fails during the walk.
    pub fn resolve(&self, path: &ObjectPath) -> Result<DatabaseObject> {
        if path.is_root() {
            return Ok(DatabaseObject::root());
        }
        if path.depth() > MAX_DEPTH {
            return Err(FsError::not_found(path.key()));
        }

        let (mut chain, start) = match self.known(path)? {
            Known::Complete(object) => return Ok(object),
            Known::Partial { chain, start } => (chain, start),
        };

        // Nothing below a local object or a file exists in the database
        let walkable = |parent: Option<&DatabaseObject>| {
            parent.map_or(true, |p| p.kind.is_directory() && p.is_deployed())
        };
        if !walkable(chain.last()) {
            return Err(FsError::not_found(path.key()));
        }

        let _idle = self.engine.pause_idle();
        let mut session = self.session(path)?;
        for prefix in path.prefixes().skip(start) {
            let depth = prefix.depth();
            let name = prefix.name().unwrap_or_default().to_string();
            if !walkable(chain.last()) {
                return Err(FsError::not_found(path.key()));
            }

            let found = match depth {
                1 => self.metadata.fetch_schemas(&mut session, Some(&name)),
                2 => self.metadata.fetch_schema_objects(&mut session, &chain[0], Some(&name)),
                _ => self
                    .metadata
                    .fetch_table_objects(&mut session, &chain[0], &chain[1], Some(&name)),
            }
            .map_err(|e| resolution_error(path, e))?;
            let fetched = found
                .into_iter()
                .next()
                .ok_or_else(|| FsError::not_found(path.key()))?;

            let mut overlay = self.overlay.lock();
            let object = match overlay.cache.get(&prefix) {
                Some(Entry::Tombstoned(_)) => return Err(FsError::not_found(path.key())),
                Some(entry) => entry.live().cloned().unwrap_or(fetched),
                None => {
                    trace!("Memoized {}", prefix);
                    overlay.cache.memoize(prefix.clone(), fetched.clone());
                    fetched
                }
            };
            chain.push(object);
        }

        chain.pop().ok_or_else(|| FsError::not_found(path.key()))
    }

    /// Same as [`Resolver::resolve`] but maps `NotFound` to `None`.
    pub fn try_resolve(&self, path: &ObjectPath) -> Result<Option<DatabaseObject>> {
        match self.resolve(path) {
            Ok(object) => Ok(Some(object)),
            Err(FsError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn known(&self, path: &ObjectPath) -> Result<Known> {
        let overlay = self.overlay.lock();
        let mut chain = Vec::with_capacity(path.depth());
        for (index, prefix) in path.prefixes().enumerate() {
            match overlay.cache.get(&prefix) {
                Some(Entry::Tombstoned(_)) => return Err(FsError::not_found(path.key())),
                Some(entry) => {
                    if let Some(object) = entry.live() {
                        chain.push(object.clone());
                    }
                }
                None => return Ok(Known::Partial { chain, start: index }),
            }
        }
        match chain.pop() {
            Some(object) => Ok(Known::Complete(object)),
            None => Err(FsError::not_found(path.key())),
        }
    }

    fn session(&self, path: &ObjectPath) -> Result<PooledSession<'_>> {
        self.pool.acquire().map_err(|e| resolution_error(path, e))
    }

    /// Lists the children of a directory, overlay applied.
    ///
    /// Tombstoned and pending children hide what the catalog returns for
    /// them; pending children are then merged in. The root listing omits
    /// excluded schemas and deeper listings apply the name filter.
    ///
    /// # Returns
    /// `(path, object)` pairs in catalog order followed by pending additions.
    pub fn list(&self, path: &ObjectPath) -> Result<Vec<(ObjectPath, DatabaseObject)>> {
        let dir = self.resolve(path)?;
        if !dir.kind.is_directory() {
            return Err(FsError::unsupported(path.key(), "not a directory"));
        }
        // A table listing needs its schema; resolve it before taking a session
        let schema = match path.parent() {
            Some(parent) if path.depth() == 2 => Some(self.resolve(&parent)?),
            _ => None,
        };

        let fetched = if path.is_root() || dir.is_deployed() {
            let _idle = self.engine.pause_idle();
            let mut session = self.session(path)?;
            let children = match (path.depth(), schema.as_ref()) {
                (0, _) => self.metadata.fetch_schemas(&mut session, None),
                (1, _) => self.metadata.fetch_schema_objects(&mut session, &dir, None),
                (_, Some(schema)) => self.metadata.fetch_table_objects(&mut session, schema, &dir, None),
                (_, None) => Ok(Vec::new()),
            };
            children.map_err(|e| resolution_error(path, e))?
        } else {
            Vec::new()
        };

        let mut overlay = self.overlay.lock();
        let mut listing = Vec::with_capacity(fetched.len());
        for object in fetched {
            let child = path.child(&object.name);
            match overlay.cache.get(&child) {
                Some(Entry::Tombstoned(_)) | Some(Entry::Pending(_)) => continue,
                Some(Entry::Cached(known)) => listing.push((child, known.clone())),
                None => {
                    overlay.cache.memoize(child.clone(), object.clone());
                    listing.push((child, object));
                }
            }
        }
        listing.extend(overlay.cache.pending_children(path));
        drop(overlay);

        let before = listing.len();
        if path.is_root() {
            listing.retain(|(_, object)| !self.config.is_excluded_schema(&object.name));
        } else {
            listing.retain(|(_, object)| self.config.matches_filter(&object.name));
        }
        debug!(
            "Listed {}: {} entries ({} filtered)",
            path,
            listing.len(),
            before - listing.len()
        );
        Ok(listing)
    }

    /// Definition text of a file.
    ///
    /// Table-scoped objects carry their text from the catalog walk; stored
    /// modules are loaded on first read and the text is kept in the cache.
    pub fn read(&self, path: &ObjectPath) -> Result<String> {
        let object = self.resolve(path)?;
        self.load_text(path, &object)
    }

    pub(crate) fn load_text(&self, path: &ObjectPath, object: &DatabaseObject) -> Result<String> {
        if object.kind.is_directory() {
            return Err(FsError::unsupported(path.key(), "is a directory"));
        }
        if let Some(text) = &object.definition {
            return Ok(text.clone());
        }
        if !object.is_deployed() {
            return Ok(String::new());
        }

        let text = {
            let _idle = self.engine.pause_idle();
            let mut session = self.session(path)?;
            self.metadata
                .fetch_object_text(&mut session, object)
                .map_err(|e| resolution_error(path, e))?
        };

        let mut overlay = self.overlay.lock();
        if let Some(Entry::Cached(cached)) = overlay.cache.get(path) {
            let mut loaded = cached.clone();
            loaded.set_definition(text.clone());
            overlay.cache.refresh(path, loaded);
        }
        Ok(text)
    }
}

fn resolution_error(path: &ObjectPath, error: FsError) -> FsError {
    if error.is_transport() {
        FsError::ResolutionFailed {
            path: path.key(),
            reason: error.to_string(),
        }
    } else {
        error
    }
}
