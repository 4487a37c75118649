//! Boundaries to the database driver and the catalog queries.
//!
//! The driver is reached through [`Connector`] and [`Session`]; the catalog
//! query set through [`MetadataSource`]. Both are black boxes to the rest of
//! the crate.

use crate::error::Result;
use crate::object::DatabaseObject;
use crate::path::ObjectPath;
use crate::pool::PooledSession;

/// One value of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

/// Buffered result of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An authenticated database session.
pub trait Session: Send {
    /// Sends one statement and buffers its result.
    fn execute(&mut self, sql: &str) -> Result<RowSet>;

    /// True once the transport is known to be broken.
    fn is_dead(&self) -> bool;

    /// Closes the transport; further calls fail.
    fn close(&mut self);
}

/// Opens sessions: logs in, selects the database and applies session defaults.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Session>>;
}

/// Catalog queries that enumerate schema objects.
///
/// Every method may be given a `name` to fetch a single child instead of the
/// whole listing. An empty result for a named lookup means the child does not
/// exist.
pub trait MetadataSource: Send + Sync {
    /// Schemas of the database.
    fn fetch_schemas(&self, conn: &mut PooledSession<'_>, name: Option<&str>) -> Result<Vec<DatabaseObject>>;

    /// Tables, views, procedures and functions of one schema.
    fn fetch_schema_objects(
        &self,
        conn: &mut PooledSession<'_>,
        schema: &DatabaseObject,
        name: Option<&str>,
    ) -> Result<Vec<DatabaseObject>>;

    /// Columns, constraints, indexes, foreign keys and triggers of one table or view.
    ///
    /// Returned objects carry their file text in `definition`.
    fn fetch_table_objects(
        &self,
        conn: &mut PooledSession<'_>,
        schema: &DatabaseObject,
        table: &DatabaseObject,
        name: Option<&str>,
    ) -> Result<Vec<DatabaseObject>>;

    /// Source text of a stored module.
    fn fetch_object_text(&self, conn: &mut PooledSession<'_>, object: &DatabaseObject) -> Result<String>;
}

/// Fetches the object at `path` straight from the catalog, ignoring any
/// cached state.
///
/// # Returns
/// `None` when any segment of the path does not exist.
pub fn fetch_path(
    metadata: &dyn MetadataSource,
    conn: &mut PooledSession<'_>,
    path: &ObjectPath,
) -> Result<Option<DatabaseObject>> {
    let mut chain: Vec<DatabaseObject> = Vec::with_capacity(path.depth());
    for (idx, name) in path.segments().iter().enumerate() {
        let found = match idx {
            0 => metadata.fetch_schemas(conn, Some(name))?,
            1 => metadata.fetch_schema_objects(conn, &chain[0], Some(name))?,
            _ => metadata.fetch_table_objects(conn, &chain[0], &chain[1], Some(name))?,
        };
        match found.into_iter().next() {
            Some(object) => chain.push(object),
            None => return Ok(None),
        }
    }
    Ok(chain.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryServer;
    use crate::pool::ConnectionPool;
    use std::sync::Arc;

    #[test]
    fn fetch_path_walks_every_segment() {
        let server = MemoryServer::from_toml(
            r#"
            [[schemas]]
            name = "dbo"
            [[schemas.tables]]
            name = "orders"
            columns = [{ name = "id", type = "int", nullable = false }]
            "#,
        )
        .unwrap();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        let mut session = pool.acquire().unwrap();

        let column = fetch_path(&server, &mut session, &ObjectPath::parse("/dbo/orders/id").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(column.name, "id");
        assert!(column.is_deployed());

        let missing = fetch_path(&server, &mut session, &ObjectPath::parse("/dbo/nothing/id").unwrap()).unwrap();
        assert!(missing.is_none());
    }
}
