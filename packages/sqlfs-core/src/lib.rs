//! Core of the schema filesystem: object model, paths, connection pool,
//! overlay cache and the DDL deploy queue.

pub mod cache;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod ddl;
pub mod deploy;
pub mod error;
pub mod memory;
pub mod object;
pub mod path;
pub mod pool;

pub use cache::{CacheCounts, DropInfo, Entry, ObjectCache};
pub use catalog::{fetch_path, Connector, MetadataSource, RowSet, Session, SqlValue};
pub use classify::{Classification, Classifier, KeywordClassifier, ModuleSpans};
pub use config::FsConfig;
pub use deploy::{
    Batch, BatchFailure, Coalesced, DeployAction, DeployQueue, FlushOutcome, FlushReport, PendingCommand,
};
pub use error::{ErrnoClass, FsError, Result};
pub use memory::MemoryServer;
pub use object::{DatabaseObject, FileSystemObject, FileType, ObjectDetails, ObjectKind};
pub use path::ObjectPath;
pub use pool::{ConnectionPool, PooledSession};
