//! Write-back deployment of queued DDL.
//!
//! Mutations become [`PendingCommand`]s in a [`DeployQueue`]. A flush drains
//! the queue into a [`Batch`] and runs it as one transaction on a pooled
//! session with [`execute_batch`].

pub mod command;
pub mod queue;

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::FsError;
use crate::pool::{ConnectionPool, PooledSession};

pub use command::{DeployAction, PendingCommand};
pub use queue::{Batch, BatchItem, Coalesced, DeployQueue};

/// How a flush ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing was runnable
    Idle,
    Committed,
    RolledBack { error: String },
}

/// Summary of one flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Statements sent inside the transaction, in order
    pub statements: Vec<String>,
    /// Drained commands with nothing to run
    pub skipped: usize,
    /// Commands kept queued behind an empty table
    pub deferred: usize,
    pub outcome: FlushOutcome,
    pub elapsed_ms: u64,
}

impl FlushReport {
    pub fn idle(batch: &Batch) -> Self {
        Self {
            statements: Vec::new(),
            skipped: batch.skipped,
            deferred: batch.deferred,
            outcome: FlushOutcome::Idle,
            elapsed_ms: 0,
        }
    }

    pub fn committed(&self) -> bool {
        self.outcome == FlushOutcome::Committed
    }
}

/// Why a batch did not commit.
#[derive(Debug, Clone)]
pub enum BatchFailure {
    /// No transaction was opened; nothing reached the database and the
    /// batch can be queued again
    NotStarted(FsError),
    /// The transaction was rolled back
    RolledBack(FsError),
}

impl BatchFailure {
    pub fn error(&self) -> &FsError {
        match self {
            BatchFailure::NotStarted(e) | BatchFailure::RolledBack(e) => e,
        }
    }

    pub fn into_error(self) -> FsError {
        match self {
            BatchFailure::NotStarted(e) | BatchFailure::RolledBack(e) => e,
        }
    }
}

/// Runs a drained batch inside one transaction.
///
/// Statements inside the transaction are not retried on transport failure:
/// a reconnect would silently leave the transaction behind.
///
/// # Arguments
/// * `pool` - Pool to take the flush session from
/// * `batch` - Drained commands, in queue order
///
/// # Returns
/// The report on commit. `NotStarted` when no session could be had or
/// `BEGIN TRANSACTION` failed, `RolledBack` once any statement or the
/// `COMMIT` failed.
pub fn execute_batch(pool: &ConnectionPool, batch: &Batch) -> std::result::Result<FlushReport, BatchFailure> {
    if batch.is_empty() {
        return Ok(FlushReport::idle(batch));
    }
    let started = Instant::now();
    let mut session = pool.acquire().map_err(BatchFailure::NotStarted)?;
    session
        .execute("BEGIN TRANSACTION")
        .map_err(BatchFailure::NotStarted)?;

    let mut statements = Vec::with_capacity(batch.items.len());
    for item in &batch.items {
        debug!("Deploy {}: {}", item.label, item.sql);
        if let Err(e) = session.execute_once(&item.sql) {
            error!("Deploy of {} failed: {}", item.label, e);
            rollback(&mut session);
            return Err(BatchFailure::RolledBack(e));
        }
        statements.push(item.sql.clone());
    }

    if let Err(e) = session.execute_once("COMMIT") {
        error!("Commit failed: {}", e);
        rollback(&mut session);
        return Err(BatchFailure::RolledBack(e));
    }
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        "Deployed {} statement(s) in {} ms ({} skipped, {} deferred)",
        statements.len(),
        elapsed_ms,
        batch.skipped,
        batch.deferred
    );
    Ok(FlushReport {
        statements,
        skipped: batch.skipped,
        deferred: batch.deferred,
        outcome: FlushOutcome::Committed,
        elapsed_ms,
    })
}

fn rollback(session: &mut PooledSession<'_>) {
    if let Err(e) = session.execute_once("ROLLBACK") {
        error!("Rollback failed: {}", e);
    }
}

/// Report for a batch that was rolled back.
pub fn rolled_back(batch: &Batch, error: &FsError) -> FlushReport {
    FlushReport {
        statements: Vec::new(),
        skipped: batch.skipped,
        deferred: batch.deferred,
        outcome: FlushOutcome::RolledBack {
            error: error.to_string(),
        },
        elapsed_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::Statement;
    use crate::memory::MemoryServer;
    use crate::object::{DatabaseObject, ObjectKind};
    use crate::path::ObjectPath;
    use std::sync::Arc;

    fn schema_create(name: &str) -> PendingCommand {
        PendingCommand::create_or_alter(
            ObjectPath::from_segments([name]),
            DatabaseObject::local(name, ObjectKind::Schema),
            Statement::CreateSchema {
                schema: name.to_string(),
            },
        )
    }

    #[test]
    fn batch_commits_in_one_transaction() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        let mut queue = DeployQueue::new();
        queue.push(schema_create("a"));
        queue.push(schema_create("b"));

        let report = execute_batch(&pool, &queue.take_batch()).unwrap();
        assert!(report.committed());
        assert_eq!(report.statements, vec!["CREATE SCHEMA [a]", "CREATE SCHEMA [b]"]);
        assert_eq!(server.committed().len(), 2);
        assert_eq!(server.statements().first().map(String::as_str), Some("BEGIN TRANSACTION"));
    }

    #[test]
    fn failure_rolls_back_everything() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        server.fail_statements_containing("[b]");
        let mut queue = DeployQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(schema_create(name));
        }
        let batch = queue.take_batch();
        let err = execute_batch(&pool, &batch).unwrap_err();
        assert!(matches!(err, BatchFailure::RolledBack(FsError::ExecutionFailed { .. })));
        assert!(!server.exists("/a"));
        assert!(server.committed().is_empty());
        assert_eq!(server.statements().last().map(String::as_str), Some("ROLLBACK"));

        let report = rolled_back(&batch, err.error());
        assert!(!report.committed());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn failed_commit_is_rolled_back() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        server.fail_statements_containing("COMMIT");
        let mut queue = DeployQueue::new();
        queue.push(schema_create("a"));

        let err = execute_batch(&pool, &queue.take_batch()).unwrap_err();
        assert!(matches!(err, BatchFailure::RolledBack(_)));
        assert_eq!(server.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert!(server.committed().is_empty());
        assert!(!server.exists("/a"));
    }

    #[test]
    fn refused_login_never_starts_the_transaction() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        server.kill_sessions();
        server.refuse_connections(1);
        let mut queue = DeployQueue::new();
        queue.push(schema_create("a"));

        let err = execute_batch(&pool, &queue.take_batch()).unwrap_err();
        assert!(matches!(err, BatchFailure::NotStarted(FsError::ConnectionFailed(_))));
        assert!(server.statements().is_empty());
    }

    #[test]
    fn empty_batch_does_not_touch_the_pool() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
        let report = execute_batch(&pool, &Batch::default()).unwrap();
        assert_eq!(report.outcome, FlushOutcome::Idle);
        assert!(server.statements().is_empty());
    }
}
