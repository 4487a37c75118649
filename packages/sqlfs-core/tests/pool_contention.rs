use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ntest::timeout;
use sqlfs_core::deploy::{execute_batch, BatchFailure, FlushOutcome};
use sqlfs_core::ddl::Statement;
use sqlfs_core::{ConnectionPool, DatabaseObject, DeployQueue, FsError, MemoryServer, ObjectKind, ObjectPath, PendingCommand};

#[timeout(5000)]
#[test]
fn more_users_than_slots_share_the_pool() {
    let server = MemoryServer::new();
    let pool = Arc::new(ConnectionPool::connect(Arc::new(server.clone()), 2).unwrap());
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                let mut session = pool.acquire().unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                session.execute("SELECT 1").unwrap();
                thread::sleep(Duration::from_millis(20));
                in_use.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.available(), 2);
    assert_eq!(server.connect_count(), 2);
    pool.shutdown(Duration::from_secs(1)).unwrap();
    assert_eq!(server.open_sessions(), 0);
}

#[test]
fn killed_sessions_are_revived_without_errors() {
    let server = MemoryServer::new();
    let pool = ConnectionPool::connect(Arc::new(server.clone()), 3).unwrap();
    server.kill_sessions();
    for _ in 0..3 {
        let mut session = pool.acquire().unwrap();
        assert!(session.execute("SELECT 1").is_ok());
    }
    assert_eq!(server.open_sessions(), 3);
}

fn schema(name: &str) -> PendingCommand {
    PendingCommand::create_or_alter(
        ObjectPath::from_segments([name]),
        DatabaseObject::local(name, ObjectKind::Schema),
        Statement::CreateSchema {
            schema: name.to_string(),
        },
    )
}

#[test]
fn third_of_five_failing_leaves_no_trace() {
    let server = MemoryServer::new();
    let pool = ConnectionPool::connect(Arc::new(server.clone()), 1).unwrap();
    let mut queue = DeployQueue::new();
    for name in ["s1", "s2", "s3", "s4", "s5"] {
        queue.push(schema(name));
    }
    server.fail_statements_containing("[s3]");

    let batch = queue.take_batch();
    assert_eq!(batch.items.len(), 5);
    let result = execute_batch(&pool, &batch);
    assert!(matches!(result, Err(BatchFailure::RolledBack(FsError::ExecutionFailed { .. }))));
    for name in ["/s1", "/s2", "/s3", "/s4", "/s5"] {
        assert!(!server.exists(name), "{} leaked out of a rolled back batch", name);
    }
    assert!(queue.is_empty());

    server.clear_statement_failures();
    queue.push(schema("s1"));
    let report = execute_batch(&pool, &queue.take_batch()).unwrap();
    assert_eq!(report.outcome, FlushOutcome::Committed);
    assert!(server.exists("/s1"));
}
