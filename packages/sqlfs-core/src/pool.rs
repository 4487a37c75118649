//! Bounded pool of database sessions.
//!
//! Slots are handed out through [`PooledSession`] guards and go back to the
//! pool when the guard drops. Healthy slots are queued ahead of dead ones so
//! a reconnect is only paid when no healthy slot is idle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::catalog::{Connector, RowSet, Session};
use crate::error::{FsError, Result};

/// One reusable session. `None` means the transport is gone.
pub struct ConnectionSlot {
    id: usize,
    session: Option<Box<dyn Session>>,
}

impl ConnectionSlot {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_dead(&self) -> bool {
        self.session.as_ref().map_or(true, |s| s.is_dead())
    }

    /// Closes the stale transport and opens a fresh session in its place.
    fn reconnect(&mut self, connector: &dyn Connector) -> Result<()> {
        if let Some(mut stale) = self.session.take() {
            stale.close();
        }
        self.session = Some(connector.connect()?);
        info!("Reconnected session {}", self.id);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

struct PoolState {
    idle: VecDeque<ConnectionSlot>,
    /// No new acquisitions once set
    closing: bool,
    /// Shutdown has drained the pool
    finished: bool,
}

/// Fixed-size set of sessions shared by lookups and the deploy flush.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    released: Condvar,
    size: usize,
}

impl ConnectionPool {
    /// Opens `size` sessions (at least one).
    ///
    /// # Arguments
    /// * `connector` - Opens and re-opens sessions
    /// * `size` - Number of slots
    ///
    /// # Returns
    /// `Result<ConnectionPool>`; any login failure aborts startup.
    pub fn connect(connector: Arc<dyn Connector>, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut idle = VecDeque::with_capacity(size);
        for id in 0..size {
            match connector.connect() {
                Ok(session) => idle.push_back(ConnectionSlot {
                    id,
                    session: Some(session),
                }),
                Err(e) => {
                    for mut slot in idle {
                        slot.close();
                    }
                    return Err(e);
                }
            }
        }
        info!("Connection pool started with {} session(s)", size);
        Ok(Self {
            connector,
            state: Mutex::new(PoolState {
                idle,
                closing: false,
                finished: false,
            }),
            released: Condvar::new(),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots currently idle.
    pub fn available(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Takes a slot, blocking until one is released.
    ///
    /// A dead slot is reconnected before it is handed out. If that fails the
    /// slot goes back to the pool, still dead, and the connection error is
    /// returned.
    pub fn acquire(&self) -> Result<PooledSession<'_>> {
        let mut slot = {
            let mut state = self.state.lock();
            loop {
                if state.closing {
                    return Err(FsError::ShutDown("connection pool"));
                }
                if let Some(slot) = state.idle.pop_front() {
                    break slot;
                }
                self.released.wait(&mut state);
            }
        };

        if slot.is_dead() {
            debug!("Session {} is dead, reconnecting on acquire", slot.id);
            if let Err(e) = slot.reconnect(self.connector.as_ref()) {
                warn!("Reconnect of session {} failed: {}", slot.id, e);
                self.release(slot);
                return Err(e);
            }
        }

        Ok(PooledSession {
            pool: self,
            slot: Some(slot),
        })
    }

    fn release(&self, mut slot: ConnectionSlot) {
        let mut state = self.state.lock();
        if state.finished {
            slot.close();
            return;
        }
        if slot.is_dead() {
            state.idle.push_back(slot);
        } else {
            state.idle.push_front(slot);
        }
        drop(state);
        self.released.notify_all();
    }

    /// Drains every slot and closes it.
    ///
    /// Waits up to `timeout` for checked-out slots to come back. Slots that
    /// return later are closed on release.
    ///
    /// # Returns
    /// `Err(Busy)` when slots were still checked out at the deadline,
    /// `Err(ShutDown)` on a second call.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.closing {
            return Err(FsError::ShutDown("connection pool"));
        }
        state.closing = true;

        while state.idle.len() < self.size {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let outstanding = self.size - state.idle.len();
        let mut drained = 0;
        while let Some(mut slot) = state.idle.pop_front() {
            slot.close();
            drained += 1;
        }
        state.finished = true;
        drop(state);
        self.released.notify_all();

        if outstanding > 0 {
            warn!(
                "Pool shutdown closed {} session(s), {} still checked out",
                drained, outstanding
            );
            return Err(FsError::Busy { outstanding });
        }
        info!("Connection pool shut down, {} session(s) closed", drained);
        Ok(())
    }
}

/// A checked-out slot. Returned to its pool on drop.
pub struct PooledSession<'a> {
    pool: &'a ConnectionPool,
    slot: Option<ConnectionSlot>,
}

impl PooledSession<'_> {
    pub fn slot_id(&self) -> usize {
        self.slot.as_ref().map_or(usize::MAX, |s| s.id)
    }

    /// Sends one statement.
    ///
    /// A transport failure triggers exactly one reconnect and retry; a second
    /// failure is returned as is.
    pub fn execute(&mut self, sql: &str) -> Result<RowSet> {
        let connector = self.pool.connector.as_ref();
        let slot = self
            .slot
            .as_mut()
            .ok_or(FsError::ShutDown("pooled session"))?;

        let first = match slot.session.as_mut() {
            Some(session) => session.execute(sql),
            None => Err(FsError::SessionDead { slot: slot.id }),
        };
        match first {
            Err(e) if e.is_transport() => {
                warn!("Session {} transport failure ({}), retrying once", slot.id, e);
                slot.reconnect(connector)?;
                match slot.session.as_mut() {
                    Some(session) => session.execute(sql),
                    None => Err(FsError::SessionDead { slot: slot.id }),
                }
            }
            other => other,
        }
    }

    /// Sends one statement without the reconnect-and-retry.
    ///
    /// Used inside transactions, where a fresh session would not carry the
    /// open transaction.
    pub fn execute_once(&mut self, sql: &str) -> Result<RowSet> {
        let slot = self
            .slot
            .as_mut()
            .ok_or(FsError::ShutDown("pooled session"))?;
        match slot.session.as_mut() {
            Some(session) => session.execute(sql),
            None => Err(FsError::SessionDead { slot: slot.id }),
        }
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}
