use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::errors::CoreError;

/// Default bound on how long `acquire` waits for free capacity
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Seam between the pool and the underlying connection type.
///
/// The pool knows nothing about SQL or wire protocols; it only needs the
/// ability to roll a connection back so no unit of work's state survives
/// into the pool for reuse.
#[async_trait]
pub trait PoolableConnection: Send + 'static {
    /// Discard any uncommitted state left on the connection
    async fn rollback(&mut self) -> Result<(), CoreError>;

    /// Release the underlying transport, called when the pool closes
    async fn close(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

struct Slot<C> {
    id: usize,
    conn: C,
    /// Set when a handle came back without an explicit release; the slot is
    /// rolled back before it is handed out again
    dirty: bool,
}

struct PoolInner<C> {
    idle: Mutex<VecDeque<Slot<C>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl<C> PoolInner<C> {
    fn push_idle(&self, slot: Slot<C>) -> Result<(), CoreError> {
        self.idle
            .lock()
            .map_err(|_| CoreError::LockError {
                resource: "pool_idle".to_string(),
            })?
            .push_back(slot);
        Ok(())
    }
}

/// Fixed-capacity connection pool.
///
/// The pool itself is the shared object: many callers may `acquire`
/// concurrently, but every handle it returns is exclusively owned by one
/// unit of work until released. Cloning the pool clones a reference to the
/// same capacity.
pub struct Pool<C: PoolableConnection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: PoolableConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PoolableConnection> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.inner.capacity)
            .field("idle", &self.idle())
            .finish()
    }
}

impl<C: PoolableConnection> Pool<C> {
    /// Open a pool by eagerly constructing `capacity` connections
    pub async fn open<F, Fut>(capacity: usize, connect: F) -> Result<Self, CoreError>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<C, CoreError>>,
    {
        Self::open_with_timeout(capacity, DEFAULT_ACQUIRE_TIMEOUT, connect).await
    }

    /// Open a pool with an explicit default acquire timeout
    pub async fn open_with_timeout<F, Fut>(
        capacity: usize,
        acquire_timeout: Duration,
        connect: F,
    ) -> Result<Self, CoreError>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<C, CoreError>>,
    {
        if capacity == 0 {
            return Err(CoreError::pool("pool capacity must be non-zero"));
        }

        let mut idle = VecDeque::with_capacity(capacity);
        for id in 0..capacity {
            let conn = connect(id).await?;
            idle.push_back(Slot {
                id,
                conn,
                dirty: false,
            });
        }
        debug!(capacity, "pool opened");

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                acquire_timeout,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of connections currently sitting in the pool
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Acquire a handle, waiting up to the pool's default timeout
    pub async fn acquire(&self) -> Result<PoolHandle<C>, CoreError> {
        self.acquire_timeout(self.inner.acquire_timeout).await
    }

    /// Acquire a handle with a caller-supplied bound on the wait.
    ///
    /// The handle is bound to no prior state: a slot returned by an
    /// abandoned unit of work is rolled back here, before it is handed out.
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<PoolHandle<C>, CoreError> {
        let permit = match tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(CoreError::PoolClosed),
            Err(_) => return Err(CoreError::PoolExhausted { waited: wait }),
        };

        let slot = self
            .inner
            .idle
            .lock()
            .map_err(|_| CoreError::LockError {
                resource: "pool_idle".to_string(),
            })?
            .pop_front();
        let mut slot = match slot {
            Some(slot) => slot,
            // A permit with no idle slot means the pool was closed under us
            None => return Err(CoreError::PoolClosed),
        };

        if slot.dirty {
            debug!(slot = slot.id, "rolling back abandoned slot before reuse");
            if let Err(error) = slot.conn.rollback().await {
                // Keep the slot flagged so the next acquirer retries the
                // rollback instead of observing stale state
                self.inner.push_idle(slot)?;
                return Err(error);
            }
            slot.dirty = false;
        }

        Ok(PoolHandle {
            slot: Some(slot),
            inner: Arc::clone(&self.inner),
            _permit: Some(permit),
        })
    }

    /// Close the pool: wait for outstanding handles up to the acquire
    /// timeout, then close every idle connection.
    ///
    /// Handles still out after the drain deadline are abandoned; their slots
    /// come back dirty and are dropped with the pool.
    pub async fn close(&self) -> Result<(), CoreError> {
        let drain = self
            .inner
            .permits
            .clone()
            .acquire_many_owned(self.inner.capacity as u32);
        // Hold the drained permits until the semaphore is closed so no
        // waiter slips in mid-close
        let _drained = match tokio::time::timeout(self.inner.acquire_timeout, drain).await {
            Ok(Ok(permits)) => Some(permits),
            Ok(Err(_)) => return Ok(()), // already closed
            Err(_) => {
                warn!(
                    capacity = self.inner.capacity,
                    "pool close timed out waiting for outstanding handles"
                );
                None
            }
        };
        self.inner.permits.close();

        let slots: Vec<Slot<C>> = self
            .inner
            .idle
            .lock()
            .map_err(|_| CoreError::LockError {
                resource: "pool_idle".to_string(),
            })?
            .drain(..)
            .collect();

        let mut failures = Vec::new();
        for mut slot in slots {
            if let Err(error) = slot.conn.close().await {
                warn!(slot = slot.id, %error, "connection close failed");
                failures.push(format!("slot {}: {}", slot.id, error));
            }
        }
        debug!("pool closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::pool(failures.join("; ")))
        }
    }
}

/// A request-private connection drawn from the pool, exclusively owned by
/// one unit of work until released.
///
/// `release` rolls the connection back and returns it clean. Dropping the
/// handle instead (failure, panic, cancellation) returns the slot flagged
/// dirty; the next acquirer rolls it back before use, so the
/// guaranteed-release discipline holds no matter how the unit of work ended.
pub struct PoolHandle<C: PoolableConnection> {
    slot: Option<Slot<C>>,
    inner: Arc<PoolInner<C>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<C: PoolableConnection> PoolHandle<C> {
    /// Identity of the underlying pool slot
    pub fn slot_id(&self) -> usize {
        // Invariant: the slot is present for the handle's whole life;
        // release consumes the handle.
        self.slot.as_ref().map(|slot| slot.id).unwrap_or(usize::MAX)
    }

    /// Roll back and return the connection to the pool
    pub async fn release(mut self) -> Result<(), CoreError> {
        let mut slot = match self.slot.take() {
            Some(slot) => slot,
            None => return Ok(()),
        };

        match slot.conn.rollback().await {
            Ok(()) => {
                slot.dirty = false;
                self.inner.push_idle(slot)
            }
            Err(error) => {
                warn!(slot = slot.id, %error, "rollback on release failed");
                slot.dirty = true;
                self.inner.push_idle(slot)?;
                Err(error)
            }
        }
    }
}

impl<C: PoolableConnection> Deref for PoolHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Present until release consumes the handle
        &self.slot.as_ref().expect("pool handle used after release").conn
    }
}

impl<C: PoolableConnection> DerefMut for PoolHandle<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.slot.as_mut().expect("pool handle used after release").conn
    }
}

impl<C: PoolableConnection> Drop for PoolHandle<C> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            warn!(
                slot = slot.id,
                "pool handle dropped without release; slot flagged for rollback"
            );
            slot.dirty = true;
            if let Ok(mut idle) = self.inner.idle.lock() {
                idle.push_back(slot);
            }
        }
        // The permit drops after the slot is back, so a waiter woken by the
        // freed capacity always finds its slot.
    }
}
