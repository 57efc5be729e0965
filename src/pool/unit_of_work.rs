use tokio::sync::Mutex;

use crate::errors::CoreError;
use crate::pool::pool::{Pool, PoolHandle, PoolableConnection};
use crate::providers::{provider_value, ProviderSpec, ResolvedDeps};

/// One logical request's private slice of a shared pool.
///
/// Wraps a single pool handle so a type-erased provider value stays usable
/// by exactly one unit of work: access goes through `with`, and `complete`
/// surrenders the handle back to the pool. The wrapper is never retained
/// past its request; if the request is abandoned without `complete`, the
/// handle's drop path still returns the slot for rollback.
pub struct UnitOfWork<C: PoolableConnection> {
    handle: Mutex<Option<PoolHandle<C>>>,
}

impl<C: PoolableConnection> UnitOfWork<C> {
    pub fn new(handle: PoolHandle<C>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Identity of the underlying pool slot
    pub async fn slot_id(&self) -> Option<usize> {
        self.handle.lock().await.as_ref().map(|handle| handle.slot_id())
    }

    /// Run a closure against the private connection
    pub async fn with<F, R>(&self, f: F) -> Result<R, CoreError>
    where
        F: FnOnce(&mut C) -> R,
    {
        let mut guard = self.handle.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| CoreError::pool("unit of work already completed"))?;
        Ok(f(handle))
    }

    /// Surrender the handle back to the pool, rolling back any open
    /// transaction. Idempotent: completing twice is a no-op.
    pub async fn complete(&self) -> Result<(), CoreError> {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle.release().await,
            None => Ok(()),
        }
    }
}

/// Build the Factory-kind provider spec for units of work: every resolution
/// acquires a fresh, isolated handle from the pool registered under
/// `pool_key`. The pool is the only shared object; the produced value is
/// private to the resolving request.
pub fn unit_of_work_provider<C: PoolableConnection>(
    key: impl Into<String>,
    pool_key: impl Into<String>,
) -> ProviderSpec {
    ProviderSpec::factory(
        key,
        vec![pool_key.into()],
        |deps: ResolvedDeps| async move {
            let pool = deps.get::<Pool<C>>(0)?;
            let handle = pool.acquire().await?;
            Ok(provider_value(UnitOfWork::new(handle)))
        },
    )
}
