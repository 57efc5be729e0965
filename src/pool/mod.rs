#[allow(clippy::module_inception)]
pub mod pool;
pub mod unit_of_work;

pub use pool::{Pool, PoolHandle, PoolableConnection, DEFAULT_ACQUIRE_TIMEOUT};
pub use unit_of_work::{unit_of_work_provider, UnitOfWork};
