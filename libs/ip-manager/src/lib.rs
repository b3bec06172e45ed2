//! # ip-manager
//!
//! `ip-manager` keeps the shared IP reservation state for a container
//! networking IPAM in a linearizable key-value store.
//!
//! A pool is registered once per invocation with [`PoolStore::register`],
//! which writes its range configuration and binds a handle to the pool's
//! namespace. The handle implements [`Store`]: a ledger of which container
//! owns which address, the last address handed out per range, and a
//! lease-backed lock callers hold around their allocate/release sequences.
//!
//! `Store::reserve` is a read-then-write and is only safe against other
//! reservers while the caller holds the pool lock.
//!
//! [`Store`]: ip_manager::Store
//! [`PoolStore::register`]: ip_manager::PoolStore::register

use std::net::IpAddr;

use async_trait::async_trait;

mod error;
mod lock;
mod registrar;
mod store;

pub use error::{IpamError, IpamResult};
pub use lock::LockPolicy;
pub use store::PoolStore;

/// Pool store backed by an etcd cluster.
#[cfg(feature = "etcd")]
pub type EtcdStore = PoolStore<etcd_coordination::EtcdBackend>;

/// Reservation operations for a single registered pool.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // send/sync/static required for async trait bounds
    /// Acquire the pool lock, retrying on contention.
    async fn lock(&self) -> IpamResult<()>;
    /// Release the pool lock. Releasing a free lock is not an error.
    async fn unlock(&self) -> IpamResult<()>;
    /// End use of the handle.
    async fn close(&self) -> IpamResult<()>;
    /// Record `ip` as owned by `id` and remember it as the last address
    /// handed out in `range_id`. `Ok(false)` if `ip` is already reserved.
    async fn reserve(&self, id: &str, ip: IpAddr, range_id: &str) -> IpamResult<bool>;
    /// Most recent address reserved in `range_id`.
    async fn last_reserved_ip(&self, range_id: &str) -> IpamResult<IpAddr>;
    /// Drop the reservation of `ip`, if any.
    async fn release(&self, ip: IpAddr) -> IpamResult<()>;
    /// Drop every reservation owned by `id`.
    async fn release_by_id(&self, id: &str) -> IpamResult<()>;
}
