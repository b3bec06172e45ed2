//! Reservation ledger for one registered pool.
//!
//! Each reserved address has a record at `used/<ip>` holding its owner id,
//! and each range remembers the last address handed out at
//! `lastReserved/<range>`. Every call is a direct round trip; nothing is
//! cached between calls.

use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;
use config::{IpamConfig, RangeSet};
use etcd_coordination::{KeyLayout, KvBackend, format_ip};
use tracing::debug;

use crate::{
    Store,
    error::{IpamError, IpamResult},
    lock::{DistributedLock, LockPolicy},
    registrar,
};

/// A registered pool bound to its coordination backend.
///
/// The handle is immutable after construction and cheap to clone; clones
/// share the backend session.
#[derive(Debug)]
pub struct PoolStore<B> {
    backend: Arc<B>,
    layout: KeyLayout,
    lock: DistributedLock<B>,
}

impl<B> Clone for PoolStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            layout: self.layout.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<B: KvBackend> PoolStore<B> {
    /// Register `pool` with `ranges` under `root` and bind a store to it.
    pub async fn register(
        backend: B,
        root: &str,
        pool: &str,
        ranges: &[RangeSet],
        policy: LockPolicy,
    ) -> IpamResult<Self> {
        let backend = Arc::new(backend);
        let layout = registrar::register(backend.as_ref(), root, pool, ranges).await?;
        let lock = DistributedLock::new(Arc::clone(&backend), &layout, policy);
        Ok(Self {
            backend,
            layout,
            lock,
        })
    }

    /// Register `pool` using the ranges, key root and lock tuning in `config`.
    pub async fn from_config(backend: B, pool: &str, config: &IpamConfig) -> IpamResult<Self> {
        Self::register(
            backend,
            config.key_root(),
            pool,
            config.ranges(),
            LockPolicy::from(config.lock()),
        )
        .await
    }

    /// pool name
    pub fn name(&self) -> &str {
        self.layout.pool()
    }

    /// namespace prefix all of this pool's keys live under
    pub fn namespace(&self) -> &str {
        self.layout.namespace()
    }
}

#[cfg(feature = "etcd")]
impl PoolStore<etcd_coordination::EtcdBackend> {
    /// Connect to etcd as described by `config` and register `pool`.
    ///
    /// Dial and TLS failures are `Connection` errors; the pool write failing
    /// is a `Registration` error.
    pub async fn new(pool: &str, config: &IpamConfig) -> IpamResult<Self> {
        let backend = etcd_coordination::EtcdBackend::connect(config.etcd())
            .await
            .map_err(IpamError::Connection)?;
        Self::from_config(backend, pool, config).await
    }
}

#[async_trait]
impl<B: KvBackend> Store for PoolStore<B> {
    async fn lock(&self) -> IpamResult<()> {
        self.lock.lock().await
    }

    async fn unlock(&self) -> IpamResult<()> {
        self.lock.unlock().await
    }

    async fn close(&self) -> IpamResult<()> {
        debug!(pool = self.name(), "closing pool store");
        Ok(())
    }

    async fn reserve(&self, id: &str, ip: IpAddr, range_id: &str) -> IpamResult<bool> {
        let key = self.layout.used(ip);
        if let Some(existing) = self
            .backend
            .get(&key)
            .await
            .map_err(IpamError::store(&key))?
        {
            debug!(%ip, owner = %existing.value, requested_by = id, "address already reserved");
            return Ok(false);
        }

        self.backend
            .put(&key, id, None)
            .await
            .map_err(IpamError::store(&key))?;

        let last = self.layout.last_reserved(range_id);
        self.backend
            .put(&last, &format_ip(ip), None)
            .await
            .map_err(IpamError::store(&last))?;

        debug!(%ip, owner = id, range_id, "address reserved");
        Ok(true)
    }

    async fn last_reserved_ip(&self, range_id: &str) -> IpamResult<IpAddr> {
        let key = self.layout.last_reserved(range_id);
        let kv = self
            .backend
            .get(&key)
            .await
            .map_err(IpamError::store(&key))?
            .ok_or_else(|| IpamError::NotFound { key: key.clone() })?;
        kv.value
            .parse::<IpAddr>()
            .map_err(|e| IpamError::bad_address(&key, &kv.value, e))
    }

    async fn release(&self, ip: IpAddr) -> IpamResult<()> {
        let key = self.layout.used(ip);
        let deleted = self
            .backend
            .delete(&key)
            .await
            .map_err(IpamError::store(&key))?;
        debug!(%ip, deleted, "address released");
        Ok(())
    }

    async fn release_by_id(&self, id: &str) -> IpamResult<()> {
        let prefix = self.layout.used_prefix();
        let records = self
            .backend
            .get_prefix(&prefix)
            .await
            .map_err(IpamError::store(&prefix))?;

        let mut released = 0usize;
        for record in records.iter().filter(|record| record.value == id) {
            self.backend
                .delete(&record.key)
                .await
                .map_err(IpamError::store(&record.key))?;
            released += 1;
        }
        debug!(owner = id, released, "released addresses by owner");
        Ok(())
    }
}
