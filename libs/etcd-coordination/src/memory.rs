//! In-process coordination backend.
//!
//! Mirrors the etcd semantics the store relies on: a single global revision,
//! create revisions of 0 for absent keys, leases that delete their keys when
//! they expire or are revoked, and transactions applied under one lock.
//! Lease deadlines use the tokio clock so tests can pause and advance time.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::backend::{Compare, KeyValue, KvBackend, LeaseId, Txn, TxnOp, TxnResponse};
use crate::error::{CoordinationError, CoordinationResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    revision: i64,
    last_lease: i64,
    kvs: BTreeMap<String, MemoryEntry>,
    leases: HashMap<LeaseId, MemoryLease>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    create_revision: i64,
    mod_revision: i64,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct MemoryLease {
    expires_at: Instant,
    keys: HashSet<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of leases that are granted and not yet expired or revoked
    pub fn live_leases(&self) -> usize {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        guard.leases.len()
    }
}

fn to_key_value(key: &str, entry: &MemoryEntry) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: entry.value.clone(),
        create_revision: entry.create_revision,
        mod_revision: entry.mod_revision,
        lease: entry.lease,
    }
}

impl MemoryState {
    /// drop leases past their deadline along with every key attached to them
    fn purge_expired(&mut self, now: Instant) {
        let expired = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in expired {
            trace!(lease = %id, "memory lease expired");
            self.remove_lease(id);
        }
    }

    fn remove_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        for key in lease.keys {
            if self.kvs.get(&key).is_some_and(|entry| entry.lease == Some(id)) {
                self.kvs.remove(&key);
                self.revision += 1;
            }
        }
        true
    }

    fn check_lease(&self, lease: Option<LeaseId>) -> CoordinationResult<()> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => {
                Err(CoordinationError::LeaseNotFound(id))
            }
            _ => Ok(()),
        }
    }

    fn get(&self, key: &str) -> Option<KeyValue> {
        self.kvs.get(key).map(|entry| to_key_value(key, entry))
    }

    fn put(&mut self, key: &str, value: &str, lease: Option<LeaseId>) {
        self.revision += 1;
        let revision = self.revision;
        let create_revision = match self.kvs.get(key) {
            Some(existing) => {
                if let Some(old) = existing.lease.filter(|old| Some(*old) != lease) {
                    if let Some(old_lease) = self.leases.get_mut(&old) {
                        old_lease.keys.remove(key);
                    }
                }
                existing.create_revision
            }
            None => revision,
        };
        if let Some(id) = lease {
            if let Some(attached) = self.leases.get_mut(&id) {
                attached.keys.insert(key.to_owned());
            }
        }
        self.kvs.insert(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                create_revision,
                mod_revision: revision,
                lease,
            },
        );
    }

    fn delete(&mut self, key: &str) -> u64 {
        match self.kvs.remove(key) {
            Some(entry) => {
                if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
                    lease.keys.remove(key);
                }
                self.revision += 1;
                1
            }
            None => 0,
        }
    }

    fn eval(&self, compare: &Compare) -> bool {
        match compare {
            Compare::CreateRevision { key, op, revision } => {
                let current = self.kvs.get(key).map(|e| e.create_revision).unwrap_or(0);
                op.eval(current, *revision)
            }
            Compare::Value { key, op, value } => self
                .kvs
                .get(key)
                .is_some_and(|e| op.eval(e.value.as_str(), value.as_str())),
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValue>> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        Ok(guard.get(key))
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        Ok(guard
            .kvs
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| to_key_value(key, entry))
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        guard.check_lease(lease)?;
        guard.put(key, value, lease);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoordinationResult<u64> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        Ok(guard.delete(key))
    }

    async fn txn(&self, txn: Txn) -> CoordinationResult<TxnResponse> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());

        let succeeded = txn.when.iter().all(|compare| guard.eval(compare));
        let ops = if succeeded { txn.then } else { txn.otherwise };

        // validate before mutating so a failed txn leaves no partial writes
        for op in &ops {
            if let TxnOp::Put { lease, .. } = op {
                guard.check_lease(*lease)?;
            }
        }

        let mut kvs = Vec::new();
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => guard.put(&key, &value, lease),
                TxnOp::Get { key } => kvs.extend(guard.get(&key)),
                TxnOp::Delete { key } => {
                    guard.delete(&key);
                }
            }
        }
        Ok(TxnResponse { succeeded, kvs })
    }

    async fn lease_grant(&self, ttl: Duration) -> CoordinationResult<LeaseId> {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        guard.purge_expired(now);
        guard.last_lease += 1;
        let id = LeaseId(guard.last_lease);
        guard.leases.insert(
            id,
            MemoryLease {
                expires_at: now + ttl,
                keys: HashSet::new(),
            },
        );
        debug!(lease = %id, ?ttl, "memory lease granted");
        Ok(id)
    }

    async fn lease_revoke(&self, id: LeaseId) -> CoordinationResult<()> {
        let mut guard = self.inner.lock();
        guard.purge_expired(Instant::now());
        if guard.remove_lease(id) {
            debug!(lease = %id, "memory lease revoked");
            Ok(())
        } else {
            Err(CoordinationError::LeaseNotFound(id))
        }
    }
}
