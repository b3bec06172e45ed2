use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use config::{Range, RangeSet};
use etcd_coordination::{
    CoordinationError, CoordinationResult, KeyValue, KvBackend, LeaseId, MemoryBackend, Txn,
    TxnResponse,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    GetPrefix,
    Put,
    Delete,
    LeaseGrant,
}

/// `MemoryBackend` that fails chosen operations on chosen keys.
#[derive(Debug, Default)]
pub struct FaultyBackend {
    inner: MemoryBackend,
    faults: Mutex<Vec<(Op, Option<String>)>>,
    deletes: AtomicUsize,
    yield_after_get: AtomicBool,
}

#[allow(unused)]
impl FaultyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// fail `op` on `key`, or on every key when `None`
    pub fn fail(&self, op: Op, key: Option<&str>) {
        self.faults.lock().push((op, key.map(str::to_owned)));
    }

    /// hand control back to the scheduler after every `get`, so the caller
    /// resumes with a read other tasks may already have invalidated
    pub fn yield_after_get(self) -> Self {
        self.yield_after_get.store(true, Ordering::SeqCst);
        self
    }

    pub fn clear(&self) {
        self.faults.lock().clear();
    }

    /// delete calls attempted, including failed ones
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self, op: Op, key: &str) -> CoordinationResult<()> {
        let hit = self
            .faults
            .lock()
            .iter()
            .any(|(o, k)| *o == op && k.as_deref().is_none_or(|k| k == key));
        if hit {
            return Err(CoordinationError::Transport(format!(
                "injected {op:?} failure on '{key}'"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FaultyBackend {
    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValue>> {
        self.check(Op::Get, key)?;
        let kv = self.inner.get(key).await?;
        if self.yield_after_get.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(kv)
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>> {
        self.check(Op::GetPrefix, prefix)?;
        self.inner.get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()> {
        self.check(Op::Put, key)?;
        self.inner.put(key, value, lease).await
    }

    async fn delete(&self, key: &str) -> CoordinationResult<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check(Op::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn txn(&self, txn: Txn) -> CoordinationResult<TxnResponse> {
        self.inner.txn(txn).await
    }

    async fn lease_grant(&self, ttl: Duration) -> CoordinationResult<LeaseId> {
        self.check(Op::LeaseGrant, "")?;
        self.inner.lease_grant(ttl).await
    }

    async fn lease_revoke(&self, id: LeaseId) -> CoordinationResult<()> {
        self.inner.lease_revoke(id).await
    }
}

#[allow(unused)]
pub fn ranges() -> Vec<RangeSet> {
    vec![vec![Range {
        range_start: Some("10.0.0.2".parse().unwrap()),
        range_end: Some("10.0.0.254".parse().unwrap()),
        subnet: "10.0.0.0/24".parse().unwrap(),
        gateway: Some("10.0.0.1".parse().unwrap()),
    }]]
}
