//! Lease-backed pool lock.
//!
//! Acquisition grants a fresh lease and, in one transaction, creates the lock
//! key attached to that lease only if the key does not exist. A contended
//! attempt sleeps for the backoff interval and tries again with a new lease;
//! the lease from the failed attempt is left to expire on its own.
//!
//! There is no keep-alive. If a holder dies, or simply runs past the TTL,
//! the lease expires, the key is deleted, and the next caller gets the lock.
//! Mutual exclusion is therefore only guaranteed within the TTL window.

use std::{sync::Arc, time::Duration};

use config::LockConfig;
use etcd_coordination::{Compare, KeyLayout, KvBackend, LeaseId, Txn, TxnOp};
use tracing::{debug, info, warn};

use crate::error::{IpamError, IpamResult};

/// Default lease TTL for a held lock.
const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Default number of acquisition attempts.
const DEFAULT_RETRIES: u32 = 20;

/// Default pause between contended attempts.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Timing for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// lease time-to-live; the lock self-releases after this long
    pub ttl: Duration,
    /// acquisition attempts before `LockTimeout`
    pub retries: u32,
    /// pause between attempts
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&LockConfig> for LockPolicy {
    fn from(config: &LockConfig) -> Self {
        Self {
            ttl: config.ttl(),
            retries: config.retries(),
            backoff: config.backoff(),
        }
    }
}

/// Mutual exclusion over the `lock` key of one pool namespace.
#[derive(Debug)]
pub(crate) struct DistributedLock<B> {
    backend: Arc<B>,
    pub(crate) key: String,
    pub(crate) policy: LockPolicy,
}

impl<B> Clone for DistributedLock<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            key: self.key.clone(),
            policy: self.policy,
        }
    }
}

impl<B: KvBackend> DistributedLock<B> {
    pub(crate) fn new(backend: Arc<B>, layout: &KeyLayout, policy: LockPolicy) -> Self {
        Self {
            backend,
            key: layout.lock(),
            policy,
        }
    }

    /// Block until the lock is held or the retry budget is spent.
    ///
    /// Returns `LockTimeout` once every attempt found the key taken. At least
    /// one attempt is always made. A failed lease grant or transaction is
    /// returned immediately as a `Store` error.
    pub(crate) async fn lock(&self) -> IpamResult<()> {
        let LockPolicy { ttl, backoff, .. } = self.policy;
        let retries = self.policy.retries.max(1);

        for attempt in 1..=retries {
            let lease = self
                .backend
                .lease_grant(ttl)
                .await
                .map_err(IpamError::store(&self.key))?;

            let resp = self
                .backend
                .txn(self.acquire_txn(lease))
                .await
                .map_err(IpamError::store(&self.key))?;

            if resp.succeeded {
                info!(key = %self.key, %lease, attempt, "pool lock acquired");
                return Ok(());
            }

            let holder = resp.kvs.first().map(|kv| kv.value.as_str());
            warn!(
                key = %self.key,
                attempt,
                retries,
                holder,
                retry_in_ms = backoff.as_millis(),
                "pool lock is held, retrying"
            );
            if attempt < retries {
                tokio::time::sleep(backoff).await;
            }
        }

        Err(IpamError::LockTimeout {
            key: self.key.clone(),
            attempts: retries,
        })
    }

    /// Release the lock by revoking the lease recorded in the lock key.
    ///
    /// An absent key means the lock is already free. A value that is not a
    /// lease id is a `Parse` error. Revocation is best effort: a failure is
    /// logged and the key is left to expire with its lease.
    pub(crate) async fn unlock(&self) -> IpamResult<()> {
        let Some(kv) = self
            .backend
            .get(&self.key)
            .await
            .map_err(IpamError::store(&self.key))?
        else {
            debug!(key = %self.key, "pool lock already released");
            return Ok(());
        };

        let lease = kv
            .value
            .parse::<LeaseId>()
            .map_err(|e| IpamError::Parse {
                key: self.key.clone(),
                value: kv.value.clone(),
                reason: e.to_string(),
            })?;

        match self.backend.lease_revoke(lease).await {
            Ok(()) => info!(key = %self.key, %lease, "pool lock released"),
            Err(err) => warn!(
                key = %self.key,
                %lease,
                %err,
                "failed to revoke lock lease, lock will expire with its ttl"
            ),
        }
        Ok(())
    }

    fn acquire_txn(&self, lease: LeaseId) -> Txn {
        Txn::new()
            .when(vec![Compare::absent(self.key.as_str())])
            .and_then(vec![TxnOp::Put {
                key: self.key.clone(),
                value: lease.to_string(),
                lease: Some(lease),
            }])
            .or_else(vec![TxnOp::Get {
                key: self.key.clone(),
            }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcd_coordination::MemoryBackend;
    use tracing_test::traced_test;

    fn test_lock(kv: &Arc<MemoryBackend>, policy: LockPolicy) -> DistributedLock<MemoryBackend> {
        let layout = KeyLayout::new("/root", "net1").unwrap();
        DistributedLock::new(Arc::clone(kv), &layout, policy)
    }

    fn short_policy() -> LockPolicy {
        LockPolicy {
            ttl: Duration::from_secs(10),
            retries: 3,
            backoff: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_policy_default() {
        let policy = LockPolicy::default();
        assert_eq!(policy.ttl, Duration::from_secs(10));
        assert_eq!(policy.retries, 20);
        assert_eq!(policy.backoff, Duration::from_secs(2));
        assert_eq!(LockPolicy::from(&LockConfig::default()), policy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_writes_lease_id() {
        let kv = Arc::new(MemoryBackend::new());
        let lock = test_lock(&kv, short_policy());
        assert_eq!(lock.key, "/root/net1/lock");

        lock.lock().await.unwrap();
        let stored = kv.get("/root/net1/lock").await.unwrap().unwrap();
        let lease: LeaseId = stored.value.parse().unwrap();
        assert_eq!(stored.lease, Some(lease));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_revokes_lease() {
        let kv = Arc::new(MemoryBackend::new());
        let lock = test_lock(&kv, short_policy());
        lock.lock().await.unwrap();
        lock.unlock().await.unwrap();
        assert_eq!(kv.get("/root/net1/lock").await.unwrap(), None);
        assert_eq!(kv.live_leases(), 0);
    }

    #[tokio::test]
    async fn test_unlock_when_unlocked_is_ok() {
        let kv = Arc::new(MemoryBackend::new());
        let lock = test_lock(&kv, short_policy());
        lock.unlock().await.unwrap();
        lock.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_malformed_lease_id() {
        let kv = Arc::new(MemoryBackend::new());
        kv.put("/root/net1/lock", "not-a-lease", None).await.unwrap();
        let lock = test_lock(&kv, short_policy());
        let err = lock.unlock().await.unwrap_err();
        assert!(matches!(err, IpamError::Parse { ref value, .. } if value == "not-a-lease"));
    }

    #[tokio::test]
    async fn test_unlock_rejects_padded_lease_id() {
        let kv = Arc::new(MemoryBackend::new());
        let lease = kv.lease_grant(Duration::from_secs(10)).await.unwrap();
        kv.put("/root/net1/lock", &format!(" {lease}\n"), Some(lease))
            .await
            .unwrap();
        let lock = test_lock(&kv, short_policy());
        let err = lock.unlock().await.unwrap_err();
        assert!(matches!(err, IpamError::Parse { .. }));
        // the lease was left alone
        assert_eq!(kv.live_leases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let kv = Arc::new(MemoryBackend::new());
        let policy = LockPolicy {
            retries: 0,
            ..short_policy()
        };
        let holder = test_lock(&kv, policy);
        holder.lock().await.unwrap();
        assert!(kv.get("/root/net1/lock").await.unwrap().is_some());

        let contender = test_lock(&kv, policy);
        let start = tokio::time::Instant::now();
        let err = contender.lock().await.unwrap_err();
        assert!(matches!(err, IpamError::LockTimeout { attempts: 1, .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unlock_unknown_lease_is_best_effort() {
        let kv = Arc::new(MemoryBackend::new());
        kv.put("/root/net1/lock", "12345", None).await.unwrap();
        let lock = test_lock(&kv, short_policy());
        lock.unlock().await.unwrap();
        assert!(logs_contain("failed to revoke lock lease"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_lock_times_out() {
        let kv = Arc::new(MemoryBackend::new());
        let policy = LockPolicy {
            ttl: Duration::from_secs(60),
            retries: 3,
            backoff: Duration::from_secs(2),
        };
        let holder = test_lock(&kv, policy);
        let contender = test_lock(&kv, policy);
        holder.lock().await.unwrap();

        let start = tokio::time::Instant::now();
        let err = contender.lock().await.unwrap_err();
        assert!(matches!(err, IpamError::LockTimeout { attempts: 3, .. }));
        // sleeps only between attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_self_releases_after_ttl() {
        let kv = Arc::new(MemoryBackend::new());
        let policy = LockPolicy {
            ttl: Duration::from_secs(5),
            retries: 10,
            backoff: Duration::from_secs(2),
        };
        let holder = test_lock(&kv, policy);
        let contender = test_lock(&kv, policy);
        holder.lock().await.unwrap();

        let start = tokio::time::Instant::now();
        contender.lock().await.unwrap();
        // attempts at 0s, 2s, 4s fail; the holder's lease is gone at 5s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }
}
