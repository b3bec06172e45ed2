//! The coordination capability consumed by the reservation store.
//!
//! `KvBackend` is the small surface the store needs from a linearizable
//! key-value service: point reads, prefix scans, writes, deletes, a single
//! compare-and-branch transaction, and expiring leases. The etcd backend and
//! the in-memory backend both implement it, so the store never depends on a
//! concrete client.

use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::error::CoordinationResult;

/// Identifier of a server-side lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LeaseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(LeaseId)
    }
}

/// A stored key with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// revision at which the key was last created; 0 never appears for a live key
    pub create_revision: i64,
    pub mod_revision: i64,
    /// lease the key is attached to, if any
    pub lease: Option<LeaseId>,
}

/// Comparison operator used in transaction predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

impl CompareOp {
    pub(crate) fn eval<T: Ord>(self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
            CompareOp::Greater => lhs > rhs,
            CompareOp::Less => lhs < rhs,
        }
    }
}

/// A predicate evaluated atomically at the start of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Compare the key's creation revision; an absent key has revision 0.
    CreateRevision {
        key: String,
        op: CompareOp,
        revision: i64,
    },
    /// Compare the key's value. An absent key fails every value comparison.
    Value {
        key: String,
        op: CompareOp,
        value: String,
    },
}

impl Compare {
    /// true when `key` does not currently exist
    pub fn absent<K: Into<String>>(key: K) -> Self {
        Compare::CreateRevision {
            key: key.into(),
            op: CompareOp::Equal,
            revision: 0,
        }
    }
}

/// An operation executed by one branch of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: String,
        lease: Option<LeaseId>,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
}

/// Conditional transaction: if every `when` predicate holds run `then`,
/// otherwise run `otherwise`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub when: Vec<Compare>,
    pub then: Vec<TxnOp>,
    pub otherwise: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compares: impl Into<Vec<Compare>>) -> Self {
        self.when = compares.into();
        self
    }

    pub fn and_then(mut self, ops: impl Into<Vec<TxnOp>>) -> Self {
        self.then = ops.into();
        self
    }

    pub fn or_else(mut self, ops: impl Into<Vec<TxnOp>>) -> Self {
        self.otherwise = ops.into();
        self
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResponse {
    /// whether the `when` predicates held and the `then` branch ran
    pub succeeded: bool,
    /// key-values returned by `Get` operations of the branch that ran
    pub kvs: Vec<KeyValue>,
}

/// Linearizable key-value service with leases and conditional transactions.
#[async_trait]
pub trait KvBackend: Send + Sync + fmt::Debug + 'static {
    /// Read a single key.
    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValue>>;

    /// Read every key starting with `prefix`, in ascending key order.
    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>>;

    /// Write a key unconditionally, optionally attaching it to a lease.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()>;

    /// Delete a key, returning how many keys were removed. Absent keys are not an error.
    async fn delete(&self, key: &str) -> CoordinationResult<u64>;

    /// Atomically evaluate the predicates and run one branch.
    async fn txn(&self, txn: Txn) -> CoordinationResult<TxnResponse>;

    /// Grant a lease that expires after `ttl` unless renewed.
    async fn lease_grant(&self, ttl: Duration) -> CoordinationResult<LeaseId>;

    /// Revoke a lease, deleting every key attached to it.
    async fn lease_revoke(&self, id: LeaseId) -> CoordinationResult<()>;
}
