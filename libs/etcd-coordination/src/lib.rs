//! # etcd-coordination
//!
//! Access to the linearizable key-value service that holds IP reservation
//! state.
//!
//! This library provides:
//! - **`KvBackend`**, the capability set the reservation store is written
//!   against: get, prefix get, put, delete, conditional transaction, lease
//!   grant and revoke.
//! - **`EtcdBackend`** (feature `etcd`), an etcd v3 implementation with
//!   connection bootstrap over plain or mutually authenticated TLS transport.
//! - **`MemoryBackend`**, an in-process implementation with the same
//!   revision and lease semantics, for tests and single-host use.
//! - **`KeyLayout`**, the single place the persisted key format is defined.
//!
//! ## Design Principles
//!
//! - The coordination handle is always passed in, never a process global.
//! - etcd client types do not leak past this crate.
//! - Construction failures are returned, never panicked on.

pub mod backend;
#[cfg(feature = "etcd")]
pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod tls;

// Re-export key types for convenient access
pub use backend::{Compare, CompareOp, KeyValue, KvBackend, LeaseId, Txn, TxnOp, TxnResponse};
#[cfg(feature = "etcd")]
pub use client::EtcdBackend;
pub use error::{CoordinationError, CoordinationResult};
pub use keys::{KeyLayout, format_ip};
pub use memory::MemoryBackend;
pub use tls::TlsMaterial;
