//! Error taxonomy surfaced to callers of the store.

use std::net::AddrParseError;

use etcd_coordination::CoordinationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpamError {
    /// Transport or TLS setup failed while connecting. Not retried internally.
    #[error("connection error: {0}")]
    Connection(#[source] CoordinationError),

    /// The pool's range configuration could not be written.
    #[error("failed to register pool '{pool}': {source}")]
    Registration {
        pool: String,
        #[source]
        source: CoordinationError,
    },

    /// A read or write against a store key failed.
    #[error("store operation on '{key}' failed: {source}")]
    Store {
        key: String,
        #[source]
        source: CoordinationError,
    },

    /// An expected key is absent, e.g. no address reserved yet in a range.
    #[error("key '{key}' not found")]
    NotFound { key: String },

    /// A stored value does not decode as expected.
    #[error("value '{value}' at '{key}' is malformed: {reason}")]
    Parse {
        key: String,
        value: String,
        reason: String,
    },

    /// The lock could not be acquired within the retry budget.
    #[error("could not acquire lock '{key}' after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },
}

impl IpamError {
    /// `NotFound` is normal control flow for callers, e.g. "no prior
    /// allocation in this range".
    pub fn is_not_found(&self) -> bool {
        matches!(self, IpamError::NotFound { .. })
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, IpamError::LockTimeout { .. })
    }

    pub(crate) fn store(key: &str) -> impl FnOnce(CoordinationError) -> IpamError + '_ {
        move |source| IpamError::Store {
            key: key.to_owned(),
            source,
        }
    }

    pub(crate) fn bad_address(key: &str, value: &str, err: AddrParseError) -> IpamError {
        IpamError::Parse {
            key: key.to_owned(),
            value: value.to_owned(),
            reason: err.to_string(),
        }
    }
}

pub type IpamResult<T> = Result<T, IpamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = IpamError::NotFound {
            key: "/root/net1/lastReserved/0".into(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_lock_timeout());

        let timeout = IpamError::LockTimeout {
            key: "/root/net1/lock".into(),
            attempts: 20,
        };
        assert!(timeout.is_lock_timeout());
        assert!(!timeout.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = IpamError::store("/root/net1/used/10.0.0.5")(CoordinationError::Transport(
            "conn reset".into(),
        ));
        let msg = err.to_string();
        assert!(msg.contains("/root/net1/used/10.0.0.5"));
        assert!(msg.contains("conn reset"));

        let err = IpamError::LockTimeout {
            key: "/root/net1/lock".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "could not acquire lock '/root/net1/lock' after 3 attempts"
        );
    }

    #[test]
    fn test_bad_address() {
        let parse_err = "10.0.0.300".parse::<std::net::IpAddr>().unwrap_err();
        let err = IpamError::bad_address("/k", "10.0.0.300", parse_err);
        assert!(matches!(err, IpamError::Parse { ref value, .. } if value == "10.0.0.300"));
    }
}
