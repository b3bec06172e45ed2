//! Key layout for a registered pool.
//!
//! The layout is a pure translator from logical key kind to concrete key
//! string. Every key the store touches is produced here, so the persisted
//! format lives in one place:
//!
//! ```text
//! <root>/<pool>                        registered range configuration
//! <root>/<pool>/used/<ip>              owner id of a reserved address
//! <root>/<pool>/lastReserved/<range>   most recently reserved address in a range
//! <root>/<pool>/lock                   lease id of the current lock holder
//! ```

use std::net::IpAddr;

use crate::error::{CoordinationError, CoordinationResult};

const USED: &str = "used";
const LAST_RESERVED: &str = "lastReserved";
const LOCK: &str = "lock";

/// Resolves the keys belonging to one pool namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pool: String,
    namespace: String,
}

impl KeyLayout {
    /// Build the layout for `pool` under `root`.
    ///
    /// Returns an error if the pool name is empty, since the namespace would
    /// then be the root itself.
    pub fn new(root: &str, pool: &str) -> CoordinationResult<Self> {
        if pool.trim().is_empty() {
            return Err(CoordinationError::Config("pool name is empty".into()));
        }
        let root = root.trim_end_matches('/');
        Ok(Self {
            pool: pool.to_owned(),
            namespace: format!("{root}/{pool}"),
        })
    }

    /// pool name
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// namespace prefix; also the key holding the range configuration
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// key recording the owner of `ip`
    pub fn used(&self, ip: IpAddr) -> String {
        format!("{}{}", self.used_prefix(), format_ip(ip))
    }

    /// prefix shared by every reservation record
    pub fn used_prefix(&self) -> String {
        format!("{}/{USED}/", self.namespace)
    }

    /// key holding the last reserved address of `range_id`
    pub fn last_reserved(&self, range_id: &str) -> String {
        format!("{}/{LAST_RESERVED}/{range_id}", self.namespace)
    }

    /// key of the pool lock
    pub fn lock(&self) -> String {
        format!("{}/{LOCK}", self.namespace)
    }
}

/// Textual form of an address as stored in keys and values.
///
/// IPv4-mapped IPv6 addresses are written as plain IPv4 so both spellings of
/// the same address share one reservation record.
pub fn format_ip(ip: IpAddr) -> String {
    ip.to_canonical().to_string()
}
