//! Pool registration.
//!
//! Registering a pool writes its range configuration under `<root>/<pool>`
//! and yields the namespace every other key of the pool lives under. The
//! write is an unconditional upsert: registering again replaces the stored
//! ranges, and two concurrent registrations of the same pool race with the
//! last write winning.

use config::RangeSet;
use etcd_coordination::{CoordinationError, KeyLayout, KvBackend};
use tracing::{debug, info};

use crate::error::{IpamError, IpamResult};

/// Encode range sets in the text form stored at the pool key.
pub(crate) fn encode_ranges(ranges: &[RangeSet]) -> Result<String, CoordinationError> {
    serde_json::to_string(ranges)
        .map_err(|e| CoordinationError::Codec(format!("failed to encode ranges: {e}")))
}

/// Write the range configuration for `pool` and return its namespace prefix.
pub(crate) async fn register<B>(
    backend: &B,
    root: &str,
    pool: &str,
    ranges: &[RangeSet],
) -> IpamResult<KeyLayout>
where
    B: KvBackend + ?Sized,
{
    let registration_err = |source| IpamError::Registration {
        pool: pool.to_owned(),
        source,
    };
    let layout = KeyLayout::new(root, pool).map_err(registration_err)?;
    let encoded = encode_ranges(ranges).map_err(registration_err)?;
    debug!(key = layout.namespace(), ranges = %encoded, "writing pool ranges");

    backend
        .put(layout.namespace(), &encoded, None)
        .await
        .map_err(registration_err)?;

    info!(pool, namespace = layout.namespace(), "pool registered");
    Ok(layout)
}
