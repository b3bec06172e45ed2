//! Serialized configuration format.
//!
//! Field names follow the camelCase JSON used by CNI IPAM configuration, so a
//! network config written for the etcd IPAM plugin decodes unchanged.

use std::{net::IpAddr, path::PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize};

/// Root under which every pool namespace is created.
pub const DEFAULT_KEY_ROOT: &str = "/etcd-cni/networks";

pub const fn default_dial_timeout_secs() -> u64 {
    5
}

pub const fn default_lock_ttl_secs() -> u64 {
    10
}

pub const fn default_lock_retries() -> u32 {
    20
}

pub const fn default_lock_backoff_millis() -> u64 {
    2_000
}

pub fn default_key_root() -> String {
    DEFAULT_KEY_ROOT.to_owned()
}

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub ranges: Vec<RangeSet>,
    pub etcd_config: EtcdConfig,
    #[serde(default = "default_key_root")]
    pub key_root: String,
    #[serde(default)]
    pub lock: LockConfig,
}

/// An ordered group of ranges that are allocated from together.
pub type RangeSet = Vec<Range>;

/// A single address range descriptor.
///
/// The store treats this as opaque, it is only serialized into the pool
/// registration record. Field order here is the order written to etcd.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<IpAddr>,
    pub subnet: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EtcdConfig {
    #[serde(rename = "etcdURL")]
    pub etcd_url: String,
    #[serde(
        rename = "etcdCertFile",
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_file: Option<PathBuf>,
    #[serde(
        rename = "etcdKeyFile",
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_file: Option<PathBuf>,
    #[serde(
        rename = "etcdTrustedCAFileFile",
        default,
        deserialize_with = "deserialize_optional_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub trusted_ca_file: Option<PathBuf>,
    #[serde(rename = "dialTimeoutSecs", default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    #[serde(default = "default_lock_backoff_millis")]
    pub backoff_millis: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
            retries: default_lock_retries(),
            backoff_millis: default_lock_backoff_millis(),
        }
    }
}

/// CNI configs commonly carry `""` for unset file paths
fn deserialize_optional_path<'de, D>(de: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from))
}
