//! # config
//!
//! Configuration for an etcd-backed address pool: the range descriptors that
//! get registered for the pool, how to reach the coordination service, and
//! how the pool lock is tuned.
//!
//! Configs are decoded from JSON first, then YAML, and validated into the
//! runtime types exported here.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod wire;

pub use wire::{Range, RangeSet};

/// pool config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    name: Option<String>,
    ranges: Vec<RangeSet>,
    etcd: EtcdConfig,
    key_root: String,
    lock: LockConfig,
    path: Option<PathBuf>,
}

impl IpamConfig {
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )?;
        config.path = Some(path.to_path_buf());
        debug!(?config);
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config = Self::new(s)?;
        debug!(?config);
        Ok(config)
    }

    /// decode from the JSON wire format
    pub fn json<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_json::from_str::<wire::IpamConfig>(input.as_ref())?)
    }

    /// decode from the YAML wire format
    pub fn yaml<S: AsRef<str>>(input: S) -> Result<Self> {
        Self::try_from(serde_yaml::from_str::<wire::IpamConfig>(input.as_ref())?)
    }

    fn new<S: AsRef<str>>(input: S) -> Result<Self> {
        match Self::json(input.as_ref()) {
            Ok(r) => Ok(r),
            Err(_err) => Self::yaml(input.as_ref()),
        }
    }

    /// pool name, if the config carried one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    /// range sets in configured order
    pub fn ranges(&self) -> &[RangeSet] {
        &self.ranges
    }
    pub fn etcd(&self) -> &EtcdConfig {
        &self.etcd
    }
    /// root key that pool namespaces are created under
    pub fn key_root(&self) -> &str {
        &self.key_root
    }
    pub fn lock(&self) -> &LockConfig {
        &self.lock
    }
    /// file the config was read from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl TryFrom<wire::IpamConfig> for IpamConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::IpamConfig) -> Result<Self> {
        if cfg.ranges.is_empty() {
            bail!("no ranges configured");
        }
        if let Some(idx) = cfg.ranges.iter().position(|set| set.is_empty()) {
            bail!("range set {idx} is empty");
        }
        if cfg.key_root.trim().is_empty() {
            bail!("keyRoot must not be empty");
        }
        Ok(Self {
            name: cfg.name.filter(|n| !n.is_empty()),
            ranges: cfg.ranges,
            etcd: EtcdConfig::try_from(cfg.etcd_config)?,
            key_root: cfg.key_root,
            lock: LockConfig::try_from(cfg.lock)?,
            path: None,
        })
    }
}

/// How to reach the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdConfig {
    url: String,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    trusted_ca_file: Option<PathBuf>,
    dial_timeout: Duration,
}

impl EtcdConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            cert_file: None,
            key_file: None,
            trusted_ca_file: None,
            dial_timeout: Duration::from_secs(wire::default_dial_timeout_secs()),
        }
    }

    /// set client certificate, client key and trusted CA file paths
    pub fn with_tls_files<P: Into<PathBuf>>(mut self, cert: P, key: P, ca: P) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = Some(key.into());
        self.trusted_ca_file = Some(ca.into());
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
    /// encrypted transport is selected by an `https` scheme
    pub fn uses_tls(&self) -> bool {
        self.url.starts_with("https")
    }
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }
    pub fn trusted_ca_file(&self) -> Option<&Path> {
        self.trusted_ca_file.as_deref()
    }
    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }
}

impl TryFrom<wire::EtcdConfig> for EtcdConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::EtcdConfig) -> Result<Self> {
        if cfg.etcd_url.trim().is_empty() {
            bail!("etcdURL must not be empty");
        }
        if cfg.dial_timeout_secs == 0 {
            bail!("dialTimeoutSecs must be at least 1");
        }
        Ok(Self {
            url: cfg.etcd_url,
            cert_file: cfg.cert_file,
            key_file: cfg.key_file,
            trusted_ca_file: cfg.trusted_ca_file,
            dial_timeout: Duration::from_secs(cfg.dial_timeout_secs),
        })
    }
}

/// Tuning for the lease-backed pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    ttl: Duration,
    retries: u32,
    backoff: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(wire::default_lock_ttl_secs()),
            retries: wire::default_lock_retries(),
            backoff: Duration::from_millis(wire::default_lock_backoff_millis()),
        }
    }
}

impl LockConfig {
    /// lease time-to-live for a held lock
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
    /// how many acquisition attempts are made before giving up
    pub fn retries(&self) -> u32 {
        self.retries
    }
    /// pause between contended attempts
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl TryFrom<wire::LockConfig> for LockConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::LockConfig) -> Result<Self> {
        if cfg.ttl_secs == 0 {
            bail!("lock ttlSecs must be at least 1");
        }
        if cfg.retries == 0 {
            bail!("lock retries must be at least 1");
        }
        Ok(Self {
            ttl: Duration::from_secs(cfg.ttl_secs),
            retries: cfg.retries,
            backoff: Duration::from_millis(cfg.backoff_millis),
        })
    }
}
