//! etcd connection bootstrap and the etcd-backed `KvBackend`.
//!
//! A single dial produces a multiplexed session that every later operation
//! reuses. Dialing is bounded by the configured dial timeout and is never
//! retried here; callers own retry policy for transient dial failures.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, GetOptions, Identity, PutOptions, TlsOptions,
    TxnOpResponse,
};
use tracing::{debug, error, info};

use config::EtcdConfig;

use crate::backend::{self, Compare, CompareOp, KeyValue, KvBackend, LeaseId, Txn, TxnOp, TxnResponse};
use crate::error::{CoordinationError, CoordinationResult};
use crate::tls::TlsMaterial;

/// Key read after dialing to prove the session works.
const PROBE_KEY: &str = "/";

/// etcd v3 coordination backend.
#[derive(Clone)]
pub struct EtcdBackend {
    client: Client,
    endpoint: String,
}

impl EtcdBackend {
    /// Dial the endpoint in `config`.
    ///
    /// `https` endpoints load and validate the client certificate, client key
    /// and trusted CA before dialing; a load failure is returned as
    /// [`CoordinationError::Tls`]. The dial and a probe read together must
    /// finish within the dial timeout or [`CoordinationError::Timeout`] is
    /// returned.
    pub async fn connect(config: &EtcdConfig) -> CoordinationResult<Self> {
        let endpoint = config.url().to_owned();
        let dial_timeout = config.dial_timeout();
        let options = Self::connect_options(config).inspect_err(|err| {
            error!(%endpoint, %err, "failed to prepare etcd connection");
        })?;

        let dial = async {
            let mut client = Client::connect([endpoint.as_str()], Some(options)).await?;
            client
                .get(PROBE_KEY, Some(GetOptions::new().with_count_only()))
                .await?;
            Ok::<_, etcd_client::Error>(client)
        };

        match tokio::time::timeout(dial_timeout, dial).await {
            Ok(Ok(client)) => {
                info!(%endpoint, tls = config.uses_tls(), "etcd connection established");
                Ok(Self { client, endpoint })
            }
            Ok(Err(err)) => {
                error!(%endpoint, %err, "etcd connection failed");
                Err(CoordinationError::Transport(format!(
                    "failed to connect to '{endpoint}': {err}"
                )))
            }
            Err(_) => {
                error!(%endpoint, ?dial_timeout, "etcd connection timed out");
                Err(CoordinationError::Timeout(format!(
                    "connecting to '{endpoint}' timed out after {dial_timeout:?}"
                )))
            }
        }
    }

    fn connect_options(config: &EtcdConfig) -> CoordinationResult<ConnectOptions> {
        let mut options = ConnectOptions::new().with_connect_timeout(config.dial_timeout());
        if config.uses_tls() {
            let material = TlsMaterial::load(config)?;
            let tls = TlsOptions::new()
                .ca_certificate(Certificate::from_pem(material.ca_pem()))
                .identity(Identity::from_pem(material.cert_pem(), material.key_pem()));
            options = options.with_tls(tls);
        }
        Ok(options)
    }

    /// endpoint this backend dialed
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for EtcdBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdBackend")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn transport(op: &str, key: &str, err: etcd_client::Error) -> CoordinationError {
    CoordinationError::Transport(format!("{op} failed for key '{key}': {err}"))
}

fn convert(kv: &etcd_client::KeyValue) -> CoordinationResult<KeyValue> {
    let key = kv
        .key_str()
        .map_err(|e| CoordinationError::Codec(format!("stored key is not utf-8: {e}")))?;
    let value = kv.value_str().map_err(|e| {
        CoordinationError::Codec(format!("value of '{key}' is not utf-8: {e}"))
    })?;
    Ok(KeyValue {
        key: key.to_owned(),
        value: value.to_owned(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        lease: (kv.lease() != 0).then_some(LeaseId(kv.lease())),
    })
}

fn compare_op(op: CompareOp) -> etcd_client::CompareOp {
    match op {
        CompareOp::Equal => etcd_client::CompareOp::Equal,
        CompareOp::NotEqual => etcd_client::CompareOp::NotEqual,
        CompareOp::Greater => etcd_client::CompareOp::Greater,
        CompareOp::Less => etcd_client::CompareOp::Less,
    }
}

fn to_etcd_compare(compare: Compare) -> etcd_client::Compare {
    match compare {
        Compare::CreateRevision { key, op, revision } => {
            etcd_client::Compare::create_revision(key, compare_op(op), revision)
        }
        Compare::Value { key, op, value } => {
            etcd_client::Compare::value(key, compare_op(op), value)
        }
    }
}

fn to_etcd_op(op: TxnOp) -> etcd_client::TxnOp {
    match op {
        TxnOp::Put { key, value, lease } => etcd_client::TxnOp::put(
            key,
            value,
            lease.map(|id| PutOptions::new().with_lease(id.0)),
        ),
        TxnOp::Get { key } => etcd_client::TxnOp::get(key, None),
        TxnOp::Delete { key } => etcd_client::TxnOp::delete(key, None),
    }
}

/// etcd lease TTLs are whole seconds; round up and never grant less than one
fn ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn get(&self, key: &str) -> CoordinationResult<Option<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(key, None)
            .await
            .map_err(|e| transport("get", key, e))?;
        resp.kvs().first().map(convert).transpose()
    }

    async fn get_prefix(&self, prefix: &str) -> CoordinationResult<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| transport("prefix get", prefix, e))?;
        resp.kvs().iter().map(convert).collect()
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> CoordinationResult<()> {
        let mut client = self.client.clone();
        let options = lease.map(|id| PutOptions::new().with_lease(id.0));
        client
            .put(key, value, options)
            .await
            .map_err(|e| transport("put", key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoordinationResult<u64> {
        let mut client = self.client.clone();
        let resp = client
            .delete(key, None)
            .await
            .map_err(|e| transport("delete", key, e))?;
        Ok(u64::try_from(resp.deleted()).unwrap_or_default())
    }

    async fn txn(&self, txn: Txn) -> CoordinationResult<TxnResponse> {
        let backend::Txn {
            when,
            then,
            otherwise,
        } = txn;
        let subject = when
            .first()
            .map(|c| match c {
                Compare::CreateRevision { key, .. } | Compare::Value { key, .. } => key.clone(),
            })
            .unwrap_or_default();

        let request = etcd_client::Txn::new()
            .when(when.into_iter().map(to_etcd_compare).collect::<Vec<_>>())
            .and_then(then.into_iter().map(to_etcd_op).collect::<Vec<_>>())
            .or_else(otherwise.into_iter().map(to_etcd_op).collect::<Vec<_>>());

        let mut client = self.client.clone();
        let resp = client
            .txn(request)
            .await
            .map_err(|e| transport("txn", &subject, e))?;

        let mut kvs = Vec::new();
        for op in resp.op_responses() {
            if let TxnOpResponse::Get(get) = op {
                for kv in get.kvs() {
                    kvs.push(convert(kv)?);
                }
            }
        }
        debug!(key = %subject, succeeded = resp.succeeded(), "etcd txn committed");
        Ok(TxnResponse {
            succeeded: resp.succeeded(),
            kvs,
        })
    }

    async fn lease_grant(&self, ttl: Duration) -> CoordinationResult<LeaseId> {
        let mut client = self.client.clone();
        let resp = client
            .lease_grant(ttl_secs(ttl), None)
            .await
            .map_err(|e| CoordinationError::Transport(format!("lease grant failed: {e}")))?;
        if !resp.error().is_empty() {
            return Err(CoordinationError::Transport(format!(
                "lease grant rejected: {}",
                resp.error()
            )));
        }
        Ok(LeaseId(resp.id()))
    }

    async fn lease_revoke(&self, id: LeaseId) -> CoordinationResult<()> {
        let mut client = self.client.clone();
        match client.lease_revoke(id.0).await {
            Ok(_) => Ok(()),
            Err(etcd_client::Error::GRpcStatus(status))
                if status.message().contains("lease not found") =>
            {
                Err(CoordinationError::LeaseNotFound(id))
            }
            Err(err) => Err(CoordinationError::Transport(format!(
                "lease revoke failed for lease {id}: {err}"
            ))),
        }
    }
}
