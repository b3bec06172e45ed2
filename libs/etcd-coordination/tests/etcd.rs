//! Runs against a live etcd. Start one locally and run with
//! `--features etcd -- --ignored`; `ETCD_ENDPOINT` overrides the default
//! `http://127.0.0.1:2379`.
#![cfg(feature = "etcd")]

use std::time::Duration;

use anyhow::Result;
use config::EtcdConfig;
use etcd_coordination::{
    Compare, CoordinationError, EtcdBackend, KvBackend, LeaseId, Txn, TxnOp,
};

fn endpoint() -> String {
    std::env::var("ETCD_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:2379".to_owned())
}

/// keys unique to this run so reruns and parallel tests do not collide
fn scratch(name: &str) -> String {
    format!("/etcd-coordination-test/{}/{name}", std::process::id())
}

async fn connect() -> Result<EtcdBackend> {
    Ok(EtcdBackend::connect(&EtcdConfig::new(endpoint())).await?)
}

#[tokio::test]
#[ignore = "needs a running etcd"]
async fn test_put_get_prefix_delete() -> Result<()> {
    let kv = connect().await?;
    let a = scratch("kv/used/10.0.0.5");
    let b = scratch("kv/used/10.0.0.9");
    kv.put(&a, "containerA", None).await?;
    kv.put(&b, "containerB", None).await?;

    let got = kv.get(&a).await?.expect("key just written");
    assert_eq!(got.value, "containerA");
    assert!(got.create_revision > 0);
    assert_eq!(got.lease, None);

    let listed = kv.get_prefix(&scratch("kv/used/")).await?;
    assert_eq!(
        listed.iter().map(|kv| kv.key.as_str()).collect::<Vec<_>>(),
        vec![a.as_str(), b.as_str()]
    );

    assert_eq!(kv.delete(&a).await?, 1);
    assert_eq!(kv.delete(&a).await?, 0);
    kv.delete(&b).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "needs a running etcd"]
async fn test_create_if_absent_and_lease_revoke() -> Result<()> {
    let kv = connect().await?;
    let key = scratch("lock");
    let acquire = |lease: LeaseId| {
        Txn::new()
            .when(vec![Compare::absent(key.as_str())])
            .and_then(vec![TxnOp::Put {
                key: key.clone(),
                value: lease.to_string(),
                lease: Some(lease),
            }])
            .or_else(vec![TxnOp::Get { key: key.clone() }])
    };

    let first = kv.lease_grant(Duration::from_secs(10)).await?;
    let resp = kv.txn(acquire(first)).await?;
    assert!(resp.succeeded);

    let second = kv.lease_grant(Duration::from_secs(10)).await?;
    let resp = kv.txn(acquire(second)).await?;
    assert!(!resp.succeeded);
    assert_eq!(resp.kvs[0].value, first.to_string());
    assert_eq!(resp.kvs[0].lease, Some(first));

    kv.lease_revoke(first).await?;
    assert!(kv.get(&key).await?.is_none());
    assert!(matches!(
        kv.lease_revoke(first).await,
        Err(CoordinationError::LeaseNotFound(_))
    ));
    kv.lease_revoke(second).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "needs an address that drops packets"]
async fn test_dial_timeout() -> Result<()> {
    // TEST-NET-1 is unroutable, so the dial hangs until the timeout
    let config = EtcdConfig::new("http://192.0.2.1:2379")
        .with_dial_timeout(Duration::from_millis(300));
    let err = EtcdBackend::connect(&config).await.unwrap_err();
    assert!(err.is_retryable());
    Ok(())
}
