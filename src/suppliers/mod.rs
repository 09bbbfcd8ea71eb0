//! Supplier adapter implementations plus the registry that maps supplier ids
//! to constructed adapters. Each adapter is configured purely from the
//! environment and owns its own HTTP client.

pub mod baristalab;
pub mod beanfeed;
pub mod brewmart;
pub mod cafetec;

use crate::connector::SupplierAdapter;
use crate::domain::SyncError;
use crate::util::retry::{status_retryable, RetryPolicy, Retryable};
use anyhow::{bail, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Every supplier id the registry knows, in default sync-all order.
pub const ALL_SUPPLIERS: &[&str] = &["brewmart", "beanfeed", "cafetec", "baristalab"];

const HTTP_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("tradelink-sync/", env!("CARGO_PKG_VERSION"));

/// Construct one adapter by id.
pub fn build(id: &str) -> Result<Arc<dyn SupplierAdapter>> {
    match id {
        "brewmart" => Ok(Arc::new(brewmart::BrewmartAdapter::from_env()?)),
        "beanfeed" => Ok(Arc::new(beanfeed::BeanfeedAdapter::from_env()?)),
        "cafetec" => Ok(Arc::new(cafetec::CafetecAdapter::from_env()?)),
        "baristalab" => Ok(Arc::new(baristalab::BaristalabAdapter::from_env()?)),
        other => bail!("unknown supplier '{other}'"),
    }
}

pub fn build_all() -> Result<Vec<Arc<dyn SupplierAdapter>>> {
    ALL_SUPPLIERS.iter().map(|id| build(id)).collect()
}

/// Base reqwest client shared by the simpler adapters. Timeout is per
/// request, never per run.
pub(crate) fn base_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .gzip(true)
        .build()?)
}

fn classify_status(url: &str, status: reqwest::StatusCode) -> Retryable<SyncError> {
    let err = SyncError::Connection(format!("GET {url} returned {status}"));
    if status_retryable(status) {
        Retryable::Transient(err)
    } else {
        Retryable::Permanent(err)
    }
}

/// GET a text body with bounded retry. Network failures and 5xx are retried;
/// 4xx fails immediately.
pub(crate) async fn get_text(
    client: &Client,
    policy: &RetryPolicy,
    url: &str,
) -> Result<String, SyncError> {
    policy
        .run(url, || async move {
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|e| Retryable::Transient(SyncError::from(e)))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(classify_status(url, status));
            }
            resp.text()
                .await
                .map_err(|e| Retryable::Transient(SyncError::from(e)))
        })
        .await
}

/// GET a JSON body with bounded retry, optionally with a bearer token.
pub(crate) async fn get_json(
    client: &Client,
    policy: &RetryPolicy,
    url: &str,
    bearer: Option<&str>,
) -> Result<serde_json::Value, SyncError> {
    policy
        .run(url, || async move {
            let mut req = client.get(url);
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| Retryable::Transient(SyncError::from(e)))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(classify_status(url, status));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| Retryable::Permanent(SyncError::from(e)))
        })
        .await
}

/// Cheap reachability probe used by `test_connection`.
pub(crate) async fn probe_url(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
