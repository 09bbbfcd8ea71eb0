//! Cafetec adapter: authenticated search-index API.
//!
//! A POST login exchanges credentials for a bearer token, then the catalog is
//! drained with offset/size queries against the search endpoint until the
//! cumulative count reaches the server-reported total. Every request passes a
//! requests-per-second gate first; the upstream bans bursty clients.

use crate::connector::SupplierAdapter;
use crate::domain::{CanonicalProduct, RawRecord, Stock, SyncError};
use crate::transform::classify::classify;
use crate::transform::pricing::MarkupRule;
use crate::transform::{resolve_brand, resolve_category};
use crate::util::env::{env_parse, env_req};
use crate::util::retry::{status_retryable, RetryPolicy, Retryable};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use tracing::{debug, info};

const VAT_PCT: f64 = 21.0;
const MARGIN_PCT: f64 = 18.0;
const PAGE_SIZE: usize = 100;
const DEFAULT_RPS: u32 = 3;

pub struct CafetecAdapter {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
    rule: MarkupRule,
}

impl CafetecAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        let rps = env_parse("CAFETEC_RPS", DEFAULT_RPS).max(1);
        Ok(Self {
            client: super::base_client()?,
            base_url: env_req("CAFETEC_BASE_URL")?,
            username: env_req("CAFETEC_USERNAME")?,
            password: env_req("CAFETEC_PASSWORD")?,
            limiter: strict_limiter(rps),
            retry: RetryPolicy::from_env(),
            rule: MarkupRule::CompoundVat {
                vat_pct: VAT_PCT,
                margin_pct: MARGIN_PCT,
            },
        })
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, SyncError> {
        self.limiter.until_ready().await;
        self.retry
            .run(url, || async move {
                let mut req = self.client.post(url).json(body);
                if let Some(token) = bearer {
                    req = req.bearer_auth(token);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| Retryable::Transient(SyncError::from(e)))?;
                let status = resp.status();
                if !status.is_success() {
                    let err = SyncError::Connection(format!("POST {url} returned {status}"));
                    return Err(if status_retryable(status) {
                        Retryable::Transient(err)
                    } else {
                        Retryable::Permanent(err)
                    });
                }
                resp.json::<serde_json::Value>()
                    .await
                    .map_err(|e| Retryable::Permanent(SyncError::from(e)))
            })
            .await
    }

    async fn login(&self) -> Result<String, SyncError> {
        let url = format!("{}/auth/login", self.base_url);
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let reply = self.post_json(&url, &body, None).await?;
        reply["token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| SyncError::Connection("login reply carries no token".to_string()))
    }
}

/// Limiter with burst capacity 1: requests are spaced out evenly instead of
/// letting a fresh bucket fire a burst at full speed.
pub fn strict_limiter(rps: u32) -> DefaultDirectRateLimiter {
    let rps = NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rps).allow_burst(NonZeroU32::MIN))
}

/// Offset-loop bookkeeping: where to query next, or None when the drain is
/// complete (server total reached, short/empty page, or caller limit hit).
pub fn next_offset(
    offset: usize,
    page_len: usize,
    total: usize,
    fetched: usize,
    limit: Option<usize>,
) -> Option<usize> {
    if page_len == 0 || fetched >= total || limit.is_some_and(|l| fetched >= l) {
        return None;
    }
    if page_len < PAGE_SIZE && offset + page_len >= total {
        return None;
    }
    Some(offset + page_len)
}

#[async_trait]
impl SupplierAdapter for CafetecAdapter {
    fn supplier_id(&self) -> &'static str {
        "cafetec"
    }

    fn supplier_name(&self) -> &'static str {
        "Cafetec Distribution"
    }

    async fn probe(&self) -> bool {
        self.login().await.is_ok()
    }

    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
        let token = self.login().await?;
        let url = format!("{}/search", self.base_url);

        let mut records: Vec<RawRecord> = Vec::new();
        let mut offset = 0usize;
        loop {
            let size = match limit {
                Some(l) => PAGE_SIZE.min(l.saturating_sub(records.len())).max(1),
                None => PAGE_SIZE,
            };
            let body = serde_json::json!({ "offset": offset, "size": size });
            let reply = self.post_json(&url, &body, Some(&token)).await?;
            let total = reply["total"].as_u64().unwrap_or(0) as usize;
            let items = reply["items"].as_array().cloned().unwrap_or_default();
            let page_len = items.len();
            debug!(offset, page_len, total, "search page received");

            for item in items {
                let sku = item["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| item["id"].to_string());
                records.push(RawRecord {
                    supplier_sku: sku,
                    payload: item,
                });
            }

            match next_offset(offset, page_len, total, records.len(), limit) {
                Some(next) => offset = next,
                None => break,
            }
        }
        info!(supplier = "cafetec", records = records.len(), "search index drained");
        Ok(records)
    }

    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError> {
        let p = &raw.payload;
        let name = p["name"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::transform(&raw.supplier_sku, "search item has no name"))?
            .to_string();
        let cost = p["cost_price"].as_f64().ok_or_else(|| {
            SyncError::transform(&raw.supplier_sku, "search item has no numeric cost_price")
        })?;
        let prices = self.rule.from_cost(cost);

        let description = p["description"].as_str().unwrap_or_default();
        let brand = resolve_brand(p["brand"].as_str(), &name);
        let category = resolve_category(p["category"].as_str(), &name, description);
        let cls = classify(&name, &category, &brand, description);

        let available = p["available"].as_bool().unwrap_or(false);
        let images = p["images"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let mut specifications = std::collections::BTreeMap::new();
        if let Some(attrs) = p["attributes"].as_object() {
            for (k, v) in attrs {
                if let Some(s) = v.as_str() {
                    specifications.insert(k.clone(), s.to_string());
                }
            }
        }

        Ok(CanonicalProduct {
            supplier_id: self.supplier_id().to_string(),
            supplier_sku: raw.supplier_sku.clone(),
            product_name: name,
            brand,
            category,
            cost_price: prices.cost_price,
            retail_price: prices.retail_price,
            selling_price: prices.selling_price,
            margin_percentage: prices.margin_percentage,
            stock: Stock::from_availability(available),
            images,
            specifications,
            active: available,
            use_case: cls.use_case,
            exclude_from_consultation: cls.exclude_from_consultation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn offset_loop_walks_to_total() {
        // 250 items, full pages of 100 then a short page of 50
        assert_eq!(next_offset(0, 100, 250, 100, None), Some(100));
        assert_eq!(next_offset(100, 100, 250, 200, None), Some(200));
        assert_eq!(next_offset(200, 50, 250, 250, None), None);
    }

    #[test]
    fn offset_loop_stops_on_empty_page_and_limit() {
        assert_eq!(next_offset(0, 0, 500, 0, None), None);
        assert_eq!(next_offset(0, 100, 500, 100, Some(100)), None);
        assert_eq!(next_offset(0, 100, 500, 100, Some(150)), Some(100));
    }

    #[tokio::test]
    async fn rate_gate_spaces_ten_requests_at_three_rps() {
        let limiter = strict_limiter(3);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.until_ready().await;
        }
        // 9 inter-request gaps at 3 rps is 3 seconds of spacing
        assert!(
            start.elapsed().as_secs_f64() >= 2.9,
            "gate too permissive: {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn transform_applies_compound_vat_pricing() {
        let adapter = CafetecAdapter {
            client: Client::new(),
            base_url: "http://localhost".into(),
            username: "u".into(),
            password: "p".into(),
            limiter: strict_limiter(DEFAULT_RPS),
            retry: RetryPolicy::default(),
            rule: MarkupRule::CompoundVat {
                vat_pct: VAT_PCT,
                margin_pct: MARGIN_PCT,
            },
        };
        let raw = RawRecord {
            supplier_sku: "CT-9".into(),
            payload: serde_json::json!({
                "id": "CT-9",
                "name": "Rancilio Silvia Pro X",
                "brand": "Rancilio",
                "category": "Espresso Machines",
                "cost_price": 250.0,
                "available": true,
                "images": ["https://img.example/silvia.jpg"],
                "attributes": {"boiler": "dual"},
            }),
        };
        let p = adapter.transform(&raw).unwrap();
        assert!((p.selling_price - 356.95).abs() < 0.01);
        assert!((p.margin_percentage - 42.78).abs() < 1e-9);
        assert_eq!(p.stock.total, crate::domain::NOMINAL_STOCK);
        assert_eq!(p.specifications["boiler"], "dual");
    }
}
