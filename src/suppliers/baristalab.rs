//! Baristalab adapter: paginated JSON collection API.
//!
//! The catalog is exposed as a fixed list of named collections. Page-number
//! pagination is the primary strategy; some collections serve the same page
//! for every page number, so when a page yields zero genuinely-new records
//! the crawl falls back to cursor pagination from the last seen identifier.
//! Products appear in multiple collections and are deduped globally by id.

use crate::connector::SupplierAdapter;
use crate::domain::{CanonicalProduct, RawRecord, Stock, SyncError};
use crate::transform::classify::classify;
use crate::transform::pricing::MarkupRule;
use crate::transform::{resolve_brand, resolve_category};
use crate::util::env::{env_opt, env_req};
use crate::util::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

const MARGIN_PCT: f64 = 20.0;
const PER_PAGE: usize = 50;
const MAX_PAGES_PER_COLLECTION: u32 = 40;
const REQUEST_DELAY_MS: u64 = 200;

const COLLECTIONS: &[&str] = &[
    "espresso-machines",
    "grinders",
    "accessories",
    "cleaning-supplies",
];

pub struct BaristalabAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    rule: MarkupRule,
}

impl BaristalabAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client: super::base_client()?,
            base_url: env_req("BARISTALAB_BASE_URL")?,
            api_key: env_opt("BARISTALAB_API_KEY"),
            retry: RetryPolicy::from_env(),
            rule: MarkupRule::FlatMargin {
                margin_pct: MARGIN_PCT,
            },
        })
    }

    fn page_url(&self, collection: &str, strategy: &Strategy) -> String {
        match strategy {
            Strategy::Page(n) => format!(
                "{}/collections/{}/products.json?page={}&per_page={}",
                self.base_url, collection, n, PER_PAGE
            ),
            Strategy::Cursor(after) => format!(
                "{}/collections/{}/products.json?after={}&per_page={}",
                self.base_url, collection, after, PER_PAGE
            ),
        }
    }

    async fn crawl_collection(
        &self,
        collection: &str,
        seen: &mut HashSet<String>,
        limit: Option<usize>,
        out: &mut Vec<RawRecord>,
    ) -> Result<(), SyncError> {
        let mut strategy = Strategy::Page(1);
        for _ in 0..MAX_PAGES_PER_COLLECTION {
            if limit.is_some_and(|l| out.len() >= l) {
                return Ok(());
            }
            let url = self.page_url(collection, &strategy);
            let reply =
                super::get_json(&self.client, &self.retry, &url, self.api_key.as_deref()).await?;
            let items = reply["products"].as_array().cloned().unwrap_or_default();

            let fresh = ingest_page(seen, &items, collection);
            let last_id = items.last().and_then(|v| item_id(v));
            debug!(
                collection,
                page_len = items.len(),
                new = fresh.len(),
                "collection page received"
            );
            for record in fresh.iter() {
                out.push(record.clone());
                if limit.is_some_and(|l| out.len() >= l) {
                    return Ok(());
                }
            }

            match advance(&strategy, items.len(), fresh.len(), last_id) {
                Some(next) => strategy = next,
                None => return Ok(()),
            }
            tokio::time::sleep(Duration::from_millis(REQUEST_DELAY_MS)).await;
        }
        Ok(())
    }
}

/// Pagination strategy for one collection crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Page(u32),
    Cursor(String),
}

fn item_id(item: &serde_json::Value) -> Option<String> {
    match &item["id"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Dedupe a page against the cross-collection seen set and wrap the genuinely
/// new items as raw records.
pub fn ingest_page(
    seen: &mut HashSet<String>,
    items: &[serde_json::Value],
    collection: &str,
) -> Vec<RawRecord> {
    let mut fresh = Vec::new();
    for item in items {
        let Some(id) = item_id(item) else { continue };
        if !seen.insert(id.clone()) {
            continue;
        }
        let mut payload = item.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "collection".to_string(),
                serde_json::Value::String(collection.to_string()),
            );
        }
        fresh.push(RawRecord {
            supplier_sku: id,
            payload,
        });
    }
    fresh
}

/// Next step for the crawl, or None when this collection is exhausted.
///
/// Page mode falling over to cursor mode happens exactly once, when a
/// non-empty page produces zero new records (the upstream repeating itself).
pub fn advance(
    strategy: &Strategy,
    page_len: usize,
    new_len: usize,
    last_id: Option<String>,
) -> Option<Strategy> {
    if page_len == 0 {
        return None;
    }
    match strategy {
        Strategy::Page(n) => {
            if new_len == 0 {
                return last_id.map(Strategy::Cursor);
            }
            if page_len < PER_PAGE {
                return None;
            }
            Some(Strategy::Page(n + 1))
        }
        Strategy::Cursor(_) => {
            if new_len == 0 || page_len < PER_PAGE {
                return None;
            }
            last_id.map(Strategy::Cursor)
        }
    }
}

#[async_trait]
impl SupplierAdapter for BaristalabAdapter {
    fn supplier_id(&self) -> &'static str {
        "baristalab"
    }

    fn supplier_name(&self) -> &'static str {
        "Baristalab Supply Co."
    }

    async fn probe(&self) -> bool {
        let url = format!(
            "{}/collections/{}/products.json?page=1&per_page=1",
            self.base_url, COLLECTIONS[0]
        );
        super::probe_url(&self.client, &url).await
    }

    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        for collection in COLLECTIONS {
            self.crawl_collection(collection, &mut seen, limit, &mut records)
                .await?;
            if limit.is_some_and(|l| records.len() >= l) {
                break;
            }
        }
        info!(
            supplier = "baristalab",
            records = records.len(),
            "collection crawl complete"
        );
        Ok(records)
    }

    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError> {
        let p = &raw.payload;
        let name = p["name"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::transform(&raw.supplier_sku, "collection item has no name"))?
            .to_string();
        let cost = p["cost_price"].as_f64().ok_or_else(|| {
            SyncError::transform(&raw.supplier_sku, "collection item has no numeric cost_price")
        })?;
        let prices = self.rule.from_cost(cost);

        let description = p["description"].as_str().unwrap_or_default();
        let brand = resolve_brand(p["brand"].as_str(), &name);
        let category = resolve_category(p["collection"].as_str(), &name, description);
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
            specifications: Default::default(),
            active: available,
            use_case: cls.use_case,
            exclude_from_consultation: cls.exclude_from_consultation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("Product {id}"),
            "cost_price": 40.0,
            "available": true,
        })
    }

    #[test]
    fn cross_collection_dedupe_yields_one_record() {
        let mut seen = HashSet::new();
        let page = vec![item("BL-1"), item("BL-2")];
        let first = ingest_page(&mut seen, &page, "grinders");
        assert_eq!(first.len(), 2);
        // BL-2 also shows up under accessories
        let second = ingest_page(&mut seen, &[item("BL-2"), item("BL-3")], "accessories");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].supplier_sku, "BL-3");
        assert_eq!(second[0].payload["collection"], "accessories");
    }

    #[test]
    fn page_mode_advances_then_falls_back_to_cursor() {
        let full = PER_PAGE;
        let next = advance(&Strategy::Page(1), full, full, Some("BL-50".into()));
        assert_eq!(next, Some(Strategy::Page(2)));
        // server repeats itself: full page, nothing new -> cursor from last id
        let next = advance(&Strategy::Page(2), full, 0, Some("BL-50".into()));
        assert_eq!(next, Some(Strategy::Cursor("BL-50".into())));
    }

    #[test]
    fn cursor_mode_terminates_on_stale_or_short_page() {
        let full = PER_PAGE;
        let next = advance(&Strategy::Cursor("BL-50".into()), full, full, Some("BL-100".into()));
        assert_eq!(next, Some(Strategy::Cursor("BL-100".into())));
        assert_eq!(advance(&Strategy::Cursor("BL-100".into()), full, 0, None), None);
        assert_eq!(
            advance(&Strategy::Cursor("BL-100".into()), 7, 7, Some("BL-107".into())),
            None
        );
    }

    #[test]
    fn short_first_page_ends_collection() {
        assert_eq!(advance(&Strategy::Page(1), 12, 12, Some("BL-12".into())), None);
        assert_eq!(advance(&Strategy::Page(1), 0, 0, None), None);
    }

    #[test]
    fn transform_applies_flat_twenty_percent() {
        let adapter = BaristalabAdapter {
            client: Client::new(),
            base_url: "http://localhost".into(),
            api_key: None,
            retry: RetryPolicy::default(),
            rule: MarkupRule::FlatMargin {
                margin_pct: MARGIN_PCT,
            },
        };
        let mut payload = item("BL-7");
        payload["collection"] = serde_json::Value::String("grinders".into());
        payload["brand"] = serde_json::Value::String("Eureka".into());
        let raw = RawRecord {
            supplier_sku: "BL-7".into(),
            payload,
        };
        let p = adapter.transform(&raw).unwrap();
        assert_eq!(p.cost_price, 40.0);
        assert_eq!(p.selling_price, 48.0);
        assert_eq!(p.category, "grinders");
        assert_eq!(p.brand, "Eureka");
    }
}
