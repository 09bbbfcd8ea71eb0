//! Beanfeed adapter: one bulk XML document covering the full catalog.
//!
//! The feed is fetched in a single request and walked with a streaming
//! `quick-xml` event reader; no DOM is built. Feed items carry exact
//! per-warehouse stock counts and supplier spec key/values.

use crate::connector::SupplierAdapter;
use crate::domain::{CanonicalProduct, RawRecord, Stock, SyncError};
use crate::transform::classify::classify;
use crate::transform::pricing::MarkupRule;
use crate::transform::{parse_locale_price, resolve_brand, resolve_category};
use crate::util::env::env_req;
use crate::util::retry::RetryPolicy;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::info;

const MARGIN_PCT: f64 = 25.0;

pub struct BeanfeedAdapter {
    client: Client,
    feed_url: String,
    retry: RetryPolicy,
    rule: MarkupRule,
}

impl BeanfeedAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client: super::base_client()?,
            feed_url: env_req("BEANFEED_FEED_URL")?,
            retry: RetryPolicy::from_env(),
            rule: MarkupRule::FlatMargin {
                margin_pct: MARGIN_PCT,
            },
        })
    }
}

#[async_trait]
impl SupplierAdapter for BeanfeedAdapter {
    fn supplier_id(&self) -> &'static str {
        "beanfeed"
    }

    fn supplier_name(&self) -> &'static str {
        "Beanfeed B.V."
    }

    async fn probe(&self) -> bool {
        super::probe_url(&self.client, &self.feed_url).await
    }

    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
        let body = super::get_text(&self.client, &self.retry, &self.feed_url).await?;
        let records = parse_feed(&body, limit)?;
        info!(supplier = "beanfeed", records = records.len(), "feed parsed");
        Ok(records)
    }

    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError> {
        if raw.supplier_sku.is_empty() {
            return Err(SyncError::transform("?", "feed item carries no sku"));
        }
        let p = &raw.payload;
        let name = p["name"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::transform(&raw.supplier_sku, "feed item has no name"))?
            .to_string();
        let cost_text = p["cost_price"].as_str().unwrap_or_default();
        let cost = parse_locale_price(cost_text).ok_or_else(|| {
            SyncError::transform(
                &raw.supplier_sku,
                format!("unparseable cost price '{cost_text}'"),
            )
        })?;
        let prices = self.rule.from_cost(cost);

        let description = p["description"].as_str().unwrap_or_default();
        let brand = resolve_brand(p["brand"].as_str(), &name);
        let category = resolve_category(p["category"].as_str(), &name, description);
        let cls = classify(&name, &category, &brand, description);

        let mut warehouses = BTreeMap::new();
        if let Some(map) = p["warehouses"].as_object() {
            for (code, qty) in map {
                warehouses.insert(code.clone(), qty.as_u64().unwrap_or(0) as u32);
            }
        }
        let stock = Stock::from_warehouses(warehouses);

        let images = p["images"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let mut specifications = BTreeMap::new();
        if let Some(map) = p["specs"].as_object() {
            for (k, v) in map {
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
            active: stock.total > 0,
            stock,
            images,
            specifications,
            use_case: cls.use_case,
            exclude_from_consultation: cls.exclude_from_consultation,
        })
    }
}

#[derive(Default)]
struct ItemBuilder {
    sku: String,
    name: String,
    brand: Option<String>,
    category: Option<String>,
    cost_price: String,
    description: String,
    warehouses: BTreeMap<String, u64>,
    images: Vec<String>,
    specs: BTreeMap<String, String>,
}

impl ItemBuilder {
    fn into_raw(self) -> RawRecord {
        RawRecord {
            supplier_sku: self.sku,
            payload: serde_json::json!({
                "name": self.name,
                "brand": self.brand,
                "category": self.category,
                "cost_price": self.cost_price,
                "description": self.description,
                "warehouses": self.warehouses,
                "images": self.images,
                "specs": self.specs,
            }),
        }
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Streaming parse of the bulk feed into raw records. A malformed document is
/// fatal for the whole run; a malformed single item just yields a record the
/// transform stage will reject.
pub fn parse_feed(xml: &str, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut item: Option<ItemBuilder> = None;
    let mut field: Vec<u8> = Vec::new();
    let mut warehouse_code: Option<String> = None;
    let mut spec_name: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = e.name().as_ref().to_vec();
                match tag.as_slice() {
                    b"item" => item = Some(ItemBuilder::default()),
                    b"warehouse" => warehouse_code = attr_value(&e, b"code"),
                    b"spec" => spec_name = attr_value(&e, b"name"),
                    _ => {}
                }
                field = tag;
            }
            Ok(Event::Text(t)) => {
                let Some(b) = item.as_mut() else { continue };
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::Connection(format!("feed text decode: {e}")))?
                    .into_owned();
                match field.as_slice() {
                    b"sku" => b.sku = text,
                    b"name" => b.name = text,
                    b"brand" => b.brand = Some(text),
                    b"category" => b.category = Some(text),
                    b"price" => b.cost_price = text,
                    b"description" => b.description = text,
                    b"image" => b.images.push(text),
                    b"warehouse" => {
                        if let Some(code) = warehouse_code.take() {
                            b.warehouses.insert(code, text.parse().unwrap_or(0));
                        }
                    }
                    b"spec" => {
                        if let Some(name) = spec_name.take() {
                            b.specs.insert(name, text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(b) = item.take() {
                        records.push(b.into_raw());
                        if limit.is_some_and(|l| records.len() >= l) {
                            return Ok(records);
                        }
                    }
                }
                field.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SyncError::Connection(format!(
                    "feed XML malformed at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<feed>
  <items>
    <item>
      <sku>BF-1001</sku>
      <name>Moccamaster KBG Select</name>
      <brand>Moccamaster</brand>
      <category>Filter Coffee</category>
      <price>189.00</price>
      <description>Classic filter coffee brewer for home use</description>
      <stock>
        <warehouse code="NL">12</warehouse>
        <warehouse code="DE">5</warehouse>
      </stock>
      <images>
        <image>https://img.example/kbg-1.jpg</image>
        <image>https://img.example/kbg-2.jpg</image>
      </images>
      <specs>
        <spec name="color">polished silver</spec>
        <spec name="capacity">1.25L</spec>
      </specs>
    </item>
    <item>
      <sku>BF-2002</sku>
      <name>Group gasket 8.5mm</name>
      <category>Spare-Parts</category>
      <price>4,95</price>
      <stock><warehouse code="NL">300</warehouse></stock>
    </item>
  </items>
</feed>"#;

    fn adapter() -> BeanfeedAdapter {
        BeanfeedAdapter {
            client: Client::new(),
            feed_url: "http://localhost/feed.xml".into(),
            retry: RetryPolicy::default(),
            rule: MarkupRule::FlatMargin {
                margin_pct: MARGIN_PCT,
            },
        }
    }

    #[test]
    fn feed_parses_items_with_stock_and_specs() {
        let records = parse_feed(FEED, None).unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.supplier_sku, "BF-1001");
        assert_eq!(first.payload["name"], "Moccamaster KBG Select");
        assert_eq!(first.payload["warehouses"]["NL"], 12);
        assert_eq!(first.payload["warehouses"]["DE"], 5);
        assert_eq!(first.payload["images"].as_array().unwrap().len(), 2);
        assert_eq!(first.payload["specs"]["color"], "polished silver");
    }

    #[test]
    fn feed_limit_truncates() {
        let records = parse_feed(FEED, Some(1)).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn malformed_feed_is_fatal() {
        let err = parse_feed("<feed><item><sku>X</item></feed>", None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn unreachable_upstream_probes_false_and_fetch_is_fatal() {
        // nothing listens on the discard port
        let adapter = BeanfeedAdapter {
            client: Client::new(),
            feed_url: "http://127.0.0.1:9/feed.xml".into(),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
            },
            rule: MarkupRule::FlatMargin {
                margin_pct: MARGIN_PCT,
            },
        };
        assert!(!adapter.probe().await);
        let err = adapter.fetch_all(None).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn transform_applies_flat_margin_and_warehouse_stock() {
        let records = parse_feed(FEED, None).unwrap();
        let p = adapter().transform(&records[0]).unwrap();
        assert_eq!(p.cost_price, 189.0);
        assert_eq!(p.selling_price, 236.25);
        assert_eq!(p.margin_percentage, 25.0);
        assert_eq!(p.stock.total, 17);
        assert_eq!(p.stock.warehouses["NL"], 12);
        assert_eq!(p.brand, "Moccamaster");
        assert_eq!(p.category, "filter-coffee");
        assert!(p.active);
    }

    #[test]
    fn spare_part_is_excluded_from_consultation() {
        let records = parse_feed(FEED, None).unwrap();
        let p = adapter().transform(&records[1]).unwrap();
        assert!(p.exclude_from_consultation);
        assert_eq!(p.selling_price, 6.19); // 4.95 * 1.25 rounded
    }
}
