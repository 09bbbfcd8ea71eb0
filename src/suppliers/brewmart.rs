//! Brewmart adapter: authenticated HTML catalog scraping.
//!
//! Login flow: fetch the login page, lift the hidden form token, POST
//! credentials through a cookie-persisting client, then verify success by
//! checking (in priority order) an account marker, an error banner, and
//! finally the session cookie. The catalog is crawled per category over
//! page-numbered listing pages; items are extracted with CSS selectors and
//! deduped by product URL within a category.
//!
//! HTML extraction is kept in pure synchronous functions over `&str` so the
//! non-Send `scraper::Html` DOM never crosses an await point.

use crate::connector::SupplierAdapter;
use crate::domain::{CanonicalProduct, RawRecord, Stock, SyncError};
use crate::transform::classify::classify;
use crate::transform::pricing::MarkupRule;
use crate::transform::{parse_locale_price, resolve_brand};
use crate::util::env::env_req;
use crate::util::retry::{RetryPolicy, Retryable};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retail prices are scraped; cost basis is back-computed from this margin.
const ASSUMED_MARGIN_PCT: f64 = 30.0;

const CATEGORY_PATHS: &[&str] = &[
    "/category/espresso-machines",
    "/category/grinders",
    "/category/filter-coffee",
    "/category/barista-tools",
    "/category/cleaning",
];

const MAX_PAGES_PER_CATEGORY: u32 = 50;
const PAGE_DELAY_MS: u64 = 250;
const SESSION_COOKIE: &str = "brewmart_session";

pub struct BrewmartAdapter {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    retry: RetryPolicy,
    rule: MarkupRule,
}

impl BrewmartAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(super::USER_AGENT)
            .cookie_store(true)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: env_req("BREWMART_BASE_URL")?,
            username: env_req("BREWMART_USERNAME")?,
            password: env_req("BREWMART_PASSWORD")?,
            retry: RetryPolicy::from_env(),
            rule: MarkupRule::RetailPassThrough {
                assumed_margin_pct: ASSUMED_MARGIN_PCT,
            },
        })
    }

    async fn login(&self) -> Result<(), SyncError> {
        let login_url = format!("{}/login", self.base_url);
        let page = super::get_text(&self.client, &self.retry, &login_url).await?;
        let token = extract_login_token(&page).ok_or_else(|| {
            SyncError::Connection("login page carries no form token".to_string())
        })?;

        let resp = self
            .retry
            .run(&login_url, || {
                let form = [
                    ("username", self.username.as_str()),
                    ("password", self.password.as_str()),
                    ("_token", token.as_str()),
                ];
                let login_url = login_url.clone();
                async move {
                    self.client
                        .post(&login_url)
                        .form(&form)
                        .send()
                        .await
                        .map_err(|e| Retryable::Transient(SyncError::from(e)))
                }
            })
            .await?;

        let has_session_cookie = resp
            .cookies()
            .any(|c| c.name() == SESSION_COOKIE);
        let body = resp.text().await.map_err(SyncError::from)?;
        match login_outcome(&body, has_session_cookie) {
            true => {
                info!(supplier = "brewmart", "login accepted");
                Ok(())
            }
            false => Err(SyncError::Connection(
                "login rejected by upstream".to_string(),
            )),
        }
    }

    async fn crawl_category(
        &self,
        path: &str,
        limit: Option<usize>,
        out: &mut Vec<RawRecord>,
    ) -> Result<(), SyncError> {
        let mut seen_urls: HashSet<String> = HashSet::new();
        for page in 1..=MAX_PAGES_PER_CATEGORY {
            if limit.is_some_and(|l| out.len() >= l) {
                return Ok(());
            }
            let url = format!("{}{}?page={}", self.base_url, path, page);
            let html = super::get_text(&self.client, &self.retry, &url).await?;
            let items = extract_listing(&html);
            let mut new_on_page = 0usize;
            for item in items {
                if !seen_urls.insert(item.url.clone()) {
                    continue;
                }
                new_on_page += 1;
                if item.price_text.trim().is_empty() {
                    // price withheld behind account tier; nothing to sell at
                    debug!(url = %item.url, "skipping paywalled listing");
                    continue;
                }
                out.push(item.into_raw(path));
                if limit.is_some_and(|l| out.len() >= l) {
                    return Ok(());
                }
            }
            if new_on_page == 0 {
                debug!(category = path, page, "no new listings; category done");
                break;
            }
            tokio::time::sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SupplierAdapter for BrewmartAdapter {
    fn supplier_id(&self) -> &'static str {
        "brewmart"
    }

    fn supplier_name(&self) -> &'static str {
        "Brewmart Wholesale"
    }

    async fn probe(&self) -> bool {
        super::probe_url(&self.client, &format!("{}/login", self.base_url)).await
    }

    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
        self.login().await?;
        let mut records = Vec::new();
        for path in CATEGORY_PATHS {
            self.crawl_category(path, limit, &mut records).await?;
            if limit.is_some_and(|l| records.len() >= l) {
                break;
            }
        }
        info!(supplier = "brewmart", records = records.len(), "crawl complete");
        Ok(records)
    }

    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError> {
        let p = &raw.payload;
        let name = p["name"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::transform(&raw.supplier_sku, "listing has no name"))?
            .trim()
            .to_string();
        let price_text = p["price_text"].as_str().unwrap_or_default();
        let retail = parse_locale_price(price_text).ok_or_else(|| {
            SyncError::transform(
                &raw.supplier_sku,
                format!("unparseable price text '{price_text}'"),
            )
        })?;
        let prices = self.rule.from_retail(retail);

        // category comes straight from the crawled path
        let category = p["category_path"]
            .as_str()
            .unwrap_or_default()
            .rsplit('/')
            .next()
            .unwrap_or(crate::transform::GENERIC_CATEGORY)
            .to_string();
        let brand = resolve_brand(None, &name);
        let cls = classify(&name, &category, &brand, "");
        let in_stock = p["in_stock"].as_bool().unwrap_or(false);
        let images = p["image"]
            .as_str()
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();

        let mut specifications = std::collections::BTreeMap::new();
        if let Some(url) = p["url"].as_str() {
            specifications.insert("source_url".to_string(), url.to_string());
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
            stock: Stock::from_availability(in_stock),
            images,
            specifications,
            active: in_stock,
            use_case: cls.use_case,
            exclude_from_consultation: cls.exclude_from_consultation,
        })
    }
}

/// One scraped listing entry before canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedItem {
    pub url: String,
    pub name: String,
    pub price_text: String,
    pub image: Option<String>,
    pub in_stock: bool,
}

impl ScrapedItem {
    fn into_raw(self, category_path: &str) -> RawRecord {
        RawRecord {
            supplier_sku: sku_from_url(&self.url),
            payload: serde_json::json!({
                "name": self.name,
                "price_text": self.price_text,
                "image": self.image,
                "in_stock": self.in_stock,
                "url": self.url,
                "category_path": category_path,
            }),
        }
    }
}

/// Product URLs end in a stable slug; that slug is the supplier sku.
pub fn sku_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

/// Hidden CSRF-style token on the login form.
pub fn extract_login_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"input[name="_token"]"#).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("value"))
        .map(|v| v.to_string())
}

/// Decide whether a login POST succeeded. Priority order: positive account
/// marker, explicit error banner, then the session cookie as tie-breaker.
/// All three ambiguous means failure.
pub fn login_outcome(html: &str, has_session_cookie: bool) -> bool {
    let doc = Html::parse_document(html);
    let account = Selector::parse(".account-menu, a[href=\"/logout\"]").ok();
    if let Some(sel) = account {
        if doc.select(&sel).next().is_some() {
            return true;
        }
    }
    let banner = Selector::parse(".alert-error, .login-error").ok();
    if let Some(sel) = banner {
        if doc.select(&sel).next().is_some() {
            return false;
        }
    }
    has_session_cookie
}

/// Extract all product tiles from a listing page.
pub fn extract_listing(html: &str) -> Vec<ScrapedItem> {
    let doc = Html::parse_document(html);
    let (Ok(tile), Ok(link), Ok(name), Ok(price), Ok(img), Ok(oos)) = (
        Selector::parse(".product-item"),
        Selector::parse("a.product-link"),
        Selector::parse(".product-name"),
        Selector::parse(".price"),
        Selector::parse("img"),
        Selector::parse(".out-of-stock"),
    ) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for el in doc.select(&tile) {
        let Some(url) = el
            .select(&link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|h| h.to_string())
        else {
            warn!("product tile without link; skipping");
            continue;
        };
        let title = el
            .select(&name)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let price_text = el
            .select(&price)
            .next()
            .map(|p| p.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let image = el
            .select(&img)
            .next()
            .and_then(|i| i.value().attr("src"))
            .map(|s| s.to_string());
        let in_stock = el.select(&oos).next().is_none();
        items.push(ScrapedItem {
            url,
            name: title,
            price_text,
            image,
            in_stock,
        });
    }
    items
}
