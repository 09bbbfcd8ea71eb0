//! Reconciliation / upsert engine.
//!
//! Diffs freshly transformed canonical records against persisted state and
//! classifies each as added / updated / unchanged. Per-record failures are
//! isolated: one bad record never aborts the batch. Dry-run computes the same
//! classification without persisting anything.

use crate::domain::{CanonicalProduct, SyncError};
use crate::transform::partial_data_warnings;
use crate::util::db::Db;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use sqlx::Row;
use tracing::{debug, info, warn};

/// Price fields compare within this tolerance so re-derived floats don't
/// produce phantom updates.
pub const PRICE_TOLERANCE: f64 = 0.005;

/// Records reconciled concurrently against the datastore. Small and fixed:
/// the fetch phase is the slow part, the loop just needs to overlap IO.
const RECONCILE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Unchanged,
}

fn price_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= PRICE_TOLERANCE
}

/// Field-level diff between a persisted row and an incoming record.
pub fn differs(existing: &CanonicalProduct, incoming: &CanonicalProduct) -> bool {
    existing.product_name != incoming.product_name
        || existing.brand != incoming.brand
        || existing.category != incoming.category
        || !price_eq(existing.cost_price, incoming.cost_price)
        || !price_eq(existing.retail_price, incoming.retail_price)
        || !price_eq(existing.selling_price, incoming.selling_price)
        || !price_eq(existing.margin_percentage, incoming.margin_percentage)
        || existing.stock != incoming.stock
        || existing.images != incoming.images
        || existing.specifications != incoming.specifications
        || existing.active != incoming.active
        || existing.use_case != incoming.use_case
        || existing.exclude_from_consultation != incoming.exclude_from_consultation
}

/// Pure classification step; persistence decisions follow from this.
pub fn plan(existing: Option<&CanonicalProduct>, incoming: &CanonicalProduct) -> Action {
    match existing {
        None => Action::Insert,
        Some(cur) if differs(cur, incoming) => Action::Update,
        Some(_) => Action::Unchanged,
    }
}

/// Persistence seam for canonical products. The Postgres implementation is
/// the real one; tests drive the engine with an in-memory store.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get(
        &self,
        supplier_id: &str,
        supplier_sku: &str,
    ) -> Result<Option<CanonicalProduct>, SyncError>;
    async fn insert(&self, product: &CanonicalProduct) -> Result<(), SyncError>;
    async fn update(&self, product: &CanonicalProduct) -> Result<(), SyncError>;
}

/// Outcome tally for one reconciliation pass. The counts sum to the number of
/// records processed successfully; errors are tracked separately.
#[derive(Debug, Default, Clone)]
pub struct Tally {
    pub added: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

enum RecordOutcome {
    Counted(Action, Vec<String>),
    Failed(String),
}

async fn reconcile_one(
    store: &dyn ProductStore,
    incoming: &CanonicalProduct,
    dry_run: bool,
) -> RecordOutcome {
    let warnings = partial_data_warnings(incoming);

    let existing = match store.get(&incoming.supplier_id, &incoming.supplier_sku).await {
        Ok(v) => v,
        Err(e) => return RecordOutcome::Failed(e.to_string()),
    };
    let action = plan(existing.as_ref(), incoming);

    if dry_run {
        debug!(
            sku = %incoming.supplier_sku,
            action = ?action,
            "dry-run: skipping persistence"
        );
        return RecordOutcome::Counted(action, warnings);
    }

    let persisted = match action {
        Action::Insert => store.insert(incoming).await,
        Action::Update => store.update(incoming).await,
        Action::Unchanged => Ok(()),
    };
    match persisted {
        Ok(()) => RecordOutcome::Counted(action, warnings),
        Err(e) => RecordOutcome::Failed(e.to_string()),
    }
}

/// Run the reconciliation loop over per-record transform results.
///
/// Transform failures arrive as `Err` entries and are tallied as errors
/// without touching the store; everything else is classified and (unless
/// dry-run) persisted in small concurrent batches with per-record isolation.
pub async fn reconcile(
    store: &dyn ProductStore,
    records: Vec<Result<CanonicalProduct, SyncError>>,
    dry_run: bool,
) -> Tally {
    let mut tally = Tally::default();

    let (ok_records, transform_failures): (Vec<_>, Vec<_>) =
        records.into_iter().partition(Result::is_ok);
    for failure in transform_failures {
        if let Err(e) = failure {
            warn!(error = %e, "record transform failed; skipping");
            tally.errors.push(e.to_string());
        }
    }

    let outcomes: Vec<RecordOutcome> = stream::iter(ok_records.into_iter().filter_map(Result::ok))
        .map(|product| async move { reconcile_one(store, &product, dry_run).await })
        .buffer_unordered(RECONCILE_CONCURRENCY)
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            RecordOutcome::Counted(Action::Insert, w) => {
                tally.added += 1;
                tally.warnings.extend(w);
            }
            RecordOutcome::Counted(Action::Update, w) => {
                tally.updated += 1;
                tally.warnings.extend(w);
            }
            RecordOutcome::Counted(Action::Unchanged, w) => {
                tally.unchanged += 1;
                tally.warnings.extend(w);
            }
            RecordOutcome::Failed(msg) => tally.errors.push(msg),
        }
    }

    info!(
        added = tally.added,
        updated = tally.updated,
        unchanged = tally.unchanged,
        errors = tally.errors.len(),
        warnings = tally.warnings.len(),
        dry_run,
        "reconciliation pass finished"
    );
    tally
}

/// Postgres-backed store over the shared `products` table.
#[derive(Clone)]
pub struct PgProductStore {
    db: Db,
}

impl PgProductStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn persist_err(sku: &str, e: impl std::fmt::Display) -> SyncError {
        SyncError::Persistence {
            sku: sku.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn get(
        &self,
        supplier_id: &str,
        supplier_sku: &str,
    ) -> Result<Option<CanonicalProduct>, SyncError> {
        let row = sqlx::query(
            "SELECT product_name, brand, category, cost_price, retail_price, selling_price,
                    margin_percentage, stock, images, specifications, active, use_case,
                    exclude_from_consultation
             FROM products WHERE supplier_id = $1 AND supplier_sku = $2",
        )
        .bind(supplier_id)
        .bind(supplier_sku)
        .persistent(false)
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| Self::persist_err(supplier_sku, e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stock_json: serde_json::Value = row
            .try_get("stock")
            .map_err(|e| Self::persist_err(supplier_sku, e))?;
        let images_json: serde_json::Value = row
            .try_get("images")
            .map_err(|e| Self::persist_err(supplier_sku, e))?;
        let specs_json: serde_json::Value = row
            .try_get("specifications")
            .map_err(|e| Self::persist_err(supplier_sku, e))?;
        let use_case_raw: String = row
            .try_get("use_case")
            .map_err(|e| Self::persist_err(supplier_sku, e))?;

        Ok(Some(CanonicalProduct {
            supplier_id: supplier_id.to_string(),
            supplier_sku: supplier_sku.to_string(),
            product_name: row
                .try_get("product_name")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            brand: row
                .try_get("brand")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            category: row
                .try_get("category")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            cost_price: row
                .try_get("cost_price")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            retail_price: row
                .try_get("retail_price")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            selling_price: row
                .try_get("selling_price")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            margin_percentage: row
                .try_get("margin_percentage")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            stock: serde_json::from_value(stock_json).unwrap_or_default(),
            images: serde_json::from_value(images_json).unwrap_or_default(),
            specifications: serde_json::from_value(specs_json).unwrap_or_default(),
            active: row
                .try_get("active")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
            use_case: crate::domain::UseCase::parse(&use_case_raw),
            exclude_from_consultation: row
                .try_get("exclude_from_consultation")
                .map_err(|e| Self::persist_err(supplier_sku, e))?,
        }))
    }

    async fn insert(&self, p: &CanonicalProduct) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO products
                (supplier_id, supplier_sku, product_name, brand, category,
                 cost_price, retail_price, selling_price, margin_percentage,
                 stock, images, specifications, active, use_case,
                 exclude_from_consultation)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(&p.supplier_id)
        .bind(&p.supplier_sku)
        .bind(&p.product_name)
        .bind(&p.brand)
        .bind(&p.category)
        .bind(p.cost_price)
        .bind(p.retail_price)
        .bind(p.selling_price)
        .bind(p.margin_percentage)
        .bind(serde_json::to_value(&p.stock).unwrap_or_default())
        .bind(serde_json::to_value(&p.images).unwrap_or_default())
        .bind(serde_json::to_value(&p.specifications).unwrap_or_default())
        .bind(p.active)
        .bind(p.use_case.as_str())
        .bind(p.exclude_from_consultation)
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .map_err(|e| Self::persist_err(&p.supplier_sku, e))?;
        Ok(())
    }

    async fn update(&self, p: &CanonicalProduct) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE products SET
                product_name = $3, brand = $4, category = $5,
                cost_price = $6, retail_price = $7, selling_price = $8,
                margin_percentage = $9, stock = $10, images = $11,
                specifications = $12, active = $13, use_case = $14,
                exclude_from_consultation = $15, updated_at = now()
             WHERE supplier_id = $1 AND supplier_sku = $2",
        )
        .bind(&p.supplier_id)
        .bind(&p.supplier_sku)
        .bind(&p.product_name)
        .bind(&p.brand)
        .bind(&p.category)
        .bind(p.cost_price)
        .bind(p.retail_price)
        .bind(p.selling_price)
        .bind(p.margin_percentage)
        .bind(serde_json::to_value(&p.stock).unwrap_or_default())
        .bind(serde_json::to_value(&p.images).unwrap_or_default())
        .bind(serde_json::to_value(&p.specifications).unwrap_or_default())
        .bind(p.active)
        .bind(p.use_case.as_str())
        .bind(p.exclude_from_consultation)
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .map_err(|e| Self::persist_err(&p.supplier_sku, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stock, UseCase};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store keyed by (supplier_id, sku). `fail_sku` simulates a
    /// datastore write failure for one record.
    #[derive(Default)]
    struct MemStore {
        rows: Mutex<HashMap<(String, String), CanonicalProduct>>,
        fail_sku: Option<String>,
    }

    impl MemStore {
        fn with_rows(products: Vec<CanonicalProduct>) -> Self {
            let store = Self::default();
            {
                let mut rows = store.rows.lock().unwrap();
                for p in products {
                    rows.insert((p.supplier_id.clone(), p.supplier_sku.clone()), p);
                }
            }
            store
        }

        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn snapshot(&self, sku: &str) -> Option<CanonicalProduct> {
            self.rows
                .lock()
                .unwrap()
                .get(&("test-supplier".to_string(), sku.to_string()))
                .cloned()
        }
    }

    #[async_trait]
    impl ProductStore for MemStore {
        async fn get(
            &self,
            supplier_id: &str,
            supplier_sku: &str,
        ) -> Result<Option<CanonicalProduct>, SyncError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(supplier_id.to_string(), supplier_sku.to_string()))
                .cloned())
        }

        async fn insert(&self, p: &CanonicalProduct) -> Result<(), SyncError> {
            if self.fail_sku.as_deref() == Some(p.supplier_sku.as_str()) {
                return Err(SyncError::Persistence {
                    sku: p.supplier_sku.clone(),
                    reason: "simulated write failure".into(),
                });
            }
            self.rows.lock().unwrap().insert(
                (p.supplier_id.clone(), p.supplier_sku.clone()),
                p.clone(),
            );
            Ok(())
        }

        async fn update(&self, p: &CanonicalProduct) -> Result<(), SyncError> {
            self.insert(p).await
        }
    }

    fn product(sku: &str, selling: f64) -> CanonicalProduct {
        CanonicalProduct {
            supplier_id: "test-supplier".into(),
            supplier_sku: sku.into(),
            product_name: format!("Product {sku}"),
            brand: "Rocket".into(),
            category: "espresso-machines".into(),
            cost_price: selling / 1.25,
            retail_price: selling,
            selling_price: selling,
            margin_percentage: 25.0,
            stock: Stock::from_availability(true),
            images: vec![format!("https://img.example/{sku}.jpg")],
            specifications: Default::default(),
            active: true,
            use_case: UseCase::Universal,
            exclude_from_consultation: false,
        }
    }

    #[test]
    fn plan_classifies_add_update_unchanged() {
        let existing = product("A", 100.0);
        assert_eq!(plan(None, &existing), Action::Insert);
        let changed = product("A", 120.0);
        assert_eq!(plan(Some(&existing), &changed), Action::Update);
        let same = product("A", 100.0);
        assert_eq!(plan(Some(&existing), &same), Action::Unchanged);
    }

    #[test]
    fn tiny_float_drift_is_not_an_update() {
        let existing = product("A", 100.0);
        let mut incoming = product("A", 100.0);
        incoming.selling_price += 0.001;
        assert_eq!(plan(Some(&existing), &incoming), Action::Unchanged);
    }

    #[tokio::test]
    async fn mixed_batch_counts_match_scenario() {
        // SKU A exists at 100 and comes in at 120, B is new, C unchanged.
        let store = MemStore::with_rows(vec![product("A", 100.0), product("C", 80.0)]);
        let records = vec![
            Ok(product("A", 120.0)),
            Ok(product("B", 50.0)),
            Ok(product("C", 80.0)),
        ];
        let tally = reconcile(&store, records, false).await;
        assert_eq!(
            (tally.added, tally.updated, tally.unchanged),
            (1, 1, 1)
        );
        assert!(tally.errors.is_empty());
        assert_eq!(store.snapshot("A").unwrap().selling_price, 120.0);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn rerun_against_unchanged_data_is_idempotent() {
        let batch = vec![product("A", 100.0), product("B", 50.0), product("C", 80.0)];
        let store = MemStore::default();
        let first = reconcile(&store, batch.iter().cloned().map(Ok).collect(), false).await;
        assert_eq!(first.added, 3);
        let second = reconcile(&store, batch.into_iter().map(Ok).collect(), false).await;
        assert_eq!((second.added, second.updated, second.unchanged), (0, 0, 3));
    }

    #[tokio::test]
    async fn dry_run_reports_counts_without_mutating() {
        let store = MemStore::with_rows(vec![product("A", 100.0)]);
        let records = vec![Ok(product("A", 150.0)), Ok(product("B", 60.0))];
        let tally = reconcile(&store, records, true).await;
        assert_eq!((tally.added, tally.updated, tally.unchanged), (1, 1, 0));
        // nothing persisted: A keeps its old price, B does not exist
        assert_eq!(store.snapshot("A").unwrap().selling_price, 100.0);
        assert!(store.snapshot("B").is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn per_record_isolation_on_transform_failure() {
        let store = MemStore::default();
        let mut records: Vec<Result<CanonicalProduct, SyncError>> =
            (0..5).map(|i| Ok(product(&format!("S{i}"), 10.0))).collect();
        records[2] = Err(SyncError::transform("S2", "missing required field"));
        let tally = reconcile(&store, records, false).await;
        assert_eq!(tally.added, 4);
        assert_eq!(tally.errors.len(), 1);
        assert!(tally.errors[0].contains("S2"));
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn per_record_isolation_on_persistence_failure() {
        let mut store = MemStore::default();
        store.fail_sku = Some("S1".to_string());
        let records = (0..3)
            .map(|i| Ok(product(&format!("S{i}"), 10.0)))
            .collect();
        let tally = reconcile(&store, records, false).await;
        assert_eq!(tally.added, 2);
        assert_eq!(tally.errors.len(), 1);
        assert!(tally.errors[0].contains("S1"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn warnings_do_not_block_persistence() {
        let store = MemStore::default();
        let mut zero_price = product("Z", 0.0);
        zero_price.images.clear();
        let tally = reconcile(&store, vec![Ok(zero_price)], false).await;
        assert_eq!(tally.added, 1);
        assert_eq!(tally.warnings.len(), 2);
        assert!(store.snapshot("Z").is_some());
    }

    #[tokio::test]
    async fn counts_sum_to_processed_records() {
        let store = MemStore::with_rows(vec![product("A", 10.0)]);
        let mut records: Vec<Result<CanonicalProduct, SyncError>> = vec![
            Ok(product("A", 10.0)),
            Ok(product("B", 20.0)),
        ];
        records.push(Err(SyncError::transform("X", "bad payload")));
        let tally = reconcile(&store, records, false).await;
        assert_eq!(tally.added + tally.updated + tally.unchanged, 2);
        assert_eq!(tally.errors.len(), 1);
    }
}
