//! In-memory store doubles and a stub adapter for driving the connector
//! lifecycle in tests. The doubles honor the same contracts as the Postgres
//! implementations (atomic claim, terminal-session immutability).

use crate::connector::SupplierAdapter;
use crate::domain::{
    CanonicalProduct, RawRecord, SessionOutcome, Stock, Supplier, SupplierStatus, SyncError,
    SyncSession, UseCase,
};
use crate::reconcile::ProductStore;
use crate::session::{SessionStore, SupplierStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemSupplierStore {
    rows: Mutex<HashMap<String, Supplier>>,
}

#[async_trait]
impl SupplierStore for MemSupplierStore {
    async fn ensure(&self, id: &str, name: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(id.to_string()).or_insert_with(|| Supplier {
            id: id.to_string(),
            name: name.to_string(),
            status: SupplierStatus::Idle,
            last_sync: None,
            error_message: None,
        });
        Ok(())
    }

    async fn claim_running(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(id) {
            Some(s) if s.status != SupplierStatus::Running => {
                s.status = SupplierStatus::Running;
                s.error_message = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_idle(&self, id: &str, record_sync: bool) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(s) = rows.get_mut(id) {
            s.status = SupplierStatus::Idle;
            if record_sync {
                s.last_sync = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(s) = rows.get_mut(id) {
            s.status = SupplierStatus::Error;
            s.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Supplier>> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Supplier>> {
        let mut all: Vec<Supplier> = self.rows.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemSessionStore {
    rows: Mutex<HashMap<i64, SyncSession>>,
    next_id: AtomicI64,
}

impl MemSessionStore {
    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemSessionStore {
    async fn create(&self, supplier_id: &str, session_name: &str, dry_run: bool) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.rows.lock().unwrap().insert(
            id,
            SyncSession {
                id,
                supplier_id: supplier_id.to_string(),
                session_name: session_name.to_string(),
                started_at: Utc::now(),
                completed_at: None,
                added: 0,
                updated: 0,
                unchanged: 0,
                errors: Vec::new(),
                warnings: Vec::new(),
                outcome: SessionOutcome::Running,
                dry_run,
            },
        );
        Ok(id)
    }

    async fn finalize(
        &self,
        id: i64,
        outcome: SessionOutcome,
        added: i32,
        updated: i32,
        unchanged: i32,
        errors: &[String],
        warnings: &[String],
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        // same contract as the SQL predicate: terminal rows stay untouched
        if let Some(s) = rows.get_mut(&id) {
            if s.outcome == SessionOutcome::Running {
                s.completed_at = Some(Utc::now());
                s.outcome = outcome;
                s.added = added;
                s.updated = updated;
                s.unchanged = unchanged;
                s.errors = errors.to_vec();
                s.warnings = warnings.to_vec();
            }
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<SyncSession>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn recent(&self, supplier_id: Option<&str>, limit: i64) -> Result<Vec<SyncSession>> {
        let rows = self.rows.lock().unwrap();
        let mut all: Vec<SyncSession> = rows
            .values()
            .filter(|s| supplier_id.map_or(true, |sid| s.supplier_id == sid))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemProductStore {
    rows: Mutex<HashMap<(String, String), CanonicalProduct>>,
}

impl MemProductStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ProductStore for MemProductStore {
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
        self.rows
            .lock()
            .unwrap()
            .insert((p.supplier_id.clone(), p.supplier_sku.clone()), p.clone());
        Ok(())
    }

    async fn update(&self, p: &CanonicalProduct) -> Result<(), SyncError> {
        self.insert(p).await
    }
}

/// Deterministic adapter: either serves `records` canned products or refuses
/// every connection.
pub struct StubAdapter {
    reachable: bool,
    records: usize,
}

impl StubAdapter {
    pub fn with_records(records: usize) -> Self {
        Self {
            reachable: true,
            records,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            records: 0,
        }
    }
}

#[async_trait]
impl SupplierAdapter for StubAdapter {
    fn supplier_id(&self) -> &'static str {
        "stub"
    }

    fn supplier_name(&self) -> &'static str {
        "Stub Roasters"
    }

    async fn probe(&self) -> bool {
        self.reachable
    }

    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError> {
        if !self.reachable {
            return Err(SyncError::Connection("connection refused".to_string()));
        }
        let count = limit.map_or(self.records, |l| l.min(self.records));
        Ok((0..count)
            .map(|i| RawRecord {
                supplier_sku: format!("STUB-{i}"),
                payload: serde_json::json!({ "name": format!("Stub Grinder {i}"), "cost": 80.0 }),
            })
            .collect())
    }

    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError> {
        let cost = raw.payload["cost"]
            .as_f64()
            .ok_or_else(|| SyncError::transform(&raw.supplier_sku, "missing cost"))?;
        Ok(CanonicalProduct {
            supplier_id: self.supplier_id().to_string(),
            supplier_sku: raw.supplier_sku.clone(),
            product_name: raw.payload["name"].as_str().unwrap_or("Stub").to_string(),
            brand: "Stub".to_string(),
            category: "grinders".to_string(),
            cost_price: cost,
            retail_price: cost * 1.25,
            selling_price: cost * 1.25,
            margin_percentage: 25.0,
            stock: Stock::from_availability(true),
            images: vec![format!("https://img.example/{}.jpg", raw.supplier_sku)],
            specifications: Default::default(),
            active: true,
            use_case: UseCase::Universal,
            exclude_from_consultation: false,
        })
    }
}
