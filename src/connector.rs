//! Supplier connector: the one protocol implementation shared by every
//! adapter. Adapters only implement fetch + transform; the connector owns the
//! session lifecycle, the running-state claim, reconciliation and status
//! bookkeeping.
//!
//! The run is split into `prepare` (claim + open session, cheap and fast) and
//! `execute` (the actual fetch/transform/reconcile work) so async-mode callers
//! can hand the session id back immediately and spawn the rest.

use crate::domain::{
    CanonicalProduct, RawRecord, SessionOutcome, Supplier, SyncError, SyncOptions, SyncResult,
};
use crate::reconcile::{reconcile, ProductStore};
use crate::session::{SessionStore, SupplierStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// One supplier integration. `fetch_all` returns supplier-native records;
/// `transform` turns one of them into the canonical shape. Both halves stay
/// free of session/status concerns.
#[async_trait]
pub trait SupplierAdapter: Send + Sync {
    fn supplier_id(&self) -> &'static str;
    fn supplier_name(&self) -> &'static str;
    /// Lightweight reachability/credential check. Never mutates state.
    async fn probe(&self) -> bool;
    async fn fetch_all(&self, limit: Option<usize>) -> Result<Vec<RawRecord>, SyncError>;
    fn transform(&self, raw: &RawRecord) -> Result<CanonicalProduct, SyncError>;
}

/// Static adapter metadata surfaced over the API and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SupplierInfo {
    pub id: String,
    pub name: String,
}

/// Claim handle produced by `prepare`; proof that this run holds the
/// supplier's running state and owns an open session row.
pub struct PreparedRun {
    pub session_id: i64,
}

#[derive(Clone)]
pub struct SupplierConnector {
    adapter: Arc<dyn SupplierAdapter>,
    suppliers: Arc<dyn SupplierStore>,
    sessions: Arc<dyn SessionStore>,
    products: Arc<dyn ProductStore>,
}

impl SupplierConnector {
    pub fn new(
        adapter: Arc<dyn SupplierAdapter>,
        suppliers: Arc<dyn SupplierStore>,
        sessions: Arc<dyn SessionStore>,
        products: Arc<dyn ProductStore>,
    ) -> Self {
        Self {
            adapter,
            suppliers,
            sessions,
            products,
        }
    }

    pub fn supplier_id(&self) -> &'static str {
        self.adapter.supplier_id()
    }

    pub fn supplier_info(&self) -> SupplierInfo {
        SupplierInfo {
            id: self.adapter.supplier_id().to_string(),
            name: self.adapter.supplier_name().to_string(),
        }
    }

    /// Reachability check against the live upstream. No state is touched.
    pub async fn test_connection(&self) -> bool {
        self.adapter.probe().await
    }

    pub async fn get_status(&self) -> Result<Option<Supplier>> {
        self.suppliers.get(self.adapter.supplier_id()).await
    }

    /// Claim the running state and open a session row. `Ok(None)` means a
    /// concurrent run already holds the claim and this attempt must be
    /// rejected without side effects.
    pub async fn prepare(&self, options: &SyncOptions) -> Result<Option<PreparedRun>> {
        let id = self.adapter.supplier_id();
        self.suppliers.ensure(id, self.adapter.supplier_name()).await?;
        if !self.suppliers.claim_running(id).await? {
            warn!(supplier = id, "sync rejected: already running");
            return Ok(None);
        }
        let session_name = options
            .session_name
            .clone()
            .unwrap_or_else(|| format!("{id}-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        let session_id = match self
            .sessions
            .create(id, &session_name, options.dry_run)
            .await
        {
            Ok(sid) => sid,
            Err(e) => {
                // release the claim so the supplier is not wedged in running
                let _ = self.suppliers.mark_error(id, &e.to_string()).await;
                return Err(e);
            }
        };
        Ok(Some(PreparedRun { session_id }))
    }

    /// Run fetch → transform → reconcile under an already-held claim, then
    /// finalize the session and release the supplier status. Never returns an
    /// error: every failure mode is folded into the `SyncResult` so spawned
    /// async runs always settle their session row.
    #[instrument(skip(self, prepared), fields(supplier = self.adapter.supplier_id(), session_id = prepared.session_id))]
    pub async fn execute(&self, prepared: PreparedRun, options: SyncOptions) -> SyncResult {
        let id = self.adapter.supplier_id();
        let session_id = prepared.session_id;

        let raw = match self.adapter.fetch_all(options.limit).await {
            Ok(v) => v,
            Err(e) => {
                error!(supplier = id, error = %e, "fetch phase failed; aborting run");
                return self
                    .settle_failed(session_id, options.dry_run, e.to_string())
                    .await;
            }
        };
        info!(supplier = id, records = raw.len(), "fetch phase complete");

        let records: Vec<Result<CanonicalProduct, SyncError>> = raw
            .iter()
            .map(|r| self.adapter.transform(r))
            .collect();

        let tally = reconcile(self.products.as_ref(), records, options.dry_run).await;

        if let Err(e) = self
            .sessions
            .finalize(
                session_id,
                SessionOutcome::Completed,
                tally.added,
                tally.updated,
                tally.unchanged,
                &tally.errors,
                &tally.warnings,
            )
            .await
        {
            error!(session_id, error = %e, "failed to finalize session");
        }
        // dry runs release the claim without recording a sync
        if let Err(e) = self.suppliers.mark_idle(id, !options.dry_run).await {
            error!(supplier = id, error = %e, "failed to release supplier status");
        }

        SyncResult {
            supplier_id: id.to_string(),
            session_id: Some(session_id),
            success: true,
            dry_run: options.dry_run,
            added: tally.added,
            updated: tally.updated,
            unchanged: tally.unchanged,
            errors: tally.errors,
            warnings: tally.warnings,
            message: None,
        }
    }

    async fn settle_failed(&self, session_id: i64, dry_run: bool, reason: String) -> SyncResult {
        let id = self.adapter.supplier_id();
        if let Err(e) = self
            .sessions
            .finalize(
                session_id,
                SessionOutcome::Failed,
                0,
                0,
                0,
                std::slice::from_ref(&reason),
                &[],
            )
            .await
        {
            error!(session_id, error = %e, "failed to finalize failed session");
        }
        if let Err(e) = self.suppliers.mark_error(id, &reason).await {
            error!(supplier = id, error = %e, "failed to record supplier error state");
        }
        SyncResult {
            supplier_id: id.to_string(),
            session_id: Some(session_id),
            success: false,
            dry_run,
            added: 0,
            updated: 0,
            unchanged: 0,
            errors: vec![reason],
            warnings: Vec::new(),
            message: Some("sync aborted before reconciliation".to_string()),
        }
    }

    /// Full synchronous run: claim, execute, settle. Rejected attempts come
    /// back as an unsuccessful result with no session id.
    pub async fn sync_products(&self, options: SyncOptions) -> Result<SyncResult> {
        match self.prepare(&options).await? {
            Some(prepared) => Ok(self.execute(prepared, options).await),
            None => Ok(SyncResult::rejected(
                self.adapter.supplier_id(),
                "a sync for this supplier is already running",
            )),
        }
    }
}

/// All configured connectors plus the shared stores, as handed to the CLI and
/// the HTTP server.
#[derive(Clone)]
pub struct SyncRegistry {
    connectors: Vec<SupplierConnector>,
    suppliers: Arc<dyn SupplierStore>,
    sessions: Arc<dyn SessionStore>,
}

impl SyncRegistry {
    pub fn from_db(db: crate::util::db::Db) -> Result<Self> {
        let suppliers: Arc<dyn SupplierStore> =
            Arc::new(crate::session::PgSupplierStore::new(db.clone()));
        let sessions: Arc<dyn SessionStore> =
            Arc::new(crate::session::PgSessionStore::new(db.clone()));
        let products: Arc<dyn ProductStore> =
            Arc::new(crate::reconcile::PgProductStore::new(db));
        let adapters = crate::suppliers::build_all()?;
        Ok(Self::assemble(adapters, suppliers, sessions, products))
    }

    /// Wire a set of adapters to shared stores. `from_db` is the production
    /// path; tests assemble registries over in-memory stores.
    pub fn assemble(
        adapters: Vec<Arc<dyn SupplierAdapter>>,
        suppliers: Arc<dyn SupplierStore>,
        sessions: Arc<dyn SessionStore>,
        products: Arc<dyn ProductStore>,
    ) -> Self {
        let connectors = adapters
            .into_iter()
            .map(|adapter| {
                SupplierConnector::new(
                    adapter,
                    Arc::clone(&suppliers),
                    Arc::clone(&sessions),
                    Arc::clone(&products),
                )
            })
            .collect();
        Self {
            connectors,
            suppliers,
            sessions,
        }
    }

    pub fn get(&self, supplier_id: &str) -> Option<&SupplierConnector> {
        self.connectors.iter().find(|c| c.supplier_id() == supplier_id)
    }

    pub fn all(&self) -> &[SupplierConnector] {
        &self.connectors
    }

    pub fn suppliers(&self) -> &dyn SupplierStore {
        self.suppliers.as_ref()
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SupplierStatus;
    use crate::testing::{MemProductStore, MemSessionStore, MemSupplierStore, StubAdapter};

    fn connector(adapter: StubAdapter) -> (SupplierConnector, TestStores) {
        let suppliers = Arc::new(MemSupplierStore::default());
        let sessions = Arc::new(MemSessionStore::default());
        let products = Arc::new(MemProductStore::default());
        let connector = SupplierConnector::new(
            Arc::new(adapter),
            suppliers.clone(),
            sessions.clone(),
            products.clone(),
        );
        (
            connector,
            TestStores {
                suppliers,
                sessions,
                products,
            },
        )
    }

    struct TestStores {
        suppliers: Arc<MemSupplierStore>,
        sessions: Arc<MemSessionStore>,
        products: Arc<MemProductStore>,
    }

    #[tokio::test]
    async fn successful_run_settles_session_and_releases_claim() {
        let (connector, stores) = connector(StubAdapter::with_records(3));
        let result = connector
            .sync_products(SyncOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.added, 3);
        assert_eq!(stores.products.len(), 3);

        let supplier = stores.suppliers.get("stub").await.unwrap().unwrap();
        assert_eq!(supplier.status, SupplierStatus::Idle);
        assert!(supplier.last_sync.is_some());

        let session = stores
            .sessions
            .get(result.session_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.outcome, SessionOutcome::Completed);
        assert_eq!(session.added, 3);
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn unreachable_upstream_fails_with_zero_rows_and_releases_claim() {
        let (connector, stores) = connector(StubAdapter::unreachable());
        assert!(!connector.test_connection().await);

        let result = connector
            .sync_products(SyncOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.processed(), 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(stores.products.len(), 0);

        // session settled as failed, error retained on the supplier row
        let session = stores
            .sessions
            .get(result.session_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.outcome, SessionOutcome::Failed);
        assert_eq!(session.errors.len(), 1);
        let supplier = stores.suppliers.get("stub").await.unwrap().unwrap();
        assert_eq!(supplier.status, SupplierStatus::Error);
        assert!(supplier.error_message.is_some());

        // the claim is released: a follow-up run may start
        assert!(stores.suppliers.claim_running("stub").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected_without_side_effects() {
        let (connector, stores) = connector(StubAdapter::with_records(1));
        stores.suppliers.ensure("stub", "Stub Roasters").await.unwrap();
        assert!(stores.suppliers.claim_running("stub").await.unwrap());

        let result = connector
            .sync_products(SyncOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.session_id.is_none());
        assert!(result.message.unwrap().contains("already running"));
        assert_eq!(stores.sessions.count(), 0);
        assert_eq!(stores.products.len(), 0);
    }

    #[tokio::test]
    async fn dry_run_does_not_record_last_sync() {
        let (connector, stores) = connector(StubAdapter::with_records(2));
        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = connector.sync_products(options).await.unwrap();
        assert!(result.success);
        assert_eq!(result.added, 2);
        assert_eq!(stores.products.len(), 0);

        let supplier = stores.suppliers.get("stub").await.unwrap().unwrap();
        assert_eq!(supplier.status, SupplierStatus::Idle);
        assert!(supplier.last_sync.is_none());
    }

    #[tokio::test]
    async fn settled_session_is_immutable() {
        let (connector, stores) = connector(StubAdapter::with_records(1));
        let result = connector
            .sync_products(SyncOptions::default())
            .await
            .unwrap();
        let session_id = result.session_id.unwrap();

        // a stray second settle must not overwrite the terminal outcome
        stores
            .sessions
            .finalize(session_id, SessionOutcome::Failed, 9, 9, 9, &[], &[])
            .await
            .unwrap();
        let session = stores.sessions.get(session_id).await.unwrap().unwrap();
        assert_eq!(session.outcome, SessionOutcome::Completed);
        assert_eq!(session.added, 1);
    }
}
