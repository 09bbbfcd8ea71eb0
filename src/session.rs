//! Durable supplier status + sync session registry.
//!
//! Supplier rows carry the coarse lifecycle (idle/running/error); session rows
//! are the append-only run history. The `claim_running` update is the
//! concurrency gate: it only flips status when the supplier is not already
//! running, so two overlapping runs for the same supplier cannot both start.
//!
//! Both stores are traits so the connector lifecycle can be driven against
//! in-memory doubles; the Postgres implementations are the real ones.

use crate::domain::{SessionOutcome, Supplier, SupplierStatus, SyncSession};
use crate::util::db::Db;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, info};

/// Supplier status registry.
#[async_trait]
pub trait SupplierStore: Send + Sync {
    /// Upsert the supplier row so status tracking works on first contact.
    async fn ensure(&self, id: &str, name: &str) -> Result<()>;
    /// Atomically claim the running state. Returns false when another run
    /// already holds it.
    async fn claim_running(&self, id: &str) -> Result<bool>;
    /// Release the claim. `record_sync` stamps `last_sync`; dry runs release
    /// without moving it since nothing was persisted.
    async fn mark_idle(&self, id: &str, record_sync: bool) -> Result<()>;
    async fn mark_error(&self, id: &str, message: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Supplier>>;
    async fn list(&self) -> Result<Vec<Supplier>>;
}

/// Append-only sync session log.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a new session in `running` state and return its id. The id is
    /// the polling handle for async-mode callers.
    async fn create(&self, supplier_id: &str, session_name: &str, dry_run: bool) -> Result<i64>;
    /// Write final counts, error/warning lists and outcome, and stamp the
    /// completion time. Only a `running` session can settle; terminal rows
    /// are immutable.
    async fn finalize(
        &self,
        id: i64,
        outcome: SessionOutcome,
        added: i32,
        updated: i32,
        unchanged: i32,
        errors: &[String],
        warnings: &[String],
    ) -> Result<()>;
    async fn get(&self, id: i64) -> Result<Option<SyncSession>>;
    /// Most recent sessions, optionally scoped to one supplier.
    async fn recent(&self, supplier_id: Option<&str>, limit: i64) -> Result<Vec<SyncSession>>;
}

#[derive(Clone)]
pub struct PgSupplierStore {
    db: Db,
}

impl PgSupplierStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SupplierStore for PgSupplierStore {
    async fn ensure(&self, id: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO suppliers (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = now()",
        )
        .bind(id)
        .bind(name)
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("ensure supplier row for {id}"))?;
        Ok(())
    }

    async fn claim_running(&self, id: &str) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE suppliers SET status = 'running', error_message = NULL, updated_at = now()
             WHERE id = $1 AND status <> 'running'",
        )
        .bind(id)
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("claim running for {id}"))?;
        let claimed = res.rows_affected() == 1;
        debug!(supplier = id, claimed, "running-state claim attempt");
        Ok(claimed)
    }

    async fn mark_idle(&self, id: &str, record_sync: bool) -> Result<()> {
        let sql = if record_sync {
            "UPDATE suppliers SET status = 'idle', last_sync = now(), updated_at = now()
             WHERE id = $1"
        } else {
            "UPDATE suppliers SET status = 'idle', updated_at = now() WHERE id = $1"
        };
        sqlx::query(sql)
            .bind(id)
            .persistent(false)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("mark idle for {id}"))?;
        Ok(())
    }

    async fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE suppliers SET status = 'error', error_message = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("mark error for {id}"))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Supplier>> {
        let row = sqlx::query(
            "SELECT id, name, status, last_sync, error_message FROM suppliers WHERE id = $1",
        )
        .bind(id)
        .persistent(false)
        .fetch_optional(&self.db.pool)
        .await
        .with_context(|| format!("load supplier {id}"))?;
        row.map(supplier_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Supplier>> {
        let rows = sqlx::query(
            "SELECT id, name, status, last_sync, error_message FROM suppliers ORDER BY id",
        )
        .persistent(false)
        .fetch_all(&self.db.pool)
        .await
        .context("list suppliers")?;
        rows.into_iter().map(supplier_from_row).collect()
    }
}

fn supplier_from_row(row: sqlx::postgres::PgRow) -> Result<Supplier> {
    let status: String = row.try_get("status")?;
    Ok(Supplier {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: SupplierStatus::parse(&status),
        last_sync: row.try_get("last_sync")?,
        error_message: row.try_get("error_message")?,
    })
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: Db,
}

impl PgSessionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, supplier_id: &str, session_name: &str, dry_run: bool) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO sync_sessions (supplier_id, session_name, dry_run)
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(supplier_id)
        .bind(session_name)
        .bind(dry_run)
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await
        .with_context(|| format!("create session for {supplier_id}"))?;
        info!(supplier = supplier_id, session_id = id, dry_run, "sync session opened");
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
        // terminal sessions are immutable: the predicate refuses re-settles
        sqlx::query(
            "UPDATE sync_sessions SET
                completed_at = now(), outcome = $2,
                added = $3, updated = $4, unchanged = $5,
                errors = $6, warnings = $7
             WHERE id = $1 AND outcome = 'running'",
        )
        .bind(id)
        .bind(outcome.as_str())
        .bind(added)
        .bind(updated)
        .bind(unchanged)
        .bind(serde_json::to_value(errors).unwrap_or_default())
        .bind(serde_json::to_value(warnings).unwrap_or_default())
        .persistent(false)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("finalize session {id}"))?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<SyncSession>> {
        let row = sqlx::query(
            "SELECT id, supplier_id, session_name, started_at, completed_at,
                    added, updated, unchanged, errors, warnings, outcome, dry_run
             FROM sync_sessions WHERE id = $1",
        )
        .bind(id)
        .persistent(false)
        .fetch_optional(&self.db.pool)
        .await
        .with_context(|| format!("load session {id}"))?;
        row.map(session_from_row).transpose()
    }

    async fn recent(&self, supplier_id: Option<&str>, limit: i64) -> Result<Vec<SyncSession>> {
        let rows = match supplier_id {
            Some(sid) => {
                sqlx::query(
                    "SELECT id, supplier_id, session_name, started_at, completed_at,
                            added, updated, unchanged, errors, warnings, outcome, dry_run
                     FROM sync_sessions WHERE supplier_id = $1
                     ORDER BY started_at DESC LIMIT $2",
                )
                .bind(sid)
                .bind(limit)
                .persistent(false)
                .fetch_all(&self.db.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, supplier_id, session_name, started_at, completed_at,
                            added, updated, unchanged, errors, warnings, outcome, dry_run
                     FROM sync_sessions ORDER BY started_at DESC LIMIT $1",
                )
                .bind(limit)
                .persistent(false)
                .fetch_all(&self.db.pool)
                .await
            }
        }
        .context("list recent sessions")?;
        rows.into_iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: sqlx::postgres::PgRow) -> Result<SyncSession> {
    let outcome: String = row.try_get("outcome")?;
    let errors: serde_json::Value = row.try_get("errors")?;
    let warnings: serde_json::Value = row.try_get("warnings")?;
    Ok(SyncSession {
        id: row.try_get("id")?,
        supplier_id: row.try_get("supplier_id")?,
        session_name: row.try_get("session_name")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        added: row.try_get("added")?,
        updated: row.try_get("updated")?,
        unchanged: row.try_get("unchanged")?,
        errors: serde_json::from_value(errors).unwrap_or_default(),
        warnings: serde_json::from_value(warnings).unwrap_or_default(),
        outcome: SessionOutcome::parse(&outcome),
        dry_run: row.try_get("dry_run")?,
    })
}
