// Shared domain types for the supplier sync core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Supplier lifecycle status. Mutated only by the connector around a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierStatus {
    Idle,
    Running,
    Error,
}

impl SupplierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupplierStatus::Idle => "idle",
            SupplierStatus::Running => "running",
            SupplierStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => SupplierStatus::Running,
            "error" => SupplierStatus::Error,
            _ => SupplierStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub status: SupplierStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Terminal-or-running outcome of one sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Running,
    Completed,
    Failed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Running => "running",
            SessionOutcome::Completed => "completed",
            SessionOutcome::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => SessionOutcome::Completed,
            "failed" => SessionOutcome::Failed,
            _ => SessionOutcome::Running,
        }
    }
}

/// One execution instance of a supplier sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: i64,
    pub supplier_id: String,
    pub session_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub added: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub outcome: SessionOutcome,
    pub dry_run: bool,
}

/// Per-warehouse stock breakdown. Counts are unsigned by construction so the
/// non-negativity invariant holds at the type level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub total: u32,
    #[serde(default)]
    pub warehouses: BTreeMap<String, u32>,
}

impl Stock {
    pub fn from_warehouses(warehouses: BTreeMap<String, u32>) -> Self {
        let total = warehouses.values().sum();
        Self { total, warehouses }
    }

    /// Availability-only feeds map to a nominal stand-in quantity.
    pub fn from_availability(available: bool) -> Self {
        Self {
            total: if available { NOMINAL_STOCK } else { 0 },
            warehouses: BTreeMap::new(),
        }
    }
}

/// Stand-in quantity for suppliers that only report an in-stock boolean.
pub const NOMINAL_STOCK: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    Home,
    Office,
    Commercial,
    Universal,
}

impl UseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::Home => "home",
            UseCase::Office => "office",
            UseCase::Commercial => "commercial",
            UseCase::Universal => "universal",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "home" => UseCase::Home,
            "office" => UseCase::Office,
            "commercial" => UseCase::Commercial,
            _ => UseCase::Universal,
        }
    }
}

/// The normalized product shape shared across all suppliers. One row per
/// (supplier_id, supplier_sku); downstream consumers read only these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    pub supplier_id: String,
    pub supplier_sku: String,
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub cost_price: f64,
    pub retail_price: f64,
    pub selling_price: f64,
    pub margin_percentage: f64,
    pub stock: Stock,
    pub images: Vec<String>,
    /// Supplier-native fields preserved opaquely for traceability. Consumers
    /// must never depend on keys in here.
    pub specifications: BTreeMap<String, String>,
    pub active: bool,
    pub use_case: UseCase,
    pub exclude_from_consultation: bool,
}

/// Supplier-native record plus minimal identity metadata, as produced by an
/// adapter's fetch phase before transformation.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub supplier_sku: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub session_name: Option<String>,
}

/// Aggregate result of one sync run (or of a rejected attempt, in which case
/// `session_id` is None and nothing was persisted).
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub supplier_id: String,
    pub session_id: Option<i64>,
    pub success: bool,
    pub dry_run: bool,
    pub added: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResult {
    pub fn rejected(supplier_id: &str, message: impl Into<String>) -> Self {
        Self {
            supplier_id: supplier_id.to_string(),
            session_id: None,
            success: false,
            dry_run: false,
            added: 0,
            updated: 0,
            unchanged: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn processed(&self) -> i32 {
        self.added + self.updated + self.unchanged
    }
}

/// Sync error taxonomy.
///
/// `Connection` aborts a run before the reconciliation loop (zero partial
/// persistence). `Transform` and `Persistence` are per-record: captured into
/// the session's error list, the batch continues.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("connection: {0}")]
    Connection(String),
    #[error("transform [{sku}]: {reason}")]
    Transform { sku: String, reason: String },
    #[error("persist [{sku}]: {reason}")]
    Persistence { sku: String, reason: String },
}

impl SyncError {
    pub fn transform(sku: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Transform {
            sku: sku.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that abort the whole run rather than one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Connection(e.to_string())
    }
}
