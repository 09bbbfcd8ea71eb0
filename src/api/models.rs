// API request/response models (DTOs)

use crate::domain::SyncOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// Body for the sync trigger endpoints. `async: true` switches to the
/// fire-and-poll mode that answers with a session id.
#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    pub limit: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    pub session_name: Option<String>,
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

impl SyncRequest {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            limit: self.limit,
            dry_run: self.dry_run,
            session_name: self.session_name.clone(),
        }
    }
}

/// Async-mode acknowledgement: poll `/api/v1/sessions/{session_id}`.
#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    pub supplier_id: String,
    pub session_id: i64,
}

/// Async-mode acknowledgement for a sync-all run.
#[derive(Debug, Serialize)]
pub struct SyncAllAccepted {
    pub queued: Vec<SyncAccepted>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub supplier_id: String,
    pub reachable: bool,
}
