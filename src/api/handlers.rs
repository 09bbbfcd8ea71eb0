// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::connector::{SupplierConnector, SyncRegistry};
use crate::util::db::Db;
use actix_web::{web, HttpResponse, Result};
use std::time::SystemTime;

/// Health check endpoint
pub async fn health_check(db: web::Data<Db>) -> Result<HttpResponse> {
    let db_status = match sqlx::query_scalar::<_, bool>("SELECT true")
        .fetch_one(&db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let uptime = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: uptime,
    });

    Ok(HttpResponse::Ok().json(response))
}

fn unknown_supplier(id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ApiResponse::<()>::error(format!("unknown supplier '{id}'")))
}

fn internal(e: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string()))
}

/// Start one async-mode run: claim + open a session, then detach the actual
/// work. The caller polls the session row.
async fn spawn_run(
    connector: &SupplierConnector,
    request: &SyncRequest,
) -> std::result::Result<Option<i64>, HttpResponse> {
    match connector.prepare(&request.options()).await {
        Ok(Some(prepared)) => {
            let session_id = prepared.session_id;
            let connector = connector.clone();
            let options = request.options();
            tokio::spawn(async move {
                connector.execute(prepared, options).await;
            });
            Ok(Some(session_id))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(internal(e)),
    }
}

/// Trigger a sync for one supplier. Sync mode blocks until the run settles;
/// async mode answers 202 with the session id to poll.
pub async fn sync_supplier(
    path: web::Path<String>,
    payload: Option<web::Json<SyncRequest>>,
    registry: web::Data<SyncRegistry>,
) -> Result<HttpResponse> {
    let supplier_id = path.into_inner();
    let request = payload.map(|p| p.into_inner()).unwrap_or_default();
    let Some(connector) = registry.get(&supplier_id) else {
        return Ok(unknown_supplier(&supplier_id));
    };

    tracing::info!(
        supplier = %supplier_id,
        dry_run = request.dry_run,
        run_async = request.run_async,
        "sync requested over HTTP"
    );

    if request.run_async {
        return Ok(match spawn_run(connector, &request).await {
            Ok(Some(session_id)) => HttpResponse::Accepted().json(ApiResponse::success(
                SyncAccepted {
                    supplier_id,
                    session_id,
                },
            )),
            Ok(None) => HttpResponse::Conflict().json(ApiResponse::<()>::error(
                "a sync for this supplier is already running",
            )),
            Err(resp) => resp,
        });
    }

    match connector.sync_products(request.options()).await {
        Ok(result) if result.session_id.is_none() => Ok(HttpResponse::Conflict().json(
            ApiResponse::<()>::error(
                result
                    .message
                    .unwrap_or_else(|| "sync rejected".to_string()),
            ),
        )),
        Ok(result) => Ok(sync_result_response(result)),
        Err(e) => Ok(internal(e)),
    }
}

/// A settled run maps to an envelope matching its outcome: failed runs say
/// `success: false` at the top level, with the full result kept in `data`.
fn sync_result_response(result: crate::domain::SyncResult) -> HttpResponse {
    if result.success {
        return HttpResponse::Ok().json(ApiResponse::success(result));
    }
    let message = result
        .message
        .clone()
        .or_else(|| result.errors.first().cloned())
        .unwrap_or_else(|| "sync failed".to_string());
    let mut envelope = ApiResponse::error(message);
    envelope.data = Some(result);
    HttpResponse::Ok().json(envelope)
}

/// Trigger syncs for every registered supplier. Sync mode runs them
/// sequentially and returns all results; async mode claims each supplier up
/// front and detaches one sequential worker.
pub async fn sync_all(
    payload: Option<web::Json<SyncRequest>>,
    registry: web::Data<SyncRegistry>,
) -> Result<HttpResponse> {
    let request = payload.map(|p| p.into_inner()).unwrap_or_default();

    if request.run_async {
        let mut queued = Vec::new();
        let mut rejected = Vec::new();
        let mut prepared_runs = Vec::new();
        for connector in registry.all() {
            match connector.prepare(&request.options()).await {
                Ok(Some(prepared)) => {
                    queued.push(SyncAccepted {
                        supplier_id: connector.supplier_id().to_string(),
                        session_id: prepared.session_id,
                    });
                    prepared_runs.push((connector.clone(), prepared));
                }
                Ok(None) => rejected.push(connector.supplier_id().to_string()),
                Err(e) => return Ok(internal(e)),
            }
        }
        let options = request.options();
        tokio::spawn(async move {
            for (connector, prepared) in prepared_runs {
                connector.execute(prepared, options.clone()).await;
            }
        });
        return Ok(HttpResponse::Accepted()
            .json(ApiResponse::success(SyncAllAccepted { queued, rejected })));
    }

    let mut results = Vec::new();
    for connector in registry.all() {
        match connector.sync_products(request.options()).await {
            Ok(result) => results.push(result),
            Err(e) => return Ok(internal(e)),
        }
    }
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.supplier_id.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(HttpResponse::Ok().json(ApiResponse::success(results)));
    }
    let mut envelope = ApiResponse::error(format!("sync failed for: {}", failed.join(", ")));
    envelope.data = Some(results);
    Ok(HttpResponse::Ok().json(envelope))
}

/// Poll one sync session by id
pub async fn get_session(
    path: web::Path<i64>,
    registry: web::Data<SyncRegistry>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    match registry.sessions().get(id).await {
        Ok(Some(session)) => Ok(HttpResponse::Ok().json(ApiResponse::success(session))),
        Ok(None) => Ok(HttpResponse::NotFound()
            .json(ApiResponse::<()>::error(format!("no session with id {id}")))),
        Err(e) => Ok(internal(e)),
    }
}

/// List all suppliers with their current status
pub async fn list_suppliers(registry: web::Data<SyncRegistry>) -> Result<HttpResponse> {
    match registry.suppliers().list().await {
        Ok(suppliers) => Ok(HttpResponse::Ok().json(ApiResponse::success(suppliers))),
        Err(e) => Ok(internal(e)),
    }
}

/// Current status of one supplier
pub async fn supplier_status(
    path: web::Path<String>,
    registry: web::Data<SyncRegistry>,
) -> Result<HttpResponse> {
    let supplier_id = path.into_inner();
    let Some(connector) = registry.get(&supplier_id) else {
        return Ok(unknown_supplier(&supplier_id));
    };
    match connector.get_status().await {
        // No row yet: supplier is known but has never synced
        Ok(None) => Ok(HttpResponse::Ok()
            .json(ApiResponse::success(serde_json::json!({
                "id": supplier_id,
                "name": connector.supplier_info().name,
                "status": "idle",
                "last_sync": null,
            })))),
        Ok(Some(supplier)) => Ok(HttpResponse::Ok().json(ApiResponse::success(supplier))),
        Err(e) => Ok(internal(e)),
    }
}

/// Live connection probe for one supplier
pub async fn test_supplier(
    path: web::Path<String>,
    registry: web::Data<SyncRegistry>,
) -> Result<HttpResponse> {
    let supplier_id = path.into_inner();
    let Some(connector) = registry.get(&supplier_id) else {
        return Ok(unknown_supplier(&supplier_id));
    };
    let reachable = connector.test_connection().await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(ConnectionTestResponse {
        supplier_id,
        reachable,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::SyncRegistry;
    use crate::testing::{MemProductStore, MemSessionStore, MemSupplierStore, StubAdapter};
    use actix_web::{test, App};
    use std::sync::Arc;

    fn registry(adapter: StubAdapter) -> SyncRegistry {
        SyncRegistry::assemble(
            vec![Arc::new(adapter)],
            Arc::new(MemSupplierStore::default()),
            Arc::new(MemSessionStore::default()),
            Arc::new(MemProductStore::default()),
        )
    }

    async fn post_sync(registry: SyncRegistry, supplier: &str) -> serde_json::Value {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .route("/api/v1/sync/{supplier}", web::post().to(sync_supplier)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/sync/{supplier}"))
            .set_json(serde_json::json!({}))
            .to_request();
        test::call_and_read_body_json(&app, req).await
    }

    #[actix_web::test]
    async fn failed_run_reports_error_envelope() {
        let body = post_sync(registry(StubAdapter::unreachable()), "stub").await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("aborted"));
        // the settled result is still available for inspection
        assert_eq!(body["data"]["success"], false);
        assert_eq!(body["data"]["added"], 0);
        assert!(body["data"]["session_id"].is_i64());
    }

    #[actix_web::test]
    async fn successful_run_reports_success_envelope() {
        let body = post_sync(registry(StubAdapter::with_records(2)), "stub").await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["added"], 2);
        assert!(body["error"].is_null());
    }

    #[actix_web::test]
    async fn unknown_supplier_is_not_found() {
        let body = post_sync(registry(StubAdapter::with_records(1)), "nobody").await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unknown supplier"));
    }
}
