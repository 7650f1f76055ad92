//! # API Handlers
//!
//! Axum handlers for search, call detail, dumps, settings and capture
//! ingestion.

use crate::resolver::ResolveError;
use crate::search::{build_filter, sanitize, FilterError, QueryParams};
use crate::store::{Setting, StoreError};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use cs_core::{format_dump, PacketRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, err: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: err.to_string(),
        }),
    )
}

impl From<FilterError> for (StatusCode, Json<ApiError>) {
    fn from(err: FilterError) -> Self {
        api_error(StatusCode::BAD_REQUEST, err)
    }
}

impl From<StoreError> for (StatusCode, Json<ApiError>) {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::SettingNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, err)
    }
}

impl From<ResolveError> for (StatusCode, Json<ApiError>) {
    fn from(err: ResolveError) -> Self {
        let status = match err {
            ResolveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ResolveError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            ResolveError::TooManyLegs { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        api_error(status, err)
    }
}

// =============================================================================
// Search
// =============================================================================

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<PacketRecord>>> {
    let params = QueryParams::from_pairs(pairs);
    let (filter, options) = build_filter(&params).map_err(|e| {
        tracing::warn!("Rejected search: {}", e);
        e
    })?;

    let results = state.store.find(&filter, &options).await.map_err(|e| {
        tracing::error!("Search failed: {}", e);
        e
    })?;
    Ok(Json(results))
}

// =============================================================================
// Calls
// =============================================================================

pub async fn call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PacketRecord>>> {
    let packets = state.resolver().call_packets(&id).await.map_err(|e| {
        tracing::error!("Call {} resolution failed: {}", id, e);
        e
    })?;
    Ok(Json(packets))
}

#[derive(Debug, Deserialize)]
pub struct DumpParams {
    pub ip: Option<String>,
}

pub async fn call_dump(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DumpParams>,
) -> ApiResult<impl IntoResponse> {
    let packets = state.resolver().call_packets(&id).await.map_err(|e| {
        tracing::error!("Call {} dump failed: {}", id, e);
        e
    })?;

    let ip = params.ip.as_deref().map(sanitize).filter(|ip| !ip.is_empty());
    let dump = format_dump(&packets, ip.as_deref());

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=dump.txt"),
        ],
        dump,
    ))
}

// =============================================================================
// Settings
// =============================================================================

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> ApiResult<Json<Vec<Setting>>> {
    Ok(Json(state.store.get_settings(&group).await?))
}

pub async fn set_setting(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
    Form(setting): Form<Setting>,
) -> ApiResult<Json<Setting>> {
    let setting = Setting {
        key: sanitize(&setting.key),
        value: sanitize(&setting.value),
    };
    if setting.key.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "setting key is required"));
    }

    state
        .store
        .set_setting(&group, setting.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to store setting in {}: {}", group, e);
            e
        })?;
    Ok(Json(setting))
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn delete_setting(
    State(state): State<Arc<AppState>>,
    Path((group, key)): Path<(String, String)>,
) -> Json<DeleteResult> {
    match state.store.delete_setting(&group, &key).await {
        Ok(()) => Json(DeleteResult {
            result: true,
            error: None,
        }),
        Err(e) => {
            tracing::error!("Failed to delete setting {}/{}: {}", group, key, e);
            Json(DeleteResult {
                result: false,
                error: Some(e.to_string()),
            })
        }
    }
}

// =============================================================================
// Capture
// =============================================================================

pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(packet): Json<PacketRecord>,
) -> ApiResult<StatusCode> {
    state.store.insert(packet.clone()).await?;
    let delivered = state.listeners.broadcast(&packet).await;
    tracing::debug!(call_id = %packet.call_id, delivered, "captured packet");
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use crate::store::memory::MemoryStore;
    use crate::{router, AppState, Config};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use cs_core::PacketRecord;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn packet(call_id: &str, aleg: &str, secs: i64) -> PacketRecord {
        PacketRecord {
            call_id: call_id.into(),
            call_id_a_leg: aleg.into(),
            source_ip: "10.0.0.1".into(),
            source_port: 5060,
            destination_ip: "10.0.0.2".into(),
            destination_port: 5060,
            from_user: "alice".into(),
            to_user: "bob".into(),
            date_time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            microseconds: 0,
            message: format!("INVITE {}", call_id),
        }
    }

    fn app(records: Vec<PacketRecord>) -> (axum::Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryStore::with_records(records)),
            Config::default(),
        ));
        (router(state.clone(), PathBuf::from("ui/dist")), state)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get(app: axum::Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_rejects_bad_date() {
        let (app, _) = app(vec![]);
        let response = get(app, "/search?startdate=not-a-date").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("startdate"));
    }

    #[tokio::test]
    async fn test_search_returns_unique_calls_newest_first() {
        let (app, _) = app(vec![
            packet("a", "", 0),
            packet("a", "", 1),
            packet("b", "", 2),
        ]);
        let response = get(app, "/search?limit=nope&fromuser=ali").await;
        assert_eq!(response.status(), StatusCode::OK);

        let records: Vec<PacketRecord> =
            serde_json::from_str(&body_string(response).await).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(records[1].date_time, packet("a", "", 1).date_time);
    }

    #[tokio::test]
    async fn test_call_returns_normalized_legs() {
        let (app, _) = app(vec![
            packet("B", "A", 1),
            packet("A", "", 0),
            packet("other", "", 2),
        ]);
        let response = get(app, "/call/A").await;
        assert_eq!(response.status(), StatusCode::OK);

        let records: Vec<PacketRecord> =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(records, vec![packet("A", "", 0), packet("B", "A", 1)]);
    }

    #[tokio::test]
    async fn test_call_id_with_reserved_characters() {
        let (app, _) = app(vec![packet("3848276298/2?x%40atlanta", "", 0)]);
        let response = get(app, "/call/3848276298%2F2%3Fx%2540atlanta").await;
        assert_eq!(response.status(), StatusCode::OK);

        let records: Vec<PacketRecord> =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].call_id, "3848276298/2?x%40atlanta");
    }

    #[tokio::test]
    async fn test_call_dump() {
        let mut far = packet("B", "A", 1);
        far.source_ip = "192.168.1.5".into();
        far.destination_ip = "192.168.1.6".into();
        let (app, _) = app(vec![packet("A", "", 0), far]);

        let response = get(app.clone(), "/call/A/dump?ip=10.0.0.1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=dump.txt"
        );
        let dump = body_string(response).await;
        assert_eq!(dump, "U 10.0.0.1:5060 -> 10.0.0.2:5060\nINVITE A\n\n");

        let response = get(app, "/call/A/dump").await;
        assert!(body_string(response).await.contains("INVITE B"));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (app, _) = app(vec![]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settings/alias")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("key=10.0.0.1&value=edge-proxy"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(app.clone(), "/settings/alias").await;
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, serde_json::json!([{"key": "10.0.0.1", "value": "edge-proxy"}]));

        let delete = |app: axum::Router| async move {
            let response = app
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/settings/alias/10.0.0.1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            serde_json::from_str::<serde_json::Value>(&body_string(response).await).unwrap()
        };
        assert_eq!(delete(app.clone()).await, serde_json::json!({"result": true}));
        let second = delete(app).await;
        assert_eq!(second["result"], false);
        assert!(second["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_capture_stores_and_broadcasts() {
        let (app, state) = app(vec![]);
        let mut sub = state.listeners.register("INVITE").await;

        let body = serde_json::to_string(&packet("A", "", 0)).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/capture")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert_eq!(sub.packets.recv().await.unwrap(), packet("A", "", 0));
        let stored = state
            .store
            .find(&cs_core::Filter::call_leg("A"), &cs_core::Options::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
