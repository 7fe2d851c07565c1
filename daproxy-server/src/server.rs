use crate::config::Config;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use daproxy_core::{
    BackendVersion, MemstoreConfigPatch, ProxyError, Result, SafeConfig, SecondaryStatsSnapshot,
    StorageManager, StorageManagerBuilder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub manager: Arc<StorageManager>,
    pub memstore_config: Option<SafeConfig>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    dispersal_backend: BackendVersion,
    secondary: SecondaryStatsSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
struct DispersalBackendBody {
    backend: BackendVersion,
}

/// Maps library errors onto HTTP statuses.
pub struct ApiError(ProxyError);

impl From<ProxyError> for ApiError {
    fn from(error: ProxyError) -> Self {
        Self(error)
    }
}

fn status_for(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::InvalidRequest(_) | ProxyError::MalformedCert(_) | ProxyError::Codec(_) => {
            StatusCode::BAD_REQUEST
        }
        ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
        ProxyError::Verification(_) | ProxyError::Derivation(_) => StatusCode::IM_A_TEAPOT,
        ProxyError::Failover(_) | ProxyError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("request failed status={} error={}", status, self.0);
        } else {
            tracing::debug!("request rejected status={} error={}", status, self.0);
        }

        match self.0 {
            ProxyError::Derivation(error) => (status, Json(error)).into_response(),
            other => {
                let resp = ApiResponse::<()> {
                    success: false,
                    data: None,
                    error: Some(other.to_string()),
                };
                (status, Json(resp)).into_response()
            }
        }
    }
}

fn parse_commitment(raw: &str) -> Result<Vec<u8>> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(hex_part)
        .map_err(|e| ProxyError::InvalidRequest(format!("commitment is not valid hex: {}", e)))
}

pub fn router(state: Arc<ServerState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/put", post(put_handler))
        .route("/get/:commitment", get(get_handler))
        .route(
            "/memstore/config",
            get(get_memstore_config).patch(patch_memstore_config),
        )
        .route("/keccak/:key", get(get_keccak_handler).put(put_keccak_handler))
        .route(
            "/admin/dispersal-backend",
            get(get_dispersal_backend).put(put_dispersal_backend),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut builder = StorageManagerBuilder::new()
        .config(config.store.clone())
        .shutdown(shutdown.clone());
    if let Some(snapshot) = config.verifier_snapshot.clone() {
        builder = builder.verifier_snapshot(snapshot);
    }
    let built = builder.build().await?;

    let state = Arc::new(ServerState {
        manager: built.manager.clone(),
        memstore_config: built.memstore_config.clone(),
    });
    let app = router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    built.tasks.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = ApiResponse::ok(HealthResponse {
        status: "ok",
        dispersal_backend: state.manager.dispersal_backend(),
        secondary: state.manager.secondary().stats(),
    });
    (StatusCode::OK, Json(response))
}

async fn put_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let cert = state.manager.put(body).await?;
    let commitment = format!("0x{}", hex::encode(cert.to_commitment()));
    Ok((StatusCode::OK, commitment))
}

async fn get_handler(
    State(state): State<Arc<ServerState>>,
    Path(commitment): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let commitment = parse_commitment(&commitment)?;
    let payload = state.manager.get(&commitment).await?;
    Ok((StatusCode::OK, payload))
}

async fn put_keccak_handler(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let key = parse_commitment(&key)?;
    state.manager.put_keccak(&key, body).await?;
    Ok(StatusCode::OK)
}

async fn get_keccak_handler(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let key = parse_commitment(&key)?;
    let value = state.manager.get_keccak(&key).await?;
    Ok((StatusCode::OK, value))
}

fn memstore(state: &ServerState) -> Result<&SafeConfig> {
    state
        .memstore_config
        .as_ref()
        .ok_or_else(|| ProxyError::NotFound("memstore is not enabled".to_string()))
}

async fn get_memstore_config(
    State(state): State<Arc<ServerState>>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let config = memstore(&state)?.snapshot();
    Ok(Json(config))
}

async fn patch_memstore_config(
    State(state): State<Arc<ServerState>>,
    Json(patch): Json<MemstoreConfigPatch>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let updated = memstore(&state)?
        .apply_patch(patch)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
    tracing::info!("memstore config updated config={:?}", updated);
    Ok(Json(updated))
}

async fn get_dispersal_backend(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(DispersalBackendBody {
        backend: state.manager.dispersal_backend(),
    })
}

async fn put_dispersal_backend(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<DispersalBackendBody>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    state
        .manager
        .set_dispersal_backend(body.backend)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
    Ok(Json(DispersalBackendBody {
        backend: state.manager.dispersal_backend(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use daproxy_core::{BuiltStorage, StoreConfig};
    use tower::ServiceExt;

    const BODY_LIMIT: usize = 1024;

    async fn app() -> (Router, BuiltStorage) {
        let config = StoreConfig {
            backends_to_enable: vec![BackendVersion::V1, BackendVersion::V2],
            dispersal_backend: BackendVersion::V2,
            memstore_enabled: true,
            async_put_workers: 0,
            ..Default::default()
        };
        let built = StorageManagerBuilder::new()
            .config(config)
            .build()
            .await
            .unwrap();
        let state = Arc::new(ServerState {
            manager: built.manager.clone(),
            memstore_config: built.memstore_config.clone(),
        });
        (router(state, BODY_LIMIT), built)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (app, _built) = app().await;

        let (status, commitment) =
            send(&app, Method::POST, "/put", Body::from("hello rollup")).await;
        assert_eq!(status, StatusCode::OK);
        let commitment = String::from_utf8(commitment.to_vec()).unwrap();
        assert!(commitment.starts_with("0x01"));

        let (status, payload) =
            send(&app, Method::GET, &format!("/get/{}", commitment), Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload, Bytes::from_static(b"hello rollup"));
    }

    #[tokio::test]
    async fn test_bad_commitment_is_bad_request() {
        let (app, _built) = app().await;
        let (status, _) = send(&app, Method::GET, "/get/0xzz", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/get/0x0203", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (app, _built) = app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/put",
            Body::from(vec![0u8; BODY_LIMIT + 1]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_memstore_patch_drives_failover() {
        let (app, _built) = app().await;

        let (status, body) = send(
            &app,
            Method::PATCH,
            "/memstore/config",
            Body::from(r#"{"put_returns_failover_error": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["put_returns_failover_error"], true);

        let (status, _) = send(&app, Method::POST, "/put", Body::from("x")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&app, Method::GET, "/memstore/config", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["put_returns_failover_error"], true);
    }

    #[tokio::test]
    async fn test_derivation_error_is_teapot_with_json() {
        let (app, _built) = app().await;
        let (status, _) = send(
            &app,
            Method::PATCH,
            "/memstore/config",
            Body::from(
                r#"{"put_with_get_returns_derivation_error": {"status_code": 3, "msg": "bad"}}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, commitment) = send(&app, Method::POST, "/put", Body::from("x")).await;
        let commitment = String::from_utf8(commitment.to_vec()).unwrap();

        let (status, body) =
            send(&app, Method::GET, &format!("/get/{}", commitment), Body::empty()).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["status_code"], 3);
    }

    #[tokio::test]
    async fn test_keccak_routes_need_s3() {
        let (app, _built) = app().await;
        let key = format!("0x{}", hex::encode([0u8; 32]));

        let (status, _) =
            send(&app, Method::PUT, &format!("/keccak/{}", key), Body::from("x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::GET, &format!("/keccak/{}", key), Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_switch_dispersal_backend() {
        let (app, _built) = app().await;
        let (status, _) = send(
            &app,
            Method::PUT,
            "/admin/dispersal-backend",
            Body::from(r#"{"backend": "v1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, commitment) = send(&app, Method::POST, "/put", Body::from("legacy")).await;
        let commitment = String::from_utf8(commitment.to_vec()).unwrap();
        assert!(commitment.starts_with("0x00"));

        let (status, body) = send(&app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["data"]["dispersal_backend"], "v1");
    }
}
