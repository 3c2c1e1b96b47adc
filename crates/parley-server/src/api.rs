use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parley_store::ObjectStore;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, IpRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<ObjectStore>,
    pub rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/objects/*key", get(object_download))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn object_download(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, content_type) = state
        .objects
        .get(&key)
        .await
        .map_err(|e| ServerError::from_store(&key, e))?;

    debug!(key = %key, size = data.len(), "Serving object");
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use parley_store::RateLimiter;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    async fn state(dir: &TempDir, burst: f64) -> AppState {
        let objects = ObjectStore::new(dir.path().to_path_buf(), "http://localhost:8080", 1024)
            .await
            .unwrap();
        AppState {
            objects: Arc::new(objects),
            rate_limiter: RateLimiter::new(0.001, burst),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = TempDir::new().unwrap();
        let app = build_router(state(&dir, 10.0).await);

        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn serves_stored_object_with_content_type() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, 10.0).await;
        let url = state
            .objects
            .put("alice/1700000000000-cat.png", b"png-bytes", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8080/objects/alice/1700000000000-cat.png");
        let app = build_router(state);

        let resp = app
            .oneshot(get("/objects/alice/1700000000000-cat.png"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"png-bytes");
    }

    #[tokio::test]
    async fn missing_and_hidden_objects_are_refused() {
        let dir = TempDir::new().unwrap();
        let app = build_router(state(&dir, 10.0).await);

        let resp = app.clone().oneshot(get("/objects/alice/nope.png")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(get("/objects/.meta/alice/nope.png")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rate_limit_applies_per_ip() {
        let dir = TempDir::new().unwrap();
        let app = build_router(state(&dir, 2.0).await);

        for _ in 0..2 {
            let resp = app.clone().oneshot(get("/health")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = Request::builder()
            .uri("/health")
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(other).await.unwrap().status(), StatusCode::OK);
    }
}
