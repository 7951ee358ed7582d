//! Axum entrypoint receiving Cloud Storage notifications for GTS.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use gts_sync::{
    ErrorKind, ServiceConfig, SheetSync, StorageEvent, SyncError, METHOD_HEADER, SUBJECT_HEADER,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "gts-web";

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SheetSync>,
}

impl AppState {
    pub fn new(sync: SheetSync) -> Self {
        Self {
            sync: Arc::new(sync),
        }
    }
}

/// Notifications are accepted on any path.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", any(event_handler))
        .fallback(event_handler)
        .with_state(Arc::new(state))
}

pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let port = config.port;
    let sync = SheetSync::new(config)?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening for storage events");
    axum::serve(listener, app(AppState::new(sync)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn event_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let event = StorageEvent::new(
        header_str(&headers, METHOD_HEADER),
        header_str(&headers, SUBJECT_HEADER),
    );
    match state.sync.handle_event(&event).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => sync_error(err),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedEvent => StatusCode::METHOD_NOT_ALLOWED,
        ErrorKind::InvalidObject => StatusCode::BAD_REQUEST,
        ErrorKind::Fetch => StatusCode::NOT_FOUND,
        ErrorKind::ClientInit | ErrorKind::Parse | ErrorKind::Merge => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn sync_error(err: SyncError) -> Response {
    let status = status_for(err.kind());
    if status == StatusCode::METHOD_NOT_ALLOWED {
        info!("ignoring event: {err}");
    } else {
        error!(status = status.as_u16(), "event failed: {err}");
    }
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::NaiveDate;
    use gts_sheets::InMemorySpreadsheet;
    use gts_storage::InMemoryObjectStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BUCKET: &str = "webhook-looker-6814";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
    }

    async fn test_app() -> (Router, Arc<InMemoryObjectStore>, Arc<InMemorySpreadsheet>) {
        let mut config = ServiceConfig::offline("svod_subscriptions_kpi");
        config.bucket = BUCKET.to_string();
        let objects = Arc::new(InMemoryObjectStore::new());
        let sheets = Arc::new(InMemorySpreadsheet::new());
        let sync = SheetSync::with_clients(config, objects.clone(), sheets.clone())
            .with_clock(today);
        (app(AppState::new(sync)), objects, sheets)
    }

    fn event_request(method: &str, subject: &str) -> axum::http::Request<Body> {
        event_request_at("/", method, subject)
    }

    fn event_request_at(uri: &str, method: &str, subject: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("Ce-Methodname", method)
            .header("Ce-Subject", subject)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn create_event_merges_and_returns_ok() {
        let (app, objects, sheets) = test_app().await;
        sheets.add_sheet("daily_hours", Vec::new()).await;
        objects.put(BUCKET, "daily_hours-1674409641.csv", "2024-01-02,10\n").await;

        let resp = app
            .oneshot(event_request(
                "storage.objects.create",
                "objects/daily_hours-1674409641.csv",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["dashboard"], "daily_hours");
        assert_eq!(json["write_range"], "daily_hours!A1");
        assert_eq!(sheets.rows("daily_hours").await.unwrap()[0], vec!["2024-01-02", "10"]);
    }

    #[tokio::test]
    async fn notifications_on_sub_paths_are_handled() {
        let (app, objects, sheets) = test_app().await;
        sheets.add_sheet("daily_hours", Vec::new()).await;
        objects.put(BUCKET, "daily_hours-7.csv", "2024-01-02,10\n").await;

        let subject = "objects/daily_hours-7.csv";
        let resp = app
            .clone()
            .oneshot(event_request_at("/gcs/notify", "storage.objects.create", subject))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(sheets.rows("daily_hours").await.unwrap()[0], vec!["2024-01-02", "10"]);

        let ignored = app
            .oneshot(event_request_at("/x", "storage.objects.delete", subject))
            .await
            .unwrap();
        assert_eq!(ignored.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let (app, _objects, _sheets) = test_app().await;
        let resp = app
            .oneshot(event_request("storage.objects.delete", "objects/daily_hours-1.csv"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_headers_are_not_allowed() {
        let (app, _objects, _sheets) = test_app().await;
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (app, _objects, _sheets) = test_app().await;
        let resp = app
            .oneshot(event_request("storage.objects.create", "objects/daily_hours-1.csv"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn parse_and_merge_failures_are_server_errors() {
        let (app, objects, _sheets) = test_app().await;
        objects.put(BUCKET, "daily_hours-1.csv", "a,b\n1\n").await;
        objects.put(BUCKET, "daily_hours-2.csv", "2024-01-02,10\n").await;

        let parse = app
            .clone()
            .oneshot(event_request("storage.objects.create", "objects/daily_hours-1.csv"))
            .await
            .unwrap();
        assert_eq!(parse.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // No `daily_hours` tab exists, so reading the snapshot fails.
        let merge = app
            .oneshot(event_request("storage.objects.create", "objects/daily_hours-2.csv"))
            .await
            .unwrap();
        assert_eq!(merge.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn subject_without_object_is_a_bad_request() {
        let (app, _objects, _sheets) = test_app().await;
        let resp = app
            .oneshot(event_request("storage.objects.create", "objects/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_mapping_covers_every_kind() {
        assert_eq!(status_for(ErrorKind::Fetch), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Parse), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::Merge), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::ClientInit), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::UnsupportedEvent), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_for(ErrorKind::InvalidObject), StatusCode::BAD_REQUEST);
    }
}
