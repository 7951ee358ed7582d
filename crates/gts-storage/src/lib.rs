//! Object storage access for GTS: fetch uploaded CSV objects by bucket and path.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod token;

pub use token::{TokenError, TokenSource};

pub const CRATE_NAME: &str = "gts-storage";

pub const DEFAULT_STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub bucket: String,
    pub object: String,
    pub body: Vec<u8>,
    pub content_hash: String,
}

impl FetchedObject {
    pub fn new(bucket: &str, object: &str, body: Vec<u8>) -> Self {
        Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
            content_hash: sha256_hex(&body),
            body,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object {object:?} not found in bucket {bucket:?}")]
    NotFound { bucket: String, object: String },
    #[error("timed out fetching {object:?}")]
    Timeout { object: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("cannot build object url from base {0:?}")]
    InvalidUrl(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl FetchError {
    /// Credentials could not be obtained; the object store itself was never asked.
    pub fn is_token(&self) -> bool {
        matches!(self, FetchError::Token(_))
    }
}

/// Read-only view of a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<FetchedObject, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(50),
            user_agent: Some(format!("gts/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Google Cloud Storage JSON API media download.
#[derive(Debug)]
pub struct GcsObjectStore {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenSource,
}

impl GcsObjectStore {
    pub fn new(
        config: HttpClientConfig,
        base_url: impl Into<String>,
        tokens: TokenSource,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building storage http client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            tokens,
        })
    }

    pub fn object_url(&self, bucket: &str, object: &str) -> Result<Url, FetchError> {
        media_url(&self.base_url, bucket, object)
    }
}

/// `{base}/storage/v1/b/{bucket}/o/{object}?alt=media` with `/` inside the
/// object name escaped.
pub fn media_url(base_url: &str, bucket: &str, object: &str) -> Result<Url, FetchError> {
    let invalid = || FetchError::InvalidUrl(base_url.to_string());
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(["storage", "v1", "b", bucket, "o"])
        .push(object);
    url.query_pairs_mut().append_pair("alt", "media");
    Ok(url)
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<FetchedObject, FetchError> {
        let url = self.object_url(bucket, object)?;
        debug!(%url, "downloading object");

        let request = self.client.get(url.clone());
        let request = token::authorize(request, &self.tokens, &self.client).await?;
        let resp = request.send().await.map_err(|err| timeout_or(err, object))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.bytes().await.map_err(|err| timeout_or(err, object))?.to_vec();
        let fetched = FetchedObject::new(bucket, object, body);
        info!(
            bucket,
            object,
            bytes = fetched.body.len(),
            sha256 = %fetched.content_hash,
            "object fetched"
        );
        Ok(fetched)
    }
}

fn timeout_or(err: reqwest::Error, object: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            object: object.to_string(),
        }
    } else {
        FetchError::Request(err)
    }
}

/// Bucket contents kept in memory, keyed by `(bucket, object)`.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, bucket: &str, object: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), object.to_string()), body.into());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<FetchedObject, FetchError> {
        let objects = self.objects.lock().await;
        match objects.get(&(bucket.to_string(), object.to_string())) {
            Some(body) => Ok(FetchedObject::new(bucket, object, body.clone())),
            None => Err(FetchError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::{header, HeaderMap, StatusCode as HttpStatus},
        response::{IntoResponse, Response},
        routing::get,
        Router,
    };
    use tokio::net::TcpListener;

    const TOKEN_JSON: &str = r#"{"access_token":"abc","token_type":"Bearer","expires_in":3599}"#;

    async fn spawn_server(router: Router) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    async fn serve_object(
        Path((bucket, object)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Response {
        if query.get("alt").map(String::as_str) != Some("media") {
            return HttpStatus::BAD_REQUEST.into_response();
        }
        let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        if auth != Some("Bearer abc") {
            return HttpStatus::UNAUTHORIZED.into_response();
        }
        match (bucket.as_str(), object.as_str()) {
            ("webhook", "exports/daily_hours-1.csv") => "2024-01-02,10\n".into_response(),
            ("webhook", "locked.csv") => HttpStatus::FORBIDDEN.into_response(),
            _ => HttpStatus::NOT_FOUND.into_response(),
        }
    }

    async fn storage_stub() -> String {
        let router = Router::new()
            .route("/storage/v1/b/{bucket}/o/{object}", get(serve_object))
            .route(
                "/token",
                get(|headers: HeaderMap| async move {
                    match headers.get("Metadata-Flavor").and_then(|v| v.to_str().ok()) {
                        Some("Google") => (HttpStatus::OK, TOKEN_JSON),
                        _ => (HttpStatus::FORBIDDEN, ""),
                    }
                }),
            )
            .route("/broken-token", get(|| async { HttpStatus::SERVICE_UNAVAILABLE }));
        spawn_server(router).await
    }

    fn store(base: &str, tokens: TokenSource) -> GcsObjectStore {
        GcsObjectStore::new(HttpClientConfig::default(), base, tokens).unwrap()
    }

    #[test]
    fn content_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn media_url_escapes_nested_object_names() {
        let object = "exports/daily_hours-1.csv";
        let url = media_url(DEFAULT_STORAGE_BASE_URL, "webhook-looker", object).unwrap();
        assert_eq!(
            url.as_str(),
            concat!(
                "https://storage.googleapis.com/storage/v1/b/webhook-looker",
                "/o/exports%2Fdaily_hours-1.csv?alt=media"
            )
        );
    }

    #[test]
    fn media_url_tolerates_trailing_slash_in_base() {
        let url = media_url("http://127.0.0.1:4443/", "b", "x.csv").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:4443/storage/v1/b/b/o/x.csv?alt=media");
    }

    #[test]
    fn media_url_rejects_non_base_urls() {
        assert!(matches!(
            media_url("mailto:someone@example.com", "b", "x.csv"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_serves_and_misses() {
        let store = InMemoryObjectStore::new();
        store.put("bucket", "daily_hours-1.csv", "2024-01-01,1\n").await;

        let hit = store.fetch("bucket", "daily_hours-1.csv").await.unwrap();
        assert_eq!(hit.body, b"2024-01-01,1\n");
        assert_eq!(hit.content_hash, sha256_hex(b"2024-01-01,1\n"));

        let miss = store.fetch("bucket", "missing.csv").await.unwrap_err();
        assert!(matches!(miss, FetchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn gcs_store_downloads_media_with_bearer_token() {
        let base = storage_stub().await;
        let objects = store(&base, TokenSource::Static("abc".into()));

        let fetched = objects.fetch("webhook", "exports/daily_hours-1.csv").await.unwrap();
        assert_eq!(fetched.body, b"2024-01-02,10\n");
        assert_eq!(fetched.object, "exports/daily_hours-1.csv");
        assert_eq!(fetched.content_hash, sha256_hex(b"2024-01-02,10\n"));
    }

    #[tokio::test]
    async fn gcs_store_asks_the_metadata_server_for_tokens() {
        let base = storage_stub().await;
        let objects = store(&base, TokenSource::Metadata { url: format!("{base}/token") });

        let fetched = objects.fetch("webhook", "exports/daily_hours-1.csv").await.unwrap();
        assert_eq!(fetched.body, b"2024-01-02,10\n");
    }

    #[tokio::test]
    async fn gcs_store_maps_http_failures() {
        let base = storage_stub().await;
        let objects = store(&base, TokenSource::Static("abc".into()));

        let missing = objects.fetch("webhook", "nope.csv").await.unwrap_err();
        match &missing {
            FetchError::NotFound { bucket, object } => {
                assert_eq!(bucket, "webhook");
                assert_eq!(object, "nope.csv");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        let locked = objects.fetch("webhook", "locked.csv").await.unwrap_err();
        assert!(matches!(locked, FetchError::HttpStatus { status: 403, .. }), "{locked:?}");

        let unauthorized = store(&base, TokenSource::Anonymous)
            .fetch("webhook", "exports/daily_hours-1.csv")
            .await
            .unwrap_err();
        assert!(matches!(unauthorized, FetchError::HttpStatus { status: 401, .. }));
    }

    #[tokio::test]
    async fn metadata_failures_surface_as_token_errors() {
        let base = storage_stub().await;
        let objects = store(&base, TokenSource::Metadata { url: format!("{base}/broken-token") });

        let err = objects.fetch("webhook", "exports/daily_hours-1.csv").await.unwrap_err();
        assert!(
            matches!(err, FetchError::Token(TokenError::HttpStatus { status: 503 })),
            "{err:?}"
        );
    }
}
