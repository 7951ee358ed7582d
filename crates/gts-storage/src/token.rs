//! OAuth access tokens for the Google APIs.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata server answered {status}")]
    HttpStatus { status: u16 },
    #[error("access token is not a valid header value")]
    InvalidHeader,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    token_type: String,
}

/// Where bearer tokens come from. Tokens are requested per call and never cached.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Fixed token, e.g. `gcloud auth print-access-token` for local runs.
    Static(String),
    /// Service account attached to the Cloud Run / GCE instance.
    Metadata { url: String },
    /// No `Authorization` header at all (emulators, tests).
    Anonymous,
}

impl TokenSource {
    pub fn metadata() -> Self {
        TokenSource::Metadata {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        match std::env::var("GTS_ACCESS_TOKEN") {
            Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
            _ => TokenSource::metadata(),
        }
    }

    /// `Authorization` header value for the next request, if any.
    pub async fn authorization(
        &self,
        client: &reqwest::Client,
    ) -> Result<Option<HeaderValue>, TokenError> {
        let value = match self {
            TokenSource::Anonymous => return Ok(None),
            TokenSource::Static(token) => format!("Bearer {token}"),
            TokenSource::Metadata { url } => {
                let resp = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(TokenError::HttpStatus {
                        status: resp.status().as_u16(),
                    });
                }
                let token: MetadataToken = resp.json().await?;
                format!("{} {}", token.token_type, token.access_token)
            }
        };
        HeaderValue::from_str(&value)
            .map(Some)
            .map_err(|_| TokenError::InvalidHeader)
    }
}

/// Attach the token (if any) to a request.
pub async fn authorize(
    request: reqwest::RequestBuilder,
    tokens: &TokenSource,
    client: &reqwest::Client,
) -> Result<reqwest::RequestBuilder, TokenError> {
    Ok(match tokens.authorization(client).await? {
        Some(value) => request.header(AUTHORIZATION, value),
        None => request,
    })
}
