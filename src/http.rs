//! Remote operations over HTTPS+JSON, authenticated with a static
//! `X-API-Key` header (§4.3). No token refresh dance: the key is treated as
//! an opaque string supplied by the caller (§9 Design Notes).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Byte counters for outbound/inbound traffic, surfaced for diagnostics the
/// way the teacher's telemetry counters track blob transfer volume.
#[derive(Debug, Default)]
pub struct HttpStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    requests: AtomicU64,
}

impl HttpStats {
    pub fn on_send(&self, bytes: i64) {
        if bytes > 0 {
            self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_receive(&self, bytes: i64) {
        if bytes > 0 {
            self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// A non-2xx response decoded from the server's `{message|error, details?}`
/// failure shape (§4.3). Carries the status code so the error classifier
/// (§4.4) can map it without re-parsing anything.
#[derive(Debug)]
pub struct ApiError {
    pub status_code: u16,
    pub message: String,
    pub details: Option<Value>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status_code)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// `details.suggestions` on a 409 name-conflict response (S5).
    pub fn conflict_suggestions(&self) -> Vec<String> {
        self.details
            .as_ref()
            .and_then(|d| d.get("suggestions"))
            .and_then(|s| s.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: HttpClient,
    api_key: String,
    stats: Arc<HttpStats>,
}

impl ApiClient {
    pub fn new(base: &str, api_key: &str, stats: Arc<HttpStats>) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(10 * 60))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("sitesync-rs/0.1")
            .no_proxy()
            .build()
            .context("build http client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
            api_key: api_key.to_string(),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<HttpStats> {
        self.stats.clone()
    }

    fn with_key(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("X-API-Key", &self.api_key)
    }

    pub async fn list(&self) -> Result<ListResponse> {
        let url = format!("{}/sync/files", self.base);
        let resp = self.with_key(self.http.get(url)).send().await?;
        map_error(resp, &self.stats).await
    }

    /// `site_name` may contain forward slashes; they must reach the server
    /// unescaped, so we interpolate rather than letting `Url` encode them.
    pub async fn download(&self, site_name: &str) -> Result<DownloadResponse> {
        let url = format!("{}/sync/download/{}", self.base, site_name);
        let resp = self.with_key(self.http.get(url)).send().await?;
        map_error(resp, &self.stats).await
    }

    pub async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let url = format!("{}/sync/upload", self.base);
        let body = serde_json::to_vec(request).context("serialize upload request")?;
        self.stats.on_send(body.len() as i64);
        let resp = self
            .with_key(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if resp.status() == StatusCode::CONFLICT {
            let err = decode_api_error(resp).await;
            return Ok(UploadOutcome::Conflict {
                suggestions: err.conflict_suggestions(),
                message: err.message,
            });
        }

        map_status(resp, &self.stats).await?;
        Ok(UploadOutcome::Uploaded)
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let url = format!("{}/sync/status", self.base);
        let resp = self.with_key(self.http.get(url)).send().await?;
        map_error(resp, &self.stats).await
    }
}

pub enum UploadOutcome {
    Uploaded,
    Conflict {
        suggestions: Vec<String>,
        message: String,
    },
}

async fn decode_api_error(resp: Response) -> ApiError {
    let status_code = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(body) => {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("request failed")
                .to_string();
            let details = body.get("details").cloned();
            ApiError {
                status_code,
                message,
                details,
            }
        }
        Err(_) => ApiError {
            status_code,
            message: if text.is_empty() {
                "request failed".to_string()
            } else {
                text
            },
            details: None,
        },
    }
}

async fn map_error<T: for<'de> Deserialize<'de>>(resp: Response, stats: &HttpStats) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        let bytes = resp.bytes().await.context("read response body")?;
        stats.on_receive(bytes.len() as i64);
        let val = serde_json::from_slice(&bytes).context("parse response json")?;
        return Ok(val);
    }
    Err(decode_api_error(resp).await.into())
}

async fn map_status(resp: Response, stats: &HttpStats) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        let bytes = resp.bytes().await.unwrap_or_default();
        stats.on_receive(bytes.len() as i64);
        return Ok(());
    }
    Err(decode_api_error(resp).await.into())
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    pub files: Vec<RemoteFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFileEntry {
    pub filename: String,
    pub path: String,
    #[serde(rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadResponse {
    pub content: String,
    #[serde(rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
pub struct UploadRequest<'a> {
    pub filename: &'a str,
    pub content: &'a str,
    #[serde(rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_fake_server(app: axum::Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn list_sends_api_key_and_parses_files() {
        let app = axum::Router::new().route(
            "/sync/files",
            axum::routing::get(|headers: axum::http::HeaderMap| async move {
                let key = headers
                    .get("X-API-Key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if key != "secret-key" {
                    return axum::http::StatusCode::UNAUTHORIZED.into_response();
                }
                axum::Json(serde_json::json!({
                    "files": [{
                        "filename": "home",
                        "path": "home.html",
                        "modifiedAt": "2025-01-01T00:00:00Z",
                        "checksum": "aaaa"
                    }]
                }))
                .into_response()
            }),
        );
        use axum::response::IntoResponse;
        let base = spawn_fake_server(app).await;

        let client = ApiClient::new(&base, "secret-key", Arc::new(HttpStats::default())).unwrap();
        let resp = client.list().await.unwrap();
        assert_eq!(resp.files.len(), 1);
        assert_eq!(resp.files[0].path, "home.html");
    }

    #[tokio::test]
    async fn download_preserves_slashes_in_site_name() {
        let app = axum::Router::new().route(
            "/sync/download/*site",
            axum::routing::get(
                |axum::extract::Path(site): axum::extract::Path<String>| async move {
                axum::Json(serde_json::json!({
                    "content": format!("content for {site}"),
                    "modifiedAt": "2025-01-01T00:00:00Z",
                    "checksum": "bbbb"
                }))
            }),
        );
        let base = spawn_fake_server(app).await;
        let client = ApiClient::new(&base, "k", Arc::new(HttpStats::default())).unwrap();
        let resp = client.download("foo/bar/site").await.unwrap();
        assert_eq!(resp.content, "content for foo/bar/site");
    }

    #[tokio::test]
    async fn upload_conflict_surfaces_suggestions() {
        let app = axum::Router::new().route(
            "/sync/upload",
            axum::routing::post(|| async {
                (
                    axum::http::StatusCode::CONFLICT,
                    axum::Json(serde_json::json!({
                        "message": "name taken",
                        "details": {"suggestions": ["site-2", "site-3"]}
                    })),
                )
            }),
        );
        let base = spawn_fake_server(app).await;
        let client = ApiClient::new(&base, "k", Arc::new(HttpStats::default())).unwrap();
        let req = UploadRequest {
            filename: "site",
            content: "<html></html>",
            modified_at: Utc::now(),
        };
        let outcome = client.upload(&req).await.unwrap();
        match outcome {
            UploadOutcome::Conflict { suggestions, .. } => {
                assert_eq!(suggestions, vec!["site-2".to_string(), "site-3".to_string()]);
            }
            UploadOutcome::Uploaded => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn upload_success_does_not_conflict() {
        let app = axum::Router::new().route(
            "/sync/upload",
            axum::routing::post(|| async { axum::http::StatusCode::OK }),
        );
        let base = spawn_fake_server(app).await;
        let client = ApiClient::new(&base, "k", Arc::new(HttpStats::default())).unwrap();
        let req = UploadRequest {
            filename: "site",
            content: "<html></html>",
            modified_at: Utc::now(),
        };
        let outcome = client.upload(&req).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded));
    }
}
