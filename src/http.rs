//! HTTP transport with authentication, rate limiting, and retry discipline.
//!
//! All provider traffic flows through [`HttpTransport::send`]: every attempt
//! passes the shared admission bucket, carries the configured auth header, and
//! transient failures (429, 5xx, timeouts, connection resets) are retried with
//! capped exponential backoff. `Retry-After` on a 429 is honored verbatim.
//! Non-retryable client errors are mapped to the typed error taxonomy and
//! surfaced immediately.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Response, StatusCode};
pub use reqwest::Method;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

type AdmissionBucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub(crate) const APPS_PATH: &str = "/api/v1/apps";

pub(crate) fn group_path(group_id: &str) -> String {
    format!("/api/v1/groups/{}", urlencoding::encode(group_id))
}

pub(crate) fn user_path(user_id: &str) -> String {
    format!("/api/v1/users/{}", urlencoding::encode(user_id))
}

pub(crate) fn membership_path(group_id: &str, user_id: &str) -> String {
    format!(
        "/api/v1/groups/{}/users/{}",
        urlencoding::encode(group_id),
        urlencoding::encode(user_id)
    )
}

/// Response from a successful provider call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` for empty bodies (e.g. 204).
    pub body: serde_json::Value,
}

impl ApiResponse {
    /// Deserializes the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ConnectorResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse response body: {}", e))
        })
    }
}

/// Authenticated access to the provider API.
///
/// The single seam between the connector's components and the wire; tests
/// substitute a scripted implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> ConnectorResult<ApiResponse>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    client: Client,
    config: ConnectorConfig,
    bucket: Arc<AdmissionBucket>,
}

impl HttpTransport {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let mut headers = reqwest::header::HeaderMap::new();
        let user_agent = format!(
            "riskgate-{}-v{}",
            config.name.to_lowercase().replace(' ', "-"),
            env!("CARGO_PKG_VERSION")
        );
        if let Ok(value) = reqwest::header::HeaderValue::try_from(user_agent.as_str()) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, val);
            }
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConnectorError::Config(e.to_string()))?;

        let quota = Quota::with_period(config.rate_limit.period() / config.rate_limit.max_requests)
            .ok_or_else(|| ConnectorError::Config("invalid rate limit period".into()))?
            .allow_burst(
                NonZeroU32::new(config.rate_limit.burst).unwrap_or(NonZeroU32::MIN),
            );

        Ok(Self {
            client,
            config,
            bucket: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn build_url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", self.config.auth_scheme, self.config.api_token.expose()),
            )
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> ConnectorResult<ApiResponse> {
        let url = self.build_url(path);
        let mut last_error = None;
        let mut delay = Duration::from_millis(100);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(%url, attempt, "Retrying after {:?}", delay);
                sleep(delay).await;
                delay = std::cmp::min(delay * 2 + backoff_jitter(), Duration::from_secs(30));
            }

            // Every attempt passes the shared admission bucket.
            self.bucket.until_ready().await;

            let result = self
                .build_request(&method, &url, query, body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = parse_retry_after(&response);
                        if attempt < self.config.max_retries {
                            warn!(%url, retry_after, "Rate limited, honoring Retry-After");
                            sleep(Duration::from_secs(retry_after)).await;
                            last_error = Some(ConnectorError::RateLimited { retry_after });
                            continue;
                        }
                        return Err(ConnectorError::RateLimited { retry_after });
                    }

                    if status.is_server_error() {
                        let err = ConnectorError::RequestFailed(format!(
                            "Server error: {}",
                            status
                        ));
                        if attempt < self.config.max_retries {
                            warn!(%url, %status, "Server error, retrying");
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err);
                    }

                    if status.is_client_error() {
                        return Err(classify_client_error(status, response).await);
                    }

                    return parse_body(response).await;
                }
                Err(e) => {
                    let err = if e.is_timeout() {
                        ConnectorError::Timeout(e.to_string())
                    } else if e.is_connect() {
                        ConnectorError::ConnectionFailed(e.to_string())
                    } else {
                        ConnectorError::RequestFailed(e.to_string())
                    };
                    if attempt < self.config.max_retries {
                        warn!(%url, error = %err, "Transport error, retrying");
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ConnectorError::RequestFailed("Retry budget exhausted".into())))
    }
}

async fn parse_body(response: Response) -> ConnectorResult<ApiResponse> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| {
            ConnectorError::InvalidResponse(format!(
                "Failed to parse response (status {}): {} - Body: {}",
                status,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })?
    };
    Ok(ApiResponse { status, body })
}

async fn classify_client_error(status: StatusCode, response: Response) -> ConnectorError {
    let detail = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(500)
        .collect::<String>();
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::Auth("Unauthorized".into()),
        StatusCode::FORBIDDEN => ConnectorError::Auth("Forbidden".into()),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(detail),
        StatusCode::CONFLICT => ConnectorError::Conflict(detail),
        _ => ConnectorError::Validation(format!("Client error {}: {}", status, detail)),
    }
}

fn parse_retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60)
}

/// Small deterministic-enough jitter so concurrent retries don't align.
fn backoff_jitter() -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(ConnectorConfig::new(
            "test",
            "https://api.example.com",
            "token",
        ))
        .unwrap()
    }

    #[test]
    fn test_build_url_normalizes_slashes() {
        let t = transport();
        assert_eq!(
            t.build_url("/api/v1/apps"),
            "https://api.example.com/api/v1/apps"
        );
        assert_eq!(
            t.build_url("api/v1/apps"),
            "https://api.example.com/api/v1/apps"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = HttpTransport::new(ConnectorConfig::new("test", "", "token"));
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }

    #[test]
    fn test_paths_encode_identifiers() {
        assert_eq!(membership_path("G 1", "u/2"), "/api/v1/groups/G%201/users/u%2F2");
        assert_eq!(group_path("G1"), "/api/v1/groups/G1");
        assert_eq!(user_path("42"), "/api/v1/users/42");
    }

    #[test]
    fn test_api_response_json() {
        let response = ApiResponse {
            status: 200,
            body: serde_json::json!({"id": "a1"}),
        };
        #[derive(serde::Deserialize)]
        struct Rec {
            id: String,
        }
        let rec: Rec = response.json().unwrap();
        assert_eq!(rec.id, "a1");
    }
}
