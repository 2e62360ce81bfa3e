//! Rate-limited, retrying HTTP access shared by the registry clients

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER, WWW_AUTHENTICATE};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::tags::error::RegistryError;
use crate::tags::rate_limit::{RateLimiter, RetryPolicy};

const USER_AGENT: &str = concat!("tag-history/", env!("CARGO_PKG_VERSION"));

/// HTTP client bound to one registry's rate limiter and retry policy
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(timeout: Duration, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            limiter,
            retry,
        }
    }

    /// GETs `url` and decodes the JSON body, returning it with the response headers.
    ///
    /// Every attempt waits for the registry's rate limiter first. Transient
    /// failures are retried according to the retry policy.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<(T, HeaderMap), RegistryError> {
        let this = self;
        self.retry
            .run(url, || async move {
                this.limiter.acquire().await;
                debug!("GET {}", url);

                let response = this
                    .client
                    .get(url)
                    .headers(headers.clone())
                    .send()
                    .await?;
                let response = check_status(response)?;
                let response_headers = response.headers().clone();

                let bytes = response.bytes().await?;
                let body = serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    warn!("Failed to parse response from {}: {}", url, e);
                    RegistryError::InvalidResponse(e.to_string())
                })?;

                Ok((body, response_headers))
            })
            .await
    }
}

/// Maps a non-success HTTP status to the registry error taxonomy
fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let headers = response.headers();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::AuthRequired {
            url,
            challenge: headers
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }),
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(url)),
        StatusCode::TOO_MANY_REQUESTS => Err(RegistryError::RateLimited {
            retry_after_secs: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now())),
        }),
        s if s.is_server_error() => Err(RegistryError::Server {
            status: s.as_u16(),
        }),
        s => {
            warn!("Registry returned status {}: {}", s, url);
            Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                s
            )))
        }
    }
}

/// Parses a `Retry-After` value given either as delay-seconds or as an HTTP date
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).num_seconds().max(0) as u64)
}
