use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sourcebot_core::{
    ConfigError, CoreError, Post, PostSource, PostType, TumblrApiError, TumblrConfig,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

const TAGGED_ENDPOINT: &str = "/tagged";

#[derive(Debug, Clone, Deserialize)]
pub struct TumblrEnvelope<T> {
    pub meta: TumblrMeta,
    pub response: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TumblrMeta {
    pub status: u16,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TumblrPostData {
    pub id: u64,
    pub blog_name: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub post_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub post_url: Option<String>,
    pub reblog_key: Option<String>,
}

impl TumblrPostData {
    /// Converts the wire representation, or `None` for a type we do not know.
    pub fn into_post(self) -> Option<Post> {
        let kind = match PostType::from_str(&self.post_type) {
            Ok(kind) => kind,
            Err(_) => {
                debug!("Dropping post {} with unknown type {}", self.id, self.post_type);
                return None;
            }
        };

        Some(Post {
            id: self.id,
            blog_name: self.blog_name,
            timestamp: self.timestamp,
            kind,
            tags: self.tags,
            post_url: self.post_url,
            reblog_key: self.reblog_key,
        })
    }
}

/// Decodes a `/tagged` response body.
pub fn parse_tagged_body(body: &str) -> Result<Vec<Post>, CoreError> {
    let envelope: TumblrEnvelope<Vec<TumblrPostData>> =
        serde_json::from_str(body).map_err(|e| {
            error!("Failed to parse tagged posts: {}", e);
            TumblrApiError::InvalidResponse {
                details: format!("Failed to parse tagged posts: {}", e),
            }
        })?;

    if envelope.meta.status != 200 {
        return Err(TumblrApiError::InvalidResponse {
            details: format!("{} {}", envelope.meta.status, envelope.meta.msg),
        }
        .into());
    }

    Ok(envelope
        .response
        .into_iter()
        .filter_map(TumblrPostData::into_post)
        .collect())
}

/// Maps a non-success HTTP status to the matching API error.
pub fn status_error(status: StatusCode, retry_after: Option<&str>, endpoint: &str) -> TumblrApiError {
    match status.as_u16() {
        401 => TumblrApiError::InvalidApiKey,
        403 => TumblrApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        404 => TumblrApiError::EndpointUnavailable {
            endpoint: endpoint.to_string(),
        },
        429 => TumblrApiError::RateLimitExceeded {
            retry_after: retry_after
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(60),
        },
        code if status.is_server_error() => TumblrApiError::ServerError { status_code: code },
        code => TumblrApiError::InvalidResponse {
            details: format!("Unexpected status {} for {}", code, endpoint),
        },
    }
}

#[derive(Debug)]
pub struct TumblrApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    api_base: String,
    api_key: String,
}

impl TumblrApiClient {
    pub fn new(config: &TumblrConfig) -> Result<Self, CoreError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                field: "tumblr.api_key".to_string(),
            })?;

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::from(config))),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn tagged_url(&self, tag: &str, before: i64) -> Result<Url, CoreError> {
        let before = before.to_string();
        Url::parse_with_params(
            &format!("{}{}", self.api_base, TAGGED_ENDPOINT),
            &[
                ("tag", tag),
                ("before", before.as_str()),
                ("api_key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| {
            CoreError::Config(ConfigError::InvalidValue {
                field: "tumblr.api_base".to_string(),
                value: format!("{} ({})", self.api_base, e),
            })
        })
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }
}

#[async_trait]
impl PostSource for TumblrApiClient {
    async fn tagged(&self, tag: &str, before: i64) -> Result<Vec<Post>, CoreError> {
        let url = self.tagged_url(tag, before)?;
        let start_time = Instant::now();

        let queue_wait = self.rate_limiter.acquire_permit().await;
        debug!("Acquired rate limit permit after {:?}", queue_wait);

        let response = match self.http_client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} (tag {}): {}", TAGGED_ENDPOINT, tag, e);
                if e.is_timeout() {
                    return Err(TumblrApiError::RequestTimeout.into());
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let api_error = status_error(status, retry_after.as_deref(), TAGGED_ENDPOINT);
            warn!("Request failed with status {} for tag {}", status, tag);
            return Err(api_error.into());
        }

        let body = response.text().await?;
        let posts = parse_tagged_body(&body)?;

        debug!(
            "Retrieved {} posts tagged {} before {} in {:?}",
            posts.len(),
            tag,
            before,
            start_time.elapsed()
        );
        Ok(posts)
    }
}
