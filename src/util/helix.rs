use core::fmt;
use std::sync::Arc;

use http::header::{AUTHORIZATION, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::constants::{HELIX_CHUNK_SIZE, HELIX_CLIENT_ID_HEADER, HELIX_MAX_ATTEMPTS};
use crate::util::ratelimit::{RateLimit, RateLimitHandler};

/// Twitch Helix API client.
///
/// Every response is reported to the configured [`RateLimitHandler`] before it is handled, and
/// requests rejected with `429 Too Many Requests` are retried a bounded number of times.
#[derive(Debug, Clone)]
pub struct Helix {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    rate_limiter: Arc<dyn RateLimitHandler>,
}

impl Helix {
    pub fn new(
        base_url: &str,
        client_id: &str,
        app_token: Option<&str>,
        rate_limiter: Arc<dyn RateLimitHandler>,
    ) -> HelixResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(HELIX_CLIENT_ID_HEADER, HeaderValue::from_str(client_id)?);

        if let Some(token) = app_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))?,
            );
        } else {
            tracing::warn!("no app token configured, helix requests will be unauthenticated");
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            rate_limiter,
        })
    }

    /// Fetch a list of users' Twitch information via their logins.
    #[instrument(skip(self, logins), fields(login_count = logins.len()))]
    pub async fn fetch_users_by_login(&self, logins: &[String]) -> HelixResult<Vec<HelixUser>> {
        let mut retrieved = Vec::new();

        for param in build_query_params(HelixParamType::Login, logins) {
            let uri = format!("{}{}", self.uri(HelixUri::Users), param);
            let users = self.fetch::<HelixDataResponse<HelixUser>>(uri).await?;
            retrieved.extend(users.data);
        }

        tracing::debug!(fetched_count = retrieved.len(), "user fetch by login complete");
        Ok(retrieved)
    }

    fn uri(&self, urn: HelixUri) -> String {
        format!("{}/{}", self.base_url, urn.as_str())
    }

    /// Sends a GET request, handing each response's rate-limit state to the handler and
    /// retrying while the API reports `429 Too Many Requests`
    #[instrument(skip(self))]
    async fn send(&self, uri: &str) -> HelixResult<reqwest::Response> {
        let mut attempt = 1;

        loop {
            let res = self
                .client
                .get(uri)
                .headers(self.headers.clone())
                .send()
                .await?;

            if let Some(limit) = RateLimit::from_headers(res.headers()) {
                tracing::debug!(
                    ratelimit_remaining = limit.remaining,
                    ratelimit_reset = limit.reset,
                    "rate-limit bucket"
                );
                self.rate_limiter.on_response(&limit).await;
            }

            if res.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= HELIX_MAX_ATTEMPTS {
                return Ok(res);
            }

            tracing::warn!(attempt, "rate limited by helix, retrying");
            attempt += 1;
        }
    }

    /// Performs a GET request to a given URI and parses the response according to the specified
    /// `T` output type
    #[instrument(skip(self, uri))]
    async fn fetch<T>(&self, uri: String) -> HelixResult<T>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        let res = self.send(&uri).await?;

        if res.status() != StatusCode::OK {
            let status_code = res.status();
            tracing::error!(code = %status_code, "non-200/OK response");

            // helix usually explains itself in a JSON body; keep it if it's there
            return Err(match res.json::<Value>().await {
                Ok(body) => HelixErr::FetchErrWithBody { body },
                Err(_) => HelixErr::FetchErr(status_code.to_string()),
            });
        }

        Ok(res.json::<T>().await?)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HelixUri {
    Users,
}

impl HelixUri {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelixUri::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HelixParamType {
    Login,
}

impl HelixParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelixParamType::Login => "login=",
        }
    }
}

/// Builds one query string per chunk of at most 100 items, which is as many as helix accepts in
/// a single request
pub fn build_query_params(param_type: HelixParamType, items: &[String]) -> Vec<String> {
    items
        .chunks(HELIX_CHUNK_SIZE)
        .map(|chunk| {
            let params = chunk
                .iter()
                .map(|item| format!("{}{}", param_type.as_str(), item.to_lowercase()))
                .collect::<Vec<_>>()
                .join("&");

            format!("?{params}")
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixDataResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,

    #[serde(rename(deserialize = "display_name"))]
    pub name: String,
    #[serde(rename(deserialize = "profile_image_url"))]
    pub image: String,
}

pub type HelixResult<T> = core::result::Result<T, HelixErr>;

#[derive(Debug, Error)]
pub enum HelixErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),

    #[error("error during helix fetch: {0}")]
    FetchErr(String),

    #[error("error (with detail) during helix fetch: {:#?}", body)]
    FetchErrWithBody { body: Value },
}
