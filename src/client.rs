//! Typed client for the TorBox HTTP API.
//!
//! Wraps the three operations the controller needs (listing items,
//! controlling one item, deleting one item) behind bearer auth, a fixed
//! request timeout, and the error classification the rest of the system
//! depends on:
//!
//! - 401, or 403 carrying a known auth error code, raises
//!   [`ApiError::Auth`]; the poller then marks the user inactive.
//! - Network failures and 5xx responses are transient: list calls substitute
//!   an empty result, control calls return
//!   [`ControlOutcome::ConnectionError`] so the dispatcher can count the
//!   failure without aborting the batch.
//! - Anything else is surfaced as [`ApiError::Protocol`].

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{Item, ItemId};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

/// Error codes the API uses for credential problems on 403 responses
const AUTH_ERROR_CODES: [&str; 3] = ["AUTH_ERROR", "NO_AUTH", "BAD_TOKEN"];

/// Response envelope used by every API endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

/// Control operations the dispatcher issues against items
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlOperation {
    /// Remove the item from the service
    Delete,
    /// Stop seeding a finished item
    StopSeeding,
    /// Force a queued item to start
    ForceStart,
}

impl ControlOperation {
    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOperation::Delete => "delete",
            ControlOperation::StopSeeding => "stop_seeding",
            ControlOperation::ForceStart => "force_start",
        }
    }
}

/// Result of a control call that did reach a conclusion.
///
/// Transient connection failures are data, not errors, so the dispatcher can
/// record them per item and keep going.
#[derive(Debug)]
pub enum ControlOutcome {
    /// The API accepted the operation
    Done,
    /// The API was unreachable or answered 5xx; retryable on a later cycle
    ConnectionError(String),
}

/// Client for one user's view of the TorBox API
pub struct TorboxClient {
    http: reqwest::Client,
    base: Url,
    version: String,
}

impl TorboxClient {
    /// Build a client for the given API endpoint and bearer token
    pub fn new(config: &ApiConfig, api_key: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| Error::Config {
                message: format!("API key is not a valid header value: {}", e),
                key: Some("api_key".to_string()),
            })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(Error::Network)?;

        // A trailing slash keeps Url::join from swallowing the last segment
        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/'))).map_err(
            |e| Error::Config {
                message: format!("invalid API base URL: {}", e),
                key: Some("api.base_url".to_string()),
            },
        )?;

        Ok(Self {
            http,
            base,
            version: config.version.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("{}/api/{}", self.version, path))
            .map_err(|e| Error::Config {
                message: format!("invalid API endpoint '{}': {}", path, e),
                key: Some("api.base_url".to_string()),
            })
    }

    /// Fetch the user's full item inventory: the live list plus the queued
    /// list, concatenated. Queued items are flagged so the classifier maps
    /// them to `queued`.
    ///
    /// Transient failures on either endpoint degrade to an empty list for
    /// that endpoint; auth failures propagate.
    pub async fn get_items(&self, bypass_cache: bool) -> Result<Vec<Item>> {
        let (mylist, mut queued) = futures::future::try_join(
            self.fetch_list(
                "torrents/mylist",
                &[("bypass_cache", if bypass_cache { "true" } else { "false" })],
            ),
            self.fetch_list("queued/getqueued", &[("type", "torrent")]),
        )
        .await?;

        for item in &mut queued {
            item.queued = true;
        }

        let mut items = mylist;
        items.extend(queued);
        Ok(items)
    }

    /// Issue a control operation against a live item
    pub async fn control_item(
        &self,
        id: &ItemId,
        operation: ControlOperation,
    ) -> Result<ControlOutcome> {
        let body = json!({
            "torrent_id": wire_id(id),
            "operation": operation.as_str(),
        });
        self.control("torrents/controltorrent", body).await
    }

    /// Issue a control operation against a queued item
    pub async fn control_queued(
        &self,
        id: &ItemId,
        operation: ControlOperation,
    ) -> Result<ControlOutcome> {
        let body = json!({
            "queued_id": wire_id(id),
            "operation": operation.as_str(),
            "type": "torrent",
        });
        self.control("queued/controlqueued", body).await
    }

    /// Delete an item, routed to the right endpoint for its origin
    pub async fn delete_item(&self, id: &ItemId, queued: bool) -> Result<ControlOutcome> {
        if queued {
            self.control_queued(id, ControlOperation::Delete).await
        } else {
            self.control_item(id, ControlOperation::Delete).await
        }
    }

    async fn fetch_list(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<Item>> {
        let url = self.endpoint(path)?;
        let response = match self.http.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                // DNS, refused, reset, timeout: all transient for a list call
                tracing::warn!(path, error = %e, "list request failed, substituting empty list");
                return Ok(Vec::new());
            }
        };

        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(path, status = %status, "server error on list request, substituting empty list");
            return Ok(Vec::new());
        }

        let body: Envelope<Vec<Item>> = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                if status.is_success() {
                    return Err(Error::Api(ApiError::Protocol(format!(
                        "undecodable {} response: {}",
                        path, e
                    ))));
                }
                Envelope {
                    success: None,
                    error: None,
                    detail: None,
                    data: None,
                }
            }
        };

        if let Some(auth) = auth_failure(status, &body.error, &body.detail) {
            return Err(Error::Api(auth));
        }

        if !status.is_success() || body.success == Some(false) {
            return Err(Error::Api(ApiError::Protocol(format!(
                "{} returned {}: {}",
                path,
                status,
                body.error
                    .or(body.detail)
                    .unwrap_or_else(|| "no error detail".to_string())
            ))));
        }

        Ok(body.data.unwrap_or_default())
    }

    async fn control(&self, path: &str, payload: Value) -> Result<ControlOutcome> {
        let url = self.endpoint(path)?;
        let response = match self.http.post(url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(ControlOutcome::ConnectionError(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Ok(ControlOutcome::ConnectionError(format!(
                "{} returned {}",
                path, status
            )));
        }

        let body: Envelope<Value> = response.json().await.unwrap_or(Envelope {
            success: None,
            error: None,
            detail: None,
            data: None,
        });

        if let Some(auth) = auth_failure(status, &body.error, &body.detail) {
            return Err(Error::Api(auth));
        }

        if !status.is_success() || body.success == Some(false) {
            return Err(Error::Api(ApiError::Protocol(format!(
                "{} returned {}: {}",
                path,
                status,
                body.error
                    .or(body.detail)
                    .unwrap_or_else(|| "no error detail".to_string())
            ))));
        }

        Ok(ControlOutcome::Done)
    }
}

/// Detect a credential rejection: 401 always, 403 only with a known code
fn auth_failure(
    status: reqwest::StatusCode,
    error: &Option<String>,
    detail: &Option<String>,
) -> Option<ApiError> {
    let code = error
        .as_deref()
        .filter(|code| AUTH_ERROR_CODES.contains(code));

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Some(ApiError::Auth {
            code: code.map(str::to_string),
            detail: detail
                .clone()
                .or_else(|| error.clone())
                .unwrap_or_else(|| "HTTP 401".to_string()),
        });
    }

    if status == reqwest::StatusCode::FORBIDDEN {
        if let Some(code) = code {
            return Some(ApiError::Auth {
                code: Some(code.to_string()),
                detail: detail.clone().unwrap_or_else(|| "HTTP 403".to_string()),
            });
        }
    }

    None
}

/// Ids are stringified numerics; send them back as numbers when they parse,
/// matching what the API itself emits
fn wire_id(id: &ItemId) -> Value {
    id.as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id.as_str()))
}
