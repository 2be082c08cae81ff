// src/psa_client.rs

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::fiscal::FiscalWindow;

pub const TIMESHEET_EVENT_ENDPOINT: &str = "/TimesheetEvent";
pub const TIMESHEET_DAY_ENDPOINT: &str = "/Timesheet";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Tokens are refreshed this long before the server says they expire.
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;
/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: u64 = 30 * 24 * 60 * 60;
/// Keys checked, in order, when a list response comes wrapped in an object.
const LIST_WRAPPER_KEYS: &[&str] = &["data", "items", "results", "records", "value"];

// --- Source Error ---
#[derive(Error, Debug)]
pub enum PsaError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Token request failed: Status={status:?}, Message='{message}'")]
    TokenRequestFailed {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Rate limit exceeded (Status 429)")]
    RateLimitExceeded,

    #[error("PSA API error: Status={status}, Message='{message}'")]
    ApiError { status: StatusCode, message: String },

    #[error("Unexpected response shape for '{0}': expected an array of records")]
    UnexpectedShape(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// --- Source Surface ---

/// The two reads a sync needs from the time-tracking system, for an
/// inclusive date window. Records come back raw; see `records` for decoding.
#[async_trait]
pub trait TimeSource: Send + Sync {
    async fn fetch_timesheet_events(&self, window: &FiscalWindow) -> Result<Vec<Value>, PsaError>;
    async fn fetch_timesheet_days(&self, window: &FiscalWindow) -> Result<Vec<Value>, PsaError>;
}

// --- Client Configuration ---

#[derive(Clone, Debug)]
pub struct PsaConfig {
    pub base_url: String,
    /// OAuth2 client-credentials endpoint. Unused when `api_key` is set.
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    /// Static bearer token.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PsaConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_url: None,
            client_id: None,
            client_secret: None,
            scope: None,
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, buffer_secs: i64) -> bool {
        Utc::now() >= self.expires_at - ChronoDuration::seconds(buffer_secs)
    }
}

#[derive(Debug, Clone)]
enum Auth {
    None,
    ApiKey(String),
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: Option<String>,
    },
}

// --- PSA API Client ---

#[derive(Clone)]
pub struct PsaClient {
    base_url: Arc<String>,
    auth: Arc<Auth>,
    http_client: Client,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl PsaClient {
    pub fn new(config: PsaConfig) -> Result<Self, PsaError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(PsaError::ConfigError("PSA base URL is not set".to_string()));
        }
        Url::parse(&base_url)?;

        let auth = match (config.api_key, config.token_url) {
            (Some(key), _) if !key.trim().is_empty() => Auth::ApiKey(key.trim().to_string()),
            (_, Some(token_url)) if !token_url.trim().is_empty() => {
                let (Some(client_id), Some(client_secret)) = (config.client_id, config.client_secret)
                else {
                    return Err(PsaError::ConfigError(
                        "PSA token URL is set but client id or secret is missing".to_string(),
                    ));
                };
                Url::parse(token_url.trim())?;
                Auth::ClientCredentials {
                    token_url: token_url.trim().to_string(),
                    client_id,
                    client_secret,
                    scope: config.scope.filter(|s| !s.trim().is_empty()),
                }
            }
            _ => {
                warn!("No PSA credentials configured; requests will be sent unauthenticated");
                Auth::None
            }
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: Arc::new(base_url),
            auth: Arc::new(auth),
            http_client,
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn request_token(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse, PsaError> {
        let credentials = format!("{}:{}", client_id, client_secret);
        let auth_header_value = format!("Basic {}", BASE64_STANDARD.encode(credentials));

        let mut params = vec![("grant_type", "client_credentials")];
        if let Some(scope) = scope {
            params.push(("scope", scope));
        }

        let response = self
            .http_client
            .post(token_url)
            .header(AUTHORIZATION, auth_header_value)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<TokenResponse>().await?)
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            Err(PsaError::TokenRequestFailed {
                status: Some(status),
                message: extract_error_message(&error_body),
            })
        }
    }

    /// Returns the bearer token to send, fetching a fresh one when the cached
    /// token is missing or about to expire.
    async fn access_token(&self) -> Result<Option<String>, PsaError> {
        match &*self.auth {
            Auth::None => Ok(None),
            Auth::ApiKey(key) => Ok(Some(key.clone())),
            Auth::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                // Lock held across the token request
                let mut token_guard = self.token.lock().await;
                if let Some(cached) = token_guard.as_ref() {
                    if !cached.is_expired(TOKEN_EXPIRY_BUFFER_SECS) {
                        return Ok(Some(cached.access_token.clone()));
                    }
                }

                debug!("Requesting new PSA access token from {}", token_url);
                let response = self
                    .request_token(token_url, client_id, client_secret, scope.as_deref())
                    .await
                    .map_err(|e| {
                        error!("PSA token request failed: {}", e);
                        e
                    })?;

                let lifetime = response
                    .expires_in
                    .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
                    .min(MAX_TOKEN_LIFETIME_SECS);
                let expires_at = Utc::now() + ChronoDuration::seconds(lifetime as i64);
                let access_token = response.access_token;
                *token_guard = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });
                info!("Obtained PSA access token, valid for {}s", lifetime);
                Ok(Some(access_token))
            }
        }
    }

    pub async fn build_request(
        &self,
        method: Method,
        endpoint: &str,
    ) -> Result<RequestBuilder, PsaError> {
        let url = if endpoint.starts_with("http") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        };
        Url::parse(&url)?;

        let mut request = self
            .http_client
            .request(method, &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = self.access_token().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request)
    }

    pub async fn send_json(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<Value, PsaError> {
        let request = request_builder.build()?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let response = self.http_client.execute(request).await.map_err(|e| {
            error!(
                "HTTP execution failed for '{}' (URL: {}): {}",
                context_msg, request_url, e
            );
            PsaError::Request(e)
        })?;

        let status = response.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = response.bytes().await?;
            return serde_json::from_slice::<Value>(&bytes).map_err(|e| {
                error!(
                    "JSON deserialization failed for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                PsaError::Json(e)
            });
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
        error!(
            "API Error Response: Status={}, Body='{}' for URL: {}",
            status, error_body, request_url
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limit exceeded for '{}' (URL: {})", context_msg, request_url);
            return Err(PsaError::RateLimitExceeded);
        }
        Err(PsaError::ApiError {
            status,
            message: extract_error_message(&error_body),
        })
    }

    async fn fetch_list(
        &self,
        endpoint: &str,
        window: &FiscalWindow,
        context_msg: &str,
    ) -> Result<Vec<Value>, PsaError> {
        let request = self
            .build_request(Method::GET, endpoint)
            .await?
            .query(&[
                ("start_date", window.start_param()),
                ("end_date", window.end_param()),
            ]);
        let body = self.send_json(request, context_msg).await?;
        let records =
            into_records(body).ok_or_else(|| PsaError::UnexpectedShape(context_msg.to_string()))?;
        info!("Fetched {} records for '{}' ({})", records.len(), context_msg, window);
        Ok(records)
    }
}

#[async_trait]
impl TimeSource for PsaClient {
    async fn fetch_timesheet_events(&self, window: &FiscalWindow) -> Result<Vec<Value>, PsaError> {
        self.fetch_list(TIMESHEET_EVENT_ENDPOINT, window, "timesheet events")
            .await
    }

    async fn fetch_timesheet_days(&self, window: &FiscalWindow) -> Result<Vec<Value>, PsaError> {
        self.fetch_list(TIMESHEET_DAY_ENDPOINT, window, "timesheet days")
            .await
    }
}

/// Accepts a bare array, or an object carrying the array under a well-known
/// key or as its only array-valued field.
fn into_records(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut object) => {
            for key in LIST_WRAPPER_KEYS {
                if matches!(object.get(*key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = object.remove(*key) {
                        return Some(items);
                    }
                }
            }
            let mut arrays = object.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

fn extract_error_message(body: &str) -> String {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    ["message", "error_description", "error", "detail"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
