//! JSON-over-HTTP provider client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{DelegatedClient, DelegatedError, ProviderSession, ProviderUsage, VerifiedToken};
use crate::config::DelegatedConfig;
use crate::config::validation::MAX_PROVIDER_RETRIES;
use crate::models::auth::{Principal, Tier};
use crate::models::quota::ResourceKind;

/// Base delay before the first retry; doubles each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Provider client with a per-request timeout and bounded retries on
/// transient failures.
pub struct HttpDelegatedClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    id: String,
    email: String,
    tier: String,
    created_at: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    used: u64,
    limit: i64,
    period_start: String,
    period_end: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Parse an RFC 3339 provider timestamp.
pub fn parse_provider_time(value: &str) -> Result<DateTime<Utc>, DelegatedError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DelegatedError::Protocol(format!("bad timestamp {value:?}: {e}")))
}

/// Map a non-success status to an error kind.
fn classify(status: StatusCode, body: &str) -> DelegatedError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DelegatedError::Unauthorized,
        StatusCode::NOT_FOUND => DelegatedError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DelegatedError::Unavailable(message)
        }
        s if s.is_server_error() => DelegatedError::Unavailable(message),
        _ => DelegatedError::Rejected(message),
    }
}

impl HttpDelegatedClient {
    pub fn new(config: &DelegatedConfig) -> Result<Self, DelegatedError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DelegatedError::Protocol(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries.min(MAX_PROVIDER_RETRIES),
        })
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<String, DelegatedError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DelegatedError::Unavailable(format!("timeout calling {path}"))
            } else {
                DelegatedError::Unavailable(format!("request to {path} failed: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DelegatedError::Unavailable(format!("reading {path}: {e}")))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(classify(status, &text))
        }
    }

    /// Send with bounded retries on [`DelegatedError::Unavailable`].
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        idempotency_key: Option<&str>,
    ) -> Result<String, DelegatedError> {
        let mut attempt = 0u32;
        loop {
            match self
                .send_once(&method, path, body.as_ref(), idempotency_key)
                .await
            {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                    warn!(path, attempt, "provider call failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, DelegatedError> {
        let text = self.send(method, path, body, None).await?;
        debug!(path, "provider call succeeded");
        serde_json::from_str(&text)
            .map_err(|e| DelegatedError::Protocol(format!("decoding {path}: {e}")))
    }
}

#[async_trait]
impl DelegatedClient for HttpDelegatedClient {
    async fn register(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError> {
        self.call(
            Method::POST,
            "/v1/auth/register",
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError> {
        self.call(
            Method::POST,
            "/v1/auth/login",
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, DelegatedError> {
        self.call(
            Method::POST,
            "/v1/auth/refresh",
            Some(json!({ "refreshToken": refresh_token })),
        )
        .await
    }

    async fn verify_token(&self, access_token: &str) -> Result<VerifiedToken, DelegatedError> {
        let resp: VerifyResponse = self
            .call(
                Method::POST,
                "/v1/auth/verify",
                Some(json!({ "token": access_token })),
            )
            .await?;
        let tier = resp
            .tier
            .parse::<Tier>()
            .map_err(DelegatedError::Protocol)?;
        Ok(VerifiedToken {
            principal: Principal {
                id: resp.id,
                email: resp.email,
                tier,
                created_at: parse_provider_time(&resp.created_at)?,
            },
            expires_at: parse_provider_time(&resp.expires_at)?,
        })
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), DelegatedError> {
        match self
            .send(
                Method::POST,
                "/v1/auth/revoke",
                Some(json!({ "refreshToken": refresh_token })),
                None,
            )
            .await
        {
            Ok(_) | Err(DelegatedError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), DelegatedError> {
        self.send(
            Method::POST,
            "/v1/auth/password",
            Some(json!({
                "token": access_token,
                "currentPassword": current_password,
                "newPassword": new_password,
            })),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn get_usage(
        &self,
        principal_id: &str,
        resource: ResourceKind,
    ) -> Result<ProviderUsage, DelegatedError> {
        let path = format!("/v1/customers/{principal_id}/usage/{resource}");
        let resp: UsageResponse = self.call(Method::GET, &path, None).await?;
        Ok(ProviderUsage {
            used: resp.used,
            limit: resp.limit,
            period_start: parse_provider_time(&resp.period_start)?,
            period_end: parse_provider_time(&resp.period_end)?,
        })
    }

    async fn record_usage(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<(), DelegatedError> {
        let path = format!("/v1/customers/{principal_id}/usage/{resource}");
        self.send(
            Method::POST,
            &path,
            Some(json!({ "amount": amount })),
            Some(idempotency_key),
        )
        .await
        .map(|_| ())
    }
}
