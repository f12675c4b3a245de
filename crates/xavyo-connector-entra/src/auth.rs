//! OAuth2 client credentials for Microsoft Graph.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::{EntraCloudEnvironment, EntraCredentials, EntraError, EntraResult};

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Token endpoint error body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug)]
struct CachedToken {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Caches the app-only access token and refreshes it ahead of expiry.
#[derive(Debug)]
pub struct TokenCache {
    credentials: EntraCredentials,
    token_url: String,
    scope: String,
    http_client: reqwest::Client,
    cached_token: RwLock<Option<CachedToken>>,
    /// Refresh this long before expiry (default: 5 minutes).
    grace_period: Duration,
}

impl TokenCache {
    /// Creates a token cache for `tenant_id` in `cloud_environment`.
    pub fn new(
        credentials: EntraCredentials,
        cloud_environment: &EntraCloudEnvironment,
        tenant_id: &str,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                cloud_environment.login_endpoint(),
                urlencoding::encode(tenant_id)
            ),
            scope: format!("{}/.default", cloud_environment.graph_endpoint()),
            http_client,
            cached_token: RwLock::new(None),
            grace_period: Duration::minutes(5),
        }
    }

    /// Override the refresh grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self))]
    pub async fn get_token(&self) -> EntraResult<SecretString> {
        {
            let cache = self.cached_token.read().await;
            if let Some(token) = cache.as_ref() {
                if !token.is_expired(self.grace_period) {
                    return Ok(SecretString::new(token.access_token.expose_secret().clone()));
                }
            }
        }

        let mut cache = self.cached_token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = cache.as_ref() {
            if !token.is_expired(self.grace_period) {
                return Ok(SecretString::new(token.access_token.expose_secret().clone()));
            }
        }

        debug!("Refreshing access token");
        let token = self.acquire_token().await?;
        let secret = SecretString::new(token.access_token.expose_secret().clone());
        *cache = Some(token);
        Ok(secret)
    }

    /// Acquires a new access token using client credentials flow.
    async fn acquire_token(&self) -> EntraResult<CachedToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret().as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| EntraError::Auth(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {description}", err.error),
                    None => err.error,
                },
                Err(_) => body,
            };
            warn!(status = %status, "Token request rejected");
            return Err(EntraError::Auth(format!(
                "Token request failed with status {status}: {detail}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EntraError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(expires_at = %expires_at, "Acquired new token");

        Ok(CachedToken {
            access_token: SecretString::new(token.access_token),
            expires_at,
        })
    }

    /// Invalidates the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        *self.cached_token.write().await = None;
    }
}
