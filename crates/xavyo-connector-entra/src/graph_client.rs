//! Microsoft Graph API HTTP client with pagination and transient retry.

use reqwest::{Method, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::is_transient_status;
use crate::{EntraConfig, EntraCredentials, EntraError, EntraResult, RetryConfig, TokenCache};

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

/// `OData` error body.
#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "innerError")]
    pub inner_error: Option<serde_json::Value>,
}

/// Response wrapper for paginated Graph API responses.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Microsoft Graph API client.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    base_url: String,
    page_size: u32,
    retry: RetryConfig,
}

impl GraphClient {
    /// Creates a Graph client for `config`, authenticating with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: &EntraConfig, credentials: EntraCredentials) -> EntraResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EntraError::Config(format!("Failed to create HTTP client: {e}")))?;

        let token_cache = TokenCache::new(
            credentials,
            &config.cloud_environment,
            &config.tenant_id,
            http_client.clone(),
        );

        Ok(Self {
            http_client,
            token_cache: Arc::new(token_cache),
            base_url: format!(
                "{}/{}",
                config.cloud_environment.graph_endpoint(),
                config.api_version
            ),
            page_size: config.page_size,
            retry: config.retry.clone(),
        })
    }

    /// Returns the base URL for Graph API requests.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the API version root.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `$top` used for paged list calls.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Performs a GET request and decodes the JSON body.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> EntraResult<T> {
        let response = self.send(Method::GET, url, None::<&()>).await?;
        response.json().await.map_err(EntraError::from)
    }

    /// Performs a POST request and decodes the JSON body.
    #[instrument(skip(self, body))]
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> EntraResult<T> {
        let response = self.send(Method::POST, url, Some(body)).await?;
        response.json().await.map_err(EntraError::from)
    }

    /// Performs a POST request whose response has no body (204 No Content).
    #[instrument(skip(self, body))]
    pub async fn post_no_content<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> EntraResult<()> {
        self.send(Method::POST, url, Some(body)).await.map(drop)
    }

    /// Performs a PATCH request. Graph answers PATCH with 204 No Content.
    #[instrument(skip(self, body))]
    pub async fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> EntraResult<()> {
        self.send(Method::PATCH, url, Some(body)).await.map(drop)
    }

    /// Performs a DELETE request.
    #[instrument(skip(self))]
    pub async fn delete(&self, url: &str) -> EntraResult<()> {
        self.send(Method::DELETE, url, None::<&()>).await.map(drop)
    }

    /// Fetches every page of a collection, following `@odata.nextLink`.
    ///
    /// Returns only once the last page has been read, so callers never see a
    /// partial collection. A `nextLink` pointing back at any page already
    /// read is an error.
    #[instrument(skip(self))]
    pub async fn get_all_pages<T: DeserializeOwned>(&self, initial_url: &str) -> EntraResult<Vec<T>> {
        let mut items = Vec::new();
        let mut url = initial_url.to_string();
        let mut visited = HashSet::new();

        loop {
            let page: ODataResponse<T> = self.get(&url).await?;
            items.extend(page.value);
            visited.insert(url);

            match page.next_link {
                Some(next) if visited.contains(&next) => {
                    return Err(EntraError::UnexpectedResponse(format!(
                        "nextLink points back to an already fetched page: {next}"
                    )));
                }
                Some(next) => url = next,
                None => break,
            }
        }

        let pages = visited.len();

        debug!(pages, items = items.len(), "Fetched collection");
        Ok(items)
    }

    /// Sends a request, retrying throttling and gateway errors within the
    /// configured budget. Returns the response only if it is a success.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> EntraResult<Response> {
        let mut attempt = 0u32;
        let mut token_refreshed = false;

        loop {
            let token = self.token_cache.get_token().await?;

            let mut request = self
                .http_client
                .request(method.clone(), url)
                .bearer_auth(token.expose_secret());
            if let Some(b) = body {
                request = request.json(b);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.retry.max_retries => {
                    let delay = self.retry.with_jitter(self.retry.backoff_delay(attempt));
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Connection error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            // A revoked or rotated token gets one fresh attempt.
            if status == StatusCode::UNAUTHORIZED && !token_refreshed {
                token_refreshed = true;
                debug!("Received 401, refreshing token");
                self.token_cache.invalidate().await;
                continue;
            }

            if is_transient_status(status.as_u16()) {
                if attempt >= self.retry.max_retries {
                    return Err(EntraError::MaxRetriesExceeded {
                        attempts: attempt + 1,
                        status: status.as_u16(),
                    });
                }

                let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
                    .then(|| parse_retry_after(&response))
                    .flatten();
                let delay = match retry_after {
                    Some(secs) => self.retry.retry_after_delay(secs),
                    None => self.retry.backoff_delay(attempt),
                };
                let delay = self.retry.with_jitter(delay);
                attempt += 1;

                warn!(
                    status = status.as_u16(),
                    attempt,
                    max_retries = self.retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient Graph response, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(error_from_response(status, response).await);
        }
    }
}

/// Seconds from a `Retry-After` header. HTTP-date values are not used by Graph.
fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn error_from_response(status: StatusCode, response: Response) -> EntraError {
    let error_body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ODataError>(&error_body) {
        Ok(odata_error) => EntraError::GraphApi {
            status: status.as_u16(),
            code: odata_error.error.code,
            message: odata_error.error.message,
            inner_error: odata_error.error.inner_error.map(|v| v.to_string()),
        },
        Err(_) => EntraError::GraphApi {
            status: status.as_u16(),
            code: status.to_string(),
            message: error_body,
            inner_error: None,
        },
    }
}
