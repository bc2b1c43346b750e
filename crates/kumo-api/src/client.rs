// Kumo Cloud HTTP client
//
// Wraps `reqwest::Client` with URL construction, bearer auth and the
// retry-once-on-401 rule. Endpoint groups (sites, devices) live in separate
// files as inherent methods to keep this module focused on transport
// mechanics.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::auth::{Credentials, TokenSet, preview};
use crate::error::Error;
use crate::transport::{BASE_URL, TransportConfig};

/// Async client for the Kumo Cloud REST API.
///
/// Cheaply cloneable; clones share the HTTP connection pool and the cached
/// token pair, so a token refreshed by one clone is seen by all.
#[derive(Clone)]
pub struct KumoClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    tokens: Mutex<Option<TokenSet>>,
}

impl KumoClient {
    /// Create a client against the production endpoint.
    pub fn new(credentials: Credentials, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = Url::parse(BASE_URL)?;
        Self::with_base_url(base_url, credentials, transport)
    }

    /// Create a client against a custom base URL (staging, mock servers).
    pub fn with_base_url(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                credentials,
                tokens: Mutex::new(None),
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub(crate) fn tokens(&self) -> &Mutex<Option<TokenSet>> {
        &self.inner.tokens
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Join an API path onto the base URL: `{base}/{path}`.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.inner.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and deserialize the JSON response.
    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let body = self.request(Method::GET, path, None).await?;
        decode(&body)
    }

    /// Send a POST request with a JSON body and return the raw response body.
    pub(crate) async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<String, Error> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Issue an authenticated request, refreshing and retrying once on 401.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");
        if let Some(body) = body {
            trace!(%body, "request body");
        }

        let access = self.access_token().await?;
        let resp = self.send(method.clone(), url.clone(), body, &access).await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("access token rejected, renewing and retrying once");
            let renewed = self.renew_after_rejection(&access).await?;
            self.send(method, url, body, &renewed).await?
        } else {
            resp
        };

        read_body(resp).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        access: &SecretString,
    ) -> Result<reqwest::Response, Error> {
        let mut builder = self
            .inner
            .http
            .request(method, url)
            .bearer_auth(access.expose_secret());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}

/// Map the status to an error, or return the body text.
async fn read_body(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "access token rejected after renewal".into(),
        });
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        return Err(Error::RateLimited { retry_after_secs });
    }

    let text = resp.text().await?;
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: preview(&text),
        });
    }

    trace!(status = status.as_u16(), body = %preview(&text), "response");
    Ok(text)
}

/// Deserialize a response body. An empty body decodes as JSON `null`, so
/// `Option`/`Vec` targets see "nothing" rather than an error.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    let trimmed = body.trim();
    let source = if trimmed.is_empty() { "null" } else { trimmed };
    serde_json::from_str(source).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(body)),
        body: body.to_owned(),
    })
}
