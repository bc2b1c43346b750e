// Kumo Cloud authentication
//
// Bearer-token auth: `/v3/login` trades credentials for an access/refresh
// pair, `/v3/refresh` trades the refresh token for a new pair. Expiry is
// tracked locally because the cloud does not report lifetimes.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::client::KumoClient;
use crate::error::Error;
use crate::models::{LoginResponse, TokenPair};
use crate::transport::APP_VERSION;

const ACCESS_TOKEN_LIFETIME_MINUTES: i64 = 18;
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 25;

/// Account credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Token pair with locally tracked expiry.
#[derive(Debug, Clone)]
pub(crate) struct TokenSet {
    pub(crate) access: SecretString,
    pub(crate) refresh: SecretString,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
}

impl TokenSet {
    fn issued_now(pair: TokenPair) -> Self {
        let now = Utc::now();
        Self {
            access: SecretString::from(pair.access),
            refresh: SecretString::from(pair.refresh),
            access_expires_at: now + ChronoDuration::minutes(ACCESS_TOKEN_LIFETIME_MINUTES),
            refresh_expires_at: now + ChronoDuration::days(REFRESH_TOKEN_LIFETIME_DAYS),
        }
    }

    pub(crate) fn access_expired(&self) -> bool {
        Utc::now() >= self.access_expires_at
    }

    pub(crate) fn refresh_usable(&self) -> bool {
        !self.refresh.expose_secret().is_empty() && Utc::now() < self.refresh_expires_at
    }
}

impl KumoClient {
    /// Log in with the configured credentials and cache the token pair.
    pub async fn login(&self) -> Result<(), Error> {
        let mut tokens = self.tokens().lock().await;
        *tokens = Some(self.login_inner().await?);
        Ok(())
    }

    /// Return a valid access token, logging in or refreshing as needed.
    pub async fn access_token(&self) -> Result<SecretString, Error> {
        let mut tokens = self.tokens().lock().await;

        let renewed = match tokens.as_ref() {
            None => Some(self.login_inner().await?),
            Some(current) if !current.access_expired() => None,
            Some(current) if current.refresh_usable() => {
                Some(self.refresh_or_login(&current.refresh).await?)
            }
            Some(_) => Some(self.login_inner().await?),
        };
        if let Some(renewed) = renewed {
            *tokens = Some(renewed);
        }

        tokens
            .as_ref()
            .map(|t| t.access.clone())
            .ok_or(Error::SessionExpired)
    }

    /// Force a token refresh after the server rejected `stale_access`.
    ///
    /// If another task already rotated the token the fresh one is returned
    /// without another round-trip.
    pub(crate) async fn renew_after_rejection(
        &self,
        stale_access: &SecretString,
    ) -> Result<SecretString, Error> {
        let mut tokens = self.tokens().lock().await;

        if let Some(current) = tokens.as_ref() {
            if current.access.expose_secret() != stale_access.expose_secret() {
                return Ok(current.access.clone());
            }
        }

        let renewed = match tokens.as_ref() {
            Some(current) if current.refresh_usable() => {
                self.refresh_or_login(&current.refresh).await?
            }
            _ => self.login_inner().await?,
        };
        let access = renewed.access.clone();
        *tokens = Some(renewed);
        Ok(access)
    }

    async fn refresh_or_login(&self, refresh: &SecretString) -> Result<TokenSet, Error> {
        match self.refresh_inner(refresh).await {
            Ok(tokens) => Ok(tokens),
            Err(e) if e.is_auth_expired() => {
                debug!(error = %e, "token refresh rejected, logging in again");
                self.login_inner().await
            }
            Err(e) => Err(e),
        }
    }

    async fn login_inner(&self) -> Result<TokenSet, Error> {
        let url = self.url("v3/login")?;
        debug!(username = %self.credentials().username, "logging in");

        let body = json!({
            "username": self.credentials().username,
            "password": self.credentials().password.expose_secret(),
            "appVersion": APP_VERSION,
        });

        let resp = self.http().post(url).json(&body).send().await?;
        let text = auth_response_text(resp, "login").await?;

        let parsed: LoginResponse =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: format!("login response: {e}"),
                body: text.clone(),
            })?;
        if parsed.token.access.is_empty() {
            return Err(Error::Authentication {
                message: "login response carried no access token".into(),
            });
        }

        debug!("login successful");
        Ok(TokenSet::issued_now(parsed.token))
    }

    async fn refresh_inner(&self, refresh: &SecretString) -> Result<TokenSet, Error> {
        let url = self.url("v3/refresh")?;
        debug!("refreshing access token");

        let resp = self
            .http()
            .post(url)
            .bearer_auth(refresh.expose_secret())
            .json(&json!({ "refresh": refresh.expose_secret() }))
            .send()
            .await?;
        let text = auth_response_text(resp, "token refresh").await?;

        let pair: TokenPair = serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: format!("refresh response: {e}"),
            body: text.clone(),
        })?;
        if pair.access.is_empty() {
            return Err(Error::SessionExpired);
        }
        Ok(TokenSet::issued_now(pair))
    }
}

/// Read an auth response body. 4xx means the credentials or token were
/// refused; 5xx stays an API error so callers can treat it as transient.
async fn auth_response_text(resp: reqwest::Response, action: &str) -> Result<String, Error> {
    let status = resp.status();
    let text = resp.text().await?;

    if status.is_client_error() {
        return Err(Error::Authentication {
            message: format!("{action} failed (HTTP {status}): {}", preview(&text)),
        });
    }
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: format!("{action} failed: {}", preview(&text)),
        });
    }
    Ok(text)
}

pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
