// OAuth bridge to the external tournament-hosting provider.
//
// Implements the authorization-code flow (link, callback, token refresh)
// and the small slice of the provider REST API we delegate to: listing
// and creating tournaments on the user's behalf.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::db::{Database, OauthConnection};
use crate::metrics;

/// Provider name stored on oauth_connections rows.
pub const PROVIDER_NAME: &str = "bracketeer";

/// Refresh the access token when it expires within this margin.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Pending authorization states are dropped after this long.
const STATE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("no provider connection for this user")]
    NotLinked,
    #[error("unknown or expired authorization state")]
    UnknownState,
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Token endpoint response, for both code exchange and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// A tournament as represented by the provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTournament {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
    authorize_url: reqwest::Url,
    /// state nonce -> (linking user id, issued at)
    pending_states: Mutex<HashMap<String, (i64, Instant)>>,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        let authorize_url =
            reqwest::Url::parse(&config.authorize_url).expect("failed to parse authorize URL");
        Self {
            http: reqwest::Client::new(),
            config,
            authorize_url,
            pending_states: Mutex::new(HashMap::new()),
        }
    }

    // ── Authorization-code flow ───────────────────────────────────────

    /// Start linking a user's account: mint a state nonce bound to the
    /// user id and return the provider authorization URL to redirect to.
    pub fn begin_link(&self, user_id: i64) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let mut pending = self.pending_states.lock().unwrap();
        pending.retain(|_, (_, issued)| issued.elapsed() < STATE_TTL);
        pending.insert(state.clone(), (user_id, Instant::now()));

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &state);
        url.to_string()
    }

    /// Consume a state nonce from the callback, returning the user id it
    /// was issued for. Each state is single-use and expires after
    /// `STATE_TTL`.
    pub fn take_state(&self, state: &str) -> Result<i64, ProviderError> {
        let mut pending = self.pending_states.lock().unwrap();
        let (user_id, issued) = pending.remove(state).ok_or(ProviderError::UnknownState)?;
        if issued.elapsed() >= STATE_TTL {
            return Err(ProviderError::UnknownState);
        }
        Ok(user_id)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ProviderError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    /// Exchange a refresh token for a fresh token pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;
        let tokens: TokenResponse = check(resp).await?.json().await?;
        metrics::PROVIDER_TOKEN_REFRESHES_TOTAL.inc();
        Ok(tokens)
    }

    /// Finish the callback leg: validate the state, exchange the code, and
    /// persist the connection for the user the state was issued to.
    pub async fn complete_link(
        &self,
        db: &Database,
        state: &str,
        code: &str,
    ) -> Result<OauthConnection, ProviderError> {
        let user_id = self.take_state(state)?;
        let tokens = self.exchange_code(code).await?;
        let expires_at = chrono::Utc::now().timestamp() + tokens.expires_in;
        let conn = db
            .upsert_oauth_connection(
                user_id,
                PROVIDER_NAME,
                &tokens.access_token,
                &tokens.refresh_token,
                expires_at,
            )
            .await?;
        tracing::info!(user_id, "linked tournament provider account");
        Ok(conn)
    }

    /// Return a usable access token for the user, refreshing it first if
    /// it expires within the margin. A failed refresh leaves the stored
    /// connection untouched.
    pub async fn fresh_access_token(
        &self,
        db: &Database,
        user_id: i64,
    ) -> Result<String, ProviderError> {
        let conn = db
            .get_oauth_connection(user_id)
            .await?
            .ok_or(ProviderError::NotLinked)?;

        let now = chrono::Utc::now().timestamp();
        if conn.expires_at - now > REFRESH_MARGIN_SECS {
            return Ok(conn.access_token);
        }

        let tokens = self.refresh(&conn.refresh_token).await?;
        let expires_at = now + tokens.expires_in;
        db.upsert_oauth_connection(
            user_id,
            PROVIDER_NAME,
            &tokens.access_token,
            &tokens.refresh_token,
            expires_at,
        )
        .await?;
        Ok(tokens.access_token)
    }

    // ── Provider REST API ─────────────────────────────────────────────

    pub async fn list_tournaments(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProviderTournament>, ProviderError> {
        let result = self.list_tournaments_inner(access_token).await;
        record_outcome("list_tournaments", &result);
        result
    }

    async fn list_tournaments_inner(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProviderTournament>, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/tournaments", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn create_tournament(
        &self,
        access_token: &str,
        name: &str,
    ) -> Result<ProviderTournament, ProviderError> {
        let result = self.create_tournament_inner(access_token, name).await;
        record_outcome("create_tournament", &result);
        result
    }

    async fn create_tournament_inner(
        &self,
        access_token: &str,
        name: &str,
    ) -> Result<ProviderTournament, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/tournaments", self.config.api_base))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn non-2xx provider responses into `ProviderError::Api`.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

fn record_outcome<T>(operation: &str, result: &Result<T, ProviderError>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::PROVIDER_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}
