use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::OAuthConfig;
use crate::error::AuthError;

/// A bearer token together with its expiry. A bearer is valid iff
/// `now < expires_at`; callers apply the one-minute safety margin when
/// they compute `expires_at` on refresh, not when they check it, so that
/// [`TokenState::is_valid`] stays a plain comparison.
#[derive(Debug, Clone)]
enum TokenState {
    None,
    Bearer {
        token: String,
        expires_at: DateTime<Utc>,
    },
}

impl TokenState {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self {
            TokenState::None => false,
            TokenState::Bearer { expires_at, .. } => now < *expires_at,
        }
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Issues and refreshes OAuth bearer tokens, or hands back a static
/// API-key bearer when OAuth isn't configured. Mutated only from the
/// single-threaded pipeline, so no locking.
pub enum Auth {
    OAuth {
        config: OAuthConfig,
        client: reqwest::Client,
        state: TokenState,
    },
    ApiKey(String),
    None,
}

const DEFAULT_EXPIRES_IN: i64 = 3600;

fn expiry_margin() -> ChronoDuration {
    ChronoDuration::seconds(60)
}

impl Auth {
    pub fn oauth(config: OAuthConfig, client: reqwest::Client) -> Self {
        Auth::OAuth {
            config,
            client,
            state: TokenState::None,
        }
    }

    pub fn api_key(key: String) -> Self {
        Auth::ApiKey(key)
    }

    /// Returns a non-expired bearer, refreshing via the OAuth token
    /// endpoint if needed. Returns `None` when no auth is configured, in
    /// which case callers attach no `Authorization` header at all.
    pub async fn current_bearer(&mut self) -> Result<Option<String>, AuthError> {
        match self {
            Auth::None => Ok(None),
            Auth::ApiKey(key) => Ok(Some(key.clone())),
            Auth::OAuth {
                config,
                client,
                state,
            } => {
                if !state.is_valid(Utc::now()) {
                    *state = refresh(client, config).await?;
                }
                match state {
                    TokenState::Bearer { token, .. } => Ok(Some(token.clone())),
                    TokenState::None => unreachable!("refresh always produces a Bearer or errors"),
                }
            }
        }
    }
}

async fn refresh(client: &reqwest::Client, config: &OAuthConfig) -> Result<TokenState, AuthError> {
    tracing::info!(token_url = %config.token_url, "refreshing oauth token");

    let response = client
        .post(config.token_url.clone())
        .basic_auth(&config.client_id, Some(&config.client_secret))
        .form(&[
            ("grant_type", "client_credentials"),
            ("scope", config.scope.as_str()),
        ])
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .map_err(AuthError::TokenRequest)?;

    let response = response
        .error_for_status()
        .map_err(AuthError::TokenRequest)?;

    let body: TokenResponse = response.json().await.map_err(AuthError::MalformedResponse)?;
    if body.access_token.is_empty() {
        return Err(AuthError::MissingAccessToken);
    }

    let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    let expires_at = Utc::now() + ChronoDuration::seconds(expires_in) - expiry_margin();

    tracing::info!("oauth token refreshed");
    Ok(TokenState::Bearer {
        token: body.access_token,
        expires_at,
    })
}
