//! OAuth sign-in (Google, GitHub).
//!
//! The handshake is stateless: the `state` parameter is a short-lived JWT,
//! checked on the callback. Both providers feed one [`link_account`].

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use axum::{
    async_trait,
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use url::Url;

use super::jwt::JwtKeys;
use super::repo_types::{normalize_email, NewUser, Provider, User};
use super::services::{AuthError, AuthResult};
use crate::{
    config::{OAuthClientConfig, OAuthConfig},
    error::{ApiError, ApiResult},
    state::AppState,
};

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

/// Provider identity reduced to what account linking needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider: Provider,
    pub provider_id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> Provider;

    /// Consent page URL carrying our CSRF `state`.
    fn authorize_url(&self, state: &str) -> String;

    /// Trades the callback `code` for the provider's raw profile and
    /// normalizes it.
    async fn exchange_code_for_profile(&self, code: &str) -> anyhow::Result<OAuthProfile>;

    fn normalize_profile(&self, raw: &Value) -> anyhow::Result<OAuthProfile>;
}

fn authorize_url(base: &str, client: &OAuthClientConfig, scope: &str, state: &str) -> String {
    match Url::parse_with_params(
        base,
        &[
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", client.callback_url.as_str()),
            ("response_type", "code"),
            ("scope", scope),
            ("state", state),
        ],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => base.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    client: &OAuthClientConfig,
    code: &str,
) -> anyhow::Result<String> {
    let mut form = HashMap::new();
    form.insert("client_id", client.client_id.as_str());
    form.insert("client_secret", client.client_secret.as_str());
    form.insert("redirect_uri", client.callback_url.as_str());
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);

    let res = http
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&form)
        .send()
        .await
        .context("token request")?
        .error_for_status()
        .context("token endpoint")?
        .json::<TokenResponse>()
        .await
        .context("token response")?;

    match (res.access_token, res.error) {
        (Some(token), _) => Ok(token),
        (None, err) => anyhow::bail!("no access token: {}", err.unwrap_or_default()),
    }
}

fn non_empty(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct GoogleProvider {
    client: OAuthClientConfig,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client: OAuthClientConfig) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn kind(&self) -> Provider {
        Provider::Google
    }

    fn authorize_url(&self, state: &str) -> String {
        authorize_url(GOOGLE_AUTHORIZE_URL, &self.client, "openid profile email", state)
    }

    async fn exchange_code_for_profile(&self, code: &str) -> anyhow::Result<OAuthProfile> {
        let access_token = exchange_code(&self.http, GOOGLE_TOKEN_URL, &self.client, code).await?;
        let raw = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .context("google userinfo")?
            .error_for_status()?
            .json::<Value>()
            .await?;
        self.normalize_profile(&raw)
    }

    /// OpenID userinfo: `sub`, `email`, `name`, `given_name`, `picture`.
    fn normalize_profile(&self, raw: &Value) -> anyhow::Result<OAuthProfile> {
        let provider_id = non_empty(raw, "sub").context("google profile has no id")?;
        let email = non_empty(raw, "email").context("google profile has no email")?;
        let name = non_empty(raw, "name")
            .or_else(|| non_empty(raw, "given_name"))
            .unwrap_or_else(|| "User".into());
        Ok(OAuthProfile {
            provider: Provider::Google,
            provider_id,
            email: normalize_email(&email),
            name,
            avatar: non_empty(raw, "picture"),
        })
    }
}

pub struct GitHubProvider {
    client: OAuthClientConfig,
    http: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(client: OAuthClientConfig) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, url: &str, token: &str) -> anyhow::Result<Value> {
        Ok(self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, "lawpal")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json::<Value>()
            .await?)
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn kind(&self) -> Provider {
        Provider::GitHub
    }

    fn authorize_url(&self, state: &str) -> String {
        authorize_url(GITHUB_AUTHORIZE_URL, &self.client, "user:email", state)
    }

    async fn exchange_code_for_profile(&self, code: &str) -> anyhow::Result<OAuthProfile> {
        let access_token = exchange_code(&self.http, GITHUB_TOKEN_URL, &self.client, code).await?;
        let mut raw = self.get_json(GITHUB_USER_URL, &access_token).await?;
        // private addresses only show up on /user/emails
        match self.get_json(GITHUB_EMAILS_URL, &access_token).await {
            Ok(emails) => {
                if let Some(obj) = raw.as_object_mut() {
                    obj.insert("emails".into(), emails);
                }
            }
            Err(e) => warn!(error = %e, "github emails lookup failed"),
        }
        self.normalize_profile(&raw)
    }

    /// `/user` payload, optionally with the `/user/emails` list under `emails`.
    /// The primary address wins, then the first listed, then the public one.
    fn normalize_profile(&self, raw: &Value) -> anyhow::Result<OAuthProfile> {
        let provider_id = match raw.get("id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => anyhow::bail!("github profile has no id"),
        };
        let listed = raw.get("emails").and_then(Value::as_array);
        let email = listed
            .and_then(|list| {
                list.iter()
                    .find(|e| e.get("primary").and_then(Value::as_bool) == Some(true))
                    .or_else(|| list.first())
            })
            .and_then(|e| non_empty(e, "email"))
            .or_else(|| non_empty(raw, "email"))
            .context("github profile has no email")?;
        let name = non_empty(raw, "name")
            .or_else(|| non_empty(raw, "login"))
            .unwrap_or_else(|| "User".into());
        Ok(OAuthProfile {
            provider: Provider::GitHub,
            provider_id,
            email: normalize_email(&email),
            name,
            avatar: non_empty(raw, "avatar_url"),
        })
    }
}

/// Providers enabled by configuration.
#[derive(Clone, Default)]
pub struct OAuthProviders {
    pub google: Option<Arc<dyn OAuthProvider>>,
    pub github: Option<Arc<dyn OAuthProvider>>,
}

impl OAuthProviders {
    pub fn from_config(cfg: &OAuthConfig) -> Self {
        Self {
            google: cfg
                .google
                .clone()
                .map(|c| Arc::new(GoogleProvider::new(c)) as Arc<dyn OAuthProvider>),
            github: cfg
                .github
                .clone()
                .map(|c| Arc::new(GitHubProvider::new(c)) as Arc<dyn OAuthProvider>),
        }
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn OAuthProvider>> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::GitHub => self.github.as_ref(),
        }
    }
}

/// Finds or creates the account behind an OAuth identity.
///
/// Unknown email: a verified account is created with the provider attached.
/// Known email without a provider: the provider is linked and the address
/// counts as verified. Anything else is used as is.
#[instrument(skip(state, profile), fields(provider = profile.provider.as_str(), email = %profile.email))]
pub async fn link_account(state: &AppState, profile: &OAuthProfile) -> AuthResult<User> {
    match state.users.find_by_email(&profile.email).await? {
        None => {
            let user = NewUser::oauth(
                profile.provider,
                &profile.provider_id,
                &profile.name,
                &profile.email,
                profile.avatar.as_deref(),
            )
            .into_user(OffsetDateTime::now_utc());
            state.users.insert(&user).await?;
            info!(user_id = %user.id, "user created from oauth");
            Ok(user)
        }
        Some(user) if user.provider.is_none() => {
            match state
                .users
                .link_provider(user.id, profile.provider, &profile.provider_id)
                .await?
            {
                Some(linked) => {
                    info!(user_id = %linked.id, "oauth provider linked");
                    Ok(linked)
                }
                // Linked by another request in the meantime.
                None => state.users.find_by_id(user.id).await?.ok_or(AuthError::UserNotFound),
            }
        }
        Some(user) => Ok(user),
    }
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/github", get(github_start))
        .route("/auth/github/callback", get(github_callback))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn provider_for(state: &AppState, provider: Provider) -> ApiResult<Arc<dyn OAuthProvider>> {
    state.oauth.get(provider).cloned().ok_or_else(|| {
        ApiError::NotFound(format!("{} sign-in is not configured", provider.display_name()))
    })
}

async fn start(state: AppState, provider: Provider) -> ApiResult<Redirect> {
    let client = provider_for(&state, provider)?;
    let csrf = JwtKeys::from_config(&state.config.jwt).sign_oauth_state()?;
    Ok(Redirect::to(&client.authorize_url(&csrf)))
}

async fn finish(state: &AppState, client: &dyn OAuthProvider, params: CallbackParams) -> anyhow::Result<String> {
    if let Some(err) = params.error {
        anyhow::bail!("provider returned error: {err}");
    }
    let csrf = params.state.context("missing state")?;
    let keys = JwtKeys::from_config(&state.config.jwt);
    keys.verify_oauth_state(&csrf).context("bad state")?;
    let code = params.code.context("missing code")?;

    let profile = client.exchange_code_for_profile(&code).await?;
    let user = link_account(state, &profile).await.map_err(anyhow::Error::new)?;
    info!(user_id = %user.id, provider = profile.provider.as_str(), "oauth sign-in");
    keys.sign_session(user.id)
}

async fn callback(state: AppState, provider: Provider, params: CallbackParams) -> ApiResult<Redirect> {
    let client = provider_for(&state, provider)?;
    let frontend = state.config.frontend_url();
    match finish(&state, client.as_ref(), params).await {
        // JWTs are URL-safe as is
        Ok(token) => Ok(Redirect::to(&format!("{frontend}/#/oauth-finish?token={token}"))),
        Err(e) => {
            warn!(provider = provider.as_str(), error = %e, "oauth callback failed");
            Ok(Redirect::to(&format!(
                "{frontend}/#/signin?error={}_failed",
                provider.as_str()
            )))
        }
    }
}

#[instrument(skip(state))]
pub async fn google_start(State(state): State<AppState>) -> ApiResult<Redirect> {
    start(state, Provider::Google).await
}

#[instrument(skip_all)]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Redirect> {
    callback(state, Provider::Google, params).await
}

#[instrument(skip(state))]
pub async fn github_start(State(state): State<AppState>) -> ApiResult<Redirect> {
    start(state, Provider::GitHub).await
}

#[instrument(skip_all)]
pub async fn github_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Redirect> {
    callback(state, Provider::GitHub, params).await
}
