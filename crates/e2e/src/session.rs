//! Authenticated session against the ordering service
//!
//! A `Session` owns one cookie jar shared by two HTTP clients: one that follows
//! redirects and one that hands 3xx responses back untouched. Every request a
//! run makes goes through the same jar, so the login cookie set here is what
//! the workflow steps later present.

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::TargetConfig;
use crate::error::{E2eError, E2eResult};
use crate::token::{extract_token, AntiForgeryToken};

/// Login form credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to log in and how to recognise that it worked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSpec {
    /// Page that is primed with a GET and then receives the credential POST
    #[serde(default = "default_login_path")]
    pub path: String,

    #[serde(flatten)]
    pub credentials: Credentials,

    /// Text the success page echoes back. Defaults to the email.
    #[serde(default)]
    pub identity_marker: Option<String>,
}

fn default_login_path() -> String {
    "/login".to_string()
}

impl LoginSpec {
    pub fn identity_marker(&self) -> &str {
        self.identity_marker
            .as_deref()
            .unwrap_or(&self.credentials.email)
    }
}

/// Why a login did not produce a session
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthFailure {
    #[error("session could not be created: {message}")]
    Setup { message: String },

    #[error("transport failure posting credentials: {message}")]
    Transport { message: String },

    #[error("login returned status {status}, expected 200")]
    UnexpectedStatus { status: u16 },

    #[error("login returned 200 but the page does not show '{identity}'")]
    IdentityNotEchoed { identity: String },
}

/// Cookie-bearing HTTP session for one run
pub struct Session {
    target: TargetConfig,
    jar: Arc<Jar>,
    manual: Client,
    following: Client,
    identity: Option<String>,
}

impl Session {
    /// Build the clients around a fresh cookie jar. Not authenticated yet.
    pub(crate) fn open(target: &TargetConfig) -> E2eResult<Self> {
        let jar = Arc::new(Jar::default());

        let build = |policy: Policy| {
            Client::builder()
                .cookie_provider(Arc::clone(&jar))
                .redirect(policy)
                .timeout(target.request_timeout())
                .user_agent(target.user_agent.clone())
                .build()
                .map_err(|e| E2eError::ClientBuild(e.to_string()))
        };

        let manual = build(Policy::none())?;
        let following = build(Policy::limited(10))?;

        Ok(Self {
            target: target.clone(),
            jar,
            manual,
            following,
            identity: None,
        })
    }

    /// Client for a request, depending on whether redirects are resolved
    pub fn client(&self, follow_redirects: bool) -> &Client {
        if follow_redirects {
            &self.following
        } else {
            &self.manual
        }
    }

    pub fn url(&self, path: &str) -> String {
        self.target.url(path)
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Identity the service echoed at login
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Whether the jar currently holds any cookie for the target
    pub fn has_cookies(&self) -> bool {
        use reqwest::cookie::CookieStore;

        match self.target.base_url.parse::<reqwest::Url>() {
            Ok(url) => self.jar.cookies(&url).is_some(),
            Err(_) => false,
        }
    }

    /// GET a page, following redirects, and read its body
    pub async fn fetch_page(&self, path: &str) -> Result<(u16, String), reqwest::Error> {
        let response = self.following.get(self.url(path)).send().await?;
        read_response(response).await
    }
}

pub(crate) async fn read_response(response: Response) -> Result<(u16, String), reqwest::Error> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok((status, body))
}

/// Shorten a response body for log output
pub(crate) fn excerpt(body: &str, max_chars: usize) -> String {
    let mut out: String = body.chars().take(max_chars).collect();
    if body.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', " ")
}

/// Log in and hand back the one session the run will use.
///
/// Both conditions are required: a 200 that re-renders the login form is a
/// rejection, as is the identity appearing under any other status.
pub async fn login(
    target: &TargetConfig,
    spec: &LoginSpec,
    token_field: &str,
) -> Result<Session, AuthFailure> {
    let mut session = Session::open(target).map_err(|e| AuthFailure::Setup {
        message: e.to_string(),
    })?;

    let token = prime_login_page(&session, &spec.path, token_field).await;

    let mut form = vec![
        ("email".to_string(), spec.credentials.email.clone()),
        ("password".to_string(), spec.credentials.password.clone()),
    ];
    if let Some(token) = &token {
        form.push((token_field.to_string(), token.as_str().to_string()));
    }

    let response = session
        .client(true)
        .post(session.url(&spec.path))
        .form(&form)
        .send()
        .await;

    let (status, body) = match response {
        Ok(response) => read_response(response).await,
        Err(e) => Err(e),
    }
    .map_err(|e| {
        error!("Login request failed: {}", e);
        AuthFailure::Transport {
            message: e.to_string(),
        }
    })?;

    info!("Login response status: {}", status);
    debug!("Login response body: {}", excerpt(&body, 200));

    let identity = spec.identity_marker();
    if status != 200 {
        error!("✗ Failed to log in as {} (status {})", spec.credentials.email, status);
        return Err(AuthFailure::UnexpectedStatus { status });
    }
    if !body.contains(identity) {
        error!("✗ Failed to log in as {}: identity not shown on the response page", spec.credentials.email);
        return Err(AuthFailure::IdentityNotEchoed {
            identity: identity.to_string(),
        });
    }

    info!("✓ Logged in as {}", spec.credentials.email);
    session.identity = Some(identity.to_string());
    Ok(session)
}

/// GET the login page for its cookies and token. Failure here is not fatal.
async fn prime_login_page(session: &Session, path: &str, token_field: &str) -> Option<AntiForgeryToken> {
    match session.fetch_page(path).await {
        Ok((status, body)) => {
            info!("Login page status: {}", status);
            extract_token(&body, token_field)
        }
        Err(e) => {
            warn!("Could not prime login page {}: {}", path, e);
            None
        }
    }
}
