//! Bearer-token auth shared by the stream transport and the REST client.
//!
//! Every authenticated response is inspected once: a `401` triggers
//! [`AuthSession::logout`], and a rotated token in `x-new-access-token`
//! is handed to [`AuthSession::update_token`].

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};

pub const NEW_ACCESS_TOKEN_HEADER: &str = "x-new-access-token";

/// Token storage and the global auth side effects.
pub trait AuthSession: Send + Sync {
    /// Current access token, if logged in.
    fn token(&self) -> Option<String>;

    /// The server rotated the token.
    fn update_token(&self, token: String);

    /// The server rejected the token. Implementations clear state and
    /// send the user back to login.
    fn logout(&self);
}

/// What the caller should do after the auth side effects ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    Proceed,
    Unauthorized,
}

/// Adds `Authorization: Bearer <token>` when a token is available.
pub fn authorize(
    request: reqwest::RequestBuilder,
    auth: &dyn AuthSession,
) -> reqwest::RequestBuilder {
    match auth.token() {
        Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
        None => request,
    }
}

/// Runs the per-response auth side effects exactly once.
pub fn check_response(
    auth: &dyn AuthSession,
    status: StatusCode,
    headers: &HeaderMap,
) -> AuthCheck {
    if status == StatusCode::UNAUTHORIZED {
        warn!("Server answered 401, logging out");
        auth.logout();
        return AuthCheck::Unauthorized;
    }

    if let Some(token) = headers
        .get(NEW_ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        info!("Received rotated access token");
        auth.update_token(token.to_string());
    }

    AuthCheck::Proceed
}

/// In-memory token holder used by the terminal driver and tests.
#[derive(Debug, Default)]
pub struct TokenStore {
    token: RwLock<Option<String>>,
    logged_out: AtomicBool,
}

impl TokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            logged_out: AtomicBool::new(false),
        }
    }

    /// True once a 401 forced a logout.
    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

impl AuthSession for TokenStore {
    fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_token(&self, token: String) {
        match self.token.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    fn logout(&self) {
        match self.token.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.logged_out.store(true, Ordering::SeqCst);
    }
}
