//! Accounts, sessions, and the rate-limited auth endpoints.
//!
//! Accounts live in memory with argon2 password hashes. A successful signup
//! or login issues an opaque session token, accepted back as
//! `Authorization: Bearer <token>` or a `jwt` cookie.

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::handlers::AppState;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use axum::{
    async_trait,
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dashmap::{mapref::entry::Entry, DashMap};
use parley_core::{Outcome, RequestContext};
use parley_protocol::{SenderProfile, UserId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "jwt";

const SESSION_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Account errors, all reported to the caller as 400 unless internal.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Signup is missing a name, email, or password.
    #[error("All fields are required")]
    MissingFields,

    /// Login is missing an email or password.
    #[error("Email and password required")]
    MissingCredentials,

    /// Password is shorter than the configured minimum.
    #[error("Password should be of at least {0} characters.")]
    PasswordTooShort(usize),

    /// Email is not structurally valid.
    #[error("Invalid email format")]
    InvalidEmail,

    /// Another account already uses the email.
    #[error("Account already exists with this email")]
    EmailTaken,

    /// Unknown email or wrong password. The two are not distinguished.
    #[error("Invalid Credentials")]
    InvalidCredentials,

    /// Profile update without a picture reference.
    #[error("Profile pic is required")]
    MissingProfilePic,

    /// The request body is not valid JSON for the endpoint.
    #[error("Invalid request body")]
    MalformedBody,

    /// Argon2 failed, or the blocking task died. Reported as 500.
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Hashing(detail) => Self::Internal(detail),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable account id, also the user id on messages.
    pub id: UserId,
    /// Display name, trimmed.
    pub full_name: String,
    /// Normalized (trimmed, lowercased) email.
    pub email: String,
    /// Opaque reference to an already uploaded picture.
    pub profile_pic: Option<String>,
    password_hash: String,
}

impl Account {
    /// Public view of this account.
    #[must_use]
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }

    /// Profile joined onto this account's messages.
    #[must_use]
    pub fn sender_profile(&self) -> SenderProfile {
        SenderProfile {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

/// Account as returned over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub profile_pic: Option<String>,
}

/// Profile plus a freshly issued session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub profile: AccountProfile,
    pub token: String,
}

/// In-memory accounts and sessions.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: DashMap<UserId, Account>,
    by_email: DashMap<String, UserId>,
    sessions: DashMap<String, UserId>,
}

impl AccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account from an already hashed password.
    ///
    /// # Errors
    ///
    /// Returns `EmailTaken` if the normalized email is registered.
    pub fn create(
        &self,
        full_name: &str,
        email: &str,
        password_hash: String,
    ) -> Result<Account, AuthError> {
        let email = normalize_email(email);
        let account = match self.by_email.entry(email.clone()) {
            Entry::Occupied(_) => return Err(AuthError::EmailTaken),
            Entry::Vacant(slot) => {
                let account = Account {
                    id: UserId::generate(),
                    full_name: full_name.trim().to_string(),
                    email,
                    profile_pic: None,
                    password_hash,
                };
                slot.insert(account.id.clone());
                account
            }
        };
        self.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    /// Look up an account by email.
    #[must_use]
    pub fn find_by_email(&self, email: &str) -> Option<Account> {
        let id = self.by_email.get(&normalize_email(email))?.value().clone();
        self.get(&id)
    }

    /// Look up an account by id.
    #[must_use]
    pub fn get(&self, id: &UserId) -> Option<Account> {
        self.accounts.get(id).map(|a| a.value().clone())
    }

    /// Issue a session token for `user`.
    pub fn issue_session(&self, user: &UserId) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), user.clone());
        token
    }

    /// Resolve a session token to its account.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<Account> {
        let id = self.sessions.get(token)?.value().clone();
        self.get(&id)
    }

    /// Replace an account's picture reference.
    ///
    /// Returns the updated account, or `None` if `user` does not exist.
    pub fn update_profile_pic(&self, user: &UserId, profile_pic: String) -> Option<Account> {
        let mut account = self.accounts.get_mut(user)?;
        account.profile_pic = Some(profile_pic);
        Some(account.clone())
    }

    /// Delete a session. Returns `true` if it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Every account except `user`, ordered by name.
    #[must_use]
    pub fn others(&self, user: &UserId) -> Vec<AccountProfile> {
        let mut profiles: Vec<_> = self
            .accounts
            .iter()
            .filter(|entry| entry.key() != user)
            .map(|entry| entry.value().profile())
            .collect();
        profiles.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        profiles
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose structural email check: one `@`, a non-empty local part, and a
/// dotted domain without whitespace.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

fn hasher(config: &AuthConfig) -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(config.hash_memory_kib, config.hash_iterations, 1, None)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with the configured argon2 cost.
///
/// # Errors
///
/// Returns an error if the parameters are invalid or hashing fails.
pub fn hash_password(config: &AuthConfig, password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher(config)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Check a password against a stored hash.
#[must_use]
pub fn verify_password(stored_hash: &str, supplied_password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(supplied_password.as_bytes(), &parsed)
        .is_ok()
}

async fn run_blocking<T, F>(work: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// Session token from `Authorization: Bearer` or the session cookie.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Client address used to key the rate limiters.
///
/// The socket peer, or the first `x-forwarded-for` entry when
/// `rate_limit.trust_forwarded_for` is set. A request with neither is
/// rejected rather than sharing one bucket with every other such request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Resolve the client address from the forwarding header and socket peer.
fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded_for)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let trust = state.config.rate_limit.trust_forwarded_for;

        client_ip(&parts.headers, peer, trust).map(Self).ok_or_else(|| {
            warn!("Request without a client address");
            ApiError::Internal("client address unavailable".into())
        })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Account);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        state
            .accounts
            .authenticate(&token)
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

fn session_cookie(token: &str, max_age: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Strict"
    ))
    .ok()
}

fn session_response(status: StatusCode, account: &Account, token: String) -> Response {
    let cookie = session_cookie(&token, SESSION_MAX_AGE_SECS);
    let mut response = (
        status,
        Json(SessionResponse {
            profile: account.profile(),
            token,
        }),
    )
        .into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

fn outcome_of(result: &Result<Response, ApiError>) -> Outcome {
    let status = match result {
        Ok(response) => response.status(),
        Err(err) => err.status(),
    };
    Outcome::from_status(status.as_u16())
}

/// Signup request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupBody {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Login request body.
#[derive(Debug, Default, Deserialize)]
pub struct LoginBody {
    pub email: Option<String>,
    pub password: Option<String>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// Update-profile request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileBody {
    pub profile_pic: Option<String>,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AuthError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Malformed auth body");
        AuthError::MalformedBody
    })
}

/// `POST /api/auth/signup`
///
/// The body is parsed after the limiter runs, so malformed requests count
/// against the caller like any other attempt.
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Response, ApiError> {
    let permit = state.signup_limiter.evaluate(&RequestContext::new(ip))?;
    let result = match parse_body::<SignupBody>(&body) {
        Ok(body) => signup(&state, body).await,
        Err(e) => Err(e.into()),
    };
    permit.record(outcome_of(&result));
    result
}

async fn signup(state: &AppState, body: SignupBody) -> Result<Response, ApiError> {
    let (Some(full_name), Some(email), Some(password)) = (
        present(body.full_name.as_ref()),
        present(body.email.as_ref()),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AuthError::MissingFields.into());
    };

    let min_len = state.config.auth.min_password_len;
    if password.chars().count() < min_len {
        return Err(AuthError::PasswordTooShort(min_len).into());
    }
    if !is_valid_email(&normalize_email(email)) {
        return Err(AuthError::InvalidEmail.into());
    }
    if state.accounts.find_by_email(email).is_some() {
        return Err(AuthError::EmailTaken.into());
    }

    let auth_config = state.config.auth.clone();
    let password = password.to_string();
    let password_hash = run_blocking(move || hash_password(&auth_config, &password)).await?;

    let account = state.accounts.create(full_name, email, password_hash)?;
    state.store.upsert_profile(account.sender_profile());
    let token = state.accounts.issue_session(&account.id);

    info!(user = %account.id, "Account created");
    Ok(session_response(StatusCode::CREATED, &account, token))
}

/// `POST /api/auth/login`
///
/// A body that does not parse is still limited, keyed by address alone.
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Response, ApiError> {
    let parsed = parse_body::<LoginBody>(&body);
    let email = parsed.as_ref().ok().and_then(|b| b.email.as_deref());
    let ctx = RequestContext::new(ip).with_account(email);
    let permit = state.login_limiter.evaluate(&ctx)?;
    let result = match parsed {
        Ok(body) => login(&state, body).await,
        Err(e) => Err(e.into()),
    };
    permit.record(outcome_of(&result));
    result
}

async fn login(state: &AppState, body: LoginBody) -> Result<Response, ApiError> {
    let (Some(email), Some(password)) = (
        present(body.email.as_ref()),
        body.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AuthError::MissingCredentials.into());
    };

    if !is_valid_email(&normalize_email(email)) {
        return Err(AuthError::InvalidEmail.into());
    }

    let Some(account) = state.accounts.find_by_email(email) else {
        debug!("Login for unknown account");
        return Err(AuthError::InvalidCredentials.into());
    };

    let stored_hash = account.password_hash.clone();
    let password = password.to_string();
    let matches = run_blocking(move || Ok(verify_password(&stored_hash, &password))).await?;
    if !matches {
        debug!(user = %account.id, "Login with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = state.accounts.issue_session(&account.id);
    debug!(user = %account.id, "Logged in");
    Ok(session_response(StatusCode::OK, &account, token))
}

/// `POST /api/auth/logout`
pub async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.accounts.revoke(&token);
    }

    let mut response = Json(serde_json::json!({ "message": "Logged out successfully" }))
        .into_response();
    if let Some(cookie) = session_cookie("", 0) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// `PUT /api/auth/update-profile`
///
/// Stores the picture reference and refreshes the profile joined onto the
/// caller's future messages.
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
    Json(body): Json<UpdateProfileBody>,
) -> Result<Json<AccountProfile>, ApiError> {
    let profile_pic = present(body.profile_pic.as_ref())
        .map(|pic| pic.trim().to_string())
        .ok_or(AuthError::MissingProfilePic)?;

    let updated = state
        .accounts
        .update_profile_pic(&account.id, profile_pic)
        .ok_or(ApiError::Unauthorized)?;
    state.store.upsert_profile(updated.sender_profile());

    info!(user = %updated.id, "Profile picture updated");
    Ok(Json(updated.profile()))
}

/// `GET /api/auth/check`
pub async fn check_handler(AuthUser(account): AuthUser) -> Json<AccountProfile> {
    Json(account.profile())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> AuthConfig {
        AuthConfig {
            hash_memory_kib: 8,
            hash_iterations: 1,
            min_password_len: 6,
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password(&cheap(), "hunter22").unwrap();
        assert!(verify_password(&hash, "hunter22"));
        assert!(!verify_password(&hash, "hunter23"));
        assert!(!verify_password("not a hash", "hunter22"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("bob@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.org"));
        assert!(!is_valid_email("bob"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("bob@example"));
        assert!(!is_valid_email("bob@@example.com"));
        assert!(!is_valid_email("bob smith@example.com"));
        assert!(!is_valid_email("bob@example..com"));
    }

    #[test]
    fn test_duplicate_email_is_rejected_case_insensitively() {
        let store = AccountStore::new();
        store.create("Bob", "bob@example.com", "h".into()).unwrap();
        let err = store
            .create("Bobby", "  BOB@Example.com ", "h".into())
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(store.find_by_email("bob@example.com").unwrap().full_name, "Bob");
    }

    #[test]
    fn test_sessions() {
        let store = AccountStore::new();
        let account = store.create("Bob", "bob@example.com", "h".into()).unwrap();
        let token = store.issue_session(&account.id);

        assert_eq!(store.authenticate(&token).unwrap().id, account.id);
        assert!(store.revoke(&token));
        assert!(store.authenticate(&token).is_none());
        assert!(!store.revoke(&token));
    }

    #[test]
    fn test_others_excludes_caller() {
        let store = AccountStore::new();
        let alice = store.create("Alice", "alice@example.com", "h".into()).unwrap();
        store.create("Carol", "carol@example.com", "h".into()).unwrap();
        store.create("Bob", "bob@example.com", "h".into()).unwrap();

        let names: Vec<_> = store
            .others(&alice.id)
            .into_iter()
            .map(|p| p.full_name)
            .collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
    }

    #[test]
    fn test_update_profile_pic() {
        let store = AccountStore::new();
        let bob = store.create("Bob", "bob@example.com", "h".into()).unwrap();

        let updated = store
            .update_profile_pic(&bob.id, "https://cdn.example.com/bob.png".into())
            .unwrap();
        assert_eq!(updated.profile_pic.as_deref(), Some("https://cdn.example.com/bob.png"));
        assert_eq!(
            store.get(&bob.id).unwrap().sender_profile().profile_pic,
            updated.profile_pic
        );
        assert!(store
            .update_profile_pic(&UserId::generate(), "x".into())
            .is_none());
    }

    #[test]
    fn test_client_ip_ignores_forwarded_for_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        let peer: SocketAddr = "192.0.2.44:51000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer), false).as_deref(), Some("192.0.2.44"));
        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("203.0.113.7"));
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer), true).as_deref(), Some("192.0.2.44"));

        assert_eq!(client_ip(&headers, None, false), None);
        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }

    #[test]
    fn test_session_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; jwt=abc123"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(session_token(&headers).as_deref(), Some("xyz"));
    }
}
