//! Resolves who is making a request from the session cookie.
//!
//! This is the only place that reads the auth cookie for API requests. Every
//! other handler receives the resolved [Caller] as a request extension and
//! passes it explicitly to the operations that need it.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use rusqlite::Connection;
use time::Duration;

use crate::{
    AppState, Error,
    auth::{
        Account, AccountId, Role,
        account::get_account_by_id,
        session::{extend_auth_cookie_duration_if_needed, get_token_from_cookies},
    },
};

/// The identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// No valid session cookie was sent.
    Anonymous,
    /// A logged-in regular user.
    User(AccountId),
    /// A logged-in administrator.
    Admin(AccountId),
}

impl Caller {
    /// The caller for a logged-in `account`.
    pub fn for_account(account: &Account) -> Self {
        match account.role {
            Role::User => Caller::User(account.id),
            Role::Admin => Caller::Admin(account.id),
        }
    }

    /// The caller's account ID, if they are logged in.
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Caller::Anonymous => None,
            Caller::User(id) | Caller::Admin(id) => Some(*id),
        }
    }

    /// Check that the caller is an administrator.
    ///
    /// # Errors
    ///
    /// Returns [Error::Forbidden] for anonymous callers and regular users.
    pub fn require_admin(&self) -> Result<AccountId, Error> {
        match self {
            Caller::Admin(id) => Ok(*id),
            Caller::Anonymous | Caller::User(_) => Err(Error::Forbidden),
        }
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Caller::Anonymous => write!(f, "anonymous caller"),
            Caller::User(id) => write!(f, "user #{id}"),
            Caller::Admin(id) => write!(f, "admin #{id}"),
        }
    }
}

/// The state needed to resolve the caller.
#[derive(Debug, Clone)]
pub struct CallerState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,
    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,
    /// The database connection for looking up accounts.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CallerState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            cookie_key: state.cookie_key.clone(),
            cookie_duration: state.cookie_duration,
            db_connection: state.db_connection.clone(),
        }
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<CallerState> for Key {
    fn from_ref(state: &CallerState) -> Self {
        state.cookie_key.clone()
    }
}

/// Middleware that resolves the [Caller] for a request and places it in the
/// request extensions.
///
/// Requests without a valid cookie, or whose account no longer exists, are
/// passed on as [Caller::Anonymous]. For logged-in callers the cookie expiry
/// is pushed out by the configured cookie duration.
///
/// **Note**: Route handlers can use the function argument
/// `Extension(caller): Extension<Caller>` to receive the caller.
pub async fn resolve_caller(
    State(state): State<CallerState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let jar = match PrivateCookieJar::from_request_parts(&mut parts, &state).await {
        Ok(jar) => jar,
        Err(error) => {
            tracing::error!("Error getting cookie jar: {error:?}. Treating caller as anonymous.");
            parts.extensions.insert(Caller::Anonymous);
            return next.run(Request::from_parts(parts, body)).await;
        }
    };

    let caller = match lookup_caller(&jar, &state.db_connection) {
        Ok(caller) => caller,
        Err(error) => return error.into_response(),
    };

    parts.extensions.insert(caller);
    let response = next.run(Request::from_parts(parts, body)).await;

    if caller == Caller::Anonymous {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let jar = match extend_auth_cookie_duration_if_needed(jar.clone(), state.cookie_duration) {
        Ok(updated_jar) => updated_jar,
        Err(error) => {
            tracing::error!("Error extending cookie duration: {error}. Rolling back cookie jar.");
            jar
        }
    };

    // A handler that logs the caller out sets its own cookie, which must win.
    if !parts.headers.contains_key(SET_COOKIE) {
        for (key, value) in jar.into_response().headers().iter() {
            if key == SET_COOKIE {
                parts.headers.append(key, value.to_owned());
            }
        }
    }

    Response::from_parts(parts, body)
}

fn lookup_caller(
    jar: &PrivateCookieJar,
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<Caller, Error> {
    let account_id = match get_token_from_cookies(jar) {
        Ok(token) => token.account_id,
        Err(_) => return Ok(Caller::Anonymous),
    };

    let connection = db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    match get_account_by_id(account_id, &connection) {
        Ok(account) => Ok(Caller::for_account(&account)),
        Err(Error::NotFound) => {
            tracing::warn!("Session cookie refers to unknown account #{account_id}.");
            Ok(Caller::Anonymous)
        }
        Err(error) => Err(error),
    }
}
