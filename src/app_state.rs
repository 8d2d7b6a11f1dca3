//! The state shared by every route of the password reset service.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use rusqlite::Connection;
use sha2::{Digest, Sha512};
use time::Duration;

use crate::{
    Error, auth::DEFAULT_COOKIE_DURATION, credentials::CredentialStore, db::initialize,
};

/// Everything the routes need: session cookie settings, the database and the
/// credential store.
///
/// Each feature takes only the fields it uses through its own state struct
/// that implements `FromRef<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Encrypts the private session cookie.
    pub cookie_key: Key,

    /// How long a session lasts without "remember me".
    pub cookie_duration: Duration,

    /// The single connection to the application database. Also read by the
    /// email outbox worker.
    pub db_connection: Arc<Mutex<Connection>>,

    /// Verifies and changes login passwords.
    pub credentials: Arc<dyn CredentialStore>,
}

impl AppState {
    /// Create the tables in `db_connection` if needed and wrap it in the
    /// shared state. The cookie key is derived from `cookie_secret`.
    ///
    /// # Errors
    /// Returns an error if the tables cannot be created.
    pub fn new(
        db_connection: Connection,
        cookie_secret: &str,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        Ok(Self {
            cookie_key: create_cookie_key(cookie_secret),
            cookie_duration: DEFAULT_COOKIE_DURATION,
            db_connection: Arc::new(Mutex::new(db_connection)),
            credentials,
        })
    }
}

// `PrivateCookieJar` extracts its key through this impl.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Derive the cookie encryption key from `secret`.
pub fn create_cookie_key(secret: &str) -> Key {
    Key::from(&Sha512::digest(secret))
}
