//! The endpoint for creating a new user account.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::StatusCode,
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{
    AppState, Error,
    auth::{Role, ValidatedPassword, log_in::LoggedIn, set_auth_cookie},
    credentials::{CredentialStore, Registration},
};

/// The state needed for creating a new user.
#[derive(Debug, Clone)]
pub struct RegistrationState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,
    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,
    pub db_connection: Arc<Mutex<Connection>>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for RegistrationState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            cookie_key: state.cookie_key.clone(),
            cookie_duration: state.cookie_duration,
            db_connection: state.db_connection.clone(),
            credentials: state.credentials.clone(),
        }
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<RegistrationState> for Key {
    fn from_ref(state: &RegistrationState) -> Self {
        state.cookie_key.clone()
    }
}

/// The details entered in the sign-up form.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub confirm_password: String,
}

/// Handler for creating a regular user account. The new user is logged in.
///
/// # Errors
///
/// - [Error::PasswordMismatch] or [Error::TooWeak] for bad passwords.
/// - [Error::InvalidUsername] if the username is blank or contains '@'.
/// - [Error::InvalidEmail] if the email address is malformed.
/// - [Error::DuplicateUsername] or [Error::DuplicateEmail] if either is taken.
pub async fn register_user(
    State(state): State<RegistrationState>,
    jar: PrivateCookieJar,
    Json(user_data): Json<RegisterForm>,
) -> Result<(StatusCode, PrivateCookieJar, Json<LoggedIn>), Error> {
    if user_data.password != user_data.confirm_password {
        return Err(Error::PasswordMismatch);
    }

    let password = ValidatedPassword::new(&user_data.password)?;

    let account = state
        .credentials
        .create_account(
            Registration {
                username: user_data.username.trim().to_owned(),
                email: user_data.email.trim().to_owned(),
                full_name: user_data.full_name.trim().to_owned(),
                password,
                role: Role::User,
            },
            &*state
                .db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?,
        )
        .inspect_err(|error| tracing::warn!("Could not register new account: {error}"))?;

    tracing::info!("Registered account #{}.", account.id);
    let jar = set_auth_cookie(jar, account.id, state.cookie_duration)?;

    Ok((
        StatusCode::CREATED,
        jar,
        Json(LoggedIn {
            account_id: account.id,
        }),
    ))
}
