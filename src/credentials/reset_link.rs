//! Single-use password reset links.
//!
//! Only the SHA-256 hash of each token is stored, so a leaked database does
//! not leak working links.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
};
use rand::{Rng, distr::Alphanumeric};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::{
    Acknowledged, AppState, Error,
    auth::{AccountId, ValidatedPassword},
    credentials::CredentialStore,
    reset_request::complete_approved_reset_requests,
};

/// The number of characters in a reset token.
pub const RESET_TOKEN_LENGTH: usize = 48;
/// How long a reset link stays valid.
pub const RESET_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Create the table of issued reset tokens.
pub fn create_reset_token_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS reset_token (
            token_hash TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            used_at INTEGER,
            FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE CASCADE
        );",
    )?;

    Ok(())
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Create a new reset token for `account_id`, valid for [RESET_TOKEN_LIFETIME]
/// from `now`, and return the raw token.
pub fn issue_reset_token(
    account_id: AccountId,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<String, Error> {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect();

    connection.execute(
        "INSERT INTO reset_token (token_hash, account_id, expires_at) VALUES (?1, ?2, ?3)",
        (
            hash_token(&token),
            account_id.as_i64(),
            (now + RESET_TOKEN_LIFETIME).unix_timestamp(),
        ),
    )?;

    Ok(token)
}

/// Use up `token` and return the account it was issued for.
///
/// # Errors
///
/// Returns [Error::InvalidResetToken] if the token is unknown, expired or has
/// already been used.
pub fn redeem_reset_token(
    token: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<AccountId, Error> {
    let account_id: Option<i64> = connection
        .query_row(
            "UPDATE reset_token SET used_at = ?1
            WHERE token_hash = ?2 AND used_at IS NULL AND expires_at > ?1
            RETURNING account_id",
            (now.unix_timestamp(), hash_token(token.trim())),
            |row| row.get(0),
        )
        .optional()?;

    account_id
        .map(AccountId::new)
        .ok_or(Error::InvalidResetToken)
}

/// The state needed to redeem a reset link.
#[derive(Debug, Clone)]
pub struct PasswordResetState {
    pub db_connection: Arc<Mutex<Connection>>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for PasswordResetState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            credentials: state.credentials.clone(),
        }
    }
}

/// The form sent from the page a reset link opens.
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordResetData {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

/// Handler for setting a new password with a reset link token.
///
/// Any approved reset requests for the account are marked `completed`, so the
/// password they requested can no longer be used to log in.
///
/// # Errors
///
/// Fails with [Error::PasswordMismatch] or [Error::TooWeak] for bad
/// passwords, and [Error::InvalidResetToken] for unusable tokens.
pub async fn redeem_reset_link(
    State(state): State<PasswordResetState>,
    Json(data): Json<PasswordResetData>,
) -> Result<Json<Acknowledged>, Error> {
    if data.password != data.confirm_password {
        return Err(Error::PasswordMismatch);
    }

    let password = ValidatedPassword::new(&data.password)?;

    let mut connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let transaction = connection.transaction()?;

    let account_id = redeem_reset_token(&data.token, OffsetDateTime::now_utc(), &transaction)?;
    state
        .credentials
        .set_password(account_id, &password, &transaction)?;
    // The password chosen here replaces any requested password still waiting
    // to be applied at log-in.
    let completed = complete_approved_reset_requests(account_id, &transaction)?;

    transaction.commit()?;
    tracing::info!(
        "Password for account #{account_id} was reset with a reset link, completing {completed} \
        approved reset request(s)."
    );

    Ok(Json(Acknowledged::default()))
}
