//! The credential store, the system of record for login passwords.
//!
//! The reset workflow only talks to passwords through the [CredentialStore]
//! trait. Every method takes the connection to run on so callers can group
//! credential changes with their own writes in one transaction.

mod reset_link;
mod sqlite;

use std::fmt::Debug;

use rusqlite::Connection;

use crate::{
    Error,
    auth::{Account, AccountId, AccountRef, Role, ValidatedPassword},
};

pub use reset_link::{create_reset_token_table, issue_reset_token, redeem_reset_link};
pub use sqlite::SQLiteCredentialStore;

/// The details needed to register a new account.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Must be unique across accounts.
    pub username: String,
    /// Must be unique across accounts.
    pub email: String,
    /// The name shown to admins reviewing reset requests.
    pub full_name: String,
    #[allow(missing_docs)]
    pub password: ValidatedPassword,
    /// Whether the account may review reset requests.
    pub role: Role,
}

/// Verifies and changes login passwords.
pub trait CredentialStore: Debug + Send + Sync {
    /// Check `password` against the account that `account_ref` refers to.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidCredentials] if the account does not exist or
    /// the password is wrong, so callers cannot tell the two apart.
    fn verify_password(
        &self,
        account_ref: &AccountRef,
        password: &str,
        connection: &Connection,
    ) -> Result<Account, Error>;

    /// Replace the password for `account_id`.
    fn set_password(
        &self,
        account_id: AccountId,
        new_password: &ValidatedPassword,
        connection: &Connection,
    ) -> Result<(), Error>;

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidUsername] if the username is blank or contains
    /// '@', since it could then be mistaken for an email. Returns
    /// [Error::DuplicateUsername] or [Error::DuplicateEmail] if the username
    /// or email is taken.
    fn create_account(
        &self,
        registration: Registration,
        connection: &Connection,
    ) -> Result<Account, Error>;

    /// Queue an email to `account` with a single-use link for setting a new
    /// password.
    fn send_reset_link(&self, account: &Account, connection: &Connection) -> Result<(), Error>;
}
