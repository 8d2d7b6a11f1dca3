use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::{
        Account, AccountId, AccountRef, NewAccount, PasswordHash, ValidatedPassword,
        insert_account, resolve_account, update_password_hash,
    },
    credentials::{CredentialStore, Registration, issue_reset_token},
    endpoints::RESET_PASSWORD_VIEW,
    mailer::{NewEmail, queue_email},
};

/// The subject line of password reset emails.
pub const RESET_EMAIL_SUBJECT: &str = "Reset your SpendWise password";

/// A [CredentialStore] that keeps bcrypt hashes in the account table.
#[derive(Debug, Clone)]
pub struct SQLiteCredentialStore {
    hash_cost: u32,
    reset_link_base_url: String,
}

impl SQLiteCredentialStore {
    /// Create a store that hashes with `hash_cost` and builds reset links on
    /// top of `reset_link_base_url`, e.g. "https://spendwise.example.com".
    pub fn new(reset_link_base_url: &str, hash_cost: u32) -> Self {
        Self {
            hash_cost,
            reset_link_base_url: reset_link_base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn reset_link(&self, token: &str) -> String {
        format!(
            "{}{RESET_PASSWORD_VIEW}?token={token}",
            self.reset_link_base_url
        )
    }
}

impl CredentialStore for SQLiteCredentialStore {
    fn verify_password(
        &self,
        account_ref: &AccountRef,
        password: &str,
        connection: &Connection,
    ) -> Result<Account, Error> {
        let account = match resolve_account(account_ref, connection) {
            Ok(account) => account,
            Err(Error::AccountNotFound) => return Err(Error::InvalidCredentials),
            Err(error) => return Err(error),
        };

        match account.password_hash.verify(password) {
            Ok(true) => Ok(account),
            Ok(false) => Err(Error::InvalidCredentials),
            Err(error) => Err(Error::HashingError(error.to_string())),
        }
    }

    fn set_password(
        &self,
        account_id: AccountId,
        new_password: &ValidatedPassword,
        connection: &Connection,
    ) -> Result<(), Error> {
        let password_hash = PasswordHash::new(new_password, self.hash_cost)?;

        update_password_hash(account_id, &password_hash, connection)
    }

    fn create_account(
        &self,
        registration: Registration,
        connection: &Connection,
    ) -> Result<Account, Error> {
        let username = registration.username.trim();
        if username.is_empty() || username.contains('@') {
            return Err(Error::InvalidUsername(registration.username));
        }

        if registration.email.trim().parse::<lettre::Address>().is_err() {
            return Err(Error::InvalidEmail(registration.email));
        }

        let password_hash = PasswordHash::new(&registration.password, self.hash_cost)?;

        insert_account(
            NewAccount {
                username: registration.username,
                email: registration.email,
                full_name: registration.full_name,
                password_hash,
                role: registration.role,
            },
            connection,
        )
    }

    fn send_reset_link(&self, account: &Account, connection: &Connection) -> Result<(), Error> {
        let token = issue_reset_token(account.id, OffsetDateTime::now_utc(), connection)?;
        let link = self.reset_link(&token);

        queue_email(
            NewEmail {
                recipient: account.email.clone(),
                subject: RESET_EMAIL_SUBJECT.to_owned(),
                body: format!(
                    "Hi {},\n\n\
                    Your password reset request has been approved. You can now log in with the \
                    password you asked for, or choose a different one here:\n\n\
                    {link}\n\n\
                    The link expires in one hour. If you did not ask to reset your password, \
                    contact an administrator.",
                    account.full_name
                ),
            },
            connection,
        )?;

        tracing::info!("Queued password reset link for account #{}.", account.id);

        Ok(())
    }
}
