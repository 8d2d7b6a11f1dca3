#![allow(missing_docs)]

use rusqlite::Connection;

use crate::{
    Error,
    auth::{
        Account, AccountId, AccountRef, NewAccount, PasswordHash, Role, ValidatedPassword,
        insert_account,
    },
    credentials::{CredentialStore, Registration, SQLiteCredentialStore},
};

/// The password of every account made with [insert_test_account].
pub(crate) const TEST_PASSWORD: &str = "averystrongandsecurepassword";

/// Insert an account with the email "`username`@example.com" and the password
/// [TEST_PASSWORD].
#[track_caller]
pub(crate) fn insert_test_account(username: &str, role: Role, connection: &Connection) -> Account {
    insert_account(
        NewAccount {
            username: username.to_owned(),
            email: format!("{username}@example.com"),
            full_name: "Test User".to_owned(),
            password_hash: PasswordHash::from_raw_password(TEST_PASSWORD, 4)
                .expect("Could not hash test password"),
            role,
        },
        connection,
    )
    .expect("Could not create test account")
}

/// A [CredentialStore] that can be told to fail some operations.
///
/// Operations that are not set to fail are passed through to a
/// [SQLiteCredentialStore].
#[derive(Debug)]
pub(crate) struct FailingCredentialStore {
    inner: SQLiteCredentialStore,
    fail_set_password: bool,
    fail_send_reset_link: bool,
}

impl FailingCredentialStore {
    fn new(fail_set_password: bool, fail_send_reset_link: bool) -> Self {
        Self {
            inner: SQLiteCredentialStore::new("http://localhost:3000", 4),
            fail_set_password,
            fail_send_reset_link,
        }
    }

    pub(crate) fn failing_set_password() -> Self {
        Self::new(true, false)
    }

    pub(crate) fn failing_send_reset_link() -> Self {
        Self::new(false, true)
    }
}

impl CredentialStore for FailingCredentialStore {
    fn verify_password(
        &self,
        account_ref: &AccountRef,
        password: &str,
        connection: &Connection,
    ) -> Result<Account, Error> {
        self.inner.verify_password(account_ref, password, connection)
    }

    fn set_password(
        &self,
        account_id: AccountId,
        new_password: &ValidatedPassword,
        connection: &Connection,
    ) -> Result<(), Error> {
        if self.fail_set_password {
            return Err(Error::UpdateFailed("credential store is offline".to_owned()));
        }

        self.inner.set_password(account_id, new_password, connection)
    }

    fn create_account(
        &self,
        registration: Registration,
        connection: &Connection,
    ) -> Result<Account, Error> {
        self.inner.create_account(registration, connection)
    }

    fn send_reset_link(&self, account: &Account, connection: &Connection) -> Result<(), Error> {
        if self.fail_send_reset_link {
            return Err(Error::EmailError("mail queue is offline".to_owned()));
        }

        self.inner.send_reset_link(account, connection)
    }
}
