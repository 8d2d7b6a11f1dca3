//! Code for creating the account table and resolving accounts from the
//! username, email or ID a client supplies.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{Error, auth::PasswordHash};

/// A newtype wrapper for integer account IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct AccountId(i64);

impl AccountId {
    /// Create a new account ID.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the account ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What an account is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A regular user managing their own finances.
    User,
    /// A user who may also review password reset requests.
    Admin,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role \"{other}\"")),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: String| FromSqlError::Other(error.into()))
    }
}

/// A registered account in the credential store's identity table.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The account's ID in the application database.
    pub id: AccountId,
    /// The unique name the user logs in with.
    pub username: String,
    /// The address reset links are sent to.
    pub email: String,
    /// The user's full name.
    pub full_name: String,
    /// The account's password hash.
    pub password_hash: PasswordHash,
    /// What the account is allowed to do.
    pub role: Role,
}

/// The data needed to register a new account.
#[derive(Debug, Clone)]
///
/// The fields mirror [Account], minus the ID which the database assigns.
#[allow(missing_docs)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: PasswordHash,
    pub role: Role,
}

/// The ways a client may refer to an account.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountRef {
    /// The account's database ID.
    Id(AccountId),
    /// The account's unique username. Never contains '@'.
    Username(String),
    /// The account's unique email address.
    Email(String),
}

impl AccountRef {
    /// Interpret a single identity string, as typed into a log-in form.
    ///
    /// Anything containing an '@' is treated as an email address.
    pub fn from_identity(identity: &str) -> Self {
        let identity = identity.trim();

        if identity.contains('@') {
            AccountRef::Email(identity.to_owned())
        } else {
            AccountRef::Username(identity.to_owned())
        }
    }

    /// Build a reference from optional username and email fields, preferring
    /// the username when both are given.
    ///
    /// Returns `None` if neither field holds a non-blank value.
    pub fn from_username_or_email(username: Option<&str>, email: Option<&str>) -> Option<Self> {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        non_blank(username)
            .map(AccountRef::Username)
            .or_else(|| non_blank(email).map(AccountRef::Email))
    }
}

impl Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRef::Id(id) => write!(f, "account #{id}"),
            AccountRef::Username(username) => write!(f, "username \"{username}\""),
            AccountRef::Email(email) => write!(f, "email \"{email}\""),
        }
    }
}

/// Create the account table.
///
/// Usernames and emails are unique regardless of case.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            full_name TEXT NOT NULL,
            password TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user'
        );",
    )?;

    Ok(())
}

/// Insert a new account into the database.
///
/// # Errors
///
/// Returns [Error::DuplicateUsername] or [Error::DuplicateEmail] if either is
/// already registered, or [Error::SqlError] for other SQL errors.
pub fn insert_account(new_account: NewAccount, connection: &Connection) -> Result<Account, Error> {
    let result = connection.execute(
        "INSERT INTO account (username, email, full_name, password, role)
        VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            new_account.username.trim(),
            new_account.email.trim(),
            new_account.full_name.trim(),
            new_account.password_hash.as_ref(),
            new_account.role,
        ),
    );

    match result {
        Ok(_) => {}
        // Code 2067 occurs when a UNIQUE constraint failed.
        Err(rusqlite::Error::SqliteFailure(sql_error, Some(ref desc)))
            if sql_error.extended_code == 2067 && desc.ends_with("account.username") =>
        {
            return Err(Error::DuplicateUsername(new_account.username));
        }
        Err(rusqlite::Error::SqliteFailure(sql_error, Some(ref desc)))
            if sql_error.extended_code == 2067 && desc.ends_with("account.email") =>
        {
            return Err(Error::DuplicateEmail(new_account.email));
        }
        Err(error) => return Err(error.into()),
    }

    Ok(Account {
        id: AccountId::new(connection.last_insert_rowid()),
        username: new_account.username.trim().to_owned(),
        email: new_account.email.trim().to_owned(),
        full_name: new_account.full_name.trim().to_owned(),
        password_hash: new_account.password_hash,
        role: new_account.role,
    })
}

const SELECT_ACCOUNT: &str = "SELECT id, username, email, full_name, password, role FROM account";

/// Get the account with an ID equal to `account_id`.
///
/// # Errors
///
/// Returns [Error::NotFound] if there is no such account.
pub fn get_account_by_id(account_id: AccountId, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(&format!("{SELECT_ACCOUNT} WHERE id = :id"))?
        .query_row(&[(":id", &account_id.as_i64())], map_row)
        .map_err(|error| error.into())
}

/// Get the account registered under `username`, ignoring case.
pub fn get_account_by_username(username: &str, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(&format!("{SELECT_ACCOUNT} WHERE username = :username"))?
        .query_row(&[(":username", username.trim())], map_row)
        .map_err(|error| error.into())
}

/// Get the account registered under `email`, ignoring case.
pub fn get_account_by_email(email: &str, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(&format!("{SELECT_ACCOUNT} WHERE email = :email"))?
        .query_row(&[(":email", email.trim())], map_row)
        .map_err(|error| error.into())
}

/// Resolve `account_ref` to the canonical account.
///
/// # Errors
///
/// Returns [Error::AccountNotFound] if no account matches.
pub fn resolve_account(
    account_ref: &AccountRef,
    connection: &Connection,
) -> Result<Account, Error> {
    let result = match account_ref {
        AccountRef::Id(id) => get_account_by_id(*id, connection),
        AccountRef::Username(username) => get_account_by_username(username, connection),
        AccountRef::Email(email) => get_account_by_email(email, connection),
    };

    match result {
        Err(Error::NotFound) => Err(Error::AccountNotFound),
        other => other,
    }
}

/// Replace the password hash for `account_id`.
///
/// # Errors
///
/// Returns [Error::UpdateMissingAccount] if the account does not exist.
pub fn update_password_hash(
    account_id: AccountId,
    password_hash: &PasswordHash,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE account SET password = ?1 WHERE id = ?2",
        (password_hash.as_ref(), account_id.as_i64()),
    )?;

    if rows_affected != 1 {
        return Err(Error::UpdateMissingAccount);
    }

    Ok(())
}

/// Get the number of accounts with the given role.
pub fn count_accounts_with_role(role: Role, connection: &Connection) -> Result<usize, Error> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(id) FROM account WHERE role = ?1",
        [role],
        |row| row.get(0),
    )?;

    // COUNT is never negative.
    Ok(usize::try_from(count).unwrap_or_default())
}

fn map_row(row: &Row) -> Result<Account, rusqlite::Error> {
    let raw_password_hash: String = row.get(4)?;

    Ok(Account {
        id: AccountId::new(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        role: row.get(5)?,
    })
}
