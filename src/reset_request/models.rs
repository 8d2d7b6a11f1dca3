//! The reset request record and its status values.

use std::fmt::Display;

use rusqlite::{
    Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::AccountId;

/// A newtype wrapper for integer reset request IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct ResetRequestId(i64);

impl ResetRequestId {
    /// Create a new reset request ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the reset request ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for ResetRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a reset request is in the approval process.
///
/// Requests move from `Pending` to `Approved` or `Denied`, and from `Approved`
/// to `Completed`. `Denied` and `Completed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStatus {
    /// Waiting for an admin to review the request.
    Pending,
    /// Approved by an admin, waiting for the user to log in with the new password.
    Approved,
    /// Rejected by an admin.
    Denied,
    /// The requested password has been applied to the account.
    Completed,
}

impl ResetStatus {
    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetStatus::Pending => "pending",
            ResetStatus::Approved => "approved",
            ResetStatus::Denied => "denied",
            ResetStatus::Completed => "completed",
        }
    }
}

impl Display for ResetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ResetStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ResetStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(ResetStatus::Pending),
            "approved" => Ok(ResetStatus::Approved),
            "denied" => Ok(ResetStatus::Denied),
            "completed" => Ok(ResetStatus::Completed),
            other => Err(FromSqlError::Other(
                format!("unknown reset status \"{other}\"").into(),
            )),
        }
    }
}

/// How a reset request entered the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmittedVia {
    /// Submitted by the account holder through the reset request form.
    SelfService,
    /// Entered directly by an admin, e.g. after a phone call.
    Manual,
}

impl SubmittedVia {
    fn as_str(&self) -> &'static str {
        match self {
            SubmittedVia::SelfService => "self_service",
            SubmittedVia::Manual => "manual",
        }
    }
}

impl ToSql for SubmittedVia {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SubmittedVia {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "self_service" => Ok(SubmittedVia::SelfService),
            "manual" => Ok(SubmittedVia::Manual),
            other => Err(FromSqlError::Other(
                format!("unknown submission channel \"{other}\"").into(),
            )),
        }
    }
}

/// A request to change an account's password to `requested_password`.
///
/// Everything except `status` is fixed once the request is created.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetRequest {
    /// The request's ID in the application database.
    pub id: ResetRequestId,
    /// The account the request applies to.
    pub account_id: AccountId,
    /// The username the requester gave, kept for the audit trail.
    pub requester_username: String,
    /// The full name the requester gave.
    pub requester_full_name: String,
    /// The email the requester gave.
    pub requester_email: String,
    /// The plaintext password the requester wants. Never sent back to clients.
    pub requested_password: String,
    /// Where the request is in its review.
    pub status: ResetStatus,
    /// Whether the user or an admin created the request.
    pub submitted_via: SubmittedVia,
    /// When the request was recorded. The newest approved request wins.
    pub created_at: OffsetDateTime,
}

impl ResetRequest {
    pub(super) fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: ResetRequestId::new(row.get(0)?),
            account_id: AccountId::new(row.get(1)?),
            requester_username: row.get(2)?,
            requester_full_name: row.get(3)?,
            requester_email: row.get(4)?,
            requested_password: row.get(5)?,
            status: row.get(6)?,
            submitted_via: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

/// The data needed to record a new reset request.
///
/// The fields mean the same as in [ResetRequest].
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct NewResetRequest {
    pub account_id: AccountId,
    pub requester_username: String,
    pub requester_full_name: String,
    pub requester_email: String,
    pub requested_password: String,
    pub status: ResetStatus,
    pub submitted_via: SubmittedVia,
    pub created_at: OffsetDateTime,
}

/// A reset request as shown to admins.
///
/// The requested password is left out. The other fields are copied from
/// [ResetRequest].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ResetRequestView {
    pub id: ResetRequestId,
    pub account_id: AccountId,
    pub requester_username: String,
    pub requester_full_name: String,
    pub requester_email: String,
    pub status: ResetStatus,
    pub submitted_via: SubmittedVia,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

impl From<ResetRequest> for ResetRequestView {
    fn from(request: ResetRequest) -> Self {
        Self {
            id: request.id,
            account_id: request.account_id,
            requester_username: request.requester_username,
            requester_full_name: request.requester_full_name,
            requester_email: request.requester_email,
            status: request.status,
            submitted_via: request.submitted_via,
            created_at: request.created_at,
        }
    }
}
