//! The transitions of the reset request state machine.
//!
//! Each function here is the single place its transition happens. They take
//! the resolved [Caller] explicitly and run synchronously on a connection,
//! so the HTTP handlers are thin wrappers and the rules can be tested without
//! a server.

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::{AccountRef, Caller, resolve_account},
    credentials::CredentialStore,
    reset_request::{
        NewResetRequest, ResetRequest, ResetRequestId, ResetStatus, SubmittedVia,
        ledger::{
            get_reset_request, get_reset_requests_by_status, insert_reset_request, set_status_if,
        },
    },
};

/// A reset request as entered by the account holder.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The account the new password is for.
    pub account_ref: AccountRef,
    /// The username the requester typed, if any.
    pub username: Option<String>,
    /// The email the requester typed, if any.
    pub email: Option<String>,
    /// The name the requester gave.
    pub full_name: String,
    /// The password the requester wants.
    pub requested_password: String,
}

/// Record a self-service reset request in the `pending` state.
///
/// Nothing changes in the credential store until an admin approves the
/// request and the user logs in with the requested password.
///
/// # Errors
///
/// Returns [Error::AccountNotFound] if the account reference does not resolve.
pub fn submit_reset_request(
    caller: &Caller,
    submission: Submission,
    connection: &Connection,
) -> Result<ResetRequest, Error> {
    let account = resolve_account(&submission.account_ref, connection)?;

    let non_blank = |value: Option<String>, fallback: &str| {
        value
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| fallback.to_owned())
    };

    let request = insert_reset_request(
        NewResetRequest {
            account_id: account.id,
            requester_username: non_blank(submission.username, &account.username),
            requester_full_name: submission.full_name.trim().to_owned(),
            requester_email: non_blank(submission.email, &account.email),
            requested_password: submission.requested_password,
            status: ResetStatus::Pending,
            submitted_via: SubmittedVia::SelfService,
            created_at: OffsetDateTime::now_utc(),
        },
        connection,
    )?;

    tracing::info!(
        "{caller} submitted reset request #{} for account #{}.",
        request.id,
        account.id
    );

    Ok(request)
}

/// Record a reset request on behalf of a user, already `approved`.
///
/// Used by admins who have verified the user some other way. The user can
/// log in with `new_password` straight away.
///
/// # Errors
///
/// Returns [Error::Forbidden] if the caller is not an admin, or
/// [Error::AccountNotFound] if the account reference does not resolve.
pub fn create_manual_reset_request(
    caller: &Caller,
    account_ref: &AccountRef,
    new_password: &str,
    connection: &Connection,
) -> Result<ResetRequest, Error> {
    caller.require_admin()?;
    let account = resolve_account(account_ref, connection)?;

    let request = insert_reset_request(
        NewResetRequest {
            account_id: account.id,
            requester_username: account.username,
            requester_full_name: account.full_name,
            requester_email: account.email,
            requested_password: new_password.to_owned(),
            status: ResetStatus::Approved,
            submitted_via: SubmittedVia::Manual,
            created_at: OffsetDateTime::now_utc(),
        },
        connection,
    )?;

    tracing::info!(
        "{caller} created approved reset request #{} for account #{}.",
        request.id,
        account.id
    );

    Ok(request)
}

/// Approve a pending request and send the account holder a reset link.
///
/// The status change and the reset link share one transaction: if the link
/// cannot be sent the request stays `pending`. The status change only applies
/// to a `pending` request, so two admins approving at once send one link.
///
/// # Errors
///
/// - [Error::Forbidden] if the caller is not an admin.
/// - [Error::NotFound] if there is no such request.
/// - [Error::InvalidState] if the request is not `pending`.
/// - [Error::AccountNotFound] if the request's account no longer exists.
/// - [Error::DispatchFailed] if the reset link could not be sent.
pub fn approve_reset_request(
    caller: &Caller,
    request_id: ResetRequestId,
    credentials: &dyn CredentialStore,
    connection: &mut Connection,
) -> Result<ResetRequest, Error> {
    caller.require_admin()?;

    let transaction = connection.transaction()?;
    transition(
        request_id,
        ResetStatus::Pending,
        ResetStatus::Approved,
        &transaction,
    )?;

    let request = get_reset_request(request_id, &transaction)?;
    let account = resolve_account(&AccountRef::Id(request.account_id), &transaction)?;

    credentials
        .send_reset_link(&account, &transaction)
        .map_err(|error| {
            tracing::error!("Could not send reset link for request #{request_id}: {error}");
            Error::DispatchFailed(error.to_string())
        })?;

    transaction.commit()?;
    tracing::info!("{caller} approved reset request #{request_id}.");

    Ok(request)
}

/// Deny a pending request. The credential store is not touched.
///
/// # Errors
///
/// Returns [Error::Forbidden] if the caller is not an admin,
/// [Error::NotFound] if there is no such request, or [Error::InvalidState] if
/// the request is not `pending`.
pub fn deny_reset_request(
    caller: &Caller,
    request_id: ResetRequestId,
    connection: &Connection,
) -> Result<ResetRequest, Error> {
    caller.require_admin()?;

    transition(
        request_id,
        ResetStatus::Pending,
        ResetStatus::Denied,
        connection,
    )?;
    tracing::info!("{caller} denied reset request #{request_id}.");

    get_reset_request(request_id, connection)
}

/// Get the pending requests, newest first.
///
/// # Errors
///
/// Returns [Error::Forbidden] if the caller is not an admin.
pub fn list_pending_reset_requests(
    caller: &Caller,
    connection: &Connection,
) -> Result<Vec<ResetRequest>, Error> {
    caller.require_admin()?;

    get_reset_requests_by_status(ResetStatus::Pending, connection)
}

/// Apply `from -> to`, or explain why it could not be applied.
fn transition(
    request_id: ResetRequestId,
    from: ResetStatus,
    to: ResetStatus,
    connection: &Connection,
) -> Result<(), Error> {
    if set_status_if(request_id, from, to, connection)? {
        return Ok(());
    }

    let current = get_reset_request(request_id, connection)?;

    Err(Error::InvalidState {
        request_id,
        status: current.status,
    })
}
