//! Storage for reset requests.
//!
//! Rows are never deleted. After insertion only the status column changes,
//! and only through [set_status_if].

use rusqlite::{Connection, OptionalExtension};

use crate::{
    Error,
    auth::AccountId,
    reset_request::{NewResetRequest, ResetRequest, ResetRequestId, ResetStatus},
};

/// Create the reset request table.
pub fn create_reset_request_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS reset_request (
            id INTEGER PRIMARY KEY,
            account_id INTEGER NOT NULL,
            requester_username TEXT NOT NULL,
            requester_full_name TEXT NOT NULL,
            requester_email TEXT NOT NULL,
            requested_password TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_via TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(account_id) REFERENCES account(id)
        );

        CREATE INDEX IF NOT EXISTS idx_reset_request_account_status
        ON reset_request(account_id, status, created_at);",
    )?;

    Ok(())
}

const SELECT_RESET_REQUEST: &str = "SELECT id, account_id, requester_username, \
    requester_full_name, requester_email, requested_password, status, submitted_via, created_at \
    FROM reset_request";

/// Record a new reset request.
pub fn insert_reset_request(
    new_request: NewResetRequest,
    connection: &Connection,
) -> Result<ResetRequest, Error> {
    connection.execute(
        "INSERT INTO reset_request (account_id, requester_username, requester_full_name,
            requester_email, requested_password, status, submitted_via, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            new_request.account_id.as_i64(),
            &new_request.requester_username,
            &new_request.requester_full_name,
            &new_request.requester_email,
            &new_request.requested_password,
            new_request.status,
            new_request.submitted_via,
            new_request.created_at,
        ),
    )?;

    Ok(ResetRequest {
        id: ResetRequestId::new(connection.last_insert_rowid()),
        account_id: new_request.account_id,
        requester_username: new_request.requester_username,
        requester_full_name: new_request.requester_full_name,
        requester_email: new_request.requester_email,
        requested_password: new_request.requested_password,
        status: new_request.status,
        submitted_via: new_request.submitted_via,
        created_at: new_request.created_at,
    })
}

/// Get the reset request with the ID `request_id`.
///
/// # Errors
///
/// Returns [Error::NotFound] if there is no such request.
pub fn get_reset_request(
    request_id: ResetRequestId,
    connection: &Connection,
) -> Result<ResetRequest, Error> {
    connection
        .prepare(&format!("{SELECT_RESET_REQUEST} WHERE id = :id"))?
        .query_row(&[(":id", &request_id.as_i64())], ResetRequest::map_row)
        .map_err(|error| error.into())
}

/// Move the request `request_id` from status `from` to status `to`.
///
/// The update only applies if the request is currently in `from`, which makes
/// concurrent transitions on the same request safe. Returns whether the update
/// was applied.
pub fn set_status_if(
    request_id: ResetRequestId,
    from: ResetStatus,
    to: ResetStatus,
    connection: &Connection,
) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "UPDATE reset_request SET status = ?1 WHERE id = ?2 AND status = ?3",
        (to, request_id.as_i64(), from),
    )?;

    Ok(rows_affected == 1)
}

/// Move every `approved` request for `account_id` to `completed`, returning
/// how many were changed.
///
/// Used when the account's password is set some other way, so that no
/// approved request can later overwrite it.
pub fn complete_approved_reset_requests(
    account_id: AccountId,
    connection: &Connection,
) -> Result<usize, Error> {
    let rows_affected = connection.execute(
        "UPDATE reset_request SET status = ?1 WHERE account_id = ?2 AND status = ?3",
        (
            ResetStatus::Completed,
            account_id.as_i64(),
            ResetStatus::Approved,
        ),
    )?;

    Ok(rows_affected)
}

/// Get the requests with the status `status`, newest first.
pub fn get_reset_requests_by_status(
    status: ResetStatus,
    connection: &Connection,
) -> Result<Vec<ResetRequest>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_RESET_REQUEST} WHERE status = :status ORDER BY created_at DESC, id DESC"
        ))?
        .query_map(&[(":status", &status)], ResetRequest::map_row)?
        .map(|maybe_request| maybe_request.map_err(Error::from))
        .collect()
}

/// Get the newest request for `account_id` with the status `status`.
///
/// Ties on `created_at` go to the request with the highest ID.
pub fn get_latest_reset_request(
    account_id: AccountId,
    status: ResetStatus,
    connection: &Connection,
) -> Result<Option<ResetRequest>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_RESET_REQUEST} WHERE account_id = :account_id AND status = :status
            ORDER BY created_at DESC, id DESC LIMIT 1"
        ))?
        .query_row(
            rusqlite::named_params! {
                ":account_id": account_id.as_i64(),
                ":status": status,
            },
            ResetRequest::map_row,
        )
        .optional()
        .map_err(|error| error.into())
}
