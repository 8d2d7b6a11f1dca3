//! Defines the app level error type and its conversion into JSON error responses.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::reset_request::{ResetRequestId, ResetStatus};

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The user provided an invalid combination of identity and password.
    #[error("incorrect username, email or password")]
    InvalidCredentials,

    /// The session cookie is missing, cannot be decrypted or has expired.
    #[error("no valid session cookie in the cookie jar")]
    CookieMissing,

    /// The session token could not be written to or read from the cookie.
    #[error("could not encode the session token: {0}")]
    SessionError(String),

    /// The caller does not have permission to perform the action, e.g., a
    /// non-admin trying to approve a reset request.
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// The password and confirmation password did not match.
    #[error("passwords do not match")]
    PasswordMismatch,

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    /// When communicating with the application client this error should be
    /// replaced with a general error type indicating an internal server error.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// The username, email or account ID given for a reset request does not
    /// belong to a registered account.
    #[error("no account matches the given username or email")]
    AccountNotFound,

    /// A reset request transition was attempted from a state that does not
    /// allow it, e.g., approving a request that has already been denied.
    ///
    /// This usually means the client is showing stale data.
    #[error("reset request {request_id} is {status} and can no longer be changed this way")]
    InvalidState {
        /// The request the transition was attempted on.
        request_id: ResetRequestId,
        /// The status the request was in when the transition was attempted.
        status: ResetStatus,
    },

    /// The reset-link email could not be queued. The reset request was left
    /// unchanged and the caller may retry.
    #[error("could not send the password reset link: {0}")]
    DispatchFailed(String),

    /// The credential store could not update a password. The caller may retry.
    #[error("could not update the password: {0}")]
    UpdateFailed(String),

    /// The reset-link token is unknown, expired or has already been used.
    #[error("the password reset link is invalid or has expired")]
    InvalidResetToken,

    /// The username is already taken by another account.
    #[error("the username \"{0}\" is already taken")]
    DuplicateUsername(String),

    /// The email is already registered to another account.
    #[error("the email \"{0}\" is already registered")]
    DuplicateEmail(String),

    /// The username is blank or looks like an email address. Identities
    /// containing '@' are always looked up by email.
    #[error("\"{0}\" is not a valid username, usernames must not be blank or contain '@'")]
    InvalidUsername(String),

    /// The string is not a valid email address.
    #[error("\"{0}\" is not a valid email address")]
    InvalidEmail(String),

    /// An email could not be delivered.
    #[error("could not deliver email: {0}")]
    EmailError(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Tried to update an account that does not exist.
    #[error("tried to update an account that is not in the database")]
    UpdateMissingAccount,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl Error {
    /// Whether the failed operation may succeed if it is attempted again
    /// without any change to its inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DispatchFailed(_)
                | Error::UpdateFailed(_)
                | Error::EmailError(_)
                | Error::DatabaseLockError
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidCredentials | Error::CookieMissing => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::TooWeak(_)
            | Error::PasswordMismatch
            | Error::InvalidUsername(_)
            | Error::InvalidEmail(_)
            | Error::InvalidResetToken => StatusCode::BAD_REQUEST,
            Error::AccountNotFound | Error::NotFound => StatusCode::NOT_FOUND,
            Error::InvalidState { .. }
            | Error::DuplicateUsername(_)
            | Error::DuplicateEmail(_) => StatusCode::CONFLICT,
            Error::DispatchFailed(_) | Error::UpdateFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::HashingError(_)
            | Error::SessionError(_)
            | Error::EmailError(_)
            | Error::UpdateMissingAccount
            | Error::SqlError(_)
            | Error::DatabaseLockError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

/// The JSON body sent to the client when a request fails.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// A message that can be shown to the user.
    pub error: String,
    /// Whether the client may retry the same request.
    pub retryable: bool,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        // Internal details are logged, not shown to the client.
        let message = if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
            "An unexpected error occurred, check the server logs for more details.".to_owned()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: message,
            retryable: self.is_retryable(),
        };

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod error_response_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::reset_request::{ResetRequestId, ResetStatus};

    use super::{Error, ErrorBody};

    async fn parse_body(error: Error) -> (StatusCode, ErrorBody) {
        let response = error.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Could not read response body");

        (
            status,
            serde_json::from_slice(&body).expect("Could not parse error body"),
        )
    }

    #[tokio::test]
    async fn invalid_state_is_conflict() {
        let (status, body) = parse_body(Error::InvalidState {
            request_id: ResetRequestId::new(7),
            status: ResetStatus::Denied,
        })
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body.error,
            "reset request 7 is denied and can no longer be changed this way"
        );
        assert!(!body.retryable);
    }

    #[tokio::test]
    async fn dispatch_failed_is_retryable() {
        let (status, body) = parse_body(Error::DispatchFailed("smtp down".to_owned())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.retryable);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = parse_body(Error::HashingError("bad salt".to_owned())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.error.contains("bad salt"));
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let error: Error = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(error, Error::NotFound);
    }
}
