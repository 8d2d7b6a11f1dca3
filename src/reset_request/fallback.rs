//! The log-in time check that applies an approved reset request.

use rusqlite::Connection;

use crate::{
    Error,
    auth::{AccountRef, ValidatedPassword, resolve_account},
    credentials::CredentialStore,
    reset_request::{
        ResetStatus,
        ledger::{get_latest_reset_request, set_status_if},
    },
};

/// The result of checking a failed log-in against approved reset requests.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    /// Nothing was changed: the account is unknown, has no approved request,
    /// or the password differs from the newest approved request.
    NoMatch,
    /// The password matched the newest approved request. It is now the
    /// account's password and the request is `completed`.
    MatchAndUpdated,
    /// The password matched but the credential store could not be updated.
    /// The request is still `approved`, so the log-in can be retried.
    UpdateFailed(String),
}

/// Check `supplied_password` against the newest `approved` reset request for
/// the account, and apply it if it matches.
///
/// Only the newest approved request counts. Older approved requests and any
/// pending ones are ignored. The password change and the move to
/// `completed` share one transaction.
///
/// The result never says whether a request existed, so callers must not leak
/// the difference between the kinds of [FallbackOutcome::NoMatch].
pub fn fallback_match(
    account_ref: &AccountRef,
    supplied_password: &str,
    credentials: &dyn CredentialStore,
    connection: &mut Connection,
) -> Result<FallbackOutcome, Error> {
    let account = match resolve_account(account_ref, connection) {
        Ok(account) => account,
        Err(Error::AccountNotFound) => return Ok(FallbackOutcome::NoMatch),
        Err(error) => return Err(error),
    };

    let Some(request) = get_latest_reset_request(account.id, ResetStatus::Approved, connection)?
    else {
        return Ok(FallbackOutcome::NoMatch);
    };

    if request.requested_password != supplied_password {
        return Ok(FallbackOutcome::NoMatch);
    }

    let transaction = connection.transaction()?;

    // The password was vetted by an admin when the request was approved.
    let new_password = ValidatedPassword::new_unchecked(supplied_password);
    if let Err(error) = credentials.set_password(account.id, &new_password, &transaction) {
        tracing::error!(
            "Could not apply reset request #{} to account #{}: {error}",
            request.id,
            account.id
        );
        return Ok(FallbackOutcome::UpdateFailed(error.to_string()));
    }

    if !set_status_if(
        request.id,
        ResetStatus::Approved,
        ResetStatus::Completed,
        &transaction,
    )? {
        return Ok(FallbackOutcome::NoMatch);
    }

    transaction.commit()?;
    tracing::info!(
        "Applied reset request #{} to account #{}.",
        request.id,
        account.id
    );

    Ok(FallbackOutcome::MatchAndUpdated)
}
