//! SpendWise is a personal finance app. This library provides its password
//! reset service.
//!
//! Users who cannot log in submit a reset request with the password they
//! want. An admin approves or denies it. Once approved, the user receives a
//! reset link by email and can also log in with the requested password, which
//! is then applied to the account.
//!
//! The library exposes a JSON REST API, see [build_router].

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use serde::{Deserialize, Serialize};
use tokio::signal;

mod app_state;
mod auth;
mod credentials;
mod db;
mod endpoints;
mod error;
mod logging;
mod mailer;
mod reset_request;
mod retry;
mod routing;
#[cfg(test)]
mod test_utils;

pub use app_state::AppState;
pub use auth::{
    Account, AccountId, AccountRef, Caller, PasswordHash, Role, ValidatedPassword,
    count_accounts_with_role,
};
pub use credentials::{CredentialStore, Registration, SQLiteCredentialStore};
pub use db::initialize as initialize_db;
pub use error::{Error, ErrorBody};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use mailer::{Mailer, run_outbox_worker};
pub use reset_request::{
    FallbackOutcome, ResetRequest, ResetRequestId, ResetRequestView, ResetStatus, SubmittedVia,
};
pub use retry::RetryPolicy;
pub use routing::build_router;

/// The body of a response to a request that succeeded but has nothing else
/// to report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acknowledged {
    /// Always `true`.
    pub ok: bool,
}

impl Default for Acknowledged {
    fn default() -> Self {
        Self { ok: true }
    }
}

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("Failed to install signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
