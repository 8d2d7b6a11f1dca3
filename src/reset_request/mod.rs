//! Password reset requests that an admin approves before they take effect.
//!
//! A request records the password the user wants. Approving it sends the user
//! a reset link, and the next log-in with the requested password applies it
//! (see [fallback_match]).

mod fallback;
mod handlers;
mod ledger;
mod models;
mod workflow;

pub use fallback::{FallbackOutcome, fallback_match};
pub use handlers::{
    approve_reset_request_endpoint, create_manual_reset_request_endpoint,
    deny_reset_request_endpoint, fallback_match_endpoint, get_pending_reset_requests_endpoint,
    submit_reset_request_endpoint,
};
pub use ledger::{complete_approved_reset_requests, create_reset_request_table};
pub use models::{
    NewResetRequest, ResetRequest, ResetRequestId, ResetRequestView, ResetStatus, SubmittedVia,
};

#[cfg(test)]
pub use ledger::get_reset_request;
#[cfg(test)]
pub use workflow::create_manual_reset_request;
