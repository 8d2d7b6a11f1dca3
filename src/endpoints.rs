//! The API endpoints URIs.

/// The route for logging in a user.
pub const LOG_IN_API: &str = "/api/log_in";
/// The route for the client to log out the current user.
pub const LOG_OUT: &str = "/api/log_out";
/// The route to register new users.
pub const USERS: &str = "/api/users";
/// The route for setting a new password with a reset link token.
pub const PASSWORD_RESET_API: &str = "/api/password_reset";

/// The route for submitting a reset request.
pub const RESET_REQUESTS: &str = "/api/reset_requests";
/// The route for listing pending reset requests.
pub const PENDING_RESET_REQUESTS: &str = "/api/reset_requests/pending";
/// The route for approving a reset request.
pub const APPROVE_RESET_REQUEST: &str = "/api/reset_requests/approve";
/// The route for denying a reset request.
pub const DENY_RESET_REQUEST: &str = "/api/reset_requests/deny";
/// The route for admins to record an approved reset request for a user.
pub const MANUAL_RESET_REQUEST: &str = "/api/reset_requests/manual";
/// The route for checking a password against the newest approved reset request.
pub const FALLBACK_MATCH: &str = "/api/reset_requests/fallback_match";

/// The path a reset link opens, relative to the public base URL.
pub const RESET_PASSWORD_VIEW: &str = "/reset_password";
