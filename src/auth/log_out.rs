//! Log-out route handler that invalidates the authentication cookie.

use axum::Json;
use axum_extra::extract::PrivateCookieJar;

use crate::{Acknowledged, auth::invalidate_auth_cookie};

/// Invalidate the auth cookie.
pub async fn post_log_out(jar: PrivateCookieJar) -> (PrivateCookieJar, Json<Acknowledged>) {
    (invalidate_auth_cookie(jar), Json(Acknowledged::default()))
}
