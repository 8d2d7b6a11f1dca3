//! The session token stored in the private auth cookie, and the functions for
//! setting, extending and clearing that cookie.

use axum_extra::extract::{
    PrivateCookieJar,
    cookie::{Cookie, SameSite},
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{Error, auth::AccountId};

/// The name of the cookie holding the session token.
pub const COOKIE_TOKEN: &str = "token";
/// The default duration for which auth cookies are valid.
pub const DEFAULT_COOKIE_DURATION: Duration = Duration::minutes(5);
/// How long the auth cookie should last if the user selects "remember me" at log-in.
pub const REMEMBER_ME_COOKIE_DURATION: Duration = Duration::days(7);

/// A token identifying the logged-in account.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Token {
    pub account_id: AccountId,

    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

/// Add the auth cookie to `jar` for `account_id`, expiring `duration` from now.
///
/// # Errors
///
/// Returns [Error::SessionError] if the token cannot be serialized.
pub fn set_auth_cookie(
    jar: PrivateCookieJar,
    account_id: AccountId,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let token = Token {
        account_id,
        expires_at: OffsetDateTime::now_utc() + duration,
    };

    add_token_cookie(jar, &token)
}

fn add_token_cookie(jar: PrivateCookieJar, token: &Token) -> Result<PrivateCookieJar, Error> {
    let token_string =
        serde_json::to_string(token).map_err(|error| Error::SessionError(error.to_string()))?;

    Ok(jar.add(
        Cookie::build((COOKIE_TOKEN, token_string))
            .path("/")
            .expires(token.expires_at)
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(true),
    ))
}

/// Set the auth cookie to an invalid value and set its max age to zero, which should delete the cookie on the client side.
pub fn invalidate_auth_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.add(
        Cookie::build((COOKIE_TOKEN, "deleted"))
            .path("/")
            .expires(OffsetDateTime::UNIX_EPOCH)
            .max_age(Duration::ZERO)
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(true),
    )
}

/// Read and check the session token in `jar`.
///
/// # Errors
///
/// Returns [Error::CookieMissing] if there is no cookie, the cookie does not
/// hold a token, or the token has expired.
pub fn get_token_from_cookies(jar: &PrivateCookieJar) -> Result<Token, Error> {
    let cookie = jar.get(COOKIE_TOKEN).ok_or(Error::CookieMissing)?;
    let token: Token =
        serde_json::from_str(cookie.value_trimmed()).map_err(|_| Error::CookieMissing)?;

    if token.expires_at <= OffsetDateTime::now_utc() {
        return Err(Error::CookieMissing);
    }

    Ok(token)
}

/// Push the expiry of the auth cookie in `jar` out to at least `duration`
/// from now. Cookies that already expire later are left as is.
///
/// # Errors
///
/// The cookie jar is not modified if an error is returned.
pub fn extend_auth_cookie_duration_if_needed(
    jar: PrivateCookieJar,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let token = get_token_from_cookies(&jar)?;
    let new_expiry = OffsetDateTime::now_utc()
        .checked_add(duration)
        .ok_or_else(|| Error::SessionError("cookie expiry overflowed".to_owned()))?;

    if new_expiry <= token.expires_at {
        return Ok(jar);
    }

    add_token_cookie(
        jar,
        &Token {
            account_id: token.account_id,
            expires_at: new_expiry,
        },
    )
}
