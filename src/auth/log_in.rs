//! The log-in endpoint.
//!
//! A failed password check falls back to the newest approved reset request
//! for the account, so a user whose request was approved can log in with the
//! password they asked for.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{
    AppState, Error,
    auth::{Account, AccountId, AccountRef, REMEMBER_ME_COOKIE_DURATION, set_auth_cookie},
    credentials::CredentialStore,
    reset_request::{FallbackOutcome, fallback_match},
};

/// The state needed to perform a login.
#[derive(Debug, Clone)]
pub struct LogInState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,
    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,
    pub db_connection: Arc<Mutex<Connection>>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for LogInState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            cookie_key: state.cookie_key.clone(),
            cookie_duration: state.cookie_duration,
            db_connection: state.db_connection.clone(),
            credentials: state.credentials.clone(),
        }
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<LogInState> for Key {
    fn from_ref(state: &LogInState) -> Self {
        state.cookie_key.clone()
    }
}

/// The credentials sent by the log-in form.
///
/// The password is kept as a plain string. It is only compared against stored
/// hashes and approved reset requests, never stored.
#[derive(Clone, Serialize, Deserialize)]
pub struct LogInData {
    /// A username or email address.
    pub identity: String,
    pub password: String,
    /// Whether to extend the initial auth cookie duration.
    #[serde(default)]
    pub remember_me: bool,
}

/// The body of a successful log-in response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoggedIn {
    pub account_id: AccountId,
}

/// Handler for log-in requests.
///
/// On success the auth cookie is set and the account ID is returned.
///
/// # Errors
///
/// - [Error::InvalidCredentials] if the identity and password do not match an
///   account or its newest approved reset request. The response is the same
///   whether or not the account exists.
/// - [Error::UpdateFailed] if the password matched an approved reset request
///   but could not be applied. The log-in can be retried.
pub async fn post_log_in(
    State(state): State<LogInState>,
    jar: PrivateCookieJar,
    Json(data): Json<LogInData>,
) -> Result<(PrivateCookieJar, Json<LoggedIn>), Error> {
    let account = {
        let mut connection = state
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        authenticate(
            &AccountRef::from_identity(&data.identity),
            &data.password,
            state.credentials.as_ref(),
            &mut connection,
        )?
    };

    let cookie_duration = if data.remember_me {
        REMEMBER_ME_COOKIE_DURATION
    } else {
        state.cookie_duration
    };

    let jar = set_auth_cookie(jar, account.id, cookie_duration).inspect_err(|error| {
        tracing::error!("Error setting auth cookie: {error}");
    })?;

    tracing::info!("Account #{} logged in.", account.id);

    Ok((
        jar,
        Json(LoggedIn {
            account_id: account.id,
        }),
    ))
}

fn authenticate(
    account_ref: &AccountRef,
    password: &str,
    credentials: &dyn CredentialStore,
    connection: &mut Connection,
) -> Result<Account, Error> {
    match credentials.verify_password(account_ref, password, connection) {
        Err(Error::InvalidCredentials) => {}
        result => return result,
    }

    match fallback_match(account_ref, password, credentials, connection)? {
        FallbackOutcome::MatchAndUpdated => {
            credentials.verify_password(account_ref, password, connection)
        }
        FallbackOutcome::NoMatch => Err(Error::InvalidCredentials),
        FallbackOutcome::UpdateFailed(message) => Err(Error::UpdateFailed(message)),
    }
}

#[cfg(test)]
mod log_in_tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, http::StatusCode, routing::post};
    use axum_extra::extract::cookie::Key;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use sha2::{Digest, Sha512};
    use time::{Duration, OffsetDateTime};

    use crate::{
        ErrorBody,
        auth::{
            AccountId, AccountRef, COOKIE_TOKEN, Caller, DEFAULT_COOKIE_DURATION,
            REMEMBER_ME_COOKIE_DURATION, Role,
        },
        credentials::{CredentialStore, SQLiteCredentialStore},
        db::initialize,
        endpoints,
        reset_request::{
            ResetRequestId, ResetStatus, create_manual_reset_request, get_reset_request,
        },
        test_utils::{FailingCredentialStore, TEST_PASSWORD, insert_test_account},
    };

    use super::{LogInData, LogInState, LoggedIn, post_log_in};

    /// Test helper macro to assert that two date times are within one second
    /// of each other. Used instead of a function so that the file and line
    /// number of the caller is included in the error message instead of the
    /// helper.
    macro_rules! assert_date_time_close {
        ($left:expr, $right:expr$(,)?) => {
            assert!(
                ($left - $right).abs() < Duration::seconds(2),
                "got date time {:?}, want {:?}",
                $left,
                $right
            );
        };
    }

    fn get_test_state(credentials: Arc<dyn CredentialStore>) -> LogInState {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");
        insert_test_account("root", Role::Admin, &connection);
        insert_test_account("alice", Role::User, &connection);

        LogInState {
            cookie_key: Key::from(&Sha512::digest("foobar")),
            cookie_duration: DEFAULT_COOKIE_DURATION,
            db_connection: Arc::new(Mutex::new(connection)),
            credentials,
        }
    }

    fn get_test_server(state: LogInState) -> TestServer {
        let app = Router::new()
            .route(endpoints::LOG_IN_API, post(post_log_in))
            .with_state(state);

        TestServer::try_new(app).expect("Could not create test server.")
    }

    fn log_in_data(identity: &str, password: &str) -> LogInData {
        LogInData {
            identity: identity.to_owned(),
            password: password.to_owned(),
            remember_me: false,
        }
    }

    fn approve_manually(
        state: &LogInState,
        username: &str,
        new_password: &str,
    ) -> ResetRequestId {
        create_manual_reset_request(
            &Caller::Admin(AccountId::new(1)),
            &AccountRef::Username(username.to_owned()),
            new_password,
            &state.db_connection.lock().unwrap(),
        )
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn log_in_succeeds_with_username_or_email() {
        let state = get_test_state(Arc::new(SQLiteCredentialStore::new("", 4)));
        let server = get_test_server(state);

        for identity in ["alice", "alice@example.com"] {
            let response = server
                .post(endpoints::LOG_IN_API)
                .json(&log_in_data(identity, TEST_PASSWORD))
                .await;

            response.assert_status_ok();
            assert_eq!(
                response.json::<LoggedIn>(),
                LoggedIn {
                    account_id: AccountId::new(2)
                }
            );
            let cookie = response.cookie(COOKIE_TOKEN);
            assert!(cookie.expires_datetime() > Some(OffsetDateTime::now_utc()));
        }
    }

    #[tokio::test]
    async fn remember_me_extends_auth_cookie() {
        let state = get_test_state(Arc::new(SQLiteCredentialStore::new("", 4)));
        let server = get_test_server(state);

        let response = server
            .post(endpoints::LOG_IN_API)
            .json(&LogInData {
                remember_me: true,
                ..log_in_data("alice", TEST_PASSWORD)
            })
            .await;

        response.assert_status_ok();
        let token_cookie = response.cookie(COOKIE_TOKEN);
        assert_date_time_close!(
            token_cookie.expires_datetime().unwrap(),
            OffsetDateTime::now_utc() + REMEMBER_ME_COOKIE_DURATION
        );
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_account_look_the_same() {
        let state = get_test_state(Arc::new(SQLiteCredentialStore::new("", 4)));
        let server = get_test_server(state);

        let wrong_password = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("alice", "wrongpassword"))
            .expect_failure()
            .await;
        let unknown_account = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("carol", TEST_PASSWORD))
            .expect_failure()
            .await;

        wrong_password.assert_status(StatusCode::UNAUTHORIZED);
        unknown_account.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(
            wrong_password.json::<ErrorBody>(),
            unknown_account.json::<ErrorBody>()
        );
    }

    #[tokio::test]
    async fn approved_request_password_logs_in_and_completes_request() {
        let state = get_test_state(Arc::new(SQLiteCredentialStore::new("", 4)));
        let request_id = approve_manually(&state, "alice", "Temp99");
        let server = get_test_server(state.clone());

        let first = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("alice", "Temp99"))
            .await;
        let second = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("alice", "Temp99"))
            .await;
        let old_password = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("alice", TEST_PASSWORD))
            .expect_failure()
            .await;

        first.assert_status_ok();
        second.assert_status_ok();
        old_password.assert_status(StatusCode::UNAUTHORIZED);
        let request = get_reset_request(request_id, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(request.status, ResetStatus::Completed);
    }

    #[tokio::test]
    async fn failed_update_is_retryable() {
        let state = get_test_state(Arc::new(FailingCredentialStore::failing_set_password()));
        approve_manually(&state, "alice", "Temp99");
        let server = get_test_server(state);

        let response = server
            .post(endpoints::LOG_IN_API)
            .json(&log_in_data("alice", "Temp99"))
            .expect_failure()
            .await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.json::<ErrorBody>().retryable);
    }

    #[tokio::test]
    async fn log_in_fails_with_missing_fields() {
        let state = get_test_state(Arc::new(SQLiteCredentialStore::new("", 4)));
        let server = get_test_server(state);

        server
            .post(endpoints::LOG_IN_API)
            .json(&serde_json::json!({ "identity": "alice" }))
            .expect_failure()
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}
