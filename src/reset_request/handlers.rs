//! The JSON endpoints for submitting and reviewing reset requests.

use std::sync::{Arc, Mutex};

use axum::{
    Extension, Json,
    extract::{FromRef, State},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    Acknowledged, AppState, Error,
    auth::{AccountRef, Caller},
    credentials::CredentialStore,
    reset_request::{
        FallbackOutcome, ResetRequestId, ResetRequestView, fallback_match,
        workflow::{
            Submission, approve_reset_request, create_manual_reset_request, deny_reset_request,
            list_pending_reset_requests, submit_reset_request,
        },
    },
};

/// The state needed by the reset request endpoints.
#[derive(Debug, Clone)]
pub struct ResetRequestState {
    pub db_connection: Arc<Mutex<Connection>>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for ResetRequestState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            credentials: state.credentials.clone(),
        }
    }
}

/// The form a user fills in to ask for a new password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequestData {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub full_name: String,
    pub requested_password: String,
}

/// The form an admin fills in to set a user's password directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualResetData {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub new_password: String,
}

/// Identifies the request an admin is acting on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReviewData {
    pub request_id: ResetRequestId,
}

/// The response to a newly recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestCreated {
    pub request_id: ResetRequestId,
}

/// A password to check against the newest approved request for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackMatchData {
    /// A username or email address.
    pub identity: String,
    pub supplied_password: String,
}

/// Whether the supplied password matched and was applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackMatchResult {
    #[serde(rename = "match")]
    pub matched: bool,
    pub updated: bool,
}

fn lock(
    db_connection: &Mutex<Connection>,
) -> Result<std::sync::MutexGuard<'_, Connection>, Error> {
    db_connection.lock().map_err(|_| Error::DatabaseLockError)
}

/// Handler for submitting a reset request. Anyone may submit one.
pub async fn submit_reset_request_endpoint(
    State(state): State<ResetRequestState>,
    Extension(caller): Extension<Caller>,
    Json(data): Json<ResetRequestData>,
) -> Result<Json<RequestCreated>, Error> {
    let account_ref =
        AccountRef::from_username_or_email(data.username.as_deref(), data.email.as_deref())
            .ok_or(Error::AccountNotFound)?;

    let connection = lock(&state.db_connection)?;
    let request = submit_reset_request(
        &caller,
        Submission {
            account_ref,
            username: data.username,
            email: data.email,
            full_name: data.full_name,
            requested_password: data.requested_password,
        },
        &connection,
    )?;

    Ok(Json(RequestCreated {
        request_id: request.id,
    }))
}

/// Handler for listing pending requests, newest first. Admins only.
pub async fn get_pending_reset_requests_endpoint(
    State(state): State<ResetRequestState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<ResetRequestView>>, Error> {
    let connection = lock(&state.db_connection)?;
    let requests = list_pending_reset_requests(&caller, &connection)?;

    Ok(Json(
        requests.into_iter().map(ResetRequestView::from).collect(),
    ))
}

/// Handler for approving a pending request. Admins only.
pub async fn approve_reset_request_endpoint(
    State(state): State<ResetRequestState>,
    Extension(caller): Extension<Caller>,
    Json(data): Json<ReviewData>,
) -> Result<Json<Acknowledged>, Error> {
    let mut connection = lock(&state.db_connection)?;
    approve_reset_request(
        &caller,
        data.request_id,
        state.credentials.as_ref(),
        &mut connection,
    )?;

    Ok(Json(Acknowledged::default()))
}

/// Handler for denying a pending request. Admins only.
pub async fn deny_reset_request_endpoint(
    State(state): State<ResetRequestState>,
    Extension(caller): Extension<Caller>,
    Json(data): Json<ReviewData>,
) -> Result<Json<Acknowledged>, Error> {
    let connection = lock(&state.db_connection)?;
    deny_reset_request(&caller, data.request_id, &connection)?;

    Ok(Json(Acknowledged::default()))
}

/// Handler for recording an already approved request for a user. Admins only.
pub async fn create_manual_reset_request_endpoint(
    State(state): State<ResetRequestState>,
    Extension(caller): Extension<Caller>,
    Json(data): Json<ManualResetData>,
) -> Result<Json<RequestCreated>, Error> {
    caller.require_admin()?;
    let account_ref =
        AccountRef::from_username_or_email(data.username.as_deref(), data.email.as_deref())
            .ok_or(Error::AccountNotFound)?;

    let connection = lock(&state.db_connection)?;
    let request =
        create_manual_reset_request(&caller, &account_ref, &data.new_password, &connection)?;

    Ok(Json(RequestCreated {
        request_id: request.id,
    }))
}

/// Handler for checking a password against the newest approved request.
///
/// # Errors
///
/// Fails with [Error::UpdateFailed] if the password matched but could not be
/// applied. The request stays approved, so the call can be retried.
pub async fn fallback_match_endpoint(
    State(state): State<ResetRequestState>,
    Json(data): Json<FallbackMatchData>,
) -> Result<Json<FallbackMatchResult>, Error> {
    let mut connection = lock(&state.db_connection)?;
    let outcome = fallback_match(
        &AccountRef::from_identity(&data.identity),
        &data.supplied_password,
        state.credentials.as_ref(),
        &mut connection,
    )?;

    match outcome {
        FallbackOutcome::NoMatch => Ok(Json(FallbackMatchResult {
            matched: false,
            updated: false,
        })),
        FallbackOutcome::MatchAndUpdated => Ok(Json(FallbackMatchResult {
            matched: true,
            updated: true,
        })),
        FallbackOutcome::UpdateFailed(message) => Err(Error::UpdateFailed(message)),
    }
}

#[cfg(test)]
mod reset_request_endpoint_tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum_extra::extract::cookie::Cookie;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::{Value, json};

    use crate::{
        Acknowledged, AppState, ErrorBody, build_router,
        auth::{COOKIE_TOKEN, Role},
        credentials::SQLiteCredentialStore,
        endpoints,
        mailer::get_unsent_emails,
        reset_request::{ResetRequestId, ResetStatus, ledger::get_reset_request},
        test_utils::{TEST_PASSWORD, insert_test_account},
    };

    use super::{FallbackMatchResult, RequestCreated};

    fn get_test_server() -> (TestServer, AppState) {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        let state = AppState::new(
            connection,
            "42",
            Arc::new(SQLiteCredentialStore::new("http://localhost:3000", 4)),
        )
        .expect("Could not create app state");
        {
            let connection = state.db_connection.lock().unwrap();
            insert_test_account("root", Role::Admin, &connection);
            insert_test_account("alice", Role::User, &connection);
        }

        let server =
            TestServer::try_new(build_router(state.clone())).expect("Could not create test server.");

        (server, state)
    }

    async fn log_in(server: &TestServer, identity: &str, password: &str) -> Cookie<'static> {
        server
            .post(endpoints::LOG_IN_API)
            .json(&json!({ "identity": identity, "password": password }))
            .await
            .cookie(COOKIE_TOKEN)
    }

    async fn submit(
        server: &TestServer,
        username: &str,
        requested_password: &str,
    ) -> ResetRequestId {
        server
            .post(endpoints::RESET_REQUESTS)
            .json(&json!({
                "username": username,
                "full_name": "Alice Example",
                "requested_password": requested_password,
            }))
            .await
            .json::<RequestCreated>()
            .request_id
    }

    #[tokio::test]
    async fn anonymous_caller_can_submit() {
        let (server, state) = get_test_server();

        let request_id = submit(&server, "alice", "NewPass1").await;

        let request = get_reset_request(request_id, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(request.status, ResetStatus::Pending);
        assert_eq!(request.requested_password, "NewPass1");
    }

    #[tokio::test]
    async fn submit_for_unknown_account_is_not_found() {
        let (server, _) = get_test_server();

        let response = server
            .post(endpoints::RESET_REQUESTS)
            .json(&json!({
                "email": "carol@example.com",
                "full_name": "Carol Example",
                "requested_password": "NewPass1",
            }))
            .expect_failure()
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_list_hides_requested_password() {
        let (server, _) = get_test_server();
        let request_id = submit(&server, "alice", "NewPass1").await;
        let cookie = log_in(&server, "root", TEST_PASSWORD).await;

        let response = server
            .get(endpoints::PENDING_RESET_REQUESTS)
            .add_cookie(cookie)
            .await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body[0]["id"], request_id.as_i64());
        assert_eq!(body[0]["requester_username"], "alice");
        assert!(
            !body.to_string().contains("NewPass1"),
            "pending list leaked the requested password: {body}"
        );
    }

    #[tokio::test]
    async fn review_endpoints_reject_non_admins() {
        let (server, _) = get_test_server();
        let request_id = submit(&server, "alice", "NewPass1").await;
        let cookie = log_in(&server, "alice", TEST_PASSWORD).await;

        server
            .get(endpoints::PENDING_RESET_REQUESTS)
            .add_cookie(cookie.clone())
            .expect_failure()
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .post(endpoints::APPROVE_RESET_REQUEST)
            .add_cookie(cookie.clone())
            .json(&json!({ "request_id": request_id }))
            .expect_failure()
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .post(endpoints::DENY_RESET_REQUEST)
            .json(&json!({ "request_id": request_id }))
            .expect_failure()
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .post(endpoints::MANUAL_RESET_REQUEST)
            .add_cookie(cookie)
            .json(&json!({ "username": "alice", "new_password": "Temp99" }))
            .expect_failure()
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn approve_twice_is_conflict() {
        let (server, state) = get_test_server();
        let request_id = submit(&server, "alice", "NewPass1").await;
        let cookie = log_in(&server, "root", TEST_PASSWORD).await;

        let first = server
            .post(endpoints::APPROVE_RESET_REQUEST)
            .add_cookie(cookie.clone())
            .json(&json!({ "request_id": request_id }))
            .await;
        let second = server
            .post(endpoints::APPROVE_RESET_REQUEST)
            .add_cookie(cookie)
            .json(&json!({ "request_id": request_id }))
            .expect_failure()
            .await;

        first.assert_status_ok();
        assert_eq!(first.json::<Acknowledged>(), Acknowledged { ok: true });
        second.assert_status(StatusCode::CONFLICT);
        let body = second.json::<ErrorBody>();
        assert!(!body.retryable);
        assert!(
            body.error.contains("approved"),
            "want error to name the current status, got {:?}",
            body.error
        );
        let connection = state.db_connection.lock().unwrap();
        assert_eq!(get_unsent_emails(&connection).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deny_marks_request_denied() {
        let (server, state) = get_test_server();
        let request_id = submit(&server, "alice", "NewPass1").await;
        let cookie = log_in(&server, "root", TEST_PASSWORD).await;

        server
            .post(endpoints::DENY_RESET_REQUEST)
            .add_cookie(cookie)
            .json(&json!({ "request_id": request_id }))
            .await
            .assert_status_ok();

        let request = get_reset_request(request_id, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(request.status, ResetStatus::Denied);
    }

    #[tokio::test]
    async fn approved_password_works_at_log_in() {
        let (server, _) = get_test_server();
        let request_id = submit(&server, "alice", "NewPass1").await;
        let admin_cookie = log_in(&server, "root", TEST_PASSWORD).await;
        server
            .post(endpoints::APPROVE_RESET_REQUEST)
            .add_cookie(admin_cookie)
            .json(&json!({ "request_id": request_id }))
            .await
            .assert_status_ok();

        let response = server
            .post(endpoints::LOG_IN_API)
            .json(&json!({ "identity": "alice@example.com", "password": "NewPass1" }))
            .await;

        response.assert_status_ok();
        response.cookie(COOKIE_TOKEN);
    }

    #[tokio::test]
    async fn manual_request_then_fallback_match() {
        let (server, state) = get_test_server();
        let cookie = log_in(&server, "root", TEST_PASSWORD).await;

        let created = server
            .post(endpoints::MANUAL_RESET_REQUEST)
            .add_cookie(cookie)
            .json(&json!({ "email": "alice@example.com", "new_password": "Temp99" }))
            .await
            .json::<RequestCreated>();
        let wrong = server
            .post(endpoints::FALLBACK_MATCH)
            .json(&json!({ "identity": "alice", "supplied_password": "Temp98" }))
            .await
            .json::<FallbackMatchResult>();
        let right = server
            .post(endpoints::FALLBACK_MATCH)
            .json(&json!({ "identity": "alice", "supplied_password": "Temp99" }))
            .await
            .json::<FallbackMatchResult>();

        assert_eq!(
            wrong,
            FallbackMatchResult {
                matched: false,
                updated: false
            }
        );
        assert_eq!(
            right,
            FallbackMatchResult {
                matched: true,
                updated: true
            }
        );
        let request =
            get_reset_request(created.request_id, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(request.status, ResetStatus::Completed);
    }

    #[tokio::test]
    async fn fallback_match_for_unknown_account_is_no_match() {
        let (server, _) = get_test_server();

        let response = server
            .post(endpoints::FALLBACK_MATCH)
            .json(&json!({ "identity": "carol", "supplied_password": "Temp99" }))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>(),
            json!({ "match": false, "updated": false })
        );
    }
}
