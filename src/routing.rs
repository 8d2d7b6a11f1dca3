//! Application router configuration.

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{
    AppState, Error,
    auth::{post_log_in, post_log_out, register_user, resolve_caller},
    credentials::redeem_reset_link,
    endpoints,
    logging::logging_middleware,
    reset_request::{
        approve_reset_request_endpoint, create_manual_reset_request_endpoint,
        deny_reset_request_endpoint, fallback_match_endpoint, get_pending_reset_requests_endpoint,
        submit_reset_request_endpoint,
    },
};

/// Return a router with all the app's routes.
///
/// Every route sees the resolved [crate::auth::Caller] as a request
/// extension. Whether a caller may perform an action is decided by the
/// operation itself, not the router.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route(endpoints::LOG_IN_API, post(post_log_in))
        .route(endpoints::LOG_OUT, post(post_log_out))
        .route(endpoints::USERS, post(register_user))
        .route(endpoints::PASSWORD_RESET_API, post(redeem_reset_link));

    let reset_request_routes = Router::new()
        .route(
            endpoints::RESET_REQUESTS,
            post(submit_reset_request_endpoint),
        )
        .route(
            endpoints::PENDING_RESET_REQUESTS,
            get(get_pending_reset_requests_endpoint),
        )
        .route(
            endpoints::APPROVE_RESET_REQUEST,
            post(approve_reset_request_endpoint),
        )
        .route(
            endpoints::DENY_RESET_REQUEST,
            post(deny_reset_request_endpoint),
        )
        .route(
            endpoints::MANUAL_RESET_REQUEST,
            post(create_manual_reset_request_endpoint),
        )
        .route(endpoints::FALLBACK_MATCH, post(fallback_match_endpoint));

    auth_routes
        .merge(reset_request_routes)
        .fallback(get_404_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_caller))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

async fn get_404_not_found() -> Error {
    Error::NotFound
}

#[cfg(test)]
mod routing_tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        AppState, ErrorBody,
        auth::{COOKIE_TOKEN, Role},
        credentials::SQLiteCredentialStore,
        endpoints,
        test_utils::{TEST_PASSWORD, insert_test_account},
    };

    use super::build_router;

    fn get_test_server() -> TestServer {
        let state = AppState::new(
            Connection::open_in_memory().expect("Could not open in-memory SQLite database"),
            "42",
            Arc::new(SQLiteCredentialStore::new("http://localhost:3000", 4)),
        )
        .expect("Could not create app state");
        insert_test_account("alice", Role::User, &state.db_connection.lock().unwrap());

        TestServer::try_new(build_router(state)).expect("Could not create test server.")
    }

    #[tokio::test]
    async fn unknown_route_is_json_not_found() {
        let server = get_test_server();

        let response = server.get("/api/nope").expect_failure().await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert!(!response.json::<ErrorBody>().retryable);
    }

    #[tokio::test]
    async fn log_in_then_log_out() {
        let server = get_test_server();

        let log_in = server
            .post(endpoints::LOG_IN_API)
            .json(&json!({ "identity": "alice", "password": TEST_PASSWORD }))
            .await;
        let log_out = server
            .post(endpoints::LOG_OUT)
            .add_cookie(log_in.cookie(COOKIE_TOKEN))
            .await;

        log_in.assert_status_ok();
        log_out.assert_status_ok();
        assert_eq!(
            log_out.cookie(COOKIE_TOKEN).max_age(),
            Some(time::Duration::ZERO)
        );
    }
}
