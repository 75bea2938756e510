mod common;

use axum::http::{header, Method, StatusCode};
use chrono::Duration;
use common::{
    build_request, jwt_config, TestApp, ACCESS_TTL_SECONDS, LOCKOUT_SECONDS, LOGIN_ATTEMPTS_PER_IP,
    TEST_PASSWORD,
};
use serde_json::json;
use ticket_service::models::Role;

#[tokio::test]
async fn test_login_issues_token_pair_for_identity() {
    let app = TestApp::spawn();
    let identity = app.create_identity("alice", vec![Role::Attendee]).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": TEST_PASSWORD })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], ACCESS_TTL_SECONDS);
    assert!(body["refresh_token"].as_str().is_some());

    let access = body["access_token"].as_str().unwrap();
    let (status, me) = app.call(Method::GET, "/auth/me", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["subject_id"], identity.id.to_string());
    assert_eq!(me["roles"], json!(["ATTENDEE"]));
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
    let app = TestApp::spawn();
    app.create_identity("bob", vec![Role::Attendee]).await;

    let (_, wrong_password_headers, wrong_password) = app
        .send(build_request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "bob", "password": "not-the-password" })),
        ))
        .await;
    let (status, _, unknown_user) = app
        .send(build_request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "not-the-password" })),
        ))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password, unknown_user);
    assert_eq!(wrong_password["error"], "Invalid credentials");
    assert_eq!(wrong_password_headers[header::WWW_AUTHENTICATE], "Bearer");
}

#[tokio::test]
async fn test_login_rejects_blank_fields() {
    let app = TestApp::spawn();

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "", "password": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .call(Method::POST, "/auth/login", None, Some(json!({ "username": "x" })))
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_access_token_valid_for_exactly_its_ttl() {
    let app = TestApp::spawn();
    app.create_identity("carol", vec![Role::Attendee]).await;
    let tokens = app.login("carol").await;

    app.clock.advance(Duration::seconds(ACCESS_TTL_SECONDS));
    let (status, _) = app
        .call(Method::GET, "/auth/me", Some(&tokens.access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(Duration::seconds(1));
    let (status, body) = app
        .call(Method::GET, "/auth/me", Some(&tokens.access_token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token expired");
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let mut jwt = jwt_config();
    jwt.max_failed_attempts = Some(2);
    let app = TestApp::with_jwt_config(jwt);
    app.create_identity("dave", vec![Role::Attendee]).await;

    for _ in 0..2 {
        let (status, _) = app
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "username": "dave", "password": "wrong-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "dave", "password": TEST_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");
}

#[tokio::test]
async fn test_lockout_lapses_after_lockout_window() {
    let mut jwt = jwt_config();
    jwt.max_failed_attempts = Some(2);
    let app = TestApp::with_jwt_config(jwt);
    app.create_identity("dana", vec![Role::Attendee]).await;

    let wrong = || json!({ "username": "dana", "password": "wrong-password" });
    let right = || json!({ "username": "dana", "password": TEST_PASSWORD });

    app.call(Method::POST, "/auth/login", None, Some(wrong())).await;
    app.call(Method::POST, "/auth/login", None, Some(wrong())).await;

    app.clock.advance(Duration::seconds(LOCKOUT_SECONDS - 1));
    let (status, _) = app.call(Method::POST, "/auth/login", None, Some(right())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.clock.advance(Duration::seconds(1));
    let (status, body) = app.call(Method::POST, "/auth/login", None, Some(right())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn test_successful_login_resets_failure_count() {
    let mut jwt = jwt_config();
    jwt.max_failed_attempts = Some(2);
    let app = TestApp::with_jwt_config(jwt);
    app.create_identity("erin", vec![Role::Attendee]).await;

    let wrong = || json!({ "username": "erin", "password": "wrong-password" });
    let right = || json!({ "username": "erin", "password": TEST_PASSWORD });

    app.call(Method::POST, "/auth/login", None, Some(wrong())).await;
    let (status, _) = app.call(Method::POST, "/auth/login", None, Some(right())).await;
    assert_eq!(status, StatusCode::OK);

    app.call(Method::POST, "/auth/login", None, Some(wrong())).await;
    let (status, _) = app.call(Method::POST, "/auth/login", None, Some(right())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_is_rate_limited_per_ip() {
    let app = TestApp::spawn();
    let attempt = || {
        let mut req = build_request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "whatever-password" })),
        );
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        req
    };

    for _ in 0..LOGIN_ATTEMPTS_PER_IP {
        let (status, _, _) = app.send(attempt()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, headers, _) = app.send(attempt()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_register_creates_attendee_and_rejects_duplicates() {
    let app = TestApp::spawn();
    let body = json!({ "username": "frank", "password": "long-enough-password" });

    let (status, created) = app
        .call(Method::POST, "/auth/register", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["username"], "frank");
    assert_eq!(created["roles"], json!(["ATTENDEE"]));

    let (status, _) = app
        .call(Method::POST, "/auth/register", None, Some(body))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "frank", "password": "long-enough-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_enforces_password_length() {
    let app = TestApp::spawn();
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "gina", "password": "short" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
