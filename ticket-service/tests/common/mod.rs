//! Shared harness for ticket-service integration tests.
//!
//! Builds the full router over in-memory stores with a hand-driven clock.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use secrecy::Secret;
use serde_json::Value;
use service_core::config::Config;
use service_core::middleware::create_ip_rate_limiter;
use std::sync::Arc;
use ticket_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, JwtConfig, RateLimitConfig, SchedulerConfig, SecurityConfig,
        SigningKeys, TicketConfig,
    },
    dtos::auth::TokenResponse,
    middleware::RequestGate,
    models::{Identity, Role},
    services::{
        AuthService, InMemoryCredentialStore, InMemoryTicketRepository, TicketService, TokenCodec,
    },
    utils::{ManualClock, Password},
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const TEST_PASSWORD: &str = "correct-horse-battery";
pub const ACCESS_TTL_SECONDS: i64 = 900;
pub const LOGIN_ATTEMPTS_PER_IP: u32 = 3;
pub const LOCKOUT_SECONDS: i64 = 600;

/// 2026-01-01T00:00:00Z
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600, 0).unwrap()
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        keys: SigningKeys::Hs256 {
            secret: Secret::new(TEST_SECRET.to_string()),
        },
        access_ttl_seconds: ACCESS_TTL_SECONDS,
        refresh_ttl_seconds: 7 * 24 * 3600,
        clock_skew_seconds: 0,
        rotate_refresh_tokens: true,
        max_failed_attempts: None,
        lockout_seconds: LOCKOUT_SECONDS,
    }
}

pub fn test_config(jwt: JwtConfig) -> TicketConfig {
    TicketConfig {
        common: Config::default(),
        environment: Environment::Dev,
        service_name: "ticket-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_seconds: 5,
        },
        jwt,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: LOGIN_ATTEMPTS_PER_IP,
            login_window_seconds: 900,
            register_attempts: 100,
            register_window_seconds: 3600,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
        scheduler: SchedulerConfig {
            expiry_interval_seconds: 3600,
            purchase_event_queue_size: 16,
        },
        bootstrap_admin: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_jwt_config(jwt_config())
    }

    pub fn with_jwt_config(jwt: JwtConfig) -> Self {
        let config = test_config(jwt);
        let clock = ManualClock::new(epoch());

        let codec = Arc::new(
            TokenCodec::new(&config.jwt, Arc::new(clock.clone())).expect("token codec"),
        );
        let auth_service = AuthService::new(
            Arc::new(InMemoryCredentialStore::new()),
            codec.clone(),
            Arc::new(clock.clone()),
            &config.jwt,
        );
        let ticket_service = TicketService::new(
            Arc::new(InMemoryTicketRepository::new()),
            Arc::new(clock.clone()),
        );

        let state = AppState {
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            register_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.register_attempts,
                config.rate_limit.register_window_seconds,
            ),
            ip_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.global_ip_limit,
                config.rate_limit.global_ip_window_seconds,
            ),
            config,
            auth_service,
            ticket_service,
            gate: RequestGate::new(codec),
            metrics_handle: None,
        };

        Self {
            router: build_router(state.clone()),
            state,
            clock,
        }
    }

    pub fn now_millis(&self) -> i64 {
        epoch().timestamp_millis()
    }

    pub async fn create_identity(&self, username: &str, roles: Vec<Role>) -> Identity {
        self.state
            .auth_service
            .create_identity(username, Password::new(TEST_PASSWORD.to_string()), roles)
            .await
            .expect("create identity")
    }

    pub async fn login(&self, username: &str) -> TokenResponse {
        self.state
            .auth_service
            .login(username, Password::new(TEST_PASSWORD.to_string()))
            .await
            .expect("login")
    }

    /// Fresh identity with `roles`; returns its id and an access token.
    pub async fn token_with_roles(&self, roles: &[Role]) -> (Uuid, String) {
        let username = format!("user-{}", Uuid::new_v4().simple());
        let identity = self.create_identity(&username, roles.to_vec()).await;
        (identity.id, self.login(&username).await.access_token)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, headers, body)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, body) = self.send(build_request(method, uri, token, body)).await;
        (status, body)
    }
}

pub fn build_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// A ticket body on sale from `start_ms` to `end_ms`.
pub fn ticket_body(event_id: &str, quota: i32, start_ms: i64, end_ms: i64) -> Value {
    serde_json::json!({
        "event_id": event_id,
        "ticket_type": "REGULAR",
        "price": 50.0,
        "quota": quota,
        "description": "General admission",
        "sale_start": start_ms,
        "sale_end": end_ms,
    })
}
