pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post, put, MethodRouter},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::{
    ip_rate_limit_middleware, metrics_middleware, request_id_middleware,
    security_headers_middleware, IpRateLimiter, REQUEST_ID_HEADER,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::TicketConfig;
use crate::middleware::{require_access, AccessRule, Guard, RequestGate};
use crate::models::Role;
use crate::services::{error::STORE_RETRY_AFTER_SECONDS, AuthService, TicketService};

const ADMIN: &[Role] = &[Role::Admin];
const ORGANIZER: &[Role] = &[Role::Organizer];
const ADMIN_OR_ORGANIZER: &[Role] = &[Role::Admin, Role::Organizer];
const ATTENDEE_OR_ADMIN: &[Role] = &[Role::Attendee, Role::Admin];

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::register,
        handlers::auth::me,
        handlers::auth::update_roles,
        handlers::tickets::list_tickets,
        handlers::tickets::list_available,
        handlers::tickets::list_by_event,
        handlers::tickets::get_ticket,
        handlers::tickets::create_ticket,
        handlers::tickets::create_ticket_batch,
        handlers::tickets::update_ticket,
        handlers::tickets::update_status,
        handlers::tickets::purchase_ticket,
        handlers::tickets::validate_ticket,
        handlers::tickets::delete_ticket,
        handlers::tickets::expire_tickets,
        handlers::tickets::expire_ticket,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RegisterRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::TokenResponse,
            dtos::auth::IdentityResponse,
            dtos::auth::UpdateRolesRequest,
            dtos::auth::SessionResponse,
            dtos::ticket::CreateTicketRequest,
            dtos::ticket::CreateTicketBatchRequest,
            dtos::ticket::UpdateTicketRequest,
            dtos::ticket::StatusUpdateRequest,
            dtos::ticket::PurchaseRequest,
            dtos::ticket::ExpiredResponse,
            models::Role,
            models::Ticket,
            models::TicketType,
            models::TicketStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, token refresh and registration"),
        (name = "Admin", description = "Identity administration"),
        (name = "Tickets", description = "Event ticket inventory and purchases"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: TicketConfig,
    pub auth_service: AuthService,
    pub ticket_service: TicketService,
    pub gate: RequestGate,
    /// `None` when no Prometheus recorder was installed (tests).
    pub metrics_handle: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

/// Put `route` behind the gate with `rule`.
fn guarded(gate: &RequestGate, rule: AccessRule, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(
        Guard::new(gate.clone(), rule),
        require_access,
    ))
}

fn rate_limited(limiter: &IpRateLimiter, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(limiter.clone(), ip_rate_limit_middleware))
}

pub fn build_router(state: AppState) -> Router {
    use handlers::{auth, tickets};
    use AccessRule::{AnyRole, Authenticated, Public};

    let gate = &state.gate;

    let auth_routes = Router::new()
        .route(
            "/auth/login",
            rate_limited(&state.login_rate_limiter, post(auth::login)),
        )
        .route(
            "/auth/register",
            rate_limited(&state.register_rate_limiter, post(auth::register)),
        )
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/me", guarded(gate, Authenticated, get(auth::me)))
        .route(
            "/auth/identities/:id/roles",
            guarded(gate, AnyRole(ADMIN), put(auth::update_roles)),
        );

    let ticket_routes = Router::new()
        .route(
            "/api/tickets",
            guarded(gate, Public, get(tickets::list_tickets))
                .merge(guarded(gate, AnyRole(ORGANIZER), post(tickets::create_ticket))),
        )
        .route(
            "/api/tickets/available",
            guarded(gate, Public, get(tickets::list_available)),
        )
        .route(
            "/api/tickets/event/:event_id",
            guarded(gate, Public, get(tickets::list_by_event)),
        )
        .route(
            "/api/tickets/batch",
            guarded(gate, AnyRole(ORGANIZER), post(tickets::create_ticket_batch)),
        )
        .route(
            "/api/tickets/expire",
            guarded(gate, AnyRole(ADMIN), post(tickets::expire_tickets)),
        )
        .route(
            "/api/tickets/:id",
            guarded(gate, Public, get(tickets::get_ticket))
                .merge(guarded(gate, Authenticated, put(tickets::update_ticket)))
                .merge(guarded(
                    gate,
                    AnyRole(ADMIN_OR_ORGANIZER),
                    delete(tickets::delete_ticket),
                )),
        )
        .route(
            "/api/tickets/:id/status",
            guarded(gate, AnyRole(ADMIN_OR_ORGANIZER), patch(tickets::update_status)),
        )
        .route(
            "/api/tickets/:id/purchase",
            guarded(gate, AnyRole(ATTENDEE_OR_ADMIN), post(tickets::purchase_ticket)),
        )
        .route(
            "/api/tickets/:id/validate",
            guarded(gate, AnyRole(ADMIN_OR_ORGANIZER), post(tickets::validate_ticket)),
        )
        .route(
            "/api/tickets/:id/expire",
            guarded(gate, AnyRole(ADMIN), post(tickets::expire_ticket)),
        );

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(origin) => Some(origin),
                    Err(e) => {
                        tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let ip_limiter = state.ip_rate_limiter.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(auth_routes)
        .merge(ticket_routes)
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A backing store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .auth_service
        .store()
        .health_check()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential store health check failed");
            AppError::ServiceUnavailable(anyhow::Error::new(e), Some(STORE_RETRY_AFTER_SECONDS))
        })?;

    state
        .ticket_service
        .repository()
        .health_check()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Ticket store health check failed");
            AppError::ServiceUnavailable(anyhow::Error::new(e), Some(STORE_RETRY_AFTER_SECONDS))
        })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "credential_store": "up",
            "ticket_store": "up"
        }
    })))
}
