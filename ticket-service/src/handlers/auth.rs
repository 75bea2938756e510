use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::auth::{
        IdentityResponse, LoginRequest, RefreshRequest, RegisterRequest, SessionResponse,
        UpdateRolesRequest,
    },
    middleware::Session,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Exchange a username and password for a token pair
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::dtos::auth::TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::dtos::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::dtos::ErrorResponse),
        (status = 429, description = "Too many login attempts", body = crate::dtos::ErrorResponse),
        (status = 503, description = "Credential store unavailable", body = crate::dtos::ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .auth_service
        .login(&req.username, Password::new(req.password))
        .await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Trade a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = crate::dtos::auth::TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token", body = crate::dtos::ErrorResponse),
        (status = 503, description = "Credential store unavailable", body = crate::dtos::ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Register a new attendee account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = IdentityResponse),
        (status = 409, description = "Username already taken", body = crate::dtos::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::dtos::ErrorResponse),
        (status = 429, description = "Too many registration attempts", body = crate::dtos::ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state
        .auth_service
        .register(&req.username, Password::new(req.password))
        .await?;
    Ok((StatusCode::CREATED, Json(IdentityResponse::from(identity))))
}

/// The caller's session as resolved from the bearer token
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "Missing or invalid token", body = crate::dtos::ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(Session(session): Session) -> Json<SessionResponse> {
    Json(SessionResponse {
        subject_id: session.subject_id,
        roles: session.roles,
        token_id: session.token_id,
    })
}

/// Replace an identity's roles. Takes effect on the identity's next token.
#[utoipa::path(
    put,
    path = "/auth/identities/{id}/roles",
    params(("id" = Uuid, Path, description = "Identity id")),
    request_body = UpdateRolesRequest,
    responses(
        (status = 200, description = "Roles updated", body = IdentityResponse),
        (status = 403, description = "Admin role required", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Identity not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn update_roles(
    State(state): State<AppState>,
    Session(admin): Session,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRolesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state
        .auth_service
        .update_roles(id, req.roles)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Identity not found with id: {}", id)))?;

    tracing::info!(admin_id = %admin.subject_id, user_id = %id, "Identity roles replaced");
    Ok(Json(IdentityResponse::from(identity)))
}
