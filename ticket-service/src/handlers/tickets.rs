use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::ticket::{
        CreateTicketBatchRequest, CreateTicketRequest, ExpiredResponse, PurchaseRequest,
        StatusUpdateRequest, UpdateTicketRequest,
    },
    middleware::Session,
    models::{Role, Ticket},
    utils::ValidatedJson,
    AppState,
};

/// List all tickets
#[utoipa::path(
    get,
    path = "/api/tickets",
    responses(
        (status = 200, description = "All tickets", body = [Ticket])
    ),
    tag = "Tickets"
)]
pub async fn list_tickets(State(state): State<AppState>) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.ticket_service.list().await?))
}

/// List tickets currently on sale
#[utoipa::path(
    get,
    path = "/api/tickets/available",
    responses(
        (status = 200, description = "Tickets within their sale window with quota left", body = [Ticket])
    ),
    tag = "Tickets"
)]
pub async fn list_available(State(state): State<AppState>) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.ticket_service.list_available().await?))
}

/// List tickets for one event
#[utoipa::path(
    get,
    path = "/api/tickets/event/{event_id}",
    params(("event_id" = String, Path, description = "Event id")),
    responses(
        (status = 200, description = "Tickets for the event", body = [Ticket])
    ),
    tag = "Tickets"
)]
pub async fn list_by_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.ticket_service.list_by_event(&event_id).await?))
}

/// Fetch a ticket by id
#[utoipa::path(
    get,
    path = "/api/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket found", body = Ticket),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets"
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ticket_service.get(id).await?))
}

/// Create a ticket
#[utoipa::path(
    post,
    path = "/api/tickets",
    request_body = CreateTicketRequest,
    responses(
        (status = 201, description = "Ticket created", body = Ticket),
        (status = 400, description = "Invalid ticket", body = crate::dtos::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Organizer role required", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTicketRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state.ticket_service.create(req).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// Create several tickets at once; none are created if any entry is invalid
#[utoipa::path(
    post,
    path = "/api/tickets/batch",
    request_body = CreateTicketBatchRequest,
    responses(
        (status = 201, description = "Tickets created", body = [Ticket]),
        (status = 400, description = "An entry is invalid", body = crate::dtos::ErrorResponse),
        (status = 403, description = "Organizer role required", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn create_ticket_batch(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTicketBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tickets = state.ticket_service.create_batch(req.tickets).await?;
    Ok((StatusCode::CREATED, Json(tickets)))
}

/// Partially update a ticket
#[utoipa::path(
    put,
    path = "/api/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = UpdateTicketRequest,
    responses(
        (status = 200, description = "Ticket updated", body = Ticket),
        (status = 400, description = "Invalid update", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Ticket already purchased or used", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateTicketRequest>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ticket_service.update(id, req).await?))
}

/// Set a ticket's status
#[utoipa::path(
    patch,
    path = "/api/tickets/{id}/status",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status updated", body = Ticket),
        (status = 400, description = "Unknown status", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<StatusUpdateRequest>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ticket_service.update_status(id, &req.status).await?))
}

/// Buy tickets for the calling identity
#[utoipa::path(
    post,
    path = "/api/tickets/{id}/purchase",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Purchase recorded", body = Ticket),
        (status = 400, description = "Not on sale or not enough quota", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn purchase_ticket(
    State(state): State<AppState>,
    Session(session): Session,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PurchaseRequest>,
) -> Result<Json<Ticket>, AppError> {
    // Only administrators may back-date or pre-date a purchase.
    let timestamp = req
        .timestamp
        .filter(|_| session.has_any_role(&[Role::Admin]));

    let ticket = state
        .ticket_service
        .purchase(id, req.amount, timestamp, session.subject_id)
        .await?;
    Ok(Json(ticket))
}

/// Mark a ticket as used at the gate
#[utoipa::path(
    post,
    path = "/api/tickets/{id}/validate",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket marked as used", body = Ticket),
        (status = 400, description = "Ticket already used or expired", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn validate_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ticket_service.validate(id).await?))
}

/// Delete a ticket that has not been sold
#[utoipa::path(
    delete,
    path = "/api/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 204, description = "Ticket deleted"),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Ticket already purchased or used", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.ticket_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run the expiry sweep now instead of waiting for the scheduler
#[utoipa::path(
    post,
    path = "/api/tickets/expire",
    responses(
        (status = 200, description = "Number of tickets expired", body = ExpiredResponse),
        (status = 403, description = "Admin role required", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn expire_tickets(State(state): State<AppState>) -> Result<Json<ExpiredResponse>, AppError> {
    let expired = state.ticket_service.expire_overdue_now().await?;
    Ok(Json(ExpiredResponse { expired }))
}

/// Expire one ticket whose sale has ended
#[utoipa::path(
    post,
    path = "/api/tickets/{id}/expire",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket after the expiry check", body = Ticket),
        (status = 403, description = "Admin role required", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Ticket not found", body = crate::dtos::ErrorResponse)
    ),
    tag = "Tickets",
    security(("bearer_auth" = []))
)]
pub async fn expire_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ticket_service.expire(id).await?))
}
