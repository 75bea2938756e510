use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 128, message = "Event id is required"))]
    #[schema(example = "concert-2026")]
    pub event_id: String,

    /// REGULAR or VIP
    #[schema(example = "REGULAR")]
    pub ticket_type: String,

    #[schema(example = 150000.0)]
    pub price: f64,

    #[schema(example = 100)]
    pub quota: i32,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Epoch milliseconds
    #[schema(example = 1767225600000_i64)]
    pub sale_start: i64,

    /// Epoch milliseconds
    #[schema(example = 1769904000000_i64)]
    pub sale_end: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTicketBatchRequest {
    #[validate(length(min = 1, max = 100), nested)]
    pub tickets: Vec<CreateTicketRequest>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateTicketRequest {
    #[validate(length(min = 1, max = 128))]
    pub event_id: Option<String>,
    pub ticket_type: Option<String>,
    pub price: Option<f64>,
    pub quota: Option<i32>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub sale_start: Option<i64>,
    pub sale_end: Option<i64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StatusUpdateRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    #[schema(example = "EXPIRED")]
    pub status: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PurchaseRequest {
    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    #[schema(example = 2)]
    pub amount: i32,

    /// Epoch milliseconds to evaluate the sale window at. Honoured for ADMIN callers only;
    /// everyone else buys at the server's clock.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExpiredResponse {
    pub expired: u64,
}
