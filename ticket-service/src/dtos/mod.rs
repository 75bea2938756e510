pub mod auth;
pub mod ticket;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Invalid credentials")]
    pub error: String,
    /// Field-level detail for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
