use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Seconds a client should wait before retrying when a store is unreachable.
pub const STORE_RETRY_AFTER_SECONDS: u64 = 5;

/// Failure reported by a store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity or pool exhaustion; the caller may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Store error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(anyhow::Error::new(err))
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            other => StoreError::Backend(anyhow::Error::new(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Token revoked")]
    Revoked,

    #[error("Insufficient role")]
    InsufficientRole,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Credential store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingToken => "missing_token",
            AuthError::Malformed => "malformed",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidToken => "invalid_token",
            AuthError::Expired => "expired",
            AuthError::Revoked => "revoked",
            AuthError::InsufficientRole => "insufficient_role",
            AuthError::UsernameTaken => "username_taken",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AuthError::StoreUnavailable(e),
            StoreError::Duplicate(_) => AuthError::UsernameTaken,
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole => AppError::Forbidden(anyhow::anyhow!("Insufficient role")),
            AuthError::UsernameTaken => {
                AppError::Conflict(anyhow::anyhow!("Username already taken"))
            }
            AuthError::StoreUnavailable(e) => {
                AppError::ServiceUnavailable(e, Some(STORE_RETRY_AFTER_SECONDS))
            }
            AuthError::Internal(e) => AppError::InternalError(e),
            other => AppError::Unauthorized(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum TicketError {
    #[error("Ticket not found with id: {0}")]
    NotFound(Uuid),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TicketError> for AppError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::NotFound(id) => {
                AppError::NotFound(anyhow::anyhow!("Ticket not found with id: {}", id))
            }
            TicketError::Invalid(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            TicketError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            TicketError::Store(StoreError::Unavailable(e)) => {
                AppError::ServiceUnavailable(e, Some(STORE_RETRY_AFTER_SECONDS))
            }
            TicketError::Store(StoreError::Duplicate(msg)) => {
                AppError::Conflict(anyhow::anyhow!(msg))
            }
            TicketError::Store(StoreError::Backend(e)) => AppError::DatabaseError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};

    fn status_of(err: AuthError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn auth_errors_map_to_http_statuses() {
        assert_eq!(status_of(AuthError::InsufficientRole), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AuthError::UsernameTaken), StatusCode::CONFLICT);
        assert_eq!(
            status_of(AuthError::StoreUnavailable(anyhow::anyhow!("down"))),
            StatusCode::SERVICE_UNAVAILABLE
        );

        for err in [
            AuthError::InvalidCredentials,
            AuthError::MissingToken,
            AuthError::Malformed,
            AuthError::InvalidSignature,
            AuthError::InvalidToken,
            AuthError::Expired,
            AuthError::Revoked,
        ] {
            assert_eq!(status_of(err), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn store_unavailable_carries_retry_after() {
        let res = AppError::from(AuthError::StoreUnavailable(anyhow::anyhow!("down"))).into_response();
        assert_eq!(res.headers()["retry-after"], "5");
    }

    #[test]
    fn ticket_errors_map_to_http_statuses() {
        let status = |e: TicketError| AppError::from(e).into_response().status();

        assert_eq!(status(TicketError::NotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(TicketError::Invalid("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(TicketError::Conflict("sold".into())), StatusCode::CONFLICT);
    }
}
