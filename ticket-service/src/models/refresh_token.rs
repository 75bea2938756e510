use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted refresh token. Only the SHA-256 of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    /// Matches the token's `jti` claim.
    pub token_id: Uuid,
    pub identity_id: Uuid,
    pub token_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub revoked: bool,
    pub created_utc: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(
        token_id: Uuid,
        identity_id: Uuid,
        token: &str,
        issued_utc: DateTime<Utc>,
        expires_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id,
            identity_id,
            token_hash: Self::hash_token(token),
            expires_utc,
            revoked: false,
            created_utc: issued_utc,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn matches(&self, token: &str) -> bool {
        self.token_hash == Self::hash_token(token)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_utc
    }
}
