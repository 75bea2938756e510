//! Identity - a principal that can log in.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::Role;

/// Identity owned by the credential store.
///
/// Only the role set and the failed-attempt bookkeeping change after creation.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub failed_attempts: i32,
    pub last_failed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity with a freshly minted id.
    pub fn new(username: String, password_hash: String, roles: Vec<Role>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            roles,
            failed_attempts: 0,
            last_failed_utc: None,
            created_utc: now,
        }
    }

    /// Locked once the threshold is reached, until `lockout` has passed since the last failure.
    pub fn is_locked(
        &self,
        max_failed_attempts: Option<u32>,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(max) = max_failed_attempts else {
            return false;
        };
        if self.failed_attempts < i32::try_from(max).unwrap_or(i32::MAX) {
            return false;
        }
        match self.last_failed_utc {
            Some(at) => now < at + lockout,
            None => true,
        }
    }
}
