//! Persistence contract for identities and refresh-token records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Identity, RefreshTokenRecord, Role};

use super::database::Database;
use super::error::StoreError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Fails with `StoreError::Duplicate` if the username exists.
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Replace the role set. Returns `false` if the identity does not exist.
    async fn update_roles(&self, id: Uuid, roles: &[Role]) -> Result<bool, StoreError>;

    /// Atomically add `delta` to the failed-attempt counter, flooring at zero.
    /// A positive delta also stamps the last failure time with `at`.
    async fn update_failed_attempts(
        &self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Unknown token ids are not revoked.
    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, StoreError>;

    /// Conditionally flip `revoked` to true. Returns `true` only for the caller that flipped it.
    async fn revoke(&self, token_id: Uuid) -> Result<bool, StoreError>;

    /// Revoke `old_token_id` and record `replacement` as one unit. Returns `false`, with
    /// nothing written, when the old token was already revoked or does not exist.
    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ==================== PostgreSQL ====================

#[derive(FromRow)]
struct IdentityRow {
    identity_id: Uuid,
    username: String,
    password_hash: String,
    role_codes: Vec<String>,
    failed_attempts: i32,
    last_failed_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let roles = row
            .role_codes
            .iter()
            .map(|code| code.parse::<Role>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        Ok(Identity {
            id: row.identity_id,
            username: row.username,
            password_hash: row.password_hash,
            roles,
            failed_attempts: row.failed_attempts,
            last_failed_utc: row.last_failed_utc,
            created_utc: row.created_utc,
        })
    }
}

/// `CredentialStore` over the `identities` and `refresh_tokens` tables.
#[derive(Clone)]
pub struct PgCredentialStore {
    db: Database,
}

impl PgCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert_refresh_token<'e, E>(
        executor: E,
        record: &RefreshTokenRecord,
    ) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, identity_id, token_hash, expires_utc, revoked, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.token_id)
        .bind(record.identity_id)
        .bind(&record.token_hash)
        .bind(record.expires_utc)
        .bind(record.revoked)
        .bind(record.created_utc)
        .execute(executor)
        .await?;
        Ok(())
    }
}

const IDENTITY_COLUMNS: &str =
    "identity_id, username, password_hash, role_codes, failed_attempts, last_failed_utc, created_utc";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE username = $1",
            IDENTITY_COLUMNS
        ))
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE identity_id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let role_codes: Vec<String> = identity.roles.iter().map(|r| r.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO identities (identity_id, username, password_hash, role_codes,
                                    failed_attempts, last_failed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.username)
        .bind(&identity.password_hash)
        .bind(&role_codes)
        .bind(identity.failed_attempts)
        .bind(identity.last_failed_utc)
        .bind(identity.created_utc)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn update_roles(&self, id: Uuid, roles: &[Role]) -> Result<bool, StoreError> {
        let role_codes: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();

        let result = sqlx::query("UPDATE identities SET role_codes = $2 WHERE identity_id = $1")
            .bind(id)
            .bind(&role_codes)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_failed_attempts(
        &self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET failed_attempts = GREATEST(failed_attempts + $2, 0),
                last_failed_utc = CASE WHEN $2 > 0 THEN $3 ELSE last_failed_utc END
            WHERE identity_id = $1
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn record_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        Self::insert_refresh_token(self.db.pool(), record).await
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT token_id, identity_id, token_hash, expires_utc, revoked, created_utc FROM refresh_tokens WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(self.db.pool())
        .await?)
    }

    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let revoked: Option<bool> =
            sqlx::query_scalar("SELECT revoked FROM refresh_tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(revoked.unwrap_or(false))
    }

    async fn revoke(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token_id = $1 AND revoked = FALSE",
        )
        .bind(token_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token_id = $1 AND revoked = FALSE",
        )
        .bind(old_token_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_refresh_token(&mut *tx, replacement).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.health_check().await
    }
}

// ==================== In-memory ====================

#[derive(Default)]
struct MemoryState {
    identities: HashMap<Uuid, Identity>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

/// In-memory `CredentialStore` for tests and local runs without a database.
///
/// Each primitive takes the lock once, so conditional updates are atomic.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<MemoryState>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .state()
            .identities
            .values()
            .find(|i| i.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.state().identities.get(&id).cloned())
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.identities.values().any(|i| i.username == identity.username) {
            return Err(StoreError::Duplicate(format!(
                "username {} exists",
                identity.username
            )));
        }
        state.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update_roles(&self, id: Uuid, roles: &[Role]) -> Result<bool, StoreError> {
        match self.state().identities.get_mut(&id) {
            Some(identity) => {
                identity.roles = roles.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_failed_attempts(
        &self,
        id: Uuid,
        delta: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(identity) = self.state().identities.get_mut(&id) {
            identity.failed_attempts = identity.failed_attempts.saturating_add(delta).max(0);
            if delta > 0 {
                identity.last_failed_utc = Some(at);
            }
        }
        Ok(())
    }

    async fn record_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.refresh_tokens.contains_key(&record.token_id) {
            return Err(StoreError::Duplicate(format!("token {}", record.token_id)));
        }
        state.refresh_tokens.insert(record.token_id, record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.state().refresh_tokens.get(&token_id).cloned())
    }

    async fn is_revoked(&self, token_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .refresh_tokens
            .get(&token_id)
            .map(|r| r.revoked)
            .unwrap_or(false))
    }

    async fn revoke(&self, token_id: Uuid) -> Result<bool, StoreError> {
        match self.state().refresh_tokens.get_mut(&token_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.refresh_tokens.contains_key(&replacement.token_id) {
            return Err(StoreError::Duplicate(format!("token {}", replacement.token_id)));
        }
        match state.refresh_tokens.get_mut(&old_token_id) {
            Some(record) if !record.revoked => record.revoked = true,
            _ => return Ok(false),
        }
        state
            .refresh_tokens
            .insert(replacement.token_id, replacement.clone());
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity(username: &str) -> Identity {
        Identity::new(username.to_string(), "hash".to_string(), vec![Role::Attendee], Utc::now())
    }

    #[tokio::test]
    async fn rejects_duplicate_username() {
        let store = InMemoryCredentialStore::new();
        store.insert_identity(&identity("alice")).await.unwrap();

        let err = store.insert_identity(&identity("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn failed_attempts_floor_at_zero() {
        let store = InMemoryCredentialStore::new();
        let alice = identity("alice");
        store.insert_identity(&alice).await.unwrap();

        let first = Utc::now();
        let second = first + Duration::seconds(5);
        store.update_failed_attempts(alice.id, 1, first).await.unwrap();
        store.update_failed_attempts(alice.id, 1, second).await.unwrap();
        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 2);
        assert_eq!(stored.last_failed_utc, Some(second));

        store
            .update_failed_attempts(alice.id, -10, second + Duration::seconds(5))
            .await
            .unwrap();
        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 0);
        assert_eq!(stored.last_failed_utc, Some(second));
    }

    #[tokio::test]
    async fn revoke_succeeds_exactly_once() {
        let store = InMemoryCredentialStore::new();
        let now = Utc::now();
        let record = RefreshTokenRecord::new(Uuid::new_v4(), Uuid::new_v4(), "t", now, now + Duration::days(1));
        store.record_refresh_token(&record).await.unwrap();

        assert!(!store.is_revoked(record.token_id).await.unwrap());
        assert!(store.revoke(record.token_id).await.unwrap());
        assert!(!store.revoke(record.token_id).await.unwrap());
        assert!(store.is_revoked(record.token_id).await.unwrap());
    }

    #[tokio::test]
    async fn rotation_swaps_tokens_once() {
        let store = InMemoryCredentialStore::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let old = RefreshTokenRecord::new(Uuid::new_v4(), owner, "old", now, now + Duration::days(1));
        let first = RefreshTokenRecord::new(Uuid::new_v4(), owner, "a", now, now + Duration::days(1));
        let second = RefreshTokenRecord::new(Uuid::new_v4(), owner, "b", now, now + Duration::days(1));
        store.record_refresh_token(&old).await.unwrap();

        assert!(store.rotate_refresh_token(old.token_id, &first).await.unwrap());
        assert!(!store.rotate_refresh_token(old.token_id, &second).await.unwrap());

        assert!(store.is_revoked(old.token_id).await.unwrap());
        assert!(store.find_refresh_token(first.token_id).await.unwrap().is_some());
        assert!(store.find_refresh_token(second.token_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotation_leaves_old_token_live_when_replacement_is_rejected() {
        let store = InMemoryCredentialStore::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let old = RefreshTokenRecord::new(Uuid::new_v4(), owner, "old", now, now + Duration::days(1));
        let taken = RefreshTokenRecord::new(Uuid::new_v4(), owner, "taken", now, now + Duration::days(1));
        store.record_refresh_token(&old).await.unwrap();
        store.record_refresh_token(&taken).await.unwrap();

        let err = store.rotate_refresh_token(old.token_id, &taken).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert!(!store.is_revoked(old.token_id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_token_is_not_revoked_and_cannot_be_revoked() {
        let store = InMemoryCredentialStore::new();
        let id = Uuid::new_v4();

        assert!(!store.is_revoked(id).await.unwrap());
        assert!(!store.revoke(id).await.unwrap());
        assert!(store.find_refresh_token(id).await.unwrap().is_none());
    }
}
