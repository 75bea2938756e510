use chrono::Duration;
use metrics::counter;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::JwtConfig,
    dtos::auth::TokenResponse,
    models::{Identity, RefreshTokenRecord, Role},
    services::{
        error::{AuthError, StoreError},
        jwt::{TokenCodec, TokenKind},
        CredentialStore,
    },
    utils::{hash_password, verify_password_or_dummy, Clock, Password},
};

/// Login, refresh and registration over a `CredentialStore`.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    rotate_refresh_tokens: bool,
    max_failed_attempts: Option<u32>,
    lockout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        config: &JwtConfig,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            access_ttl: Duration::seconds(config.access_ttl_seconds),
            refresh_ttl: Duration::seconds(config.refresh_ttl_seconds),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
            max_failed_attempts: config.max_failed_attempts,
            lockout: Duration::seconds(config.lockout_seconds),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Verify a credential pair and issue an access + refresh token pair.
    ///
    /// Unknown username, wrong password and locked account all fail the same way.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: Password) -> Result<TokenResponse, AuthError> {
        let identity = self.store.find_by_username(username).await?;

        let password_hash = identity.as_ref().map(|i| i.password_hash.clone());
        let matched = tokio::task::spawn_blocking(move || {
            verify_password_or_dummy(&password, password_hash.as_deref())
        })
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("Password verification task failed: {}", e)))?;

        let Some(identity) = identity else {
            counter!("auth_login_total", "outcome" => "failure").increment(1);
            return Err(AuthError::InvalidCredentials);
        };

        let now = self.clock.now();
        if identity.is_locked(self.max_failed_attempts, self.lockout, now) {
            tracing::warn!(user_id = %identity.id, "Login attempt on locked identity");
            counter!("auth_login_total", "outcome" => "locked").increment(1);
            return Err(AuthError::InvalidCredentials);
        }

        if !matched {
            self.store.update_failed_attempts(identity.id, 1, now).await?;
            tracing::info!(user_id = %identity.id, "Password mismatch");
            counter!("auth_login_total", "outcome" => "failure").increment(1);
            return Err(AuthError::InvalidCredentials);
        }

        if identity.failed_attempts > 0 {
            self.store
                .update_failed_attempts(identity.id, -identity.failed_attempts, now)
                .await?;
        }

        let access_token = self.issue_access_token(identity.id, &identity.roles)?;
        let refresh_token = self.issue_refresh_token(identity.id).await?;

        tracing::info!(user_id = %identity.id, "User logged in");
        counter!("auth_login_total", "outcome" => "success").increment(1);

        Ok(self.token_response(access_token, refresh_token))
    }

    /// Exchange a refresh token for a new access token, rotating the refresh token if enabled.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let result = self.refresh_inner(refresh_token).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.reason(),
        };
        counter!("auth_refresh_total", "outcome" => outcome).increment(1);

        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self.codec.decode(refresh_token)?;

        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::InvalidToken);
        }

        if self.rotate_refresh_tokens {
            if self.store.is_revoked(claims.jti).await? {
                tracing::warn!(user_id = %claims.sub, token_id = %claims.jti, "Revoked refresh token presented");
                return Err(AuthError::Revoked);
            }

            let record = self
                .store
                .find_refresh_token(claims.jti)
                .await?
                .ok_or(AuthError::InvalidToken)?;

            if record.identity_id != claims.sub || !record.matches(refresh_token) {
                tracing::warn!(user_id = %claims.sub, "Refresh token hash mismatch");
                return Err(AuthError::InvalidToken);
            }

            if record.is_expired(self.clock.now()) {
                return Err(AuthError::Expired);
            }
        }

        let identity = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let refresh_token = if self.rotate_refresh_tokens {
            let (token, record) = self.mint_refresh_token(identity.id)?;
            // Only the caller that flips the flag may continue.
            if !self.store.rotate_refresh_token(claims.jti, &record).await? {
                return Err(AuthError::Revoked);
            }
            token
        } else {
            refresh_token.to_string()
        };

        let access_token = self.issue_access_token(identity.id, &identity.roles)?;

        tracing::info!(user_id = %identity.id, "Token refreshed");

        Ok(self.token_response(access_token, refresh_token))
    }

    /// Self-service registration; new identities are attendees.
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: Password) -> Result<Identity, AuthError> {
        let identity = self
            .create_identity(username, password, vec![Role::Attendee])
            .await?;

        tracing::info!(user_id = %identity.id, "User registered");
        Ok(identity)
    }

    /// Create an identity with an explicit role set.
    pub async fn create_identity(
        &self,
        username: &str,
        password: Password,
        roles: Vec<Role>,
    ) -> Result<Identity, AuthError> {
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))??;

        let identity = Identity::new(username.to_string(), password_hash, roles, self.clock.now());

        self.store
            .insert_identity(&identity)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => AuthError::UsernameTaken,
                other => AuthError::from(other),
            })?;

        Ok(identity)
    }

    /// Create the identity if the username is free; used for the bootstrap administrator.
    pub async fn ensure_identity(
        &self,
        username: &str,
        password: Password,
        roles: Vec<Role>,
    ) -> Result<Identity, AuthError> {
        if let Some(existing) = self.store.find_by_username(username).await? {
            return Ok(existing);
        }

        match self.create_identity(username, password, roles).await {
            Err(AuthError::UsernameTaken) => self
                .store
                .find_by_username(username)
                .await?
                .ok_or(AuthError::UsernameTaken),
            other => other,
        }
    }

    /// Replace an identity's role set. `None` if the identity does not exist.
    #[instrument(skip(self))]
    pub async fn update_roles(
        &self,
        id: Uuid,
        roles: Vec<Role>,
    ) -> Result<Option<Identity>, AuthError> {
        if !self.store.update_roles(id, &roles).await? {
            return Ok(None);
        }

        tracing::info!(user_id = %id, roles = ?roles, "Roles updated");

        Ok(self.store.find_by_id(id).await?)
    }

    fn issue_access_token(&self, subject_id: Uuid, roles: &[Role]) -> Result<String, AuthError> {
        Ok(self
            .codec
            .encode(subject_id, roles, TokenKind::Access, self.access_ttl)?
            .token)
    }

    fn mint_refresh_token(&self, subject_id: Uuid) -> Result<(String, RefreshTokenRecord), AuthError> {
        let issued = self
            .codec
            .encode(subject_id, &[], TokenKind::Refresh, self.refresh_ttl)?;
        let record = RefreshTokenRecord::new(
            issued.jti,
            subject_id,
            &issued.token,
            issued.issued_at,
            issued.expires_at,
        );
        Ok((issued.token, record))
    }

    async fn issue_refresh_token(&self, subject_id: Uuid) -> Result<String, AuthError> {
        if !self.rotate_refresh_tokens {
            return Ok(self
                .codec
                .encode(subject_id, &[], TokenKind::Refresh, self.refresh_ttl)?
                .token);
        }

        let (token, record) = self.mint_refresh_token(subject_id)?;
        self.store.record_refresh_token(&record).await?;
        Ok(token)
    }

    fn token_response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        }
    }
}
