use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    models::Role,
    services::{AuthError, TokenCodec, TokenKind},
};

/// What a route demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    Public,
    Authenticated,
    /// Caller must hold at least one of these roles.
    AnyRole(&'static [Role]),
}

impl AccessRule {
    fn requires_token(&self) -> bool {
        !matches!(self, AccessRule::Public)
    }
}

/// Authenticated caller attached to the request by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub subject_id: Uuid,
    pub roles: Vec<Role>,
    pub token_id: Uuid,
}

impl SessionContext {
    pub fn has_any_role(&self, required: &[Role]) -> bool {
        self.roles.iter().any(|r| required.contains(r))
    }
}

/// Stateless bearer-token check shared by every guarded route.
#[derive(Clone)]
pub struct RequestGate {
    codec: Arc<TokenCodec>,
}

impl RequestGate {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Resolve the caller for `rule`.
    ///
    /// Returns `Ok(None)` only for a public route reached without a bearer
    /// credential. A bearer token that is present is always verified, even on
    /// public routes.
    pub fn authorize(
        &self,
        authorization: Option<&HeaderValue>,
        rule: &AccessRule,
    ) -> Result<Option<SessionContext>, AuthError> {
        let token = match authorization.and_then(bearer_token) {
            Some(token) => token,
            None if rule.requires_token() => return Err(AuthError::MissingToken),
            None => return Ok(None),
        };

        if token.is_empty() {
            return Err(AuthError::Malformed);
        }

        let claims = self.codec.decode(token)?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::InvalidToken);
        }

        let session = SessionContext {
            subject_id: claims.sub,
            roles: claims.roles,
            token_id: claims.jti,
        };

        if let AccessRule::AnyRole(required) = rule {
            if !session.has_any_role(required) {
                return Err(AuthError::InsufficientRole);
            }
        }

        Ok(Some(session))
    }
}

/// Extract the credential from `Authorization: Bearer <token>`. Any other
/// scheme counts as no credential.
fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Middleware state: the gate plus the rule for the routes it wraps.
#[derive(Clone)]
pub struct Guard {
    gate: RequestGate,
    rule: AccessRule,
}

impl Guard {
    pub fn new(gate: RequestGate, rule: AccessRule) -> Self {
        Self { gate, rule }
    }
}

/// Middleware enforcing a route's `AccessRule`
pub async fn require_access(
    State(guard): State<Guard>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req.headers().get(header::AUTHORIZATION);

    match guard.gate.authorize(authorization, &guard.rule) {
        Ok(Some(session)) => {
            tracing::debug!(user_id = %session.subject_id, "Request authorized");
            req.extensions_mut().insert(session);
        }
        Ok(None) => {}
        Err(e) => {
            counter!("auth_gate_rejections_total", "reason" => e.reason()).increment(1);
            tracing::info!(
                reason = e.reason(),
                method = %req.method(),
                path = %req.uri().path(),
                "Request rejected by auth gate"
            );
            return Err(e.into());
        }
    }

    Ok(next.run(req).await)
}

/// Extractor for the session the gate attached.
pub struct Session(pub SessionContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .map(Session)
            .ok_or_else(|| AppError::from(AuthError::MissingToken))
    }
}
