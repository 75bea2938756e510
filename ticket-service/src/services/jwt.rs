use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{JwtConfig, SigningKeys};
use crate::models::Role;
use crate::utils::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every token this service issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: Uuid,
    pub kind: TokenKind,
    pub roles: Vec<Role>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Token id; for refresh tokens it keys the persisted record.
    pub jti: Uuid,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Failed to encode token: {0}")]
    Encoding(anyhow::Error),
}

impl From<TokenError> for super::error::AuthError {
    fn from(err: TokenError) -> Self {
        use super::error::AuthError;
        match err {
            TokenError::Malformed => AuthError::Malformed,
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::Expired => AuthError::Expired,
            TokenError::Encoding(e) => AuthError::Internal(e),
        }
    }
}

/// Signs and verifies tokens with the configured key material.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock_skew_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Result<Self, anyhow::Error> {
        let (algorithm, encoding_key, decoding_key) = match &config.keys {
            SigningKeys::Hs256 { secret } => {
                let bytes = secret.expose_secret().as_bytes();
                (
                    Algorithm::HS256,
                    EncodingKey::from_secret(bytes),
                    DecodingKey::from_secret(bytes),
                )
            }
            SigningKeys::Rs256 {
                private_key_path,
                public_key_path,
            } => {
                let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to read private key from {}: {}",
                        private_key_path,
                        e
                    )
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

                let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

                (Algorithm::RS256, encoding_key, decoding_key)
            }
        };

        tracing::info!(algorithm = ?algorithm, "Token codec initialized");

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            clock_skew_seconds: config.clock_skew_seconds,
            clock,
        })
    }

    pub fn encode(
        &self,
        subject_id: Uuid,
        roles: &[Role],
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::Encoding(anyhow::anyhow!(
                "Token TTL must be positive"
            )));
        }

        // Whole seconds so the claims round-trip exactly.
        let issued_at = truncate_to_seconds(self.clock.now());
        let expires_at = issued_at + ttl;
        let jti = Uuid::new_v4();

        let claims = Claims {
            sub: subject_id,
            kind,
            roles: roles.to_vec(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(anyhow::anyhow!(e)))?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at,
            expires_at,
        })
    }

    /// Verify the signature, then the claims, then expiry against the injected clock.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is judged below with our own clock and skew, after the signature holds.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })?
            .claims;

        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed);
        }

        let now = self.clock.now().timestamp();
        if now > claims.exp + self.clock_skew_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use secrecy::Secret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/jwt_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/jwt_public.pem");

    fn hs_config(secret: &str, skew: i64) -> JwtConfig {
        JwtConfig {
            keys: SigningKeys::Hs256 {
                secret: Secret::new(secret.to_string()),
            },
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
            clock_skew_seconds: skew,
            rotate_refresh_tokens: true,
            max_failed_attempts: None,
            lockout_seconds: 900,
        }
    }

    fn codec(secret: &str, skew: i64) -> (TokenCodec, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let codec = TokenCodec::new(&hs_config(secret, skew), Arc::new(clock.clone())).unwrap();
        (codec, clock)
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn round_trips_subject_kind_and_roles() {
        let (codec, _) = codec(SECRET, 0);
        let id = Uuid::new_v4();

        let issued = codec
            .encode(id, &[Role::Organizer], TokenKind::Access, Duration::seconds(60))
            .unwrap();
        let claims = codec.decode(&issued.token).unwrap();

        assert_eq!(claims.sub, id);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.roles, vec![Role::Organizer]);
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.exp - claims.iat, 60);
        assert!(issued.expires_at > issued.issued_at);
    }

    #[test]
    fn valid_for_exactly_the_ttl_window() {
        let (codec, clock) = codec(SECRET, 0);
        let issued = codec
            .encode(Uuid::new_v4(), &[], TokenKind::Access, Duration::seconds(900))
            .unwrap();

        clock.set(issued.expires_at);
        assert!(codec.decode(&issued.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(codec.decode(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn skew_extends_acceptance() {
        let (codec, clock) = codec(SECRET, 30);
        let issued = codec
            .encode(Uuid::new_v4(), &[], TokenKind::Access, Duration::seconds(60))
            .unwrap();

        clock.set(issued.expires_at + Duration::seconds(30));
        assert!(codec.decode(&issued.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(codec.decode(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn different_key_is_invalid_signature_even_when_expired() {
        let (issuer, issuer_clock) = codec("ffffffffffffffffffffffffffffffff", 0);
        let (verifier, _) = codec(SECRET, 0);

        let issued = issuer
            .encode(Uuid::new_v4(), &[], TokenKind::Access, Duration::seconds(60))
            .unwrap();
        assert!(matches!(
            verifier.decode(&issued.token),
            Err(TokenError::InvalidSignature)
        ));

        // An expired token from a foreign key is still a signature failure.
        issuer_clock.advance(Duration::hours(-2));
        let stale = issuer
            .encode(Uuid::new_v4(), &[], TokenKind::Access, Duration::seconds(60))
            .unwrap();
        assert!(matches!(
            verifier.decode(&stale.token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_genuine_token_is_expired() {
        let (codec, clock) = codec(SECRET, 0);
        let issued = codec
            .encode(Uuid::new_v4(), &[], TokenKind::Refresh, Duration::seconds(1))
            .unwrap();

        clock.advance(Duration::days(30));
        assert!(matches!(codec.decode(&issued.token), Err(TokenError::Expired)));
    }

    #[test]
    fn garbage_is_malformed() {
        let (codec, _) = codec(SECRET, 0);

        assert!(matches!(codec.decode("not-a-jwt"), Err(TokenError::Malformed)));
        assert!(matches!(codec.decode(""), Err(TokenError::Malformed)));
        assert!(matches!(codec.decode("a.b.c"), Err(TokenError::Malformed)));
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let (codec, _) = codec(SECRET, 0);

        assert!(matches!(
            codec.encode(Uuid::new_v4(), &[], TokenKind::Access, Duration::zero()),
            Err(TokenError::Encoding(_))
        ));
    }

    #[test]
    fn rs256_round_trip_from_key_files() -> Result<(), anyhow::Error> {
        let mut private_file = NamedTempFile::new()?;
        private_file.write_all(PRIVATE_PEM.as_bytes())?;
        let mut public_file = NamedTempFile::new()?;
        public_file.write_all(PUBLIC_PEM.as_bytes())?;

        let mut config = hs_config(SECRET, 0);
        config.keys = SigningKeys::Rs256 {
            private_key_path: private_file.path().to_string_lossy().into_owned(),
            public_key_path: public_file.path().to_string_lossy().into_owned(),
        };

        let codec = TokenCodec::new(&config, Arc::new(ManualClock::new(Utc::now())))?;
        let id = Uuid::new_v4();
        let issued = codec.encode(id, &[Role::Admin], TokenKind::Access, Duration::minutes(5))?;

        assert_eq!(codec.decode(&issued.token)?.sub, id);

        // An HS256 token presented to an RS256 verifier never verifies.
        let (hs, _) = self::codec(SECRET, 0);
        let foreign = hs.encode(id, &[], TokenKind::Access, Duration::minutes(5))?;
        assert!(matches!(
            codec.decode(&foreign.token),
            Err(TokenError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn missing_key_file_fails_construction() {
        let mut config = hs_config(SECRET, 0);
        config.keys = SigningKeys::Rs256 {
            private_key_path: "/nonexistent/private.pem".to_string(),
            public_key_path: "/nonexistent/public.pem".to_string(),
        };

        assert!(TokenCodec::new(&config, Arc::new(ManualClock::new(Utc::now()))).is_err());
    }
}
