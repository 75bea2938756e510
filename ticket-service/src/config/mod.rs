use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

/// Bound on the tolerated clock drift between issuer and verifier.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;
/// Upper bound for any token lifetime (one year).
pub const MAX_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
const MIN_HS256_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory stores (dev only).
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub enum SigningKeys {
    /// Shared secret, HMAC-SHA256.
    Hs256 { secret: Secret<String> },
    /// PEM key files, RSA-SHA256.
    Rs256 {
        private_key_path: String,
        public_key_path: String,
    },
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub keys: SigningKeys,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub clock_skew_seconds: i64,
    pub rotate_refresh_tokens: bool,
    /// Lockout threshold; `None` disables lockout.
    pub max_failed_attempts: Option<u32>,
    /// How long a locked identity stays locked after its last failed attempt.
    pub lockout_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub expiry_interval_seconds: u64,
    /// Capacity of the purchase event queue; events beyond it are dropped.
    pub purchase_event_queue_size: usize,
}

/// Administrator created at startup when absent, so a fresh store is usable.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: Secret<String>,
}

impl TicketConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = TicketConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("ticket-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: if is_prod {
                    Some(Secret::new(get_env("DATABASE_URL", None, true)?))
                } else {
                    get_optional_env("DATABASE_URL").map(Secret::new)
                },
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                acquire_timeout_seconds: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "5", is_prod)?,
            },
            jwt: JwtConfig {
                keys: load_signing_keys(is_prod)?,
                access_ttl_seconds: parse_env("JWT_ACCESS_TTL_SECONDS", "900", is_prod)?,
                refresh_ttl_seconds: parse_env("JWT_REFRESH_TTL_SECONDS", "604800", is_prod)?,
                clock_skew_seconds: parse_env("JWT_CLOCK_SKEW_SECONDS", "30", is_prod)?,
                rotate_refresh_tokens: parse_env("JWT_ROTATE_REFRESH_TOKENS", "true", is_prod)?,
                max_failed_attempts: get_optional_env("AUTH_MAX_FAILED_ATTEMPTS")
                    .map(|v| {
                        v.parse::<u32>().map_err(|e| {
                            AppError::ConfigError(anyhow::anyhow!(
                                "AUTH_MAX_FAILED_ATTEMPTS is invalid: {}",
                                e
                            ))
                        })
                    })
                    .transpose()?,
                lockout_seconds: parse_env("AUTH_LOCKOUT_SECONDS", "900", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
            scheduler: SchedulerConfig {
                expiry_interval_seconds: parse_env(
                    "TICKET_EXPIRY_INTERVAL_SECONDS",
                    "3600",
                    is_prod,
                )?,
                purchase_event_queue_size: parse_env(
                    "PURCHASE_EVENT_QUEUE_SIZE",
                    "1024",
                    is_prod,
                )?,
            },
            bootstrap_admin: load_bootstrap_admin()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        self.jwt.validate()?;

        if self.scheduler.expiry_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TICKET_EXPIRY_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.scheduler.purchase_event_queue_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PURCHASE_EVENT_QUEUE_SIZE must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

impl JwtConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&self.access_ttl_seconds) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TTL_SECONDS must be within 1..={}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&self.refresh_ttl_seconds) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TTL_SECONDS must be within 1..={}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if !(0..=MAX_CLOCK_SKEW_SECONDS).contains(&self.clock_skew_seconds) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_CLOCK_SKEW_SECONDS must be within 0..={}",
                MAX_CLOCK_SKEW_SECONDS
            )));
        }

        if let SigningKeys::Hs256 { secret } = &self.keys {
            if secret.expose_secret().len() < MIN_HS256_SECRET_BYTES {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least {} bytes",
                    MIN_HS256_SECRET_BYTES
                )));
            }
        }

        if self.max_failed_attempts == Some(0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_MAX_FAILED_ATTEMPTS must be positive when set"
            )));
        }

        if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&self.lockout_seconds) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_LOCKOUT_SECONDS must be within 1..={}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        Ok(())
    }
}

fn load_signing_keys(is_prod: bool) -> Result<SigningKeys, AppError> {
    let algorithm = get_env("JWT_ALGORITHM", Some("HS256"), is_prod)?;

    match algorithm.to_uppercase().as_str() {
        "HS256" => Ok(SigningKeys::Hs256 {
            // Dev default is long enough to pass validation; prod must set its own.
            secret: Secret::new(get_env(
                "JWT_SECRET",
                Some("dev-only-signing-secret-not-for-production-use"),
                is_prod,
            )?),
        }),
        "RS256" => Ok(SigningKeys::Rs256 {
            private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
            public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
        }),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Unsupported JWT_ALGORITHM: {}",
            other
        ))),
    }
}

fn load_bootstrap_admin() -> Result<Option<BootstrapAdmin>, AppError> {
    match (
        get_optional_env("BOOTSTRAP_ADMIN_USERNAME"),
        get_optional_env("BOOTSTRAP_ADMIN_PASSWORD"),
    ) {
        (Some(username), Some(password)) => Ok(Some(BootstrapAdmin {
            username,
            password: Secret::new(password),
        })),
        (None, None) => Ok(None),
        _ => Err(AppError::ConfigError(anyhow::anyhow!(
            "BOOTSTRAP_ADMIN_USERNAME and BOOTSTRAP_ADMIN_PASSWORD must be set together"
        ))),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(keys: SigningKeys) -> JwtConfig {
        JwtConfig {
            keys,
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
            clock_skew_seconds: 30,
            rotate_refresh_tokens: true,
            max_failed_attempts: None,
            lockout_seconds: 900,
        }
    }

    fn long_secret() -> SigningKeys {
        SigningKeys::Hs256 {
            secret: Secret::new("0123456789abcdef0123456789abcdef".to_string()),
        }
    }

    #[test]
    fn accepts_defaults() {
        assert!(jwt(long_secret()).validate().is_ok());
    }

    #[test]
    fn rejects_short_hs256_secret() {
        let cfg = jwt(SigningKeys::Hs256 {
            secret: Secret::new("too-short".to_string()),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_skew_outside_bound() {
        let mut cfg = jwt(long_secret());
        cfg.clock_skew_seconds = 61;
        assert!(cfg.validate().is_err());

        cfg.clock_skew_seconds = -1;
        assert!(cfg.validate().is_err());

        cfg.clock_skew_seconds = 60;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_ttls() {
        let mut cfg = jwt(long_secret());
        cfg.access_ttl_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = jwt(long_secret());
        cfg.refresh_ttl_seconds = -5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_ttls_beyond_a_year() {
        let mut cfg = jwt(long_secret());
        cfg.access_ttl_seconds = i64::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = jwt(long_secret());
        cfg.refresh_ttl_seconds = MAX_TOKEN_TTL_SECONDS + 1;
        assert!(cfg.validate().is_err());

        cfg.refresh_ttl_seconds = MAX_TOKEN_TTL_SECONDS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_lockout() {
        let mut cfg = jwt(long_secret());
        cfg.lockout_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_environment() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
