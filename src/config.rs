use std::time::Duration;

use anyhow::Context;
use jsonwebtoken::Algorithm;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub verification_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
}

impl JwtConfig {
    /// Only HMAC algorithms can be driven by a shared secret.
    pub fn algorithm(&self) -> anyhow::Result<Algorithm> {
        let alg: Algorithm = self
            .algorithm
            .parse()
            .with_context(|| format!("unknown JWT algorithm {}", self.algorithm))?;
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
            other => anyhow::bail!("JWT algorithm {:?} needs a key pair, not a secret", other),
        }
    }

    /// Every token lifetime must be positive and stay within a sane bound.
    pub fn check_lifetimes(&self) -> anyhow::Result<()> {
        in_range("ACCESS_TOKEN_EXPIRE_MINUTES", self.access_ttl_minutes, 24 * 60)?;
        in_range("REFRESH_TOKEN_EXPIRE_DAYS", self.refresh_ttl_days, 365)?;
        in_range("VERIFICATION_TOKEN_EXPIRE_HOURS", self.verification_ttl_hours, 30 * 24)?;
        in_range("RESET_TOKEN_EXPIRE_MINUTES", self.reset_ttl_minutes, 24 * 60)?;
        Ok(())
    }
}

fn in_range(key: &str, value: i64, max: i64) -> anyhow::Result<()> {
    if !(1..=max).contains(&value) {
        anyhow::bail!("{key} must be between 1 and {max}, got {value}");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base used to build avatar links; defaults to `{endpoint}/{bucket}`.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
    pub app_base_url: String,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
    Off,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub upstream_timeout_secs: u64,
    pub contacts_rate_limit_per_minute: usize,
    /// Key rate limits on `X-Forwarded-For`; only safe behind a proxy that sets it.
    pub trust_forwarded_for: bool,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            algorithm: var_or("JWT_ALGORITHM", "HS256"),
            issuer: var_or("JWT_ISSUER", "contactbook"),
            audience: var_or("JWT_AUDIENCE", "contactbook-users"),
            access_ttl_minutes: parsed_or("ACCESS_TOKEN_EXPIRE_MINUTES", 30),
            refresh_ttl_days: parsed_or("REFRESH_TOKEN_EXPIRE_DAYS", 7),
            verification_ttl_hours: parsed_or("VERIFICATION_TOKEN_EXPIRE_HOURS", 24),
            reset_ttl_minutes: parsed_or("RESET_TOKEN_EXPIRE_MINUTES", 30),
        };
        jwt.algorithm()?;
        jwt.check_lifetimes()?;

        let storage = StorageConfig {
            endpoint: var_or("MINIO_ENDPOINT", "http://localhost:9000"),
            bucket: var_or("MINIO_BUCKET", "avatars"),
            access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY is required")?,
            secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY is required")?,
            region: var_or("MINIO_REGION", "us-east-1"),
            public_base_url: std::env::var("AVATAR_PUBLIC_BASE_URL").ok(),
        };

        let mail = MailConfig {
            api_url: var_or("MAIL_API_URL", "https://api.sendgrid.com/v3/mail/send"),
            api_key: std::env::var("MAIL_API_KEY").ok().filter(|k| !k.is_empty()),
            from: var_or("MAIL_FROM", "no-reply@contactbook.local"),
            app_base_url: var_or("APP_BASE_URL", "http://127.0.0.1:8080"),
            queue_capacity: parsed_or("MAIL_QUEUE_CAPACITY", 256),
            max_attempts: parsed_or("MAIL_MAX_ATTEMPTS", 4),
            backoff_base_ms: parsed_or("MAIL_BACKOFF_BASE_MS", 500),
        };

        let redis_url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty());
        let backend = match std::env::var("SESSION_CACHE").ok().as_deref() {
            Some("redis") => CacheBackend::Redis,
            Some("memory") => CacheBackend::Memory,
            Some("off") => CacheBackend::Off,
            Some(other) => anyhow::bail!("unknown SESSION_CACHE backend {}", other),
            None if redis_url.is_some() => CacheBackend::Redis,
            None => CacheBackend::Off,
        };
        if backend == CacheBackend::Redis && redis_url.is_none() {
            anyhow::bail!("SESSION_CACHE=redis requires REDIS_URL");
        }
        let cache = CacheConfig { backend, redis_url };

        let http = HttpConfig {
            host: var_or("APP_HOST", "0.0.0.0"),
            port: parsed_or("APP_PORT", 8080),
            request_timeout_secs: parsed_or("REQUEST_TIMEOUT_SECS", 15),
            upstream_timeout_secs: parsed_or("UPSTREAM_TIMEOUT_SECS", 5),
            contacts_rate_limit_per_minute: parsed_or("CONTACTS_RATE_LIMIT_PER_MINUTE", 10),
            trust_forwarded_for: parsed_or("TRUST_FORWARDED_FOR", false),
        };

        Ok(Self {
            database_url,
            jwt,
            storage,
            mail,
            cache,
            http,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(alg: &str) -> JwtConfig {
        JwtConfig {
            secret: "s".into(),
            algorithm: alg.into(),
            issuer: "i".into(),
            audience: "a".into(),
            access_ttl_minutes: 1,
            refresh_ttl_days: 1,
            verification_ttl_hours: 1,
            reset_ttl_minutes: 1,
        }
    }

    #[test]
    fn hmac_algorithms_are_accepted() {
        assert_eq!(jwt_with("HS256").algorithm().unwrap(), Algorithm::HS256);
        assert_eq!(jwt_with("HS512").algorithm().unwrap(), Algorithm::HS512);
    }

    #[test]
    fn asymmetric_or_unknown_algorithms_are_rejected() {
        assert!(jwt_with("RS256").algorithm().is_err());
        assert!(jwt_with("nope").algorithm().is_err());
    }

    #[test]
    fn lifetimes_must_be_positive_and_bounded() {
        assert!(jwt_with("HS256").check_lifetimes().is_ok());

        let mut negative = jwt_with("HS256");
        negative.access_ttl_minutes = -5;
        assert!(negative.check_lifetimes().is_err());

        let mut zero = jwt_with("HS256");
        zero.reset_ttl_minutes = 0;
        assert!(zero.check_lifetimes().is_err());

        let mut huge = jwt_with("HS256");
        huge.refresh_ttl_days = 10_000_000;
        assert!(huge.check_lifetimes().is_err());
    }
}
