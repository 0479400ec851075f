use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::{PgUserStore, UserStore};
use crate::cache::{MemoryCache, RedisCache, SessionCache};
use crate::config::{AppConfig, CacheBackend};
use crate::contacts::repo::{ContactStore, PgContactStore};
use crate::mail::{HttpMailTransport, LogTransport, MailQueue, MailTransport, RetryPolicy};
use crate::ratelimit::RateLimiter;
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub users: Arc<dyn UserStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub cache: Option<Arc<dyn SessionCache>>,
    pub storage: Arc<dyn StorageClient>,
    pub mail: MailQueue,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let upstream = config.http.upstream_timeout();

        let connect = config
            .database_url
            .parse::<PgConnectOptions>()
            .context("parse DATABASE_URL")?
            .options([("statement_timeout", upstream.as_millis().to_string())]);
        let db = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(upstream)
            .connect_with(connect)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let cache: Option<Arc<dyn SessionCache>> = match config.cache.backend {
            CacheBackend::Redis => {
                let url = config.cache.redis_url.as_deref().context("REDIS_URL")?;
                Some(Arc::new(RedisCache::connect(url, upstream).await?))
            }
            CacheBackend::Memory => Some(Arc::new(MemoryCache::new())),
            CacheBackend::Off => None,
        };
        info!(backend = ?config.cache.backend, "session cache ready");

        let storage =
            Arc::new(Storage::new(&config.storage, upstream).await?) as Arc<dyn StorageClient>;

        let transport: Arc<dyn MailTransport> = match &config.mail.api_key {
            Some(key) => Arc::new(HttpMailTransport::new(&config.mail, key.clone(), upstream)?),
            None => {
                info!("MAIL_API_KEY not set; outgoing mail is only logged");
                Arc::new(LogTransport)
            }
        };
        let policy = RetryPolicy {
            max_attempts: config.mail.max_attempts,
            base_delay: Duration::from_millis(config.mail.backoff_base_ms),
        };
        // The worker stops once every queue handle is dropped.
        let (mail, _worker) = MailQueue::start(transport, config.mail.queue_capacity, policy);

        Ok(Self {
            jwt: JwtKeys::from_config(&config.jwt)?,
            users: Arc::new(PgUserStore::new(db.clone())),
            contacts: Arc::new(PgContactStore::new(db)),
            cache,
            storage,
            mail,
            limiter: Arc::new(
                RateLimiter::per_minute(config.http.contacts_rate_limit_per_minute)
                    .trusting_forwarded_for(config.http.trust_forwarded_for),
            ),
            config,
        })
    }
}
