//! Session cache of user records keyed by email.
//!
//! Entries are only ever filled from the user store and expire after
//! [`ENTRY_TTL`]. Every invalidation bumps a per-email generation; a fill
//! carries the generation seen before its store read and is refused once
//! that generation has moved on, so a slow lookup cannot put back a record
//! that was changed while it was in flight.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Script};

use crate::auth::repo_types::User;

pub const ENTRY_TTL: Duration = Duration::from_secs(15 * 60);

/// Generation counters outlive any lookup that could still be in flight.
const GENERATION_TTL_SECS: i64 = 60 * 60;

/// Invalidation generation observed before a store read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Take this before reading the store for the record to [`SessionCache::fill`].
    async fn ticket(&self, email: &str) -> anyhow::Result<FillTicket>;
    /// Stores `user` unless its email was invalidated after `ticket` was taken.
    /// Returns whether the entry was stored.
    async fn fill(&self, user: &User, ticket: FillTicket) -> anyhow::Result<bool>;
    async fn invalidate(&self, email: &str) -> anyhow::Result<()>;
}

const KEY_PREFIX: &str = "contactbook:user:";
const GENERATION_PREFIX: &str = "contactbook:gen:";

fn key(email: &str) -> String {
    format!("{KEY_PREFIX}{email}")
}

fn generation_key(email: &str) -> String {
    format!("{GENERATION_PREFIX}{email}")
}

// KEYS[1] generation, KEYS[2] entry; ARGV ticket, json, ttl seconds
const FILL_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1]) or '0'
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
return 1
"#;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    timeout: Duration,
    fill_script: Script,
}

impl RedisCache {
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parse REDIS_URL")?;
        let conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .context("redis connect timed out")?
            .context("redis connect")?;
        Ok(Self {
            conn,
            timeout,
            fill_script: Script::new(FILL_SCRIPT),
        })
    }
}

#[async_trait]
impl SessionCache for RedisCache {
    async fn get(&self, email: &str) -> anyhow::Result<Option<User>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = tokio::time::timeout(self.timeout, conn.get(key(email)))
            .await
            .context("redis get timed out")??;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json).context("decode cached user")?)),
            None => Ok(None),
        }
    }

    async fn ticket(&self, email: &str) -> anyhow::Result<FillTicket> {
        let mut conn = self.conn.clone();
        let generation: Option<u64> =
            tokio::time::timeout(self.timeout, conn.get(generation_key(email)))
                .await
                .context("redis get generation timed out")??;
        Ok(FillTicket(generation.unwrap_or(0)))
    }

    async fn fill(&self, user: &User, ticket: FillTicket) -> anyhow::Result<bool> {
        let json = serde_json::to_string(user)?;
        let mut conn = self.conn.clone();
        let mut invocation = self.fill_script.prepare_invoke();
        invocation
            .key(generation_key(&user.email))
            .key(key(&user.email))
            .arg(ticket.0)
            .arg(json)
            .arg(ENTRY_TTL.as_secs());
        let stored: i64 = tokio::time::timeout(self.timeout, invocation.invoke_async(&mut conn))
            .await
            .context("redis fill timed out")??;
        Ok(stored == 1)
    }

    async fn invalidate(&self, email: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(generation_key(email), 1)
            .ignore()
            .expire(generation_key(email), GENERATION_TTL_SECS)
            .ignore()
            .del(key(email))
            .ignore();
        tokio::time::timeout(self.timeout, pipe.query_async::<_, ()>(&mut conn))
            .await
            .context("redis invalidate timed out")??;
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    cached: Option<(User, Instant)>,
}

/// Process-local cache for single-instance deployments and tests.
pub struct MemoryCache {
    ttl: Duration,
    entries: DashMap<String, Slot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_ttl(ENTRY_TTL)
    }

    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.entries.get(email).and_then(|slot| {
            slot.cached
                .as_ref()
                .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
                .map(|(user, _)| user.clone())
        }))
    }

    async fn ticket(&self, email: &str) -> anyhow::Result<FillTicket> {
        Ok(FillTicket(
            self.entries.get(email).map_or(0, |slot| slot.generation),
        ))
    }

    async fn fill(&self, user: &User, ticket: FillTicket) -> anyhow::Result<bool> {
        let mut slot = self.entries.entry(user.email.clone()).or_default();
        if slot.generation != ticket.0 {
            return Ok(false);
        }
        slot.cached = Some((user.clone(), Instant::now()));
        Ok(true)
    }

    async fn invalidate(&self, email: &str) -> anyhow::Result<()> {
        let mut slot = self.entries.entry(email.to_string()).or_default();
        slot.generation += 1;
        slot.cached = None;
        Ok(())
    }
}
