use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::repo_types::User;

/// Persistence contract for user identities, keyed by email.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. `None` when the email is already taken.
    async fn create(&self, email: &str, password_hash: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Returns `false` when no user has that email.
    async fn set_verified(&self, email: &str) -> anyhow::Result<bool>;
    /// Returns `false` when no user has that email.
    async fn set_password(&self, email: &str, password_hash: &str) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, email: &str, password_hash: &str) -> anyhow::Result<Option<User>> {
        // The unique index settles concurrent registrations of the same email.
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (email) DO NOTHING
            RETURNING id, email, password_hash, is_active, is_verified, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_active, is_verified, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_verified(&self, email: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"UPDATE users SET is_verified = TRUE WHERE email = $1"#)
            .bind(email)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_password(&self, email: &str, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"UPDATE users SET password_hash = $2 WHERE email = $1"#)
            .bind(email)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use time::OffsetDateTime;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryUserStore {
        users: RwLock<Vec<User>>,
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn create(&self, email: &str, password_hash: &str) -> anyhow::Result<Option<User>> {
            let mut users = self.users.write().await;
            if users.iter().any(|u| u.email == email) {
                return Ok(None);
            }
            let user = User {
                id: users.len() as i64 + 1,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                is_active: true,
                is_verified: false,
                created_at: OffsetDateTime::now_utc(),
            };
            users.push(user.clone());
            Ok(Some(user))
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Ok(self.users.read().await.iter().find(|u| u.email == email).cloned())
        }

        async fn set_verified(&self, email: &str) -> anyhow::Result<bool> {
            let mut users = self.users.write().await;
            match users.iter_mut().find(|u| u.email == email) {
                Some(u) => {
                    u.is_verified = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn set_password(&self, email: &str, password_hash: &str) -> anyhow::Result<bool> {
            let mut users = self.users.write().await;
            match users.iter_mut().find(|u| u.email == email) {
                Some(u) => {
                    u.password_hash = password_hash.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}
