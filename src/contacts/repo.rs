use async_trait::async_trait;
use sqlx::PgPool;
use time::Date;

use crate::contacts::repo_types::{birthday_within, Contact, ContactPatch, NewContact};

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn create(&self, new: NewContact) -> anyhow::Result<Contact>;
    async fn list(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<Contact>>;
    async fn get(&self, id: i64) -> anyhow::Result<Option<Contact>>;
    /// `None` when the contact does not exist.
    async fn update(&self, id: i64, patch: ContactPatch) -> anyhow::Result<Option<Contact>>;
    /// Returns the removed record, `None` when it did not exist.
    async fn delete(&self, id: i64) -> anyhow::Result<Option<Contact>>;
    async fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>>;
    /// Contacts whose next birthday is within `today ..= today + days`.
    async fn upcoming_birthdays(&self, today: Date, days: i64) -> anyhow::Result<Vec<Contact>>;
}

const COLUMNS: &str = "id, name, surname, email, phone, birthday, additional_data, avatar_url";

/// `%`, `_` and `\` are literal in user queries.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Clone)]
pub struct PgContactStore {
    db: PgPool,
}

impl PgContactStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn create(&self, new: NewContact) -> anyhow::Result<Contact> {
        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            INSERT INTO contacts (name, surname, email, phone, birthday, additional_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(new.name)
        .bind(new.surname)
        .bind(new.email)
        .bind(new.phone)
        .bind(new.birthday)
        .bind(new.additional_data)
        .fetch_one(&self.db)
        .await?;
        Ok(contact)
    }

    async fn list(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM contacts
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {COLUMNS} FROM contacts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, id: i64, patch: ContactPatch) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts SET
                name = COALESCE($2, name),
                surname = COALESCE($3, surname),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                birthday = COALESCE($6, birthday),
                additional_data = COALESCE($7, additional_data),
                avatar_url = COALESCE($8, avatar_url)
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.surname)
        .bind(patch.email)
        .bind(patch.phone)
        .bind(patch.birthday)
        .bind(patch.additional_data)
        .bind(patch.avatar_url)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            "DELETE FROM contacts WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM contacts
            WHERE name ILIKE $1 OR surname ILIKE $1 OR email ILIKE $1
            ORDER BY id
            "#
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn upcoming_birthdays(&self, today: Date, days: i64) -> anyhow::Result<Vec<Contact>> {
        // Anniversary arithmetic is done in Rust so leap days and
        // month/year rollover follow one implementation.
        let rows = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {COLUMNS} FROM contacts WHERE birthday IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .filter(|c| c.birthday.is_some_and(|b| birthday_within(b, today, days)))
            .collect())
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use crate::contacts::repo_types::matches_query;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryContactStore {
        rows: RwLock<Vec<Contact>>,
        next_id: std::sync::atomic::AtomicI64,
    }

    #[async_trait]
    impl ContactStore for MemoryContactStore {
        async fn create(&self, new: NewContact) -> anyhow::Result<Contact> {
            let id = self
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            let contact = Contact {
                id,
                name: new.name,
                surname: new.surname,
                email: new.email,
                phone: new.phone,
                birthday: new.birthday,
                additional_data: new.additional_data,
                avatar_url: None,
            };
            self.rows.write().await.push(contact.clone());
            Ok(contact)
        }

        async fn list(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<Contact>> {
            Ok(self
                .rows
                .read()
                .await
                .iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect())
        }

        async fn get(&self, id: i64) -> anyhow::Result<Option<Contact>> {
            Ok(self.rows.read().await.iter().find(|c| c.id == id).cloned())
        }

        async fn update(&self, id: i64, patch: ContactPatch) -> anyhow::Result<Option<Contact>> {
            let mut rows = self.rows.write().await;
            Ok(rows.iter_mut().find(|c| c.id == id).map(|c| {
                patch.apply(c);
                c.clone()
            }))
        }

        async fn delete(&self, id: i64) -> anyhow::Result<Option<Contact>> {
            let mut rows = self.rows.write().await;
            Ok(rows
                .iter()
                .position(|c| c.id == id)
                .map(|idx| rows.remove(idx)))
        }

        async fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>> {
            Ok(self
                .rows
                .read()
                .await
                .iter()
                .filter(|c| matches_query(c, query))
                .cloned()
                .collect())
        }

        async fn upcoming_birthdays(&self, today: Date, days: i64) -> anyhow::Result<Vec<Contact>> {
            Ok(self
                .rows
                .read()
                .await
                .iter()
                .filter(|c| c.birthday.is_some_and(|b| birthday_within(b, today, days)))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("doe"), "%doe%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
