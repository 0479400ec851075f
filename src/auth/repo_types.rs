use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
///
/// Serializes in full (hash included) so the session cache can hold it;
/// handlers answer with `PublicUser` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,                    // unique user ID
    pub email: String,              // lookup key
    pub password_hash: String,      // Argon2 PHC string
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: OffsetDateTime, // creation timestamp
}
