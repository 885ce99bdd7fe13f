use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repository::Entity;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // unique user ID
    pub name: String,                 // display name
    pub email: String,                // lower-cased, unique
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub created_at: OffsetDateTime,   // creation timestamp
}

impl User {
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub email: Option<String>,
}

impl Entity for User {
    type Id = Uuid;
    type Filter = UserFilter;

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &UserFilter) -> bool {
        filter.email.as_deref().map_or(true, |e| self.email == e)
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.email == other.email
    }
}
