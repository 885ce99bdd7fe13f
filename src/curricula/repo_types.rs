use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repository::Entity;

/// A résumé owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Curriculum {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: OffsetDateTime,
}

impl Curriculum {
    pub fn new(user_id: Uuid, title: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurriculumFilter {
    pub user_id: Option<Uuid>,
}

impl Entity for Curriculum {
    type Id = Uuid;
    type Filter = CurriculumFilter;

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &CurriculumFilter) -> bool {
        filter.user_id.map_or(true, |u| self.user_id == u)
    }
}
