use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repository::Entity;

/// Maps a short opaque code to a curriculum. Never mutated once stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    pub id: Uuid,
    pub code: String,
    pub curriculum_id: Uuid,
    pub created_at: OffsetDateTime,
}

impl ShortLink {
    pub fn new(code: String, curriculum_id: Uuid, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            curriculum_id,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShortLinkFilter {
    pub code: Option<String>,
    pub curriculum_id: Option<Uuid>,
}

impl Entity for ShortLink {
    type Id = Uuid;
    type Filter = ShortLinkFilter;

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ShortLinkFilter) -> bool {
        filter.code.as_deref().map_or(true, |c| self.code == c)
            && filter.curriculum_id.map_or(true, |id| self.curriculum_id == id)
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.code == other.code || self.curriculum_id == other.curriculum_id
    }
}
