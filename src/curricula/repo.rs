use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::curricula::repo_types::{Curriculum, CurriculumFilter};
use crate::repository::{RepoError, RepoResult, Repository};

#[derive(Clone)]
pub struct PgCurriculumRepository {
    db: PgPool,
}

impl PgCurriculumRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Repository<Curriculum> for PgCurriculumRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Option<Curriculum>> {
        let row = sqlx::query_as::<_, Curriculum>(
            r#"SELECT id, user_id, title, created_at FROM curricula WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn add(&self, c: Curriculum) -> RepoResult<Curriculum> {
        let row = sqlx::query_as::<_, Curriculum>(
            r#"
            INSERT INTO curricula (id, user_id, title, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, created_at
            "#,
        )
        .bind(c.id)
        .bind(c.user_id)
        .bind(&c.title)
        .bind(c.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, c: Curriculum) -> RepoResult<Curriculum> {
        sqlx::query_as::<_, Curriculum>(
            r#"
            UPDATE curricula SET title = $2
             WHERE id = $1
            RETURNING id, user_id, title, created_at
            "#,
        )
        .bind(c.id)
        .bind(&c.title)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepoError::NotFound)
    }

    // short_links rows go with it (ON DELETE CASCADE)
    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM curricula WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn query(&self, filter: &CurriculumFilter) -> RepoResult<Vec<Curriculum>> {
        let rows = sqlx::query_as::<_, Curriculum>(
            r#"
            SELECT id, user_id, title, created_at
            FROM curricula
            WHERE ($1::uuid IS NULL OR user_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
