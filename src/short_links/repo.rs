use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{RepoError, RepoResult, Repository};
use crate::short_links::repo_types::{ShortLink, ShortLinkFilter};

#[async_trait]
pub trait ShortLinkRepository: Repository<ShortLink> {
    async fn find_by_code(&self, code: &str) -> RepoResult<Option<ShortLink>>;

    async fn find_by_curriculum(&self, curriculum_id: Uuid) -> RepoResult<Option<ShortLink>>;

    /// Drop whatever link the curriculum has and store `link` in its place, atomically.
    async fn replace_for_curriculum(&self, link: ShortLink) -> RepoResult<ShortLink>;
}

#[derive(Clone)]
pub struct PgShortLinkRepository {
    db: PgPool,
}

impl PgShortLinkRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Repository<ShortLink> for PgShortLinkRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Option<ShortLink>> {
        let row = sqlx::query_as::<_, ShortLink>(
            r#"SELECT id, code, curriculum_id, created_at FROM short_links WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn add(&self, link: ShortLink) -> RepoResult<ShortLink> {
        let row = sqlx::query_as::<_, ShortLink>(
            r#"
            INSERT INTO short_links (id, code, curriculum_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, code, curriculum_id, created_at
            "#,
        )
        .bind(link.id)
        .bind(&link.code)
        .bind(link.curriculum_id)
        .bind(link.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, link: ShortLink) -> RepoResult<ShortLink> {
        sqlx::query_as::<_, ShortLink>(
            r#"
            UPDATE short_links SET code = $2, curriculum_id = $3
             WHERE id = $1
            RETURNING id, code, curriculum_id, created_at
            "#,
        )
        .bind(link.id)
        .bind(&link.code)
        .bind(link.curriculum_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepoError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM short_links WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn query(&self, filter: &ShortLinkFilter) -> RepoResult<Vec<ShortLink>> {
        let rows = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT id, code, curriculum_id, created_at
            FROM short_links
            WHERE ($1::text IS NULL OR code = $1)
              AND ($2::uuid IS NULL OR curriculum_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.code.as_deref())
        .bind(filter.curriculum_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ShortLinkRepository for PgShortLinkRepository {
    async fn find_by_code(&self, code: &str) -> RepoResult<Option<ShortLink>> {
        let row = sqlx::query_as::<_, ShortLink>(
            r#"SELECT id, code, curriculum_id, created_at FROM short_links WHERE code = $1"#,
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn find_by_curriculum(&self, curriculum_id: Uuid) -> RepoResult<Option<ShortLink>> {
        let row = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT id, code, curriculum_id, created_at
            FROM short_links
            WHERE curriculum_id = $1
            "#,
        )
        .bind(curriculum_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn replace_for_curriculum(&self, link: ShortLink) -> RepoResult<ShortLink> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM short_links WHERE curriculum_id = $1")
            .bind(link.curriculum_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, ShortLink>(
            r#"
            INSERT INTO short_links (id, code, curriculum_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, code, curriculum_id, created_at
            "#,
        )
        .bind(link.id)
        .bind(&link.code)
        .bind(link.curriculum_id)
        .bind(link.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
}
