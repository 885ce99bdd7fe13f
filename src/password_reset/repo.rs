use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::password_reset::repo_types::{PasswordResetToken, ResetTokenFilter};
use crate::repository::{RepoError, RepoResult, Repository};

#[async_trait]
pub trait ResetTokenRepository: Repository<PasswordResetToken> {
    async fn find_by_hash(&self, token_hash: &str) -> RepoResult<Option<PasswordResetToken>>;

    /// Revoke every open token of `token.user_id` and store `token`, in one transaction.
    /// Returns how many tokens were revoked.
    async fn issue(&self, token: PasswordResetToken) -> RepoResult<u64>;

    /// Mark the token consumed and set the owner's password hash, in one transaction.
    /// Returns `false` (and changes nothing) if the token is not usable at `now`.
    async fn consume(
        &self,
        token_id: Uuid,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> RepoResult<bool>;
}

const TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, consumed_at, revoked_at, created_at";

#[derive(Clone)]
pub struct PgResetTokenRepository {
    db: PgPool,
}

impl PgResetTokenRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Repository<PasswordResetToken> for PgResetTokenRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Option<PasswordResetToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE id = $1");
        let row = sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn add(&self, t: PasswordResetToken) -> RepoResult<PasswordResetToken> {
        let sql = format!(
            "INSERT INTO password_reset_tokens ({TOKEN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(t.id)
            .bind(t.user_id)
            .bind(&t.token_hash)
            .bind(t.expires_at)
            .bind(t.consumed_at)
            .bind(t.revoked_at)
            .bind(t.created_at)
            .fetch_one(&self.db)
            .await?;
        Ok(row)
    }

    async fn update(&self, t: PasswordResetToken) -> RepoResult<PasswordResetToken> {
        let sql = format!(
            "UPDATE password_reset_tokens \
                SET expires_at = $2, consumed_at = $3, revoked_at = $4 \
              WHERE id = $1 RETURNING {TOKEN_COLUMNS}"
        );
        sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(t.id)
            .bind(t.expires_at)
            .bind(t.consumed_at)
            .bind(t.revoked_at)
            .fetch_optional(&self.db)
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn query(&self, filter: &ResetTokenFilter) -> RepoResult<Vec<PasswordResetToken>> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM password_reset_tokens \
              WHERE ($1::uuid IS NULL OR user_id = $1) \
                AND ($2::text IS NULL OR token_hash = $2) \
                AND (NOT $3 OR (consumed_at IS NULL AND revoked_at IS NULL)) \
              ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(filter.user_id)
            .bind(filter.token_hash.as_deref())
            .bind(filter.open_only)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ResetTokenRepository for PgResetTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> RepoResult<Option<PasswordResetToken>> {
        let sql =
            format!("SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE token_hash = $1");
        let row = sqlx::query_as::<_, PasswordResetToken>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn issue(&self, token: PasswordResetToken) -> RepoResult<u64> {
        let mut tx = self.db.begin().await?;

        // Serialises concurrent requests for the same user.
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(token.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;

        let revoked = sqlx::query(
            r#"
            UPDATE password_reset_tokens
               SET revoked_at = $2
             WHERE user_id = $1 AND consumed_at IS NULL AND revoked_at IS NULL
            "#,
        )
        .bind(token.user_id)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sql = format!(
            "INSERT INTO password_reset_tokens ({TOKEN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, NULL, NULL, $5)"
        );
        sqlx::query(&sql)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(revoked)
    }

    async fn consume(
        &self,
        token_id: Uuid,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> RepoResult<bool> {
        let mut tx = self.db.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE password_reset_tokens
               SET consumed_at = $2
             WHERE id = $1
               AND consumed_at IS NULL
               AND revoked_at IS NULL
               AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls it back.
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(new_password_hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(RepoError::NotFound);
        }

        tx.commit().await?;
        Ok(true)
    }
}
