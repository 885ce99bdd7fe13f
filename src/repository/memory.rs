//! In-process repositories used by the test-suite and by `STORAGE=memory` runs.
//!
//! Unique columns are emulated through [`Entity::conflicts_with`]; the
//! multi-row operations take every lock they need up front so they stay
//! atomic with respect to each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Entity, RepoError, RepoResult, Repository};
use crate::auth::repo::UserRepository;
use crate::auth::repo_types::User;
use crate::curricula::repo_types::Curriculum;
use crate::password_reset::repo::ResetTokenRepository;
use crate::password_reset::repo_types::{PasswordResetToken, TokenState};
use crate::short_links::repo::ShortLinkRepository;
use crate::short_links::repo_types::ShortLink;

type Rows<E> = HashMap<<E as Entity>::Id, E>;

pub struct MemoryRepository<E: Entity> {
    rows: Arc<Mutex<Rows<E>>>,
}

// Clones share the same rows.
impl<E: Entity> Clone for MemoryRepository<E> {
    fn clone(&self) -> Self {
        Self { rows: Arc::clone(&self.rows) }
    }
}

impl<E: Entity> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self { rows: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rows<E>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_into(rows: &mut Rows<E>, entity: E) -> RepoResult<E> {
        if rows.contains_key(&entity.id()) || rows.values().any(|r| r.conflicts_with(&entity)) {
            return Err(RepoError::Conflict);
        }
        rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }

    fn find_one(&self, pred: impl Fn(&E) -> bool) -> Option<E> {
        self.lock().values().find(|r| pred(r)).cloned()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryRepository<E> {
    async fn get(&self, id: E::Id) -> RepoResult<Option<E>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn add(&self, entity: E) -> RepoResult<E> {
        Self::insert_into(&mut self.lock(), entity)
    }

    async fn update(&self, entity: E) -> RepoResult<E> {
        let mut rows = self.lock();
        let id = entity.id();
        if !rows.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        if rows.values().any(|r| r.id() != id && r.conflicts_with(&entity)) {
            return Err(RepoError::Conflict);
        }
        rows.insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: E::Id) -> RepoResult<bool> {
        Ok(self.lock().remove(&id).is_some())
    }

    async fn query(&self, filter: &E::Filter) -> RepoResult<Vec<E>> {
        Ok(self.lock().values().filter(|r| r.matches(filter)).cloned().collect())
    }
}

#[async_trait]
impl UserRepository for MemoryRepository<User> {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self.find_one(|u| u.email == email))
    }
}

#[async_trait]
impl ShortLinkRepository for MemoryRepository<ShortLink> {
    async fn find_by_code(&self, code: &str) -> RepoResult<Option<ShortLink>> {
        Ok(self.find_one(|l| l.code == code))
    }

    async fn find_by_curriculum(&self, curriculum_id: Uuid) -> RepoResult<Option<ShortLink>> {
        Ok(self.find_one(|l| l.curriculum_id == curriculum_id))
    }

    async fn replace_for_curriculum(&self, link: ShortLink) -> RepoResult<ShortLink> {
        let mut rows = self.lock();
        let previous: Vec<Uuid> = rows
            .values()
            .filter(|l| l.curriculum_id == link.curriculum_id)
            .map(|l| l.id)
            .collect();
        let removed: Vec<ShortLink> = previous.iter().filter_map(|id| rows.remove(id)).collect();
        match Self::insert_into(&mut rows, link) {
            Ok(link) => Ok(link),
            Err(e) => {
                for old in removed {
                    rows.insert(old.id, old);
                }
                Err(e)
            }
        }
    }
}

/// Curricula plus the short links that must disappear with them.
#[derive(Clone)]
pub struct MemoryCurriculumRepository {
    curricula: MemoryRepository<Curriculum>,
    links: MemoryRepository<ShortLink>,
}

impl MemoryCurriculumRepository {
    pub fn new(links: MemoryRepository<ShortLink>) -> Self {
        Self { curricula: MemoryRepository::new(), links }
    }
}

#[async_trait]
impl Repository<Curriculum> for MemoryCurriculumRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Option<Curriculum>> {
        self.curricula.get(id).await
    }

    async fn add(&self, curriculum: Curriculum) -> RepoResult<Curriculum> {
        self.curricula.add(curriculum).await
    }

    async fn update(&self, curriculum: Curriculum) -> RepoResult<Curriculum> {
        self.curricula.update(curriculum).await
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        // Lock order: curricula, then links.
        let mut curricula = self.curricula.lock();
        let mut links = self.links.lock();
        if curricula.remove(&id).is_none() {
            return Ok(false);
        }
        links.retain(|_, l| l.curriculum_id != id);
        Ok(true)
    }

    async fn query(
        &self,
        filter: &<Curriculum as Entity>::Filter,
    ) -> RepoResult<Vec<Curriculum>> {
        self.curricula.query(filter).await
    }
}

/// Reset tokens plus the user table they write passwords into.
#[derive(Clone)]
pub struct MemoryResetTokenRepository {
    tokens: MemoryRepository<PasswordResetToken>,
    users: MemoryRepository<User>,
}

impl MemoryResetTokenRepository {
    pub fn new(users: MemoryRepository<User>) -> Self {
        Self { tokens: MemoryRepository::new(), users }
    }
}

#[async_trait]
impl Repository<PasswordResetToken> for MemoryResetTokenRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Option<PasswordResetToken>> {
        self.tokens.get(id).await
    }

    async fn add(&self, token: PasswordResetToken) -> RepoResult<PasswordResetToken> {
        self.tokens.add(token).await
    }

    async fn update(&self, token: PasswordResetToken) -> RepoResult<PasswordResetToken> {
        self.tokens.update(token).await
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        self.tokens.delete(id).await
    }

    async fn query(
        &self,
        filter: &<PasswordResetToken as Entity>::Filter,
    ) -> RepoResult<Vec<PasswordResetToken>> {
        self.tokens.query(filter).await
    }
}

#[async_trait]
impl ResetTokenRepository for MemoryResetTokenRepository {
    async fn find_by_hash(&self, token_hash: &str) -> RepoResult<Option<PasswordResetToken>> {
        Ok(self.tokens.find_one(|t| t.token_hash == token_hash))
    }

    async fn issue(&self, token: PasswordResetToken) -> RepoResult<u64> {
        // Lock order everywhere: tokens, then users.
        let mut tokens = self.tokens.lock();
        if !self.users.lock().contains_key(&token.user_id) {
            return Err(RepoError::NotFound);
        }
        if tokens.values().any(|t| t.token_hash == token.token_hash) {
            return Err(RepoError::Conflict);
        }
        let mut revoked = 0;
        for t in tokens.values_mut() {
            if t.user_id == token.user_id && t.is_open() {
                t.revoked_at = Some(token.created_at);
                revoked += 1;
            }
        }
        tokens.insert(token.id, token);
        Ok(revoked)
    }

    async fn consume(
        &self,
        token_id: Uuid,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> RepoResult<bool> {
        let mut tokens = self.tokens.lock();
        let mut users = self.users.lock();

        let Some(token) = tokens.get_mut(&token_id) else {
            return Ok(false);
        };
        if token.state_at(now) != TokenState::Active {
            return Ok(false);
        }
        let user = users.get_mut(&token.user_id).ok_or(RepoError::NotFound)?;

        user.password_hash = new_password_hash.to_owned();
        token.consumed_at = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::UserFilter;
    use crate::short_links::repo_types::ShortLinkFilter;

    fn user(email: &str) -> User {
        User::new("Ada".into(), email.into(), "hash".into())
    }

    fn now() -> OffsetDateTime {
        time::macros::datetime!(2024-05-01 10:00 UTC)
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let repo = MemoryRepository::<User>::new();
        let mut u = repo.add(user("ada@example.com")).await.expect("add");

        u.name = "Ada L.".into();
        repo.update(u.clone()).await.expect("update");
        let got = repo.get(u.id).await.expect("get").expect("present");
        assert_eq!(got.name, "Ada L.");

        assert!(repo.delete(u.id).await.expect("delete"));
        assert!(!repo.delete(u.id).await.expect("second delete"));
        assert!(repo.get(u.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn add_rejects_duplicate_unique_column() {
        let repo = MemoryRepository::<User>::new();
        repo.add(user("ada@example.com")).await.expect("add");
        let err = repo.add(user("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict));
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let repo = MemoryRepository::<User>::new();
        let err = repo.update(user("x@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
    }

    #[tokio::test]
    async fn query_applies_filter() {
        let repo = MemoryRepository::<User>::new();
        repo.add(user("a@example.com")).await.expect("add");
        repo.add(user("b@example.com")).await.expect("add");

        let all = repo.query(&UserFilter::default()).await.expect("query");
        assert_eq!(all.len(), 2);
        let one = repo
            .query(&UserFilter { email: Some("b@example.com".into()) })
            .await
            .expect("query");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].email, "b@example.com");
    }

    #[tokio::test]
    async fn replace_for_curriculum_keeps_single_link() {
        let repo = MemoryRepository::<ShortLink>::new();
        let curriculum_id = Uuid::new_v4();
        repo.add(ShortLink::new("first000".into(), curriculum_id, now())).await.expect("add");
        repo.replace_for_curriculum(ShortLink::new("second00".into(), curriculum_id, now()))
            .await
            .expect("replace");

        let links = repo
            .query(&ShortLinkFilter { curriculum_id: Some(curriculum_id), ..Default::default() })
            .await
            .expect("query");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].code, "second00");
        assert!(repo.find_by_code("first000").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn failed_replace_restores_previous_link() {
        let repo = MemoryRepository::<ShortLink>::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        repo.add(ShortLink::new("aaaaaaaa".into(), a, now())).await.expect("add a");
        repo.add(ShortLink::new("bbbbbbbb".into(), b, now())).await.expect("add b");

        let err = repo
            .replace_for_curriculum(ShortLink::new("bbbbbbbb".into(), a, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict));
        let kept = repo.find_by_curriculum(a).await.expect("lookup").expect("present");
        assert_eq!(kept.code, "aaaaaaaa");
    }

    #[tokio::test]
    async fn deleting_curriculum_drops_its_links() {
        let links = MemoryRepository::<ShortLink>::new();
        let curricula = MemoryCurriculumRepository::new(links.clone());
        let kept = Curriculum::new(Uuid::new_v4(), "Kept", now());
        let gone = Curriculum::new(Uuid::new_v4(), "Gone", now());
        curricula.add(kept.clone()).await.expect("add");
        curricula.add(gone.clone()).await.expect("add");
        links.add(ShortLink::new("keepcode".into(), kept.id, now())).await.expect("link");
        links.add(ShortLink::new("gonecode".into(), gone.id, now())).await.expect("link");

        assert!(curricula.delete(gone.id).await.expect("delete"));
        assert!(links.find_by_code("gonecode").await.expect("lookup").is_none());
        assert!(links.find_by_code("keepcode").await.expect("lookup").is_some());
        assert!(!curricula.delete(gone.id).await.expect("second delete"));
    }
}
