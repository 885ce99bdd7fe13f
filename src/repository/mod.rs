//! Generic data access over persisted entities.
//!
//! Every table the services touch is reached through [`Repository`]; the
//! entity-specific traits (`UserRepository`, `ShortLinkRepository`, ...)
//! extend it with the lookups and atomic writes their service needs.

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryRepository;

/// A persisted record with a stable identifier.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Copy + Debug + Eq + Hash + Send + Sync + 'static;
    /// Criteria accepted by [`Repository::query`].
    type Filter: Debug + Default + Send + Sync;

    fn id(&self) -> Self::Id;

    /// Whether this record satisfies `filter`. Unset filter fields match anything.
    fn matches(&self, filter: &Self::Filter) -> bool;

    /// Whether `self` and `other` collide on a unique column other than the id.
    fn conflicts_with(&self, _other: &Self) -> bool {
        false
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unique constraint violated")]
    Conflict,

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::RowNotFound => RepoError::NotFound,
            _ => RepoError::Database(err),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// CRUD plus filtered queries for one entity type, keyed by `E::Id`.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    async fn get(&self, id: E::Id) -> RepoResult<Option<E>>;

    /// Insert a new record. Fails with [`RepoError::Conflict`] on a duplicate key.
    async fn add(&self, entity: E) -> RepoResult<E>;

    /// Overwrite an existing record. Fails with [`RepoError::NotFound`] if absent.
    async fn update(&self, entity: E) -> RepoResult<E>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, id: E::Id) -> RepoResult<bool>;

    async fn query(&self, filter: &E::Filter) -> RepoResult<Vec<E>>;
}
