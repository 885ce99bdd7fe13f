use std::sync::Arc;

use anyhow::anyhow;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ShortLinkConfig;
use crate::curricula::repo_types::Curriculum;
use crate::errors::{AppError, AppResult};
use crate::repository::{RepoError, Repository};
use crate::short_links::repo::ShortLinkRepository;
use crate::short_links::repo_types::ShortLink;

/// Attempts at finding an unused code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 8;

pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// `len` characters from `[A-Za-z0-9]`, drawn from the OS-seeded thread RNG.
pub fn random_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortLinkView {
    pub code: String,
    pub url: String,
    pub curriculum_id: Uuid,
}

pub struct ShortLinkService {
    links: Arc<dyn ShortLinkRepository>,
    curricula: Arc<dyn Repository<Curriculum>>,
    clock: Arc<dyn Clock>,
    base_url: String,
    generate: CodeGenerator,
}

impl ShortLinkService {
    pub fn new(
        links: Arc<dyn ShortLinkRepository>,
        curricula: Arc<dyn Repository<Curriculum>>,
        clock: Arc<dyn Clock>,
        cfg: &ShortLinkConfig,
    ) -> Self {
        let len = cfg.code_length;
        Self {
            links,
            curricula,
            clock,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            generate: Arc::new(move || random_code(len)),
        }
    }

    pub fn with_generator(mut self, generate: CodeGenerator) -> Self {
        self.generate = generate;
        self
    }

    fn view(&self, link: ShortLink) -> ShortLinkView {
        ShortLinkView {
            url: format!("{}/{}", self.base_url, link.code),
            code: link.code,
            curriculum_id: link.curriculum_id,
        }
    }

    /// Returns the curriculum's link, creating it on first use.
    #[instrument(skip(self))]
    pub async fn create(&self, curriculum_id: Uuid) -> AppResult<ShortLinkView> {
        if self.curricula.get(curriculum_id).await?.is_none() {
            warn!("short link requested for unknown curriculum");
            return Err(AppError::NotFound);
        }
        self.get_or_create(curriculum_id).await
    }

    /// Like [`create`](Self::create), but only for the curriculum's owner.
    #[instrument(skip(self))]
    pub async fn create_for(
        &self,
        owner_id: Uuid,
        curriculum_id: Uuid,
    ) -> AppResult<ShortLinkView> {
        self.owned_curriculum(owner_id, curriculum_id).await?;
        self.get_or_create(curriculum_id).await
    }

    /// Replaces the curriculum's link with a fresh code; the old code stops resolving.
    #[instrument(skip(self))]
    pub async fn regenerate_for(
        &self,
        owner_id: Uuid,
        curriculum_id: Uuid,
    ) -> AppResult<ShortLinkView> {
        self.owned_curriculum(owner_id, curriculum_id).await?;
        let link = self.insert_new(curriculum_id, true).await?;
        info!(code = %link.code, "short link regenerated");
        Ok(self.view(link))
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, code: &str) -> AppResult<Uuid> {
        match self.links.find_by_code(code.trim()).await? {
            Some(link) => Ok(link.curriculum_id),
            None => {
                debug!("unknown short code");
                Err(AppError::NotFound)
            }
        }
    }

    // Someone else's curriculum is reported exactly like a missing one.
    async fn owned_curriculum(&self, owner_id: Uuid, curriculum_id: Uuid) -> AppResult<Curriculum> {
        match self.curricula.get(curriculum_id).await? {
            Some(c) if c.user_id == owner_id => Ok(c),
            Some(_) => {
                warn!("short link requested by non-owner");
                Err(AppError::NotFound)
            }
            None => Err(AppError::NotFound),
        }
    }

    async fn get_or_create(&self, curriculum_id: Uuid) -> AppResult<ShortLinkView> {
        if let Some(existing) = self.links.find_by_curriculum(curriculum_id).await? {
            return Ok(self.view(existing));
        }
        let link = self.insert_new(curriculum_id, false).await?;
        info!(code = %link.code, "short link created");
        Ok(self.view(link))
    }

    async fn insert_new(&self, curriculum_id: Uuid, replace: bool) -> AppResult<ShortLink> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = (self.generate)();
            if self.links.find_by_code(&code).await?.is_some() {
                debug!(attempt, "short code collision, retrying");
                continue;
            }

            let link = ShortLink::new(code, curriculum_id, self.clock.now());
            let stored = if replace {
                self.links.replace_for_curriculum(link).await
            } else {
                self.links.add(link).await
            };

            match stored {
                Ok(link) => return Ok(link),
                Err(RepoError::Conflict) => {
                    // Either the code was taken between lookup and insert, or a
                    // concurrent request already linked this curriculum.
                    if !replace {
                        let winner = self.links.find_by_curriculum(curriculum_id).await?;
                        if let Some(existing) = winner {
                            debug!("curriculum linked by a concurrent request");
                            return Ok(existing);
                        }
                    }
                    debug!(attempt, "short code taken at insert, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::Internal(anyhow!(
            "no free short code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }
}
