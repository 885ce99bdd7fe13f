use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::auth::repo::{PgUserRepository, UserRepository};
use crate::auth::repo_types::User;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, StorageKind};
use crate::curricula::repo::PgCurriculumRepository;
use crate::curricula::repo_types::Curriculum;
use crate::db;
use crate::email::{self, EmailSender};
use crate::password_reset::repo::{PgResetTokenRepository, ResetTokenRepository};
use crate::password_reset::services::PasswordResetService;
use crate::repository::memory::{MemoryCurriculumRepository, MemoryResetTokenRepository};
use crate::repository::{MemoryRepository, Repository};
use crate::short_links::repo::{PgShortLinkRepository, ShortLinkRepository};
use crate::short_links::repo_types::ShortLink;
use crate::short_links::services::ShortLinkService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub curricula: Arc<dyn Repository<Curriculum>>,
    pub short_links: Arc<ShortLinkService>,
    pub password_reset: Arc<PasswordResetService>,
}

struct Repositories {
    users: Arc<dyn UserRepository>,
    curricula: Arc<dyn Repository<Curriculum>>,
    links: Arc<dyn ShortLinkRepository>,
    tokens: Arc<dyn ResetTokenRepository>,
}

impl AppState {
    /// Connects storage according to `config.storage` and wires the services.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let repos = match config.storage {
            StorageKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
                let pool = db::connect(url).await?;
                db::migrate(&pool).await?;
                postgres_repositories(pool)
            }
            StorageKind::Memory => {
                info!("using in-memory storage, data is lost on restart");
                memory_repositories()
            }
        };
        let mailer = email::from_config(&config.email)?;
        Ok(Self::from_parts(config, repos, mailer, Arc::new(SystemClock)))
    }

    /// Memory-backed state with the given mailer and clock. Used by tests.
    pub fn in_memory(
        config: AppConfig,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_parts(config, memory_repositories(), mailer, clock)
    }

    fn from_parts(
        config: AppConfig,
        repos: Repositories,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let short_links = ShortLinkService::new(
            repos.links,
            repos.curricula.clone(),
            clock.clone(),
            &config.short_links,
        );
        let password_reset = PasswordResetService::new(
            repos.users.clone(),
            repos.tokens,
            mailer,
            clock,
            config.email.reset_token_expiration_hours,
        );
        Self {
            config: Arc::new(config),
            users: repos.users,
            curricula: repos.curricula,
            short_links: Arc::new(short_links),
            password_reset: Arc::new(password_reset),
        }
    }
}

fn postgres_repositories(pool: PgPool) -> Repositories {
    Repositories {
        users: Arc::new(PgUserRepository::new(pool.clone())),
        curricula: Arc::new(PgCurriculumRepository::new(pool.clone())),
        links: Arc::new(PgShortLinkRepository::new(pool.clone())),
        tokens: Arc::new(PgResetTokenRepository::new(pool)),
    }
}

fn memory_repositories() -> Repositories {
    let users = MemoryRepository::<User>::new();
    let links = MemoryRepository::<ShortLink>::new();
    Repositories {
        tokens: Arc::new(MemoryResetTokenRepository::new(users.clone())),
        users: Arc::new(users),
        curricula: Arc::new(MemoryCurriculumRepository::new(links.clone())),
        links: Arc::new(links),
    }
}
