use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use time::Duration;
use tracing::{info, instrument, warn};

use crate::auth::normalize_email;
use crate::auth::password::{hash_password, is_strong_enough, MIN_PASSWORD_LENGTH};
use crate::auth::repo::UserRepository;
use crate::clock::Clock;
use crate::email::EmailSender;
use crate::errors::{AppError, AppResult};
use crate::password_reset::repo::ResetTokenRepository;
use crate::password_reset::repo_types::{PasswordResetToken, TokenState};
use crate::password_reset::token::{generate_token, hash_token};

pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent";
pub const RESET_DISPATCH_FAILED_MESSAGE: &str =
    "The password reset email could not be sent, please try again later";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordResetResponse {
    pub success: bool,
    pub message: String,
}

pub struct PasswordResetService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn ResetTokenRepository>,
    mailer: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    expiration_hours: i64,
}

impl PasswordResetService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn ResetTokenRepository>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        expiration_hours: i64,
    ) -> Self {
        Self {
            users,
            tokens,
            mailer,
            clock,
            expiration_hours,
        }
    }

    /// Issues a new token and mails it. Unknown addresses get the same answer
    /// as a successful dispatch and nothing else happens.
    #[instrument(skip_all)]
    pub async fn request_reset(&self, email: &str) -> AppResult<PasswordResetResponse> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            info!("password reset requested for unknown email");
            return Ok(PasswordResetResponse {
                success: true,
                message: RESET_REQUESTED_MESSAGE.into(),
            });
        };

        let token = generate_token();
        let ttl = self.expiration_hours.checked_mul(3600).map(Duration::seconds);
        let record = ttl
            .and_then(|ttl| {
                PasswordResetToken::issue(user.id, hash_token(&token), self.clock.now(), ttl)
            })
            .ok_or_else(|| anyhow!("reset token expiry out of range"))?;
        let revoked = self.tokens.issue(record).await?;
        info!(user_id = %user.id, revoked, "password reset token issued");

        let sent = self
            .mailer
            .send_password_reset_email(&user.email, &token, &user.name, self.expiration_hours)
            .await;
        if !sent {
            warn!(user_id = %user.id, "password reset email dispatch failed");
            return Ok(PasswordResetResponse {
                success: false,
                message: RESET_DISPATCH_FAILED_MESSAGE.into(),
            });
        }

        Ok(PasswordResetResponse {
            success: true,
            message: RESET_REQUESTED_MESSAGE.into(),
        })
    }

    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> AppResult<bool> {
        Ok(self.usable_token(token).await?.is_some())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        if !is_strong_enough(new_password) {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let Some(record) = self.usable_token(token).await? else {
            return Err(AppError::InvalidToken);
        };

        let password_hash = hash_password(new_password)?;
        // Another request may have used the token since the lookup.
        if !self.tokens.consume(record.id, &password_hash, self.clock.now()).await? {
            warn!(token_id = %record.id, "reset token lost a concurrent consume");
            return Err(AppError::InvalidToken);
        }

        info!(user_id = %record.user_id, "password reset completed");
        Ok(())
    }

    /// The stored record if the token may still be used; the reason it may not is logged.
    async fn usable_token(&self, token: &str) -> AppResult<Option<PasswordResetToken>> {
        let token = token.trim();
        if token.is_empty() {
            warn!("empty reset token");
            return Ok(None);
        }

        let Some(record) = self.tokens.find_by_hash(&hash_token(token)).await? else {
            warn!("unknown reset token");
            return Ok(None);
        };

        match record.state_at(self.clock.now()) {
            TokenState::Active => Ok(Some(record)),
            state => {
                warn!(token_id = %record.id, ?state, "reset token rejected");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::macros::datetime;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::auth::password::verify_password;
    use crate::auth::repo_types::User;
    use crate::clock::FixedClock;
    use crate::password_reset::repo_types::ResetTokenFilter;
    use crate::repository::memory::MemoryResetTokenRepository;
    use crate::repository::{MemoryRepository, RepoResult, Repository};

    #[derive(Debug, Clone)]
    struct Sent {
        email: String,
        token: String,
        hours: i64,
    }

    /// Records every dispatch; `accept` decides what it reports.
    struct RecordingMailer {
        sent: Mutex<Vec<Sent>>,
        accept: bool,
    }

    impl RecordingMailer {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()), accept })
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn last_token(&self) -> String {
            self.sent().last().expect("no email sent").token.clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send_password_reset_email(
            &self,
            email: &str,
            reset_token: &str,
            _user_name: &str,
            expiration_hours: i64,
        ) -> bool {
            self.sent.lock().unwrap().push(Sent {
                email: email.into(),
                token: reset_token.into(),
                hours: expiration_hours,
            });
            self.accept
        }
    }

    /// Suspends after each lookup and before each issue, so calls joined on
    /// one task interleave at the repository boundary.
    struct YieldingTokens(MemoryResetTokenRepository);

    #[async_trait]
    impl Repository<PasswordResetToken> for YieldingTokens {
        async fn get(&self, id: Uuid) -> RepoResult<Option<PasswordResetToken>> {
            self.0.get(id).await
        }

        async fn add(&self, t: PasswordResetToken) -> RepoResult<PasswordResetToken> {
            self.0.add(t).await
        }

        async fn update(&self, t: PasswordResetToken) -> RepoResult<PasswordResetToken> {
            self.0.update(t).await
        }

        async fn delete(&self, id: Uuid) -> RepoResult<bool> {
            self.0.delete(id).await
        }

        async fn query(&self, filter: &ResetTokenFilter) -> RepoResult<Vec<PasswordResetToken>> {
            self.0.query(filter).await
        }
    }

    #[async_trait]
    impl ResetTokenRepository for YieldingTokens {
        async fn find_by_hash(&self, token_hash: &str) -> RepoResult<Option<PasswordResetToken>> {
            let found = self.0.find_by_hash(token_hash).await;
            tokio::task::yield_now().await;
            found
        }

        async fn issue(&self, token: PasswordResetToken) -> RepoResult<u64> {
            tokio::task::yield_now().await;
            self.0.issue(token).await
        }

        async fn consume(
            &self,
            token_id: Uuid,
            new_password_hash: &str,
            now: OffsetDateTime,
        ) -> RepoResult<bool> {
            self.0.consume(token_id, new_password_hash, now).await
        }
    }

    struct Fixture {
        service: PasswordResetService,
        users: MemoryRepository<User>,
        tokens: MemoryResetTokenRepository,
        mailer: Arc<RecordingMailer>,
        clock: Arc<FixedClock>,
    }

    async fn fixture(accept: bool) -> Fixture {
        build(accept, 1, false).await
    }

    async fn build(accept: bool, hours: i64, yielding: bool) -> Fixture {
        let users = MemoryRepository::<User>::new();
        let hash = hash_password("old-password").unwrap();
        users.add(User::new("Ada".into(), "a@x.com".into(), hash)).await.unwrap();

        let tokens = MemoryResetTokenRepository::new(users.clone());
        let token_repo: Arc<dyn ResetTokenRepository> = if yielding {
            Arc::new(YieldingTokens(tokens.clone()))
        } else {
            Arc::new(tokens.clone())
        };
        let mailer = RecordingMailer::new(accept);
        let clock = Arc::new(FixedClock::new(datetime!(2024-05-01 10:00 UTC)));
        let service = PasswordResetService::new(
            Arc::new(users.clone()),
            token_repo,
            mailer.clone(),
            clock.clone(),
            hours,
        );
        Fixture { service, users, tokens, mailer, clock }
    }

    async fn stored_hash(f: &Fixture) -> String {
        f.users.find_by_email("a@x.com").await.unwrap().unwrap().password_hash
    }

    #[tokio::test]
    async fn newer_token_invalidates_older_one() {
        let f = fixture(true).await;

        f.service.request_reset("a@x.com").await.unwrap();
        let tok1 = f.mailer.last_token();
        f.service.request_reset("a@x.com").await.unwrap();
        let tok2 = f.mailer.last_token();
        assert_ne!(tok1, tok2);

        let err = f.service.reset_password(&tok1, "new-password").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
        f.service.reset_password(&tok2, "new-password").await.unwrap();

        assert!(verify_password("new-password", &stored_hash(&f).await).unwrap());
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let f = fixture(true).await;
        f.service.request_reset("a@x.com").await.unwrap();
        let token = f.mailer.last_token();

        assert!(f.service.validate_token(&token).await.unwrap());
        f.service.reset_password(&token, "first-new-pass").await.unwrap();

        assert!(!f.service.validate_token(&token).await.unwrap());
        let err = f.service.reset_password(&token, "second-new-pass").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
        assert!(verify_password("first-new-pass", &stored_hash(&f).await).unwrap());
    }

    #[tokio::test]
    async fn token_expires_after_configured_hours() {
        let f = fixture(true).await;
        f.service.request_reset("a@x.com").await.unwrap();
        let token = f.mailer.last_token();
        assert_eq!(f.mailer.sent()[0].hours, 1);

        f.clock.advance(Duration::minutes(59));
        assert!(f.service.validate_token(&token).await.unwrap());

        f.clock.advance(Duration::minutes(1));
        assert!(!f.service.validate_token(&token).await.unwrap());
        let err = f.service.reset_password(&token, "new-password").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
        assert!(verify_password("old-password", &stored_hash(&f).await).unwrap());
    }

    #[tokio::test]
    async fn unknown_email_looks_like_success_without_sending() {
        let f = fixture(true).await;

        let unknown = f.service.request_reset("nobody@x.com").await.unwrap();
        assert!(f.mailer.sent().is_empty());

        let known = f.service.request_reset("  A@X.com ").await.unwrap();
        assert_eq!(unknown, known);
        assert_eq!(f.mailer.sent().len(), 1);
        assert_eq!(f.mailer.sent()[0].email, "a@x.com");
    }

    #[tokio::test]
    async fn failed_dispatch_is_reported() {
        let f = fixture(false).await;
        let res = f.service.request_reset("a@x.com").await.unwrap();
        assert!(!res.success);
        assert_eq!(res.message, RESET_DISPATCH_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn short_password_is_rejected_before_token_is_spent() {
        let f = fixture(true).await;
        f.service.request_reset("a@x.com").await.unwrap();
        let token = f.mailer.last_token();

        let err = f.service.reset_password(&token, "short").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.service.validate_token(&token).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_tokens_are_invalid() {
        let f = fixture(true).await;
        assert!(!f.service.validate_token("").await.unwrap());
        assert!(!f.service.validate_token("not-a-real-token").await.unwrap());
        let err = f.service.reset_password("not-a-real-token", "new-password").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[tokio::test]
    async fn concurrent_resets_with_one_token_succeed_once() {
        let f = build(true, 1, true).await;
        f.service.request_reset("a@x.com").await.unwrap();
        let token = f.mailer.last_token();

        let (first, second) = tokio::join!(
            f.service.reset_password(&token, "first-new-pass"),
            f.service.reset_password(&token, "second-new-pass"),
        );

        let winner = match (first, second) {
            (Ok(()), Err(AppError::InvalidToken)) => "first-new-pass",
            (Err(AppError::InvalidToken), Ok(())) => "second-new-pass",
            other => panic!("expected exactly one success, got {other:?}"),
        };
        let stored = stored_hash(&f).await;
        assert!(verify_password(winner, &stored).unwrap());
        assert!(!f.service.validate_token(&token).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_requests_leave_one_open_token() {
        let f = build(true, 1, true).await;

        let (a, b) = tokio::join!(
            f.service.request_reset("a@x.com"),
            f.service.request_reset("a@x.com"),
        );
        assert!(a.unwrap().success && b.unwrap().success);

        let user = f.users.find_by_email("a@x.com").await.unwrap().unwrap();
        let filter = ResetTokenFilter {
            user_id: Some(user.id),
            open_only: true,
            ..Default::default()
        };
        let open = f.tokens.query(&filter).await.unwrap();
        assert_eq!(open.len(), 1);

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 2);
        let mut usable = 0;
        for mail in &sent {
            if f.service.validate_token(&mail.token).await.unwrap() {
                usable += 1;
            }
        }
        assert_eq!(usable, 1);
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_an_internal_error() {
        let f = build(true, i64::MAX, false).await;
        let err = f.service.request_reset("a@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(f.mailer.sent().is_empty());
    }
}
