use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repository::Entity;

/// Stored reset token. Only the SHA-256 of the token value is persisted.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>, // superseded by a newer token
    pub created_at: OffsetDateTime,
}

/// Where a token stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Active,
    Consumed,
    Revoked,
    Expired,
}

impl PasswordResetToken {
    /// `None` when `now + ttl` is not a representable instant.
    pub fn issue(
        user_id: Uuid,
        token_hash: String,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash,
            expires_at: now.checked_add(ttl)?,
            consumed_at: None,
            revoked_at: None,
            created_at: now,
        })
    }

    /// Consumption and revocation win over expiry so logs show the first thing that happened.
    pub fn state_at(&self, now: OffsetDateTime) -> TokenState {
        if self.consumed_at.is_some() {
            TokenState::Consumed
        } else if self.revoked_at.is_some() {
            TokenState::Revoked
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }

    pub fn is_open(&self) -> bool {
        self.consumed_at.is_none() && self.revoked_at.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResetTokenFilter {
    pub user_id: Option<Uuid>,
    pub token_hash: Option<String>,
    /// Only tokens neither consumed nor revoked.
    pub open_only: bool,
}

impl Entity for PasswordResetToken {
    type Id = Uuid;
    type Filter = ResetTokenFilter;

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ResetTokenFilter) -> bool {
        filter.user_id.map_or(true, |u| self.user_id == u)
            && filter.token_hash.as_deref().map_or(true, |h| self.token_hash == h)
            && (!filter.open_only || self.is_open())
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.token_hash == other.token_hash
            || (self.user_id == other.user_id && self.is_open() && other.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn token() -> PasswordResetToken {
        PasswordResetToken::issue(
            Uuid::new_v4(),
            "hash".into(),
            datetime!(2024-05-01 10:00 UTC),
            time::Duration::hours(1),
        )
        .expect("representable expiry")
    }

    #[test]
    fn active_until_expiry_instant() {
        let t = token();
        assert_eq!(t.state_at(datetime!(2024-05-01 10:59:59 UTC)), TokenState::Active);
        assert_eq!(t.state_at(datetime!(2024-05-01 11:00 UTC)), TokenState::Expired);
    }

    #[test]
    fn consumed_reported_before_expired() {
        let mut t = token();
        t.consumed_at = Some(datetime!(2024-05-01 10:10 UTC));
        assert_eq!(t.state_at(datetime!(2024-05-02 00:00 UTC)), TokenState::Consumed);
        assert!(!t.is_open());
    }

    #[test]
    fn open_only_filter_skips_revoked() {
        let mut t = token();
        let filter = ResetTokenFilter {
            user_id: Some(t.user_id),
            open_only: true,
            ..Default::default()
        };
        assert!(t.matches(&filter));
        t.revoked_at = Some(datetime!(2024-05-01 10:30 UTC));
        assert!(!t.matches(&filter));
    }

    #[test]
    fn unrepresentable_expiry_is_refused() {
        let issued = PasswordResetToken::issue(
            Uuid::new_v4(),
            "hash".into(),
            datetime!(2024-05-01 10:00 UTC),
            time::Duration::MAX,
        );
        assert!(issued.is_none());
    }
}
