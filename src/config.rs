use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// 30 days.
pub const MAX_JWT_EXPIRATION_MINUTES: i64 = 30 * 24 * 60;
/// One week.
pub const MAX_RESET_TOKEN_EXPIRATION_HOURS: i64 = 7 * 24;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expiration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub reset_token_expiration_hours: i64,
    /// Front-end page that receives `?token=...`.
    pub password_reset_url: String,
    pub from_address: String,
    /// When unset, mail is written to the log instead of being sent.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShortLinkConfig {
    pub base_url: String,
    pub code_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub email: EmailConfig,
    pub short_links: ShortLinkConfig,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_minutes", &self.expiration_minutes)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("storage", &self.storage)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt", &self.jwt)
            .field("email", &self.email)
            .field("short_links", &self.short_links)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let storage = match std::env::var("STORAGE").as_deref() {
            Ok("memory") => StorageKind::Memory,
            Ok("postgres") | Err(_) => StorageKind::Postgres,
            Ok(other) => anyhow::bail!("STORAGE must be 'postgres' or 'memory', got '{other}'"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if storage == StorageKind::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when STORAGE=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cvfast".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cvfast-users".into()),
            expiration_minutes: env_parse("JWT_EXPIRATION_MINUTES", 60)?,
        };
        let email = EmailConfig {
            reset_token_expiration_hours: env_parse("PASSWORD_RESET_TOKEN_EXPIRATION_HOURS", 1)?,
            password_reset_url: std::env::var("PASSWORD_RESET_URL")
                .unwrap_or_else(|_| "http://localhost:5173/reset-password".into()),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "no-reply@cvfast.local".into()),
            api_url: std::env::var("EMAIL_API_URL").ok(),
            api_key: std::env::var("EMAIL_API_KEY").ok(),
        };
        let short_links = ShortLinkConfig {
            base_url: std::env::var("SHORT_LINK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/s".into())
                .trim_end_matches('/')
                .to_string(),
            code_length: env_parse("SHORT_LINK_CODE_LENGTH", 8)?,
        };

        let config = Self {
            storage,
            database_url,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("APP_PORT", 8080)?,
            jwt,
            email,
            short_links,
        };
        config.validate()?;
        Ok(config)
    }

    /// Range checks on the numeric settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        let minutes = self.jwt.expiration_minutes;
        anyhow::ensure!(
            (1..=MAX_JWT_EXPIRATION_MINUTES).contains(&minutes),
            "JWT_EXPIRATION_MINUTES must be between 1 and {MAX_JWT_EXPIRATION_MINUTES}"
        );
        let hours = self.email.reset_token_expiration_hours;
        anyhow::ensure!(
            (1..=MAX_RESET_TOKEN_EXPIRATION_HOURS).contains(&hours),
            "PASSWORD_RESET_TOKEN_EXPIRATION_HOURS must be 1..={MAX_RESET_TOKEN_EXPIRATION_HOURS}"
        );
        anyhow::ensure!(
            (6..=64).contains(&self.short_links.code_length),
            "SHORT_LINK_CODE_LENGTH must be between 6 and 64"
        );
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().with_context(|| format!("{key} has an invalid value '{v}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default() {
        let v: i64 = env_parse("CVFAST_TEST_SURELY_UNSET_VARIABLE", 42).expect("default");
        assert_eq!(v, 42);
    }

    #[test]
    fn debug_redacts_secret() {
        let jwt = JwtConfig {
            secret: "super-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            expiration_minutes: 5,
        };
        let out = format!("{jwt:?}");
        assert!(!out.contains("super-secret"));
        assert!(out.contains("[REDACTED]"));
    }

    fn sample() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            database_url: None,
            host: "127.0.0.1".into(),
            port: 8080,
            jwt: JwtConfig {
                secret: "s".into(),
                issuer: "cvfast".into(),
                audience: "cvfast-users".into(),
                expiration_minutes: 60,
            },
            email: EmailConfig {
                reset_token_expiration_hours: 1,
                password_reset_url: "http://localhost/reset".into(),
                from_address: "no-reply@cvfast.local".into(),
                api_url: None,
                api_key: None,
            },
            short_links: ShortLinkConfig { base_url: "http://localhost/s".into(), code_length: 8 },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        sample().validate().expect("valid");
    }

    #[test]
    fn validate_bounds_expirations() {
        let mut cfg = sample();
        cfg.email.reset_token_expiration_hours = i64::MAX;
        assert!(cfg.validate().is_err());
        cfg.email.reset_token_expiration_hours = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.jwt.expiration_minutes = MAX_JWT_EXPIRATION_MINUTES + 1;
        assert!(cfg.validate().is_err());
    }
}
