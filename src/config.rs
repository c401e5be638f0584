//! Runtime configuration loaded from the environment (and `.env` when present).

use std::env;

use anyhow::Context;

use crate::ratings::ScoreRange;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub log_level: String,
    pub score_range: ScoreRange,
    pub share_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 5u32)?;
        let rating_min = parse_var("RATING_MIN", 1.0f64)?;
        let rating_max = parse_var("RATING_MAX", 5.0f64)?;
        let score_range = ScoreRange::new(rating_min, rating_max)
            .context("RATING_MIN must not exceed RATING_MAX")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            max_connections,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "student_feedback=info".into()),
            score_range,
            share_base_url: env::var("SHARE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_is_reported() {
        let config = AppConfig {
            database_url: None,
            max_connections: 5,
            log_level: "info".into(),
            score_range: ScoreRange::default(),
            share_base_url: "http://localhost:3000".into(),
        };
        let err = config.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let value: u32 = parse_var("STUDENT_FEEDBACK_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
