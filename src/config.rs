use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DbConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DbConfig {
            url: database_url()?,
            max_connections: parse_var("DB_MAX_CONNECTIONS")?.unwrap_or(50),
            idle_timeout: Duration::from_secs(parse_var("DB_IDLE_TIMEOUT_SECS")?.unwrap_or(600)),
            max_lifetime: parse_var("DB_MAX_LIFETIME_SECS")?.map(Duration::from_secs),
        };
        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("APP_PORT")?.unwrap_or(8080),
            database,
        })
    }
}

/// `DATABASE_URL` wins; otherwise the URL is assembled from the `DB_*` parts.
fn database_url() -> anyhow::Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
    let user = std::env::var("DB_USERNAME").context("DB_USERNAME is not set")?;
    let password = std::env::var("DB_PASSWORD").context("DB_PASSWORD is not set")?;
    let name = std::env::var("DB_DATABASE").context("DB_DATABASE is not set")?;
    Ok(compose_url(&host, &port, &user, &password, &name))
}

fn compose_url(host: &str, port: &str, user: &str, password: &str, name: &str) -> String {
    format!("postgres://{user}:{password}@{host}:{port}/{name}")
}

fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(None),
    }
}
