use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{
    pool::PoolConnection,
    postgres::{PgPoolOptions, Postgres},
    Connection, PgPool,
};
use tracing::{debug, info, warn};

use crate::config::DbConfig;

const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters the pool itself does not keep.
#[derive(Debug, Default)]
pub struct PoolStats {
    wait_count: AtomicU64,
    wait_micros: AtomicU64,
    max_idle_closed: AtomicU64,
    max_lifetime_closed: AtomicU64,
}

impl PoolStats {
    fn record_wait(&self, waited: Duration) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_idle_closed(&self) {
        self.max_idle_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_lifetime_closed(&self) {
        self.max_lifetime_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the pool, fed to [`assess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub max_connections: u32,
    pub open_connections: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    pub wait_duration: Duration,
    pub max_idle_closed: u64,
    pub max_lifetime_closed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_use: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_closed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lifetime_closed: Option<u64>,
}

impl HealthReport {
    pub fn up(snapshot: PoolSnapshot) -> Self {
        Self {
            status: HealthStatus::Up,
            message: Some(assess(&snapshot).to_string()),
            error: None,
            open_connections: Some(snapshot.open_connections),
            in_use: Some(snapshot.in_use),
            idle: Some(snapshot.idle),
            wait_count: Some(snapshot.wait_count),
            wait_duration: Some(format!("{:?}", snapshot.wait_duration)),
            max_idle_closed: Some(snapshot.max_idle_closed),
            max_lifetime_closed: Some(snapshot.max_lifetime_closed),
        }
    }

    pub fn down(error: impl std::fmt::Display) -> Self {
        Self {
            status: HealthStatus::Down,
            message: None,
            error: Some(format!("db down: {error}")),
            open_connections: None,
            in_use: None,
            idle: None,
            wait_count: None,
            wait_duration: None,
            max_idle_closed: None,
            max_lifetime_closed: None,
        }
    }
}

/// Picks the advisory message for a healthy pool. Later checks override
/// earlier ones, so churn warnings win over load warnings.
pub fn assess(s: &PoolSnapshot) -> &'static str {
    let mut message = "It's healthy";
    if u64::from(s.open_connections) * 5 > u64::from(s.max_connections) * 4 {
        message = "The database is experiencing heavy load.";
    }
    if s.wait_count > 1000 {
        message = "The database has a high number of wait events, indicating potential bottlenecks.";
    }
    let half_open = u64::from(s.open_connections) / 2;
    if s.max_idle_closed > half_open {
        message = "Many idle connections are being closed, consider revising the connection pool settings.";
    }
    if s.max_lifetime_closed > half_open {
        message = "Many connections are being closed due to max lifetime, consider increasing max lifetime or revising the connection usage pattern.";
    }
    message
}

/// A connection idle for longer than `timeout` is closed instead of reused.
pub fn idle_expired(idle_for: Duration, timeout: Duration) -> bool {
    idle_for > timeout
}

/// `None` means connections live for as long as the pool does.
pub fn lifetime_expired(age: Duration, limit: Option<Duration>) -> bool {
    matches!(limit, Some(limit) if age > limit)
}

/// An acquire has to wait when nothing is idle and the pool cannot grow.
pub fn is_saturated(idle: usize, open: u32, max_connections: u32) -> bool {
    idle == 0 && open >= max_connections
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health(&self) -> HealthReport;
}

/// The shared connection pool plus the bookkeeping needed for health reports.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    stats: Arc<PoolStats>,
    max_connections: u32,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> anyhow::Result<Self> {
        let stats = Arc::new(PoolStats::default());
        let idle_timeout = config.idle_timeout;
        let max_lifetime = config.max_lifetime;

        // Idle and lifetime expiry are enforced here instead of by sqlx so
        // that every closed connection is counted. Idle expiry is lazy: a
        // stale connection is closed when it is next handed out, not by a
        // background reaper, so after a burst the pool keeps its open
        // connections until traffic returns.
        let idle_stats = stats.clone();
        let lifetime_stats = stats.clone();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .before_acquire(move |_conn, meta| {
                let stats = idle_stats.clone();
                Box::pin(async move {
                    let expired = idle_expired(meta.idle_for, idle_timeout);
                    if expired {
                        stats.record_idle_closed();
                    }
                    Ok::<_, sqlx::Error>(!expired)
                })
            })
            .after_release(move |_conn, meta| {
                let stats = lifetime_stats.clone();
                Box::pin(async move {
                    let expired = lifetime_expired(meta.age, max_lifetime);
                    if expired {
                        stats.record_lifetime_closed();
                    }
                    Ok::<_, sqlx::Error>(!expired)
                })
            })
            .connect(&config.url)
            .await
            .context("connect to database")?;

        info!(max_connections = config.max_connections, "database pool ready");
        Ok(Self {
            pool,
            stats,
            max_connections: config.max_connections,
        })
    }

    /// Creates the users table and its lookup indexes if they are missing.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id            BIGSERIAL PRIMARY KEY,
                username      VARCHAR(50)  NOT NULL,
                email         VARCHAR(100) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                created_at    TIMESTAMPTZ  NOT NULL DEFAULT now(),
                updated_at    TIMESTAMPTZ  NOT NULL DEFAULT now(),
                CONSTRAINT users_username_key UNIQUE (username),
                CONSTRAINT users_email_key UNIQUE (email)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create users table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users (email)")
            .execute(&self.pool)
            .await
            .context("failed to create idx_users_email")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_username ON users (username)")
            .execute(&self.pool)
            .await
            .context("failed to create idx_users_username")?;

        info!("database schema ready");
        Ok(())
    }

    /// Acquires a connection, counting the acquisition as a wait when the pool
    /// was saturated at the time of the call.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        let saturated = is_saturated(self.pool.num_idle(), self.pool.size(), self.max_connections);
        let started = Instant::now();
        let conn = self.pool.acquire().await?;
        if saturated {
            let waited = started.elapsed();
            debug!(?waited, "waited for a pooled connection");
            self.stats.record_wait(waited);
        }
        Ok(conn)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let open = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(open).min(open);
        PoolSnapshot {
            max_connections: self.max_connections,
            open_connections: open,
            in_use: open - idle,
            idle,
            wait_count: self.stats.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_micros(self.stats.wait_micros.load(Ordering::Relaxed)),
            max_idle_closed: self.stats.max_idle_closed.load(Ordering::Relaxed),
            max_lifetime_closed: self.stats.max_lifetime_closed.load(Ordering::Relaxed),
        }
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await
    }

    /// Closes the pool. Call once, after the server has stopped.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("disconnected from database");
    }
}

#[async_trait]
impl HealthProbe for Database {
    async fn health(&self) -> HealthReport {
        match tokio::time::timeout(PING_TIMEOUT, self.ping()).await {
            Ok(Ok(())) => HealthReport::up(self.snapshot()),
            Ok(Err(e)) => {
                warn!(error = %e, "database ping failed");
                HealthReport::down(e)
            }
            Err(_) => {
                warn!("database ping timed out");
                HealthReport::down("ping timed out")
            }
        }
    }
}
