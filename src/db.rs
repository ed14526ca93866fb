use std::{
    future::Future,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::{error, info, warn};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already exists")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Maps a unique-index violation on `users.email` to [`StoreError::DuplicateEmail`].
    pub fn from_write(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            _ => StoreError::Database(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Disconnected,
    Connected,
    Connecting,
}

impl DbState {
    pub fn as_str(self) -> &'static str {
        match self {
            DbState::Disconnected => "disconnected",
            DbState::Connected => "connected",
            DbState::Connecting => "connecting",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            DbState::Disconnected => 0,
            DbState::Connected => 1,
            DbState::Connecting => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => DbState::Connected,
            2 => DbState::Connecting,
            _ => DbState::Disconnected,
        }
    }
}

/// Shared, cheaply clonable view of the database connection state.
#[derive(Debug, Clone)]
pub struct DbStatus(Arc<AtomicU8>);

impl DbStatus {
    pub fn new(state: DbState) -> Self {
        Self(Arc::new(AtomicU8::new(state.to_u8())))
    }

    pub fn get(&self) -> DbState {
        DbState::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, state: DbState) {
        self.0.store(state.to_u8(), Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == DbState::Connected
    }
}

/// Builds the pool without touching the network; see [`supervise`].
pub fn lazy_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url)?;
    Ok(pool)
}

/// Retries connection and migrations every few seconds until both succeed,
/// then keeps probing so the guard and `/health` stay truthful.
pub fn supervise(pool: PgPool, status: DbStatus) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_until_ready(&status, RECONNECT_INTERVAL, || prepare(&pool)).await;
        info!("connected to database");

        loop {
            tokio::time::sleep(PROBE_INTERVAL).await;
            let alive = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
            match (alive, status.get()) {
                (false, DbState::Connected) => {
                    warn!("database connection lost");
                    status.set(DbState::Disconnected);
                }
                (true, DbState::Disconnected) => {
                    info!("database connection restored");
                    status.set(DbState::Connected);
                }
                _ => {}
            }
        }
    })
}

async fn prepare(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Status stays `Connecting` until `attempt` succeeds once.
async fn wait_until_ready<F, Fut>(status: &DbStatus, retry_in: Duration, mut attempt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        match attempt().await {
            Ok(()) => {
                status.set(DbState::Connected);
                return;
            }
            Err(e) => {
                error!(error = %e, "database not ready");
                info!(?retry_in, "retrying database setup");
                tokio::time::sleep(retry_in).await;
            }
        }
    }
}
