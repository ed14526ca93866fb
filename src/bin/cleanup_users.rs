//! Deletes local accounts that never finished signup (unverified, or
//! verified without a password). OAuth-linked accounts are kept.

use std::process::ExitCode;

use anyhow::Context;
use lawpal::auth::{repo::PgUserRepo, services::delete_stale_users};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

async fn run() -> anyhow::Result<u64> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("connect to database")?;
    info!("connected to database");

    let deleted = delete_stale_users(&PgUserRepo::new(pool.clone())).await?;
    pool.close().await;
    Ok(deleted)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    lawpal::init_tracing();

    match run().await {
        Ok(deleted) => {
            println!("Deleted {deleted} users");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "cleanup failed");
            ExitCode::FAILURE
        }
    }
}
