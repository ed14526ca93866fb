use lawpal::{app, config::AppConfig, db, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    lawpal::init_tracing();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let (state, pool) = AppState::init(config).await?;

    // serve immediately; the guard answers 503 until the database is up
    let _supervisor = db::supervise(pool, state.db_status.clone());

    app::serve(app::build_app(state), &bind_addr).await
}
