use std::sync::Arc;

use crate::auth::oauth::OAuthProviders;
use crate::auth::repo::{PgUserRepo, UserRepo};
use crate::config::AppConfig;
use crate::conversations::repo::{ConversationRepo, PgConversationRepo};
use crate::db::{self, DbState, DbStatus};
use crate::mail::{self, Mailer};
use crate::storage::{self, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepo>,
    pub conversations: Arc<dyn ConversationRepo>,
    pub db_status: DbStatus,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn StorageClient>,
    pub oauth: OAuthProviders,
}

impl AppState {
    /// Builds the production state. The pool is lazy and nothing here waits
    /// for the database; [`db::supervise`] connects in the background.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, sqlx::PgPool)> {
        let config = Arc::new(config);
        let pool = db::lazy_pool(&config.database_url)?;

        let state = Self {
            users: Arc::new(PgUserRepo::new(pool.clone())),
            conversations: Arc::new(PgConversationRepo::new(pool.clone())),
            db_status: DbStatus::new(DbState::Connecting),
            mailer: mail::from_config(&config.mail)?,
            storage: storage::from_config(&config.storage),
            oauth: OAuthProviders::from_config(&config.oauth),
            config,
        };
        Ok((state, pool))
    }
}
