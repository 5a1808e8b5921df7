pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use auth::identity::{IdentityProvider, JwtIdentity};
use campus_common::SnowflakeGenerator;
use config::Config;
use db::pg_store::PgMessageStore;
use db::store::{MemoryMessageStore, MessageStore};
use gateway::fanout::RoomBroadcast;
use gateway::registry::RoomRegistry;
use shutdown::Shutdown;

/// Shared application state available to all route handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub rooms: Arc<RoomRegistry>,
    pub broadcast: RoomBroadcast,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
}

impl AppState {
    /// Wire up state from explicit collaborators. Each call gets its own
    /// room registry, so separate instances never share rooms.
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            store,
            broadcast: RoomBroadcast::new(rooms.clone()),
            rooms,
            identity,
            config: Arc::new(config),
            shutdown: Shutdown::new(),
        }
    }

    /// Build state from configuration: PostgreSQL when `DATABASE_URL` is set,
    /// otherwise an in-memory store.
    pub fn from_config(config: Config) -> Self {
        let store: Arc<dyn MessageStore> = match &config.database_url {
            Some(url) => {
                let pool = db::pool::connect(url);
                let ids = Arc::new(SnowflakeGenerator::new(config.snowflake_worker_id));
                Arc::new(PgMessageStore::new(pool, ids))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; chat messages are kept in memory only");
                Arc::new(MemoryMessageStore::new(config.snowflake_worker_id))
            }
        };
        let identity = Arc::new(JwtIdentity::new(&config.jwt_secret, config.jwt_algorithm));

        Self::new(config, store, identity)
    }
}
