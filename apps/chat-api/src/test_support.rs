use std::sync::Arc;

use crate::auth::identity::JwtIdentity;
use crate::config::{Config, HistoryPolicy};
use crate::db::store::MemoryMessageStore;
use crate::AppState;

pub const TEST_SECRET: &str = "unit-test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: None,
        port: 0,
        jwt_secret: TEST_SECRET.to_string(),
        jwt_algorithm: jsonwebtoken::Algorithm::HS256,
        history_policy: HistoryPolicy::Empty,
        ws_require_auth: false,
        send_queue_capacity: 16,
        max_message_len: 4000,
        idle_timeout: None,
        snowflake_worker_id: 0,
    }
}

/// App state over an in-memory store.
pub fn memory_state() -> AppState {
    let config = test_config();
    let identity = Arc::new(JwtIdentity::new(&config.jwt_secret, config.jwt_algorithm));
    AppState::new(config, Arc::new(MemoryMessageStore::default()), identity)
}
