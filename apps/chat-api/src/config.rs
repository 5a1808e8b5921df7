use std::time::Duration;

use jsonwebtoken::Algorithm;

/// What the history endpoint answers for a room with no stored messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// `200` with an empty message list (new conversation).
    #[default]
    Empty,
    /// `404 NOT_FOUND`.
    NotFound,
}

impl HistoryPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "empty" => Some(Self::Empty),
            "not_found" | "404" => Some(Self::NotFound),
            _ => None,
        }
    }
}

/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset, messages are kept in memory.
    pub database_url: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Secret used to verify bearer tokens issued by the auth service.
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub history_policy: HistoryPolicy,
    /// Reject WebSocket upgrades that carry no identity.
    pub ws_require_auth: bool,
    /// Capacity of each session's outbound frame queue.
    pub send_queue_capacity: usize,
    /// Maximum message length, in characters.
    pub max_message_len: usize,
    /// Close sessions that stay silent this long. `None` disables eviction.
    pub idle_timeout: Option<Duration>,
    pub snowflake_worker_id: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        Self {
            database_url: var("DATABASE_URL"),
            port: var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8000),
            jwt_secret: var("JWT_SECRET")
                .unwrap_or_else(|| panic!("JWT_SECRET env var is required")),
            jwt_algorithm: match var("JWT_ALGORITHM").as_deref() {
                Some("HS384") => Algorithm::HS384,
                Some("HS512") => Algorithm::HS512,
                _ => Algorithm::HS256,
            },
            history_policy: var("CHAT_HISTORY_EMPTY_POLICY")
                .and_then(|v| HistoryPolicy::parse(&v))
                .unwrap_or_default(),
            ws_require_auth: var("CHAT_WS_REQUIRE_AUTH")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            send_queue_capacity: var("CHAT_SEND_QUEUE")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(256),
            max_message_len: var("CHAT_MAX_MESSAGE_LEN")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4000),
            idle_timeout: var("CHAT_IDLE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            snowflake_worker_id: var("SNOWFLAKE_WORKER_ID")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}
