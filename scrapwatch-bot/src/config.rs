use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Battlemetrics API token, attached as a bearer header to every request
    /// Env: BATTLEMETRICS_TOKEN (optional, check at runtime, if doesn't exist, panic)
    pub battlemetrics_token: Option<String>,

    /// Battlemetrics API base URL
    /// Env: BATTLEMETRICS_API_URL (default: "https://api.battlemetrics.com")
    pub battlemetrics_api_url: String,

    /// Discord API Token
    /// Env: DISCORD_TOKEN (optional, check at runtime, if doesn't exist, panic)
    pub discord_token: Option<String>,

    /// Discord Command Prefix
    /// Env: DISCORD_COMMAND_PREFIX (default: "!")
    pub discord_command_prefix: String,

    /// Database file path
    /// Env: DATABASE_PATH (default: "scrapwatch.db")
    pub database_path: String,

    /// How long a cached API response stays fresh
    /// Env: REQUEST_CACHE_TTL_SECS (default: 120)
    pub request_cache_ttl: Duration,

    /// Sustained request rate against the Battlemetrics API
    /// Env: REQUESTS_PER_SECOND (default: 5)
    pub requests_per_second: u32,

    /// Timeout for a single API request in seconds
    /// Env: HTTP_TIMEOUT_SECS (default: 10)
    pub http_timeout: Duration,

    /// Sessions younger than this many seconds are not refetched unless forced
    /// Env: SESSIONS_REFRESH_SECS (default: 300)
    pub sessions_refresh_secs: i64,

    /// Server metadata younger than this many seconds is not refreshed
    /// Env: SERVER_REFRESH_SECS (default: 30)
    pub server_refresh_secs: i64,

    /// Pause between periodic update cycles
    /// Env: UPDATE_INTERVAL_SECS (default: 420)
    pub update_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            battlemetrics_token: var("BATTLEMETRICS_TOKEN")
                .expect("BATTLEMETRICS_TOKEN environment variable is required")
                .into(),
            battlemetrics_api_url: env_or_default_string(
                "BATTLEMETRICS_API_URL",
                "https://api.battlemetrics.com",
            ),
            discord_token: var("DISCORD_TOKEN")
                .expect("DISCORD_TOKEN environment variable is required")
                .into(),
            discord_command_prefix: env_or_default_string("DISCORD_COMMAND_PREFIX", "!"),
            database_path: env_or_default_string("DATABASE_PATH", "scrapwatch.db"),
            request_cache_ttl: Duration::from_secs(env_or_default("REQUEST_CACHE_TTL_SECS", 120)),
            requests_per_second: env_or_default("REQUESTS_PER_SECOND", 5),
            http_timeout: Duration::from_secs(env_or_default("HTTP_TIMEOUT_SECS", 10)),
            sessions_refresh_secs: env_or_default("SESSIONS_REFRESH_SECS", 300),
            server_refresh_secs: env_or_default("SERVER_REFRESH_SECS", 30),
            update_interval: Duration::from_secs(env_or_default("UPDATE_INTERVAL_SECS", 420)),
        }
    }

    /// Create configuration with all default values
    pub fn default() -> Self {
        Self {
            battlemetrics_token: None,
            battlemetrics_api_url: "https://api.battlemetrics.com".to_string(),
            discord_token: None,
            discord_command_prefix: "!".to_string(),
            database_path: "scrapwatch.db".to_string(),
            request_cache_ttl: Duration::from_secs(120),
            requests_per_second: 5,
            http_timeout: Duration::from_secs(10),
            sessions_refresh_secs: 300,
            server_refresh_secs: 30,
            update_interval: Duration::from_secs(420),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
