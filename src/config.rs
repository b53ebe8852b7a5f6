use std::env;
use std::str::FromStr;

/// What persistence does with channels the source stopped listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Delete them, except favorites, which are marked stale
    #[default]
    HardDelete,
    /// Mark every removed channel stale
    MarkStale,
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" | "hard-delete" => Ok(RemovalPolicy::HardDelete),
            "stale" | "mark-stale" => Ok(RemovalPolicy::MarkStale),
            other => Err(format!("unknown removal policy `{}`", other)),
        }
    }
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // PostgreSQL
    pub database_url: String,
    pub db_max_connections: u32,

    // Fetching
    pub user_agent: String,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_m3u_size_mb: usize,
    pub max_epg_size_mb: usize,

    // Sync
    pub max_concurrent_syncs: usize,
    pub refresh_interval_secs: u64,
    pub scheduler_tick_secs: u64,
    pub fetch_epg: bool,
    pub include_vod: bool,
    /// Timezone for source times that carry no offset
    pub source_timezone: String,
    pub removal_policy: RemovalPolicy,

    // Stalker
    pub stalker_max_pages: u32,
    pub stalker_epg_period_hours: u32,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            // PostgreSQL
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/ativeplay".to_string()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),

            // Misc - Use VLC user agent to avoid IPTV server blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", 300_000), // 5 minutes
            max_retries: env_or("MAX_RETRIES", 3),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 500),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", 10_000),
            max_m3u_size_mb: env_or("MAX_M3U_SIZE_MB", 500),
            max_epg_size_mb: env_or("MAX_EPG_SIZE_MB", 500),

            max_concurrent_syncs: env_or("MAX_CONCURRENT_SYNCS", 3),
            refresh_interval_secs: env_or("REFRESH_INTERVAL_SECS", 12 * 3600),
            scheduler_tick_secs: env_or("SCHEDULER_TICK_SECS", 300),
            fetch_epg: env_or("FETCH_EPG", true),
            include_vod: env_or("INCLUDE_VOD", false),
            source_timezone: env::var("SOURCE_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            removal_policy: env_or("REMOVAL_POLICY", RemovalPolicy::HardDelete),

            stalker_max_pages: env_or("STALKER_MAX_PAGES", 500),
            stalker_epg_period_hours: env_or("STALKER_EPG_PERIOD_HOURS", 24),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/ativeplay".to_string(),
            db_max_connections: 10,
            user_agent: "VLC/3.0.20 LibVLC/3.0.20".to_string(),
            fetch_timeout_ms: 300_000,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            max_m3u_size_mb: 500,
            max_epg_size_mb: 500,
            max_concurrent_syncs: 3,
            refresh_interval_secs: 12 * 3600,
            scheduler_tick_secs: 300,
            fetch_epg: true,
            include_vod: false,
            source_timezone: "UTC".to_string(),
            removal_policy: RemovalPolicy::HardDelete,
            stalker_max_pages: 500,
            stalker_epg_period_hours: 24,
        }
    }
}
