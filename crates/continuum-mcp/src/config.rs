//! Server configuration from environment inputs.

use std::time::Duration;

/// Default dev token outside production
pub const DEFAULT_DEV_TOKEN: &str = "test-mcp-token";

/// Default cron expressions (sec min hour dom mon dow)
pub const DEFAULT_SCHEDULE_DAILY: &str = "0 0 3 * * *";
pub const DEFAULT_SCHEDULE_WEEKLY: &str = "0 0 4 * * Sun";
pub const DEFAULT_SCHEDULE_MONTHLY: &str = "0 0 5 1 * *";

/// Runtime configuration, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `CONTINUUM_ENV`; `production` disables the dev token
    pub env: String,
    /// `MCP_DEV_TOKEN`
    pub dev_token: String,
    /// `REQUEST_DEADLINE_MS`
    pub request_deadline: Duration,
    /// `EMBEDDING_DIMENSION`; pinned, changing it after data exists breaks
    /// stored vectors
    pub embedding_dimension: usize,
    /// `EMBED_QUEUE_DEPTH`
    pub embed_queue_depth: usize,
    /// `STALE_JOB_TIMEOUT_MS`
    pub stale_job_timeout: chrono::Duration,
    /// `CONSOLIDATION_SCHEDULE_DAILY`
    pub schedule_daily: String,
    /// `CONSOLIDATION_SCHEDULE_WEEKLY`
    pub schedule_weekly: String,
    /// `CONSOLIDATION_SCHEDULE_MONTHLY`
    pub schedule_monthly: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
            env: "development".to_string(),
            dev_token: DEFAULT_DEV_TOKEN.to_string(),
            request_deadline: Duration::from_millis(30_000),
            embedding_dimension: continuum_core::DEFAULT_DIMENSION,
            embed_queue_depth: 256,
            stale_job_timeout: chrono::Duration::hours(1),
            schedule_daily: DEFAULT_SCHEDULE_DAILY.to_string(),
            schedule_weekly: DEFAULT_SCHEDULE_WEEKLY.to_string(),
            schedule_monthly: DEFAULT_SCHEDULE_MONTHLY.to_string(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the environment, with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_var("CONTINUUM_HOST").unwrap_or(defaults.host),
            port: env_parse("CONTINUUM_PORT", defaults.port),
            env: env_var("CONTINUUM_ENV").unwrap_or(defaults.env),
            dev_token: env_var("MCP_DEV_TOKEN").unwrap_or(defaults.dev_token),
            request_deadline: Duration::from_millis(env_parse("REQUEST_DEADLINE_MS", 30_000u64)),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension),
            embed_queue_depth: env_parse("EMBED_QUEUE_DEPTH", defaults.embed_queue_depth),
            stale_job_timeout: chrono::Duration::milliseconds(env_parse(
                "STALE_JOB_TIMEOUT_MS",
                3_600_000i64,
            )),
            schedule_daily: env_var("CONSOLIDATION_SCHEDULE_DAILY")
                .unwrap_or(defaults.schedule_daily),
            schedule_weekly: env_var("CONSOLIDATION_SCHEDULE_WEEKLY")
                .unwrap_or(defaults.schedule_weekly),
            schedule_monthly: env_var("CONSOLIDATION_SCHEDULE_MONTHLY")
                .unwrap_or(defaults.schedule_monthly),
        }
    }

    /// Whether the dev token is disabled
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3100);
        assert_eq!(config.dev_token, DEFAULT_DEV_TOKEN);
        assert!(!config.is_production());
        assert_eq!(config.request_deadline, Duration::from_secs(30));
    }

    #[test]
    fn test_production_flag() {
        let mut config = ServerConfig::default();
        config.env = "Production".to_string();
        assert!(config.is_production());
    }
}
