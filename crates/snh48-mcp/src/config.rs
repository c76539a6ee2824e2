use clap::Args;
use snh48_roster::{HttpSourceConfig, DEFAULT_API_URL, DEFAULT_CACHE_FILE, DEFAULT_TIMEOUT_SECS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Seconds before the next tool call refreshes the roster from the API
    #[arg(long, env = "SNH48_CACHE_TTL", default_value = "3600", value_parser = parse_seconds)]
    pub cache_ttl: Duration,
    /// JSON cache of the last fetched payload
    #[arg(long, env = "SNH48_CACHE_FILE", default_value = DEFAULT_CACHE_FILE)]
    pub cache_file: PathBuf,
    #[arg(long, env = "SNH48_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    #[arg(long, env = "SNH48_FETCH_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub fetch_timeout: u64,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Settings {
    pub fn source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            url: self.api_url.clone(),
            timeout: Duration::from_secs(self.fetch_timeout),
            ..HttpSourceConfig::default()
        }
    }

    pub fn log_level(&self) -> String {
        if self.debug {
            return "debug".to_string();
        }
        match std::env::var("SNH48_LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => level,
            _ => "info".to_string(),
        }
    }
}

/// Accepts fractional seconds, like `1.5`.
fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("invalid number of seconds {raw:?}: {err}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("invalid duration {raw:?}: {err}"))
}
