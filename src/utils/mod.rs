pub mod retry;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "TIP_SCANNER";

/// Loads the YAML config, letting `TIP_SCANNER__<FIELD>` environment variables override it
/// (e.g. `TIP_SCANNER__RPC_URL`, `TIP_SCANNER__SCANNER__MAX_CHUNK_SIZE`).
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<Config> {
    let config_path = config_path.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config file")?;

    settings
        .try_deserialize::<Config>()
        .context("failed to parse config YAML")
}

pub fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Unix timestamp of 00:00:00 UTC on the day containing `now`.
pub fn start_of_utc_day(now: u64) -> u64 {
    DateTime::from_timestamp(now as i64, 0)
        .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp().max(0) as u64)
        .unwrap_or(now - now % 86_400)
}

fn strip_html(error: &str) -> String {
    // Explorers and some RPC gateways answer errors with an HTML page
    if error.contains("<!doctype html>") || error.contains("<html>") {
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_utc_day() {
        // 2023-05-02T14:21:07Z
        assert_eq!(start_of_utc_day(1_683_037_267), 1_682_985_600);
        assert_eq!(start_of_utc_day(1_682_985_600), 1_682_985_600);
    }

    #[test]
    fn test_strip_html() {
        let page = "<!doctype html>\n<html>\n<body>\nBad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "Bad Gateway");
        assert_eq!(strip_html("plain error"), "plain error");
    }
}
