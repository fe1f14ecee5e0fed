use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

use crate::recent::DEFAULT_LOOKBACK_MONTHS;

/// Runtime configuration, loaded from the environment at process start.
/// The store handle and secrets are constructed once here and handed to the
/// server state explicitly; nothing is read from the environment per
/// request.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    pub shared_username: String,
    pub shared_password: String,
    pub extractor_url: String,
    /// Months the recent-data lookup walks back before reporting "no data".
    pub lookback_months: u32,
    pub token_ttl_secs: i64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", "5000"),
            db_path: try_load("CAREDASH_DB", "caredash.db"),
            jwt_secret: require("JWT_SECRET"),
            shared_username: require("SHARED_USERNAME"),
            shared_password: require("SHARED_PASSWORD"),
            extractor_url: require("EXTRACTOR_URL"),
            lookback_months: try_load("LOOKBACK_MONTHS", &DEFAULT_LOOKBACK_MONTHS.to_string()),
            token_ttl_secs: try_load("TOKEN_TTL_SECS", "3600"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn require(key: &str) -> String {
    env::var(key)
        .map_err(|_| {
            warn!("Required environment variable {key} is not set");
        })
        .expect("Environment misconfigured!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_uses_default() {
        env::remove_var("CAREDASH_TEST_MISSING");
        let port: u16 = try_load("CAREDASH_TEST_MISSING", "5000");
        assert_eq!(port, 5000);
    }

    #[test]
    fn test_try_load_reads_env() {
        env::set_var("CAREDASH_TEST_PORT", "8080");
        let port: u16 = try_load("CAREDASH_TEST_PORT", "5000");
        assert_eq!(port, 8080);
        env::remove_var("CAREDASH_TEST_PORT");
    }
}
