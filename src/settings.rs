use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::HarvestError;

const CONFIG_FILE: &str = "gql_harvest";
const ENV_PREFIX: &str = "GQL";

pub const DEFAULT_ENTRY_URL: &str = "https://x.com/explore";
pub const DEFAULT_SERVICE_WORKER_URL: &str = "https://x.com/sw.js";
pub const DEFAULT_CHUNK_REGISTRY: &str = "webpackChunk_twitter_responsive_web";
pub const DEFAULT_BUNDLE_PREFIXES: &[&str] = &["main.", "vendor.", "ondemand."];

/// Run settings. Layered as: defaults, `gql_harvest.toml` (optional),
/// `GQL_*` environment variables, then CLI flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub entry_url: String,
    pub service_worker_url: String,
    pub chunk_registry: String,
    pub bundle_prefixes: Vec<String>,
    pub output: PathBuf,
    pub headless: bool,
    pub nav_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Max characters allowed between `queryId` and `operationName` in the
    /// minimal descriptor form.
    pub minimal_window: usize,
    pub progress_every: usize,
}

impl Settings {
    pub fn load() -> Result<Self, HarvestError> {
        let builder = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bundle_prefixes"),
            );
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Built-in defaults only, ignoring files and environment.
    #[cfg(test)]
    pub fn defaults() -> Result<Self, HarvestError> {
        Ok(defaults()?.build()?.try_deserialize()?)
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.nav_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, HarvestError> {
    let prefixes: Vec<&str> = DEFAULT_BUNDLE_PREFIXES.to_vec();
    Ok(Config::builder()
        .set_default("entry_url", DEFAULT_ENTRY_URL)?
        .set_default("service_worker_url", DEFAULT_SERVICE_WORKER_URL)?
        .set_default("chunk_registry", DEFAULT_CHUNK_REGISTRY)?
        .set_default("bundle_prefixes", prefixes)?
        .set_default("output", "endpoints.json")?
        .set_default("headless", true)?
        .set_default("nav_timeout_secs", 60i64)?
        .set_default("ready_timeout_secs", 30i64)?
        .set_default("fetch_timeout_secs", 30i64)?
        .set_default("minimal_window", 500i64)?
        .set_default("progress_every", 10i64)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let s = Settings::defaults().unwrap();
        assert_eq!(s.entry_url, DEFAULT_ENTRY_URL);
        assert_eq!(s.service_worker_url, DEFAULT_SERVICE_WORKER_URL);
        assert_eq!(s.chunk_registry, DEFAULT_CHUNK_REGISTRY);
        assert_eq!(s.bundle_prefixes, vec!["main.", "vendor.", "ondemand."]);
        assert_eq!(s.output, PathBuf::from("endpoints.json"));
        assert!(s.headless);
        assert_eq!(s.minimal_window, 500);
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let s = Settings::defaults().unwrap();
        assert_eq!(s.nav_timeout(), Duration::from_secs(60));
        assert_eq!(s.ready_timeout(), Duration::from_secs(30));
        assert_eq!(s.fetch_timeout(), Duration::from_secs(30));
    }
}
