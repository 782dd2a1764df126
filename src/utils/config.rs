//! Configuration loading. Defaults, then `config.toml` in the config directory, then an explicit
//! file, then `TABTRAIL_*` environment variables (nested keys use `__`, e.g.
//! `TABTRAIL_STORE__BASE_URL`).

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use super::dir::application_config_path;

/// Schemes a browser reserves for its own pages. Tabs on these are never tracked.
pub const DEFAULT_PRIVILEGED_SCHEMES: &[&str] = &[
    "chrome",
    "chrome-extension",
    "chrome-search",
    "chrome-untrusted",
    "devtools",
    "edge",
    "brave",
    "opera",
    "vivaldi",
    "about",
    "moz-extension",
    "view-source",
];

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Rows are kept in a JSON document on the local disk. `None` means `<app dir>/store.json`.
    File { path: Option<PathBuf> },
    /// Rows are kept behind an HTTP activity API, see [crate::store::http_store].
    Http {
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::File { path } => f.debug_struct("File").field("path", path).finish(),
            StoreConfig::Http { base_url, api_key } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_key", &api_key.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    /// Quiescence window of the sync debouncer.
    pub sync_delay_ms: u64,
    /// How far back the recommendation query looks.
    pub lookback_days: i64,
    pub privileged_schemes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::File { path: None },
            sync_delay_ms: 5000,
            lookback_days: 30,
            privileged_schemes: DEFAULT_PRIVILEGED_SCHEMES
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

impl Config {
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(config_path).extract()
    }

    fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = application_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("TABTRAIL_").split("__"))
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days)
    }
}
