//! Layered configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, `webstash.toml`,
//! `webstash.json`, environment variables prefixed `WEBSTASH_` (nested keys
//! separated by `__`, e.g. `WEBSTASH_ADAPTERS__PREFERRED=relational`).

use crate::error::{ErrorKind, Result};
use crate::model::Config;
use directories::ProjectDirs;
use exn::OptionExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "WEBSTASH_";

/// Platform data directory used as the storage root when the config does
/// not override it. Adapters create their own namespaced subdirectories
/// underneath.
pub fn storage_root() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "webstash").ok_or_raise(|| ErrorKind::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration from the conventional sources in the current
    /// directory.
    pub fn load() -> Result<Self> {
        Self::load_from("webstash.toml", "webstash.json")
    }

    /// Load configuration with explicit file locations. Missing files are
    /// fine; they contribute nothing to the stack.
    pub fn load_from(toml: impl AsRef<Path>, json: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(toml.as_ref()))
            .merge(Json::file(json.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Config = figment.extract().map_err(|e| exn::Exn::from(ErrorKind::Extraction(e.to_string())))?;
        tracing::debug!(enabled = config.is_enabled, "configuration resolved");
        Ok(config)
    }
}
