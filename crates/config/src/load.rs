//! Layered loading: defaults, then a config file, then `FREEZE_*` variables.

use crate::Settings;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Prefix for environment overrides; nested keys are separated by `__`,
/// e.g. `FREEZE_FETCH__TIMEOUT_SECS=900`.
pub const ENV_PREFIX: &str = "FREEZE_";

impl Settings {
    /// The platform configuration file location (`<config dir>/freeze.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "freeze").map(|dirs| dirs.config_dir().join("freeze.toml"))
    }

    /// Build the provider stack without extracting it.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings.
    ///
    /// A missing file is not an error (defaults and environment still
    /// apply), but the result must pass [`validate`](Self::validate).
    #[instrument(fields(path = ?path))]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Settings = Self::figment(path).extract().or_raise(|| ErrorKind::Load)?;
        settings.validate()?;
        tracing::debug!(sinks = ?settings.sinks.enabled(), "Configuration loaded");
        Ok(settings)
    }
}
