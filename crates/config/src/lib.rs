//! Configuration for snapshot runs.
//!
//! [`Settings`] is loaded once per run with `figment` (defaults, then a
//! TOML/YAML/JSON file, then `FREEZE_*` environment variables), validated,
//! and handed to the pipeline as an immutable value. Secrets come from a
//! separate [`CredentialStore`].

mod credentials;
pub mod error;
mod load;
mod settings;

pub use crate::credentials::{CredentialStore, EnvCredentials, GITHUB_TOKEN, StaticCredentials};
pub use crate::load::ENV_PREFIX;
pub use crate::settings::{
    ArchiveCompression, ArchiveSettings, AssetSettings, CacheSettings, DirectorySettings, FetchSettings, FetchStrategy,
    GitHubSettings, GitSettings, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, Settings, SinkKind, SinkSettings,
};
