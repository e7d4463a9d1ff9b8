//! Layered configuration for siphon.
//!
//! Values are merged from (later wins):
//! 1. built-in defaults,
//! 2. a config file, either given explicitly or `config.{toml,yaml,json}` in
//!    the platform config directory,
//! 3. `SIPHON_`-prefixed environment variables, using `__` to nest keys
//!    (`SIPHON_SOURCES__OUTBOX__OWNER=plant-b`).
//!
//! ```toml
//! batch_size = 25
//!
//! [sources.outbox]
//! type = "local"
//! location = "/data/outbox"
//! owner = "plant-a"
//!
//! [sources.archive]
//! type = "s3"
//! location = "connector-bucket/plant-a"
//! owner = "plant-a"
//! region = "us-west-004"
//! endpoint = "https://s3.us-west-004.backblazeb2.com"
//! key_id = "..."
//! key_secret = "..."
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use siphon_storage::backend::{LocalFileSource, S3Credentials, S3FileSource};
use siphon_storage::{FileSourceConfig, FileSourceHandle};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 25;
const ENV_PREFIX: &str = "SIPHON_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many files the sync compares concurrently before moving on.
    pub batch_size: usize,
    /// Named file sources; the name is what the CLI refers to.
    pub sources: BTreeMap<String, SourceConfig>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sources: BTreeMap::new(),
        }
    }
}

/// One configured file source, tagged by its `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Local {
        /// Absolute root directory
        location: String,
        owner: String,
    },
    S3 {
        /// `bucket[/prefix]`
        location: String,
        owner: String,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: Secret,
    },
}

/// A string that never shows up in `Debug` output (and so never in logs).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Config {
    /// Load, merge and validate configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform config
    /// directory is searched and a missing file there is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// The merged provider stack, before extraction.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::FileNotFound(path.to_path_buf()));
                }
                tracing::debug!(path = %path.display(), "Loading configuration file");
                figment = match path.extension().and_then(|ext| ext.to_str()) {
                    Some("toml") => figment.merge(Toml::file_exact(path)),
                    Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                    Some("json") => figment.merge(Json::file_exact(path)),
                    _ => exn::bail!(ErrorKind::Invalid(format!(
                        "unsupported config file format: {}",
                        path.display()
                    ))),
                };
            },
            None => {
                if let Some(dir) = default_config_dir() {
                    tracing::debug!(dir = %dir.display(), "Searching for configuration files");
                    figment = figment
                        .merge(Toml::file_exact(dir.join("config.toml")))
                        .merge(Yaml::file_exact(dir.join("config.yaml")))
                        .merge(Json::file_exact(dir.join("config.json")));
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            exn::bail!(ErrorKind::Invalid("batch_size must be greater than zero".to_string()));
        }
        for (name, source) in &self.sources {
            source.validate(name)?;
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources.get(name).ok_or_raise(|| ErrorKind::UnknownSource(name.to_string()))
    }

    /// Look up and construct the named file source.
    pub fn build_source(&self, name: &str) -> Result<FileSourceHandle> {
        self.source(name)?.build(name)
    }
}

impl SourceConfig {
    pub fn file_source_config(&self) -> FileSourceConfig {
        match self {
            Self::Local { location, owner } | Self::S3 { location, owner, .. } => {
                FileSourceConfig::new(location, owner)
            },
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let FileSourceConfig { location, owner } = self.file_source_config();
        let blank = |field: &str| ErrorKind::Invalid(format!("source `{name}` has an empty `{field}`"));
        if location.trim().is_empty() {
            exn::bail!(blank("location"));
        }
        if owner.trim().is_empty() {
            exn::bail!(blank("owner"));
        }
        if let Self::S3 { region, key_id, key_secret, .. } = self {
            if region.trim().is_empty() {
                exn::bail!(blank("region"));
            }
            if key_id.is_empty() {
                exn::bail!(blank("key_id"));
            }
            if key_secret.expose().is_empty() {
                exn::bail!(blank("key_secret"));
            }
        }
        Ok(())
    }

    /// Construct the backend. Local roots are created and probed for
    /// writability here; S3 doesn't touch the network until connected.
    pub fn build(&self, name: &str) -> Result<FileSourceHandle> {
        let config = self.file_source_config();
        let handle: FileSourceHandle = match self {
            Self::Local { .. } => {
                Arc::new(LocalFileSource::new(name, config).or_raise(|| ErrorKind::Build(name.to_string()))?)
            },
            Self::S3 { region, endpoint, key_id, key_secret, .. } => {
                let credentials = S3Credentials {
                    region: region.clone(),
                    endpoint: endpoint.clone(),
                    key_id: key_id.clone(),
                    key_secret: key_secret.expose().to_string(),
                };
                Arc::new(S3FileSource::new(name, config, credentials).or_raise(|| ErrorKind::Build(name.to_string()))?)
            },
        };
        tracing::debug!(source = name, kind = self.kind(), "Built file source");
        Ok(handle)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::S3 { .. } => "s3",
        }
    }
}

fn default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "siphon").map(|dirs| dirs.config_dir().to_path_buf())
}
