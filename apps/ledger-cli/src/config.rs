//! YAML configuration: where the store lives and which sources feed it.
//!
//! ```yaml
//! store: ./ledger_data
//! sources:
//!   - label: people
//!     path: people.json
//!     schedule: "@every 1h"
//! ```
//!
//! Relative paths are taken relative to the config file.

use ledger_source::JsonFileSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE: &str = "ledger_data";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub label: String,
    pub path: PathBuf,
    #[serde(default)]
    pub schedule: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("source label {0:?} is configured twice")]
    DuplicateLabel(String),
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        if let Some(store) = config.store.take() {
            config.store = Some(base.join(store));
        }
        for source in &mut config.sources {
            source.path = base.join(&source.path);
        }

        let mut seen = std::collections::BTreeSet::new();
        for source in &config.sources {
            if !seen.insert(source.label.as_str()) {
                return Err(ConfigError::DuplicateLabel(source.label.clone()));
            }
        }
        Ok(config)
    }

    /// Store directory: the command line wins, then the config, then the default.
    pub fn store_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.store.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
    }

    pub fn json_sources(&self) -> Vec<JsonFileSource> {
        self.sources
            .iter()
            .map(|s| JsonFileSource::new(s.label.as_str(), &s.path, s.schedule.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_source::Source;

    #[test]
    fn load_resolves_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.yaml");
        std::fs::write(
            &path,
            "store: data\nsources:\n  - label: people\n    path: in/people.json\n    schedule: \"@hourly\"\n  - label: places\n    path: /abs/places.json\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store_dir(None), tmp.path().join("data"));
        assert_eq!(config.sources[0].path, tmp.path().join("in/people.json"));
        assert_eq!(config.sources[1].path, PathBuf::from("/abs/places.json"));
        assert_eq!(config.sources[1].schedule, "");

        let sources = config.json_sources();
        assert_eq!(sources[0].label(), "people");
        assert_eq!(sources[0].schedule(), "@hourly");
    }

    #[test]
    fn store_flag_overrides_config() {
        let config = Config::default();
        assert_eq!(config.store_dir(None), PathBuf::from(DEFAULT_STORE));
        assert_eq!(
            config.store_dir(Some(Path::new("/tmp/x"))),
            PathBuf::from("/tmp/x")
        );
    }

    #[test]
    fn bad_configs_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger.yaml");

        std::fs::write(&path, "stroe: typo\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Yaml { .. })));

        std::fs::write(
            &path,
            "sources:\n  - {label: a, path: a.json}\n  - {label: a, path: b.json}\n",
        )
        .unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::DuplicateLabel(label)) if label == "a"
        ));

        assert!(matches!(
            Config::load(tmp.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
