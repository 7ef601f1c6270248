use crate::{KVStoreError, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which storage engine backs the `LocalStorage` object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Kvs,
    #[default]
    Sled,
}

impl std::str::FromStr for EngineKind {
    type Err = KVStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kvs" => Ok(EngineKind::Kvs),
            "sled" => Ok(EngineKind::Sled),
            other => Err(KVStoreError::Config(format!("unknown engine `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub engine: EngineKind,
    /// Script-visible name of the storage object
    pub storage_object: String,
    /// Script-visible name of the object carrying `openURL`/`getFavicon`
    pub home_object: String,
    pub favicon: FaviconConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("home-data"),
            engine: EngineKind::default(),
            storage_object: "LocalStorage".to_owned(),
            home_object: "Fulldive".to_owned(),
            favicon: FaviconConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaviconConfig {
    /// Script function receiving `(pageUrl, dataUri)`
    pub callback: String,
    /// Delay before each probe, each one measured from the previous probe
    pub retry_delays_ms: Vec<u64>,
}

impl Default for FaviconConfig {
    fn default() -> Self {
        FaviconConfig {
            callback: "onFaviconLoaded".to_owned(),
            retry_delays_ms: vec![0, 500, 2000],
        }
    }
}

impl FaviconConfig {
    pub fn retry_schedule(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

impl Config {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.favicon.retry_delays_ms.is_empty() {
            return Err(KVStoreError::Config(
                "favicon.retry_delays_ms must not be empty".to_owned(),
            ));
        }
        if !is_script_identifier(&self.favicon.callback) {
            return Err(KVStoreError::Config(format!(
                "`{}` is not a valid callback name",
                self.favicon.callback
            )));
        }
        for name in [&self.storage_object, &self.home_object] {
            if !is_script_identifier(name) {
                return Err(KVStoreError::Config(format!(
                    "`{}` is not a valid object name",
                    name
                )));
            }
        }
        if self.storage_object == self.home_object {
            return Err(KVStoreError::Config(
                "storage_object and home_object must differ".to_owned(),
            ));
        }
        Ok(())
    }
}

/// ASCII subset of a JS identifier, enough for names we splice into script.
fn is_script_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "engine": "kvs", "favicon": { "callback": "gotIcon" } }"#)
                .unwrap();
        assert_eq!(config.engine, EngineKind::Kvs);
        assert_eq!(config.favicon.callback, "gotIcon");
        assert_eq!(config.favicon.retry_delays_ms, vec![0, 500, 2000]);
        assert_eq!(config.storage_object, "LocalStorage");
        assert_eq!(config.home_object, "Fulldive");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_callback_and_empty_schedule() {
        let mut config = Config::default();
        config.favicon.callback = "alert(1);x".to_owned();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.favicon.retry_delays_ms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn engine_kind_from_str() {
        assert_eq!("sled".parse::<EngineKind>().unwrap(), EngineKind::Sled);
        assert_eq!("kvs".parse::<EngineKind>().unwrap(), EngineKind::Kvs);
        assert!("redis".parse::<EngineKind>().is_err());
    }
}
