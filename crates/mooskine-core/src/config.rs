//! Configuration
//!
//! Settings are layered, later layers winning:
//! 1. Built-in defaults
//! 2. `config.toml` under the platform config directory, or the file named
//!    by `MOOSKINE_CONFIG`
//! 3. `MOOSKINE_*` environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "MOOSKINE";

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

/// Store and note settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the persisted store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Name of the persisted container (the data model name)
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Seconds between automatic flushes
    #[serde(default = "default_auto_flush_secs")]
    pub auto_flush_secs: u64,

    /// Text given to every newly created note
    #[serde(default = "default_note_text")]
    pub default_note_text: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_name: default_store_name(),
            auto_flush_secs: default_auto_flush_secs(),
            default_note_text: default_note_text(),
        }
    }
}

impl Config {
    /// Load from the standard config file, then apply the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path`, falling back to defaults when it is absent
    ///
    /// Creates the data directory if needed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read config {:?}", path))?;
            Self::parse(&raw).with_context(|| format!("Invalid config {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Cannot create data directory {:?}", config.data_dir))?;
        Ok(config)
    }

    /// Load from TOML text, then apply the environment
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config = Self::parse(toml_content).context("Invalid config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse(toml_content: &str) -> Result<Self> {
        Ok(toml::from_str(toml_content)?)
    }

    /// Defaults, with the store kept under `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Empty or unparseable values leave the setting alone
    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_var("DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = env_var("STORE_NAME").filter(|v| !v.is_empty()) {
            self.store_name = name;
        }
        if let Some(secs) = env_var("AUTO_FLUSH_SECS").and_then(|v| v.trim().parse().ok()) {
            self.auto_flush_secs = secs;
        }
    }

    /// Write to the standard config file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create config directory {:?}", dir))?;
        }

        let toml_content = toml::to_string_pretty(self).context("Cannot encode config")?;
        std::fs::write(&path, toml_content)
            .with_context(|| format!("Cannot write config {:?}", path))
    }

    /// `$MOOSKINE_CONFIG`, else `<config dir>/mooskine/config.toml`
    pub fn config_file_path() -> PathBuf {
        match env_var("CONFIG") {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mooskine")
                .join("config.toml"),
        }
    }

    /// `<data_dir>/<store_name>.sqlite`
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", self.store_name))
    }

    /// Interval for [`Store::auto_flush`](crate::Store::auto_flush)
    ///
    /// A configured value of zero yields a zero interval, which the store
    /// refuses to schedule.
    pub fn auto_flush_interval(&self) -> Duration {
        Duration::from_secs(self.auto_flush_secs)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mooskine")
}

fn default_store_name() -> String {
    "Mooskine".to_string()
}

fn default_auto_flush_secs() -> u64 {
    30
}

fn default_note_text() -> String {
    "New note".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard};

    const ENV_VARS: &[&str] = &[
        "MOOSKINE_CONFIG",
        "MOOSKINE_DATA_DIR",
        "MOOSKINE_STORE_NAME",
        "MOOSKINE_AUTO_FLUSH_SECS",
    ];

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Clears the MOOSKINE_* variables for one test and puts them back after
    struct ScopedEnv {
        previous: Vec<(&'static str, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl ScopedEnv {
        fn clean() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let previous = ENV_VARS.iter().map(|&var| (var, env::var(var).ok())).collect();
            ENV_VARS.iter().for_each(|var| env::remove_var(var));
            Self {
                previous,
                _lock: lock,
            }
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for (var, value) in self.previous.drain(..) {
                match value {
                    Some(value) => env::set_var(var, value),
                    None => env::remove_var(var),
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store_name, "Mooskine");
        assert_eq!(config.auto_flush_secs, 30);
        assert_eq!(config.default_note_text, "New note");
        assert!(config.data_dir.ends_with("mooskine"));
    }

    #[test]
    fn test_store_path() {
        let config = Config::with_data_dir("/data");
        assert_eq!(config.store_path(), PathBuf::from("/data/Mooskine.sqlite"));
    }

    #[test]
    fn test_auto_flush_interval() {
        let mut config = Config::default();
        assert_eq!(config.auto_flush_interval(), Duration::from_secs(30));
        config.auto_flush_secs = 0;
        assert!(config.auto_flush_interval().is_zero());
    }

    #[test]
    fn test_data_dir_from_env() {
        let _env = ScopedEnv::clean();
        env::set_var("MOOSKINE_DATA_DIR", "/tmp/mooskine-test");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mooskine-test"));
    }

    #[test]
    fn test_empty_store_name_is_ignored() {
        let _env = ScopedEnv::clean();
        let mut config = Config::default();

        env::set_var("MOOSKINE_STORE_NAME", "MooskineIV");
        config.apply_env_overrides();
        assert_eq!(config.store_name, "MooskineIV");

        env::set_var("MOOSKINE_STORE_NAME", "");
        config.apply_env_overrides();
        assert_eq!(config.store_name, "MooskineIV");
    }

    #[test]
    fn test_unparseable_flush_interval_is_ignored() {
        let _env = ScopedEnv::clean();
        let mut config = Config::default();

        env::set_var("MOOSKINE_AUTO_FLUSH_SECS", " 3 ");
        config.apply_env_overrides();
        assert_eq!(config.auto_flush_secs, 3);

        env::set_var("MOOSKINE_AUTO_FLUSH_SECS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.auto_flush_secs, 3);
    }

    #[test]
    fn test_toml_round_trip_keeps_every_field() {
        let config = Config {
            data_dir: PathBuf::from("/data/mooskine"),
            store_name: "Notes".to_string(),
            auto_flush_secs: 10,
            default_note_text: "Neue Notiz".to_string(),
        };

        let encoded = toml::to_string_pretty(&config).unwrap();
        let decoded: Config = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.data_dir, config.data_dir);
        assert_eq!(decoded.store_name, "Notes");
        assert_eq!(decoded.auto_flush_secs, 10);
        assert_eq!(decoded.default_note_text, "Neue Notiz");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let _env = ScopedEnv::clean();
        let config = Config::load_from_str(
            r#"
            data_dir = "/custom/data"
            default_note_text = "Neue Note"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.default_note_text, "Neue Note");
        assert_eq!(config.store_name, "Mooskine");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let _env = ScopedEnv::clean();
        assert!(Config::load_from_str("auto_flush_secs = \"often\"").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults_and_creates_data_dir() {
        let _env = ScopedEnv::clean();
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("MOOSKINE_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.auto_flush_secs, 30);
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_then_load() {
        let _env = ScopedEnv::clean();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("config.toml");
        env::set_var("MOOSKINE_CONFIG", &path);

        let mut config = Config::with_data_dir(temp_dir.path().join("data"));
        config.store_name = "Saved".to_string();
        config.save().unwrap();

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.store_name, "Saved");
        assert_eq!(loaded.data_dir, temp_dir.path().join("data"));
    }
}
