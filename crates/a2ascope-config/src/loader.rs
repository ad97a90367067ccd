use std::path::{Path, PathBuf};

use a2ascope_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".a2ascope"));
        let xdg_config = dirs::config_dir().map(|c| c.join("a2ascope"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                // Prefer XDG unless only the legacy home dir exists.
                if !xdg.exists() && home.exists() {
                    home
                } else {
                    xdg
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".a2ascope"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Where conversation exports are written.
    pub fn exports_dir(&self) -> PathBuf {
        self.config_dir.join("exports")
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.exports_dir()];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigLoader;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "a2ascope-config-test-{}-{}-{}",
            label,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn load_returns_default_when_no_config_exists() {
        let dir = temp_dir("default");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.client.request_timeout_secs, 30);
        assert_eq!(config.tasks.poll_interval_secs, 3);
        assert_eq!(config.tasks.history_length, 10);
        assert_eq!(config.chat.default_method, "message/send");
        assert_eq!(config.log_level, None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_prefers_yaml_over_toml_when_both_exist() {
        let dir = temp_dir("yaml-precedence");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.yml"),
            "client:\n  request_timeout_secs: 12\n",
        )
        .expect("failed to write yaml config");
        fs::write(
            dir.join("config.toml"),
            "[client]\nrequest_timeout_secs = 99\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.client.request_timeout_secs, 12);
        // unspecified fields keep their defaults
        assert_eq!(config.client.stream_buffer, 32);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_reads_toml_when_yaml_missing() {
        let dir = temp_dir("toml");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.toml"),
            "[tasks]\npoll_interval_secs = 7\nhistory_length = 3\n\n[chat]\ndefault_method = \"message/stream\"\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.tasks.poll_interval_secs, 7);
        assert_eq!(config.tasks.history_length, 3);
        assert_eq!(config.chat.default_method, "message/stream");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_reports_malformed_yaml_as_config_error() {
        let dir = temp_dir("bad-yaml");
        fs::create_dir_all(&dir).expect("failed to create temp dir");
        fs::write(dir.join("config.yml"), "client: [not, a, map").expect("write");

        let loader = ConfigLoader::with_dir(&dir);
        let err = loader.load().unwrap_err();
        assert!(matches!(err, a2ascope_common::Error::Config(_)));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ensure_dirs_creates_expected_subdirectories() {
        let dir = temp_dir("ensure-dirs");
        let loader = ConfigLoader::with_dir(&dir);

        loader.ensure_dirs().expect("ensure_dirs should succeed");

        assert!(dir.exists());
        assert!(dir.join("exports").exists());

        let _ = fs::remove_dir_all(dir);
    }
}
