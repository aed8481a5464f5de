use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use crate::db::models::OwnerProfile;

/// Runtime configuration of the tracker core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub default_user_name: String,
    pub default_user_email: String,
    pub default_user_timezone: String,
    pub default_user_avatar_url: Option<String>,
    pub query_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("zenlist.sqlite3"),
            default_user_name: "ZenList User".into(),
            default_user_email: "user@zenlist.local".into(),
            default_user_timezone: "UTC".into(),
            default_user_avatar_url: None,
            query_timeout_ms: 3_000,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse().ok())
}

impl ServiceConfig {
    /// Reads a JSON config file. A missing file yields the defaults; missing
    /// keys fall back individually.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DATABASE_PATH`, `DEFAULT_USER_*` and
    /// `QUERY_TIMEOUT_MS`. Blank or unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env_string("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            default_user_name: env_string("DEFAULT_USER_NAME").unwrap_or(defaults.default_user_name),
            default_user_email: env_string("DEFAULT_USER_EMAIL")
                .unwrap_or(defaults.default_user_email),
            default_user_timezone: env_string("DEFAULT_USER_TIMEZONE")
                .unwrap_or(defaults.default_user_timezone),
            default_user_avatar_url: env_string("DEFAULT_USER_AVATAR_URL"),
            query_timeout_ms: env_parsed("QUERY_TIMEOUT_MS").unwrap_or(defaults.query_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            bail!("databasePath must not be empty");
        }
        for (field, value) in [
            ("defaultUserName", &self.default_user_name),
            ("defaultUserEmail", &self.default_user_email),
            ("defaultUserTimezone", &self.default_user_timezone),
        ] {
            if value.trim().is_empty() {
                bail!("{field} must not be empty");
            }
        }
        if self.query_timeout_ms == 0 {
            bail!("queryTimeoutMs must be greater than zero");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Normalized profile of the owner created on first use.
    pub fn default_owner(&self) -> OwnerProfile {
        OwnerProfile {
            name: self.default_user_name.trim().to_string(),
            email: self.default_user_email.trim().to_lowercase(),
            timezone: self.default_user_timezone.trim().to_string(),
            avatar_url: self
                .default_user_avatar_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("zenlist-config-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = scratch_dir("missing");
        let config = ServiceConfig::load(&dir.join("absent.json")).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.query_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = scratch_dir("partial");
        let path = dir.join("config.json");
        fs::write(&path, r#"{ "defaultUserEmail": "Me@Example.com", "queryTimeoutMs": 250 }"#)
            .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.query_timeout_ms, 250);
        assert_eq!(config.default_user_name, "ZenList User");
        assert_eq!(config.default_owner().email, "me@example.com");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = scratch_dir("invalid");
        let path = dir.join("config.json");
        fs::write(&path, r#"{ "queryTimeoutMs": 0 }"#).unwrap();
        assert!(ServiceConfig::load(&path).is_err());

        let blank = ServiceConfig {
            default_user_timezone: "  ".into(),
            ..ServiceConfig::default()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn blank_avatar_is_dropped() {
        let config = ServiceConfig {
            default_user_avatar_url: Some("   ".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(config.default_owner().avatar_url, None);
    }
}
