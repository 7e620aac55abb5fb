//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ff_client::MessageSettings;
use ff_core::SystemClock;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Offset added to wall time, used to fast-forward day boundaries.
    pub clock_offset_secs: i64,
    /// Bound on every external call.
    pub http_timeout_secs: u64,
    pub notification_url: Option<String>,
    pub notification_token: Option<String>,
    /// Receives all outreach mail instead of contributors when set.
    pub notification_redirect: Option<String>,
    pub link_prefix: String,
    pub outreach_interval_secs: u64,
    pub analysis_url: Option<String>,
    pub payout_url: Option<String>,
    pub payout_username: String,
    pub payout_password: Option<String>,
    pub payment_url: Option<String>,
    pub payment_token: Option<String>,
}

fn redacted(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| "[REDACTED]")
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("clock_offset_secs", &self.clock_offset_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("notification_url", &self.notification_url)
            .field("notification_token", &redacted(self.notification_token.as_ref()))
            .field("notification_redirect", &self.notification_redirect)
            .field("link_prefix", &self.link_prefix)
            .field("outreach_interval_secs", &self.outreach_interval_secs)
            .field("analysis_url", &self.analysis_url)
            .field("payout_url", &self.payout_url)
            .field("payout_username", &self.payout_username)
            .field("payout_password", &redacted(self.payout_password.as_ref()))
            .field("payment_url", &self.payment_url)
            .field("payment_token", &redacted(self.payment_token.as_ref()))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("ffs.db"),
            clock_offset_secs: 0,
            http_timeout_secs: 10,
            notification_url: None,
            notification_token: None,
            notification_redirect: None,
            link_prefix: "http://localhost:8080".to_string(),
            outreach_interval_secs: 7 * 24 * 60 * 60,
            analysis_url: None,
            payout_url: None,
            payout_username: "admin".to_string(),
            payout_password: None,
            payment_url: None,
            payment_token: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, `~/.config/ffs/config.toml`, the given
    /// file, then `FFS_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("FFS_"));

        figment.extract()
    }

    pub fn clock(&self) -> SystemClock {
        SystemClock::with_offset_secs(self.clock_offset_secs)
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn message_settings(&self) -> MessageSettings {
        MessageSettings {
            link_prefix: self.link_prefix.clone(),
            redirect: self.notification_redirect.clone(),
            outreach_interval_secs: self.outreach_interval_secs,
        }
    }
}

/// Returns the platform-specific config directory for ffs.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ffs"))
}

/// Returns the platform-specific data directory for ffs.
///
/// On Linux: `~/.local/share/ffs`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ffs"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("ffs.db"));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert_eq!(config.outreach_interval_secs, 604_800);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            database_path = "/tmp/other.db"
            clock_offset_secs = 86400
            notification_redirect = "qa@example.com"
            "#
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.clock_offset_secs, 86_400);
        assert_eq!(
            config.message_settings().redirect.as_deref(),
            Some("qa@example.com")
        );
        assert_eq!(config.link_prefix, "http://localhost:8080");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = Config {
            notification_token: Some("tok-secret".to_string()),
            payout_password: Some("pw-secret".to_string()),
            payment_token: Some("pay-secret".to_string()),
            ..Config::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
