//! Configuration file parser for ~/.config/newsportal/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Every section uses `#[serde(default)]`, so any subset of keys can be given.
//! Unknown top-level keys are accepted but logged as likely typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable that overrides `mail.smtp_password`
pub const SMTP_PASSWORD_ENV: &str = "NEWSPORTAL_SMTP_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but a value is out of range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Public base URL used for absolute links in notification emails.
    pub site_url: String,
    pub rate_limit: RateLimitConfig,
    pub notifications: NotificationConfig,
    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8000".to_string(),
            rate_limit: RateLimitConfig::default(),
            notifications: NotificationConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Posts an author may create within one window.
    pub max_posts: u32,
    /// Trailing window length in hours.
    pub window_hours: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_posts: 3,
            window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Characters of post text included in the email preview.
    pub preview_chars: usize,
    /// Upper bound on a single mail dispatch.
    pub dispatch_timeout_secs: u64,
    /// Addresses that receive post edit and deletion notices.
    pub managers: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            preview_chars: 124,
            dispatch_timeout_secs: 5,
            managers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailBackend {
    /// Log messages instead of sending them
    Console,
    Smtp,
    /// POST messages as JSON to an HTTP mail relay
    Http,
}

/// Outgoing mail settings.
///
/// Custom Debug impl masks `smtp_password` to keep it out of logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub backend: MailBackend,
    /// Sender address for every outgoing message.
    pub from_address: String,
    pub smtp_host: Option<String>,
    /// Implicit TLS port by default.
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    /// Prefer the NEWSPORTAL_SMTP_PASSWORD env var, which takes precedence.
    pub smtp_password: Option<String>,
    pub relay_url: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: MailBackend::Console,
            from_address: "noreply@newsportal.local".to_string(),
            smtp_host: None,
            smtp_port: 465,
            smtp_user: None,
            smtp_password: None,
            relay_url: None,
        }
    }
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("backend", &self.backend)
            .field("from_address", &self.from_address)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("relay_url", &self.relay_url)
            .finish()
    }
}

impl MailConfig {
    /// SMTP password, env var first, then config file.
    pub fn smtp_password(&self) -> Option<SecretString> {
        std::env::var(SMTP_PASSWORD_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.smtp_password.clone())
            .map(SecretString::from)
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = ?config.mail.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["site_url", "rate_limit", "notifications", "mail"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_posts == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_posts must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_hours == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_hours must be at least 1".into(),
            ));
        }
        if self.notifications.dispatch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "notifications.dispatch_timeout_secs must be at least 1".into(),
            ));
        }
        crate::util::parse_site_url(&self.site_url)
            .map_err(|e| ConfigError::Invalid(format!("site_url: {}", e)))?;

        match self.mail.backend {
            MailBackend::Smtp if self.mail.smtp_host.is_none() => Err(ConfigError::Invalid(
                "mail.smtp_host is required for the smtp backend".into(),
            )),
            MailBackend::Http if self.mail.relay_url.is_none() => Err(ConfigError::Invalid(
                "mail.relay_url is required for the http backend".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_url, "http://localhost:8000");
        assert_eq!(config.rate_limit.max_posts, 3);
        assert_eq!(config.rate_limit.window_hours, 24);
        assert_eq!(config.notifications.preview_chars, 124);
        assert_eq!(config.notifications.dispatch_timeout_secs, 5);
        assert!(config.notifications.managers.is_empty());
        assert_eq!(config.mail.backend, MailBackend::Console);
        assert_eq!(config.mail.smtp_port, 465);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/newsportal_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.rate_limit.max_posts, 3);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("newsportal_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "  \n ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.site_url, "http://localhost:8000");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("[rate_limit]\nmax_posts = 5\n").unwrap();
        assert_eq!(config.rate_limit.max_posts, 5);
        assert_eq!(config.rate_limit.window_hours, 24);
        assert_eq!(config.notifications.preview_chars, 124);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
site_url = "https://news.example.com"

[rate_limit]
max_posts = 10
window_hours = 12

[notifications]
preview_chars = 50
dispatch_timeout_secs = 3
managers = ["editor@example.com"]

[mail]
backend = "smtp"
from_address = "portal@example.com"
smtp_host = "smtp.example.com"
smtp_port = 587
smtp_user = "portal"
smtp_password = "hunter2"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.site_url, "https://news.example.com");
        assert_eq!(config.rate_limit.max_posts, 10);
        assert_eq!(config.rate_limit.window_hours, 12);
        assert_eq!(config.notifications.preview_chars, 50);
        assert_eq!(config.notifications.managers, vec!["editor@example.com"]);
        assert_eq!(config.mail.backend, MailBackend::Smtp);
        assert_eq!(config.mail.smtp_host.as_deref(), Some("smtp.example.com"));
        assert_eq!(config.mail.smtp_port, 587);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("totally_fake_key = 1\nsite_url = \"https://a.com\"\n").unwrap();
        assert_eq!(config.site_url, "https://a.com");
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = Config::parse("[rate_limit]\nmax_posts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::parse("[rate_limit]\nwindow_hours = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::parse("[notifications]\ndispatch_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_site_url_rejected() {
        let err = Config::parse("site_url = \"ftp://example.com\"\n").unwrap_err();
        assert!(err.to_string().contains("site_url"));
    }

    #[test]
    fn test_backend_requirements() {
        let err = Config::parse("[mail]\nbackend = \"smtp\"\n").unwrap_err();
        assert!(err.to_string().contains("smtp_host"));

        let err = Config::parse("[mail]\nbackend = \"http\"\n").unwrap_err();
        assert!(err.to_string().contains("relay_url"));

        let err = Config::parse("[mail]\nbackend = \"pigeon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("newsportal_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_smtp_password() {
        let mut config = Config::default();
        config.mail.smtp_password = Some("super-secret-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
