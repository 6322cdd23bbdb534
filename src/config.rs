//! Engine configuration.
//!
//! Built once (usually from the environment) and injected into the engine
//! at construction; there is no global mutable state. Presence of the
//! transmission credential is the dry-run/live toggle.

use tracing::warn;

use crate::personalization::DEFAULT_SEND_HOUR;

/// Env var holding the transmission credential. Absent = dry-run mode.
pub const API_KEY_ENV: &str = "MAILROOM_API_KEY";
/// Env var overriding the default from address.
pub const FROM_ENV: &str = "MAILROOM_FROM";
/// Env var overriding the provider base URL.
pub const BASE_URL_ENV: &str = "MAILROOM_BASE_URL";
/// Env var with comma-separated admin notification recipients.
pub const ADMIN_EMAILS_ENV: &str = "MAILROOM_ADMIN_EMAILS";

/// Role looked up in the directory when no admin emails are configured.
pub const ADMIN_ROLE: &str = "admin";

const DEFAULT_FROM: &str = "noreply@example.com";
const DEFAULT_BASE_URL: &str = "https://api.resend.com";

/// Directory of platform users, used as the database-backed fallback for
/// admin notification recipients. Owned by an external collaborator.
pub trait AdminDirectory: Send + Sync {
    /// Email addresses of users holding the given role.
    fn emails_for_role(&self, role: &str) -> Vec<String>;
}

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transmission credential; `None` switches the mailer to dry-run
    pub api_key: Option<String>,
    /// Default sender address
    pub from_address: String,
    /// Transmission-provider base URL
    pub base_url: String,
    /// Admin notification recipients from configuration
    pub admin_recipients: Vec<String>,
    /// Fallback send hour for recipients without a learned profile
    pub default_send_hour: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from_address: DEFAULT_FROM.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            admin_recipients: Vec::new(),
            default_send_hour: DEFAULT_SEND_HOUR,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: read_env(API_KEY_ENV),
            from_address: read_env(FROM_ENV).unwrap_or(defaults.from_address),
            base_url: read_env(BASE_URL_ENV).unwrap_or(defaults.base_url),
            admin_recipients: read_env(ADMIN_EMAILS_ENV)
                .map(|raw| parse_email_list(&raw))
                .unwrap_or_default(),
            default_send_hour: defaults.default_send_hour,
        }
    }

    /// Whether the mailer will run in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.api_key.is_none()
    }

    /// Admin notification recipients, consulting the directory for users
    /// holding the admin role when none are configured.
    pub fn admin_recipients_or(&self, directory: &dyn AdminDirectory) -> Vec<String> {
        if !self.admin_recipients.is_empty() {
            return self.admin_recipients.clone();
        }
        let from_directory = directory.emails_for_role(ADMIN_ROLE);
        if from_directory.is_empty() {
            warn!("no admin notification recipients configured or found in directory");
        }
        from_directory
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
