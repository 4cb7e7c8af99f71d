//! Configuration types.
//!
//! Settings are resolved from three layers, highest precedence first:
//! 1. Overrides (`MAILPOST_*` environment variables, the invocation layer)
//! 2. An optional JSON file named by `MAILPOST_CONFIG`
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::mailbox::Protocol;

/// Default mail host when nothing else is configured.
pub const DEFAULT_HOST: &str = "mail.yourhost.com";

/// Default socket read/write timeout for mailbox sessions.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const DEFAULT_DB_PATH: &str = "./data/mailpost.db";
const DEFAULT_SMTP_PORT: u16 = 587;

// ── Resolved settings ───────────────────────────────────────────────

/// PEM files used to present a client certificate over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
}

/// Immutable mailbox connection descriptor for one run.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// TLS explicitly requested.
    pub tls: bool,
    pub client_auth: Option<ClientAuth>,
    /// Socket read/write timeout; expiry surfaces as a connection error.
    pub timeout: Duration,
}

impl MailboxConfig {
    /// TLS is used when requested or when a client key/certificate pair is supplied.
    pub fn uses_tls(&self) -> bool {
        self.tls || self.client_auth.is_some()
    }
}

/// Outbound SMTP settings for acknowledgements.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Site identity used when telling authors where their article lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInfo {
    pub name: String,
    pub domain: String,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            name: "example.com".to_string(),
            domain: "example.com".to_string(),
        }
    }
}

/// Per-run ingestion behavior.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Email the author once their article is created.
    pub acknowledge: bool,
    /// Create articles as active instead of waiting for review.
    pub autopost: bool,
    /// Configured default markup kind, validated at the start of each run.
    pub markup: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mailbox: MailboxConfig,
    pub options: IngestOptions,
    pub db_path: PathBuf,
    pub site: SiteInfo,
    pub smtp: Option<SmtpConfig>,
}

// ── Layers ──────────────────────────────────────────────────────────

/// One configuration layer. Every field is optional; unset fields fall
/// through to the next layer.
///
/// Field names follow the file format (`user`, `ssl`, `keyfile`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsLayer {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub keyfile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub acknowledge: Option<bool>,
    pub autopost: Option<bool>,
    pub markup: Option<String>,
    pub db_path: Option<PathBuf>,
    pub site_name: Option<String>,
    pub site_domain: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl SettingsLayer {
    /// Load a layer from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Build the override layer from `MAILPOST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the override layer from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| text(key).map(|v| parse_bool(key, &v)).transpose();
        let port = |key: &str| text(key).map(|v| parse_port(key, &v)).transpose();

        let timeout_secs = text("MAILPOST_TIMEOUT_SECS")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "MAILPOST_TIMEOUT_SECS".into(),
                        message: e.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            protocol: text("MAILPOST_PROTOCOL"),
            host: text("MAILPOST_HOST"),
            port: port("MAILPOST_PORT")?,
            user: text("MAILPOST_USERNAME"),
            password: text("MAILPOST_PASSWORD"),
            ssl: flag("MAILPOST_SSL")?,
            keyfile: text("MAILPOST_KEYFILE").map(PathBuf::from),
            certfile: text("MAILPOST_CERTFILE").map(PathBuf::from),
            timeout_secs,
            acknowledge: flag("MAILPOST_ACKNOWLEDGE")?,
            autopost: flag("MAILPOST_AUTOPOST")?,
            markup: text("MAILPOST_MARKUP"),
            db_path: text("MAILPOST_DB_PATH").map(PathBuf::from),
            site_name: text("MAILPOST_SITE_NAME"),
            site_domain: text("MAILPOST_SITE_DOMAIN"),
            smtp_host: text("MAILPOST_SMTP_HOST"),
            smtp_port: port("MAILPOST_SMTP_PORT")?,
            smtp_username: text("MAILPOST_SMTP_USERNAME"),
            smtp_password: text("MAILPOST_SMTP_PASSWORD"),
            smtp_from: text("MAILPOST_SMTP_FROM"),
        })
    }

    /// Merge two layers; values in `self` win over `lower`.
    pub fn over(self, lower: Self) -> Self {
        Self {
            protocol: self.protocol.or(lower.protocol),
            host: self.host.or(lower.host),
            port: self.port.or(lower.port),
            user: self.user.or(lower.user),
            password: self.password.or(lower.password),
            ssl: self.ssl.or(lower.ssl),
            keyfile: self.keyfile.or(lower.keyfile),
            certfile: self.certfile.or(lower.certfile),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            acknowledge: self.acknowledge.or(lower.acknowledge),
            autopost: self.autopost.or(lower.autopost),
            markup: self.markup.or(lower.markup),
            db_path: self.db_path.or(lower.db_path),
            site_name: self.site_name.or(lower.site_name),
            site_domain: self.site_domain.or(lower.site_domain),
            smtp_host: self.smtp_host.or(lower.smtp_host),
            smtp_port: self.smtp_port.or(lower.smtp_port),
            smtp_username: self.smtp_username.or(lower.smtp_username),
            smtp_password: self.smtp_password.or(lower.smtp_password),
            smtp_from: self.smtp_from.or(lower.smtp_from),
        }
    }
}

impl Settings {
    /// Resolve settings from the environment and the optional config file.
    pub fn load() -> Result<Self, ConfigError> {
        let overrides = SettingsLayer::from_env()?;
        let file = match std::env::var("MAILPOST_CONFIG") {
            Ok(path) if !path.trim().is_empty() => SettingsLayer::from_file(Path::new(&path))?,
            _ => SettingsLayer::default(),
        };
        Self::resolve(overrides.over(file))
    }

    /// Apply built-in defaults to a merged layer.
    pub fn resolve(layer: SettingsLayer) -> Result<Self, ConfigError> {
        let protocol = match layer.protocol.as_deref() {
            Some(p) => p.parse::<Protocol>().map_err(|message| ConfigError::InvalidValue {
                key: "protocol".into(),
                message,
            })?,
            None => Protocol::Imap4,
        };

        let client_auth = match (layer.keyfile, layer.certfile) {
            (Some(key_file), Some(cert_file)) => Some(ClientAuth {
                key_file,
                cert_file,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "keyfile/certfile".into(),
                    message: "a client key and certificate must be supplied together".into(),
                });
            }
        };

        let tls = layer.ssl.unwrap_or(false);
        let uses_tls = tls || client_auth.is_some();

        let mailbox = MailboxConfig {
            protocol,
            host: layer.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: layer.port.unwrap_or_else(|| protocol.default_port(uses_tls)),
            username: layer.user.unwrap_or_default(),
            password: SecretString::from(layer.password.unwrap_or_default()),
            tls,
            client_auth,
            timeout: Duration::from_secs(layer.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        let options = IngestOptions {
            acknowledge: layer.acknowledge.unwrap_or(false),
            autopost: layer.autopost.unwrap_or(false),
            markup: layer.markup,
        };

        let defaults = SiteInfo::default();
        let site = SiteInfo {
            name: layer.site_name.unwrap_or(defaults.name),
            domain: layer.site_domain.unwrap_or(defaults.domain),
        };

        let smtp = layer.smtp_host.map(|host| {
            let username = layer.smtp_username.unwrap_or_default();
            SmtpConfig {
                host,
                port: layer.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
                from_address: layer.smtp_from.unwrap_or_else(|| username.clone()),
                username,
                password: SecretString::from(layer.smtp_password.unwrap_or_default()),
            }
        });

        if options.acknowledge && smtp.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "smtp_host".into(),
                hint: "Acknowledgements are enabled but no SMTP host is configured.".into(),
            });
        }

        Ok(Self {
            mailbox,
            options,
            db_path: layer
                .db_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            site,
            smtp,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
