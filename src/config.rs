use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::imap::Timeouts;
use crate::ingest::DEFAULT_LIMIT;
use crate::keyring;
use crate::models::MailboxAccount;
use crate::store::StoreHandle;
use crate::triage::TriageConfig;

// ---------------------------------------------------------------------------
// AccountId — stable UUIDv4 per account
// ---------------------------------------------------------------------------

pub type AccountId = String;

pub fn new_account_id() -> AccountId {
    uuid::Uuid::new_v4().to_string()
}

/// Synthetic ID for the env-var account (stable across restarts).
pub const ENV_ACCOUNT_ID: &str = "env-account";

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 587;

// ---------------------------------------------------------------------------
// On-disk config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum PasswordBackend {
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "plaintext")]
    Plaintext { value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccountConfig {
    pub id: AccountId,
    pub label: String,
    pub address: String,
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Login name; the address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password: PasswordBackend,
}

impl FileAccountConfig {
    pub fn login(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: PasswordBackend,
    /// Sender mailbox; the username when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default = "default_true")]
    pub use_starttls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl IngestConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            command: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_connect_timeout() -> u64 {
    Timeouts::default().connect.as_secs()
}

fn default_command_timeout() -> u64 {
    Timeouts::default().command.as_secs()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub accounts: Vec<FileAccountConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<FileSmtpConfig>,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inbox-triage")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

impl FileConfig {
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&config_path())
    }

    /// `Ok(None)` when no file exists at `path`.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path).map_err(|e| Error::Config(format!("read config: {e}")))?;
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Config(format!("create config dir: {e}")))?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
        fs::write(path, data).map_err(|e| Error::Config(format!("write config: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Runtime config (resolved passwords, ready to use)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub use_starttls: bool,
}

impl SmtpConfig {
    fn from_file(file: &FileSmtpConfig) -> Result<Self> {
        let password = resolve_password(&file.password, &file.username, &file.server)
            .map_err(|e| Error::Config(format!("SMTP password for {}: {e}", file.username)))?;
        Ok(SmtpConfig {
            server: file.server.clone(),
            port: file.port,
            username: file.username.clone(),
            password,
            from: file.from.clone().unwrap_or_else(|| file.username.clone()),
            use_starttls: file.use_starttls,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: Vec<MailboxAccount>,
    /// Absent when notices are not configured.
    pub smtp: Option<SmtpConfig>,
    pub triage: TriageConfig,
    pub ingest: IngestConfig,
    /// Holds `store.db` and the attachment blobs.
    pub data_dir: PathBuf,
}

impl Config {
    /// Environment variables first, then the config file.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with(|key| std::env::var(key).ok(), &config_path())
    }

    pub fn resolve_with(env: impl Fn(&str) -> Option<String>, path: &Path) -> Result<Self> {
        if let Some(config) = Self::from_env(&env) {
            log::info!("Config loaded from environment variables");
            return Ok(config);
        }
        match FileConfig::load_from(path)? {
            Some(file) => Self::from_file(file),
            None => Err(Error::Config(format!(
                "no INBOX_TRIAGE_* variables and no config at {}",
                path.display()
            ))),
        }
    }

    /// `None` if any required variable is missing.
    fn from_env(env: &impl Fn(&str) -> Option<String>) -> Option<Self> {
        let server = env("INBOX_TRIAGE_SERVER")?;
        let username = env("INBOX_TRIAGE_USER")?;
        let password = env("INBOX_TRIAGE_PASSWORD")?;
        let port = env("INBOX_TRIAGE_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_IMAP_PORT);
        let smtp = SmtpConfig {
            server: env("INBOX_TRIAGE_SMTP_SERVER").unwrap_or_else(|| server.clone()),
            port: env("INBOX_TRIAGE_SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            username: username.clone(),
            password: password.clone(),
            from: username.clone(),
            use_starttls: true,
        };
        Some(Config {
            accounts: vec![MailboxAccount {
                id: ENV_ACCOUNT_ID.to_string(),
                label: username.clone(),
                address: username.clone(),
                username,
                password,
                host: server,
                port,
            }],
            smtp: Some(smtp),
            triage: TriageConfig::default(),
            ingest: IngestConfig::default(),
            data_dir: StoreHandle::default_dir(),
        })
    }

    fn from_file(file: FileConfig) -> Result<Self> {
        let mut accounts = Vec::new();
        for fac in &file.accounts {
            match resolve_password(&fac.password, fac.login(), &fac.server) {
                Ok(password) => accounts.push(MailboxAccount {
                    id: fac.id.clone(),
                    label: fac.label.clone(),
                    address: fac.address.clone(),
                    username: fac.login().to_string(),
                    password,
                    host: fac.server.clone(),
                    port: fac.port,
                }),
                // Skipped; the others still ingest.
                Err(e) => log::warn!("Failed to resolve password for account '{}': {e}", fac.label),
            }
        }
        if accounts.is_empty() && !file.accounts.is_empty() {
            return Err(Error::Config("no account password could be resolved".into()));
        }

        let smtp = file.smtp.as_ref().map(SmtpConfig::from_file).transpose()?;
        Ok(Config {
            accounts,
            smtp,
            triage: file.triage,
            ingest: file.ingest,
            data_dir: file.data_dir.unwrap_or_else(StoreHandle::default_dir),
        })
    }

    pub fn account(&self, id: &str) -> Option<&MailboxAccount> {
        self.accounts.iter().find(|a| a.id == id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_password(
    backend: &PasswordBackend,
    username: &str,
    server: &str,
) -> std::result::Result<String, String> {
    match backend {
        PasswordBackend::Plaintext { value } => Ok(value.clone()),
        PasswordBackend::Keyring => keyring::get_password(username, server),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn plaintext(value: &str) -> PasswordBackend {
        PasswordBackend::Plaintext {
            value: value.into(),
        }
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let json = r#"{
            "accounts": [{
                "id": "a1",
                "label": "Work",
                "address": "me@company.com",
                "server": "imap.company.com",
                "password": {"backend": "plaintext", "value": "pw"}
            }]
        }"#;
        let file: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(file.accounts[0].port, 993);
        assert_eq!(file.accounts[0].login(), "me@company.com");
        assert_eq!(file.ingest, IngestConfig::default());
        assert_eq!(file.ingest.limit, 20);
        assert_eq!(file.triage.internal_domain, "company.com");
        assert!(file.smtp.is_none());

        let timeouts = file.ingest.timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(30));
        assert_eq!(timeouts.command, Duration::from_secs(60));
    }

    #[test]
    fn env_account_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        FileConfig::default().save_to(&path).unwrap();

        let vars: HashMap<&str, &str> = [
            ("INBOX_TRIAGE_SERVER", "imap.example.org"),
            ("INBOX_TRIAGE_USER", "ops@example.org"),
            ("INBOX_TRIAGE_PASSWORD", "hunter2"),
            ("INBOX_TRIAGE_SMTP_PORT", "2525"),
        ]
        .into_iter()
        .collect();
        let config =
            Config::resolve_with(|k| vars.get(k).map(|v| v.to_string()), &path).unwrap();

        let account = config.account(ENV_ACCOUNT_ID).unwrap();
        assert_eq!(account.host, "imap.example.org");
        assert_eq!(account.port, 993);
        assert_eq!(account.password, "hunter2");
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.server, "imap.example.org");
        assert_eq!(smtp.port, 2525);
    }

    #[test]
    fn partial_env_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let file = FileConfig {
            accounts: vec![FileAccountConfig {
                id: "a1".into(),
                label: "Work".into(),
                address: "me@company.com".into(),
                server: "imap.company.com".into(),
                port: 143,
                username: Some("me".into()),
                password: plaintext("pw"),
            }],
            smtp: Some(FileSmtpConfig {
                server: "smtp.company.com".into(),
                port: 587,
                username: "tasks@company.com".into(),
                password: plaintext("smtp-pw"),
                from: None,
                use_starttls: true,
            }),
            data_dir: Some(dir.path().join("data")),
            ..FileConfig::default()
        };
        file.save_to(&path).unwrap();

        let env = |k: &str| (k == "INBOX_TRIAGE_SERVER").then(|| "ignored".to_string());
        let config = Config::resolve_with(env, &path).unwrap();
        let account = config.account("a1").unwrap();
        assert_eq!(account.username, "me");
        assert_eq!(account.port, 143);
        assert_eq!(account.password, "pw");
        assert_eq!(config.smtp.unwrap().from, "tasks@company.com");
        assert_eq!(config.data_dir, dir.path().join("data"));
    }

    #[test]
    fn missing_and_malformed_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(FileConfig::load_from(&path).unwrap().is_none());
        assert!(matches!(Config::resolve_with(no_env, &path), Err(Error::Config(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(FileConfig::load_from(&path), Err(Error::Config(_))));
    }
}
