//! Agent configuration stored in `verssa.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "verssa.toml";

pub const USERNAME_ENV: &str = "VERSSA_USERNAME";
pub const PASSWORD_ENV: &str = "VERSSA_PASSWORD";

const PLACEHOLDER_PASSWORD: &str = "fix_me";

/// Agent configuration (TOML).
///
/// Edited by operators. Missing fields fall back to the defaults of the
/// production deployment, so an empty file is valid apart from credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// JSON table of tracked jobs.
    pub state_path: PathBuf,

    /// Well-known path of the single-instance lock file.
    pub lock_path: PathBuf,

    /// Size-rotated log file. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Local directory that mirrors the data store (logical paths resolve under it).
    pub storage_root: PathBuf,

    pub collections: CollectionsConfig,
    pub terrain: TerrainConfig,
    pub validation: ValidationConfig,
    pub notify: NotifyConfig,

    /// File extension (lower-case, no dot) to analysis app binding.
    pub handlers: BTreeMap<String, HandlerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectionsConfig {
    /// Collection scanned for newly uploaded files.
    pub incoming: String,
    /// Destination for files whose jobs completed.
    pub completed: String,
    /// Output directory passed to every submitted job.
    pub analyses: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            incoming: "/iplant/home/shared/ssa-arizona/demo/incoming".to_string(),
            completed: "/iplant/home/shared/ssa-arizona/demo/data".to_string(),
            analyses: "/iplant/home/shared/ssa-arizona/demo/analyses".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerrainConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout for every remote call.
    pub timeout_secs: u64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            base_url: "https://de.cyverse.org/terrain".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Collection whose sub-collections hold uploaded observation files.
    pub root: String,
    /// Name of the quarantine sub-collection under `root`.
    pub quarantine: String,
}

impl ValidationConfig {
    pub fn quarantine_collection(&self) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), self.quarantine)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            root: "/iplant/home/shared/phantom_echoes/phantom_echoes_MEV1".to_string(),
            quarantine: "validation_failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Sendmail-compatible command that reads a full message on stdin.
    pub command: Vec<String>,
    pub from: String,
    /// No summary is sent when empty.
    pub recipients: Vec<String>,
    pub subject: String,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            command: vec!["sendmail".to_string(), "-t".to_string()],
            from: "verssa-validation@localhost".to_string(),
            recipients: Vec::new(),
            subject: "VERSSA validation failures".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Remote analysis app bound to one file extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Search term that uniquely identifies the app.
    pub app_search: String,
    /// Name given to every submitted analysis.
    pub job_name: String,
}

pub fn default_handlers() -> BTreeMap<String, HandlerConfig> {
    BTreeMap::from([
        (
            "qmg".to_string(),
            HandlerConfig {
                app_search: "Quaternion Classifier (Verssa)".to_string(),
                job_name: "QuaternionClassifierAutomation".to_string(),
            },
        ),
        (
            "pmg2".to_string(),
            HandlerConfig {
                app_search: "Power State Classifier (Verssa)".to_string(),
                job_name: "PowerStateClassifierAutomation".to_string(),
            },
        ),
    ])
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("verssa-state.json"),
            lock_path: PathBuf::from("singleton.lock"),
            log_file: Some(PathBuf::from("verssa-automation.log")),
            log_level: "info".to_string(),
            storage_root: PathBuf::from("/mnt/datastore"),
            collections: CollectionsConfig::default(),
            terrain: TerrainConfig::default(),
            validation: ValidationConfig::default(),
            notify: NotifyConfig::default(),
            handlers: default_handlers(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.terrain.base_url.trim().is_empty() {
            return Err(anyhow!("terrain.base_url must be set"));
        }
        if self.terrain.timeout_secs == 0 {
            return Err(anyhow!("terrain.timeout_secs must be > 0"));
        }
        if self.terrain.password.contains(PLACEHOLDER_PASSWORD) {
            return Err(anyhow!(
                "terrain.password still holds the placeholder; set it or export {PASSWORD_ENV}"
            ));
        }
        for (collection, label) in [
            (&self.collections.incoming, "collections.incoming"),
            (&self.collections.completed, "collections.completed"),
            (&self.validation.root, "validation.root"),
        ] {
            if !collection.starts_with('/') {
                return Err(anyhow!("{label} must be an absolute collection path"));
            }
        }
        if self.validation.quarantine.is_empty() || self.validation.quarantine.contains('/') {
            return Err(anyhow!("validation.quarantine must be a single collection name"));
        }
        for (ext, handler) in &self.handlers {
            if ext.is_empty() || ext.contains('.') || *ext != ext.to_ascii_lowercase() {
                return Err(anyhow!(
                    "handler key {ext:?} must be a lower-case extension without a dot"
                ));
            }
            if handler.app_search.trim().is_empty() || handler.job_name.trim().is_empty() {
                return Err(anyhow!("handlers.{ext} needs app_search and job_name"));
            }
        }
        if !self.notify.recipients.is_empty() {
            if self.notify.command.is_empty() || self.notify.command[0].trim().is_empty() {
                return Err(anyhow!("notify.command must be a non-empty array"));
            }
            if self.notify.timeout_secs == 0 {
                return Err(anyhow!("notify.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    /// Overlay credentials supplied outside the config file.
    pub fn apply_credentials(&mut self, username: Option<String>, password: Option<String>) {
        if let Some(username) = username.filter(|value| !value.is_empty()) {
            self.terrain.username = username;
        }
        if let Some(password) = password.filter(|value| !value.is_empty()) {
            self.terrain.password = password;
        }
    }
}

/// Load config from a TOML file, overlaying credentials from the environment.
///
/// If the file is missing, starts from `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "config missing, using defaults");
        AgentConfig::default()
    };
    cfg.apply_credentials(
        std::env::var(USERNAME_ENV).ok(),
        std::env::var(PASSWORD_ENV).ok(),
    );
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
