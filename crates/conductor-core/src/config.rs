//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 8787;
const DEFAULT_CLEANUP_DELAY_SECS: u64 = 300;

/// Top-level Conductor configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integrations: Vec<IntegrationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allowed CORS origins. Empty means permissive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding one subdirectory per execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Where uploaded attachments are stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<String>,

    /// Project checkouts live at `<source_root>/<project_id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,

    /// Seconds to keep a finished workspace around before deleting it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_delay_secs: Option<u64>,
}

/// Settings for the Claude Code CLI collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
}

/// A stored integration credential, looked up by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub id: String,
    /// Provider key, e.g. "github" or "jira".
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Provider-specific settings (site URL, workspace, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl IntegrationConfig {
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "plain" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Extra `target=level` directives.
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

fn expand_home(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted)
            .map_err(|e| crate::error::ConductorError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn bind_address(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn cors_origins(&self) -> &[String] {
        self.server
            .as_ref()
            .map(|s| s.cors_origins.as_slice())
            .unwrap_or_default()
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .as_ref()
            .and_then(|w| w.root.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| data_dir().join("workspaces"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.workspace
            .as_ref()
            .and_then(|w| w.uploads_dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| data_dir().join("uploads"))
    }

    /// Checkout directory for a project, when a source root is configured.
    pub fn project_source_dir(&self, project_id: &str) -> Option<PathBuf> {
        self.workspace
            .as_ref()
            .and_then(|w| w.source_root.as_deref())
            .map(|root| expand_home(root).join(project_id))
    }

    pub fn cleanup_delay(&self) -> std::time::Duration {
        let secs = self
            .workspace
            .as_ref()
            .and_then(|w| w.cleanup_delay_secs)
            .unwrap_or(DEFAULT_CLEANUP_DELAY_SECS);
        std::time::Duration::from_secs(secs)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions
            .as_ref()
            .and_then(|s| s.dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| data_dir().join("sessions"))
    }

    pub fn llm_cli_path(&self) -> String {
        self.llm
            .as_ref()
            .and_then(|l| l.cli_path.clone())
            .unwrap_or_else(|| "claude".to_string())
    }

    pub fn integration(&self, id: &str) -> Option<&IntegrationConfig> {
        self.integrations.iter().find(|i| i.id == id)
    }

    /// Look up a config value by dotted path (e.g. `server.port`).
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        for integration in &self.integrations {
            if integration.resolve_token().is_none() {
                warnings.push(format!(
                    "Integration '{}' ({}) has no token configured",
                    integration.id, integration.provider
                ));
            }
        }

        if let Some(root) = self.workspace.as_ref().and_then(|w| w.source_root.as_deref()) {
            if !expand_home(root).exists() {
                warnings.push(format!("Source root does not exist: {root}"));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Conductor data: `~/.conductor/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conductor")
}
