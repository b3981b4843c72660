//! Integration providers rendered as MCP server entries.
//!
//! The registry is an explicit table built at startup. Registering the same
//! provider id twice is an error, so conflicts surface before serving.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use conductor_core::config::IntegrationConfig;

use crate::credentials::CredentialStore;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Integration '{0}' is already registered")]
    Duplicate(String),

    #[error("Unknown integration provider: {0}")]
    UnknownProvider(String),

    #[error("No credentials configured for integration '{0}'")]
    MissingCredential(String),

    #[error("Credential lookup failed for '{id}': {source}")]
    CredentialLookup {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// How the coding agent reaches an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Http {
        #[serde(rename = "type")]
        transport: String,
        url: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// A third-party provider the agent can use through MCP.
pub trait Integration: Send + Sync {
    /// Provider key, e.g. "github".
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Render the MCP server entry for an access token and the record's settings.
    fn mcp_server(&self, token: &str, settings: &Map<String, Value>) -> McpServerConfig;
}

/// An MCP server launched as a local process.
pub struct StdioIntegration {
    id: &'static str,
    name: &'static str,
    command: &'static str,
    args: &'static [&'static str],
    token_env: &'static str,
    /// `(env var, settings key)` pairs copied from the integration record.
    settings_env: &'static [(&'static str, &'static str)],
}

impl Integration for StdioIntegration {
    fn id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        self.name
    }

    fn mcp_server(&self, token: &str, settings: &Map<String, Value>) -> McpServerConfig {
        let mut env = BTreeMap::new();
        env.insert(self.token_env.to_string(), token.to_string());
        for (var, key) in self.settings_env {
            if let Some(value) = settings.get(*key).and_then(Value::as_str) {
                env.insert(var.to_string(), value.to_string());
            }
        }
        McpServerConfig::Stdio {
            command: self.command.to_string(),
            args: self.args.iter().map(|a| a.to_string()).collect(),
            env,
        }
    }
}

/// A hosted MCP server authenticated with a bearer token.
pub struct HttpIntegration {
    id: &'static str,
    name: &'static str,
    url: &'static str,
}

impl Integration for HttpIntegration {
    fn id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        self.name
    }

    fn mcp_server(&self, token: &str, settings: &Map<String, Value>) -> McpServerConfig {
        let url = settings
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(self.url)
            .to_string();
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        McpServerConfig::Http {
            transport: "http".into(),
            url,
            headers,
        }
    }
}

/// The integrations shipped with Conductor.
pub fn builtin_integrations() -> Vec<Arc<dyn Integration>> {
    vec![
        Arc::new(HttpIntegration {
            id: "github",
            name: "GitHub",
            url: "https://api.githubcopilot.com/mcp/",
        }),
        Arc::new(StdioIntegration {
            id: "jira",
            name: "Jira",
            command: "uvx",
            args: &["mcp-atlassian"],
            token_env: "JIRA_API_TOKEN",
            settings_env: &[("JIRA_URL", "url"), ("JIRA_USERNAME", "username")],
        }),
        Arc::new(StdioIntegration {
            id: "notion",
            name: "Notion",
            command: "npx",
            args: &["-y", "@notionhq/notion-mcp-server"],
            token_env: "NOTION_TOKEN",
            settings_env: &[],
        }),
        Arc::new(StdioIntegration {
            id: "slack",
            name: "Slack",
            command: "npx",
            args: &["-y", "@modelcontextprotocol/server-slack"],
            token_env: "SLACK_BOT_TOKEN",
            settings_env: &[("SLACK_TEAM_ID", "team_id")],
        }),
        Arc::new(StdioIntegration {
            id: "datadog",
            name: "Datadog",
            command: "npx",
            args: &["-y", "@winor30/mcp-server-datadog"],
            token_env: "DATADOG_API_KEY",
            settings_env: &[("DATADOG_APP_KEY", "app_key"), ("DATADOG_SITE", "site")],
        }),
        Arc::new(HttpIntegration {
            id: "linear",
            name: "Linear",
            url: "https://mcp.linear.app/mcp",
        }),
        Arc::new(HttpIntegration {
            id: "sentry",
            name: "Sentry",
            url: "https://mcp.sentry.dev/mcp",
        }),
    ]
}

/// Registry of available integrations, keyed by provider id.
#[derive(Default)]
pub struct IntegrationRegistry {
    integrations: BTreeMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in integration.
    pub fn with_builtins() -> Result<Self, IntegrationError> {
        let mut registry = Self::new();
        for integration in builtin_integrations() {
            registry.register(integration)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, integration: Arc<dyn Integration>) -> Result<(), IntegrationError> {
        let id = integration.id().to_string();
        if self.integrations.contains_key(&id) {
            return Err(IntegrationError::Duplicate(id));
        }
        self.integrations.insert(id, integration);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Integration> {
        self.integrations.get(id).map(|i| i.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.integrations.keys().map(String::as_str).collect()
    }

    /// Render `{ "mcpServers": {...} }` for the requested providers.
    ///
    /// Each entry in `requested` is an integration record id or a provider
    /// key; a provider key picks the first record for that provider.
    /// Returns `None` when nothing was requested.
    pub async fn mcp_config(
        &self,
        requested: &[String],
        records: &[IntegrationConfig],
        credentials: &dyn CredentialStore,
    ) -> Result<Option<Value>, IntegrationError> {
        let mut servers = Map::new();
        let mut seen = HashSet::new();

        for entry in requested {
            if !seen.insert(entry.as_str()) {
                continue;
            }
            let record = records
                .iter()
                .find(|r| &r.id == entry)
                .or_else(|| records.iter().find(|r| &r.provider == entry));

            let (provider, record_id, settings) = match record {
                Some(r) => (r.provider.as_str(), r.id.as_str(), &r.settings),
                None => {
                    if self.get(entry).is_none() {
                        return Err(IntegrationError::UnknownProvider(entry.clone()));
                    }
                    return Err(IntegrationError::MissingCredential(entry.clone()));
                }
            };

            let integration = self
                .get(provider)
                .ok_or_else(|| IntegrationError::UnknownProvider(provider.to_string()))?;

            let token = credentials
                .get_access_token(record_id)
                .await
                .map_err(|source| IntegrationError::CredentialLookup {
                    id: record_id.to_string(),
                    source,
                })?
                .ok_or_else(|| IntegrationError::MissingCredential(record_id.to_string()))?;

            debug!(provider, record_id, "Rendering MCP server");
            let server = integration.mcp_server(&token, settings);
            servers.insert(provider.to_string(), json!(server));
        }

        if servers.is_empty() {
            return Ok(None);
        }
        Ok(Some(json!({ "mcpServers": servers })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialStore;

    fn record(id: &str, provider: &str) -> IntegrationConfig {
        IntegrationConfig {
            id: id.into(),
            provider: provider.into(),
            token: None,
            token_env: None,
            settings: Map::new(),
        }
    }

    #[test]
    fn test_builtins_register_cleanly() {
        let registry = IntegrationRegistry::with_builtins().unwrap();
        let ids = registry.list();
        for expected in ["github", "jira", "notion", "slack", "datadog", "linear", "sentry"] {
            assert!(ids.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = IntegrationRegistry::with_builtins().unwrap();
        let again = builtin_integrations().remove(0);
        assert!(matches!(
            registry.register(again),
            Err(IntegrationError::Duplicate(id)) if id == "github"
        ));
    }

    #[tokio::test]
    async fn test_mcp_config_renders_requested_servers() {
        let registry = IntegrationRegistry::with_builtins().unwrap();
        let mut jira = record("jira-main", "jira");
        jira.settings
            .insert("url".into(), json!("https://acme.atlassian.net"));
        let records = vec![record("gh-1", "github"), jira];
        let creds = StaticCredentialStore::new()
            .with_token("gh-1", "ghp-token")
            .with_token("jira-main", "jira-token");

        let config = registry
            .mcp_config(&["github".into(), "jira-main".into()], &records, &creds)
            .await
            .unwrap()
            .unwrap();

        let github = &config["mcpServers"]["github"];
        assert_eq!(github["type"], "http");
        assert_eq!(github["headers"]["Authorization"], "Bearer ghp-token");

        let jira = &config["mcpServers"]["jira"];
        assert_eq!(jira["command"], "uvx");
        assert_eq!(jira["env"]["JIRA_API_TOKEN"], "jira-token");
        assert_eq!(jira["env"]["JIRA_URL"], "https://acme.atlassian.net");
    }

    #[tokio::test]
    async fn test_mcp_config_empty_request() {
        let registry = IntegrationRegistry::with_builtins().unwrap();
        let creds = StaticCredentialStore::new();
        assert!(registry.mcp_config(&[], &[], &creds).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mcp_config_errors() {
        let registry = IntegrationRegistry::with_builtins().unwrap();
        let creds = StaticCredentialStore::new();

        let err = registry
            .mcp_config(&["frobnicator".into()], &[], &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::UnknownProvider(_)));

        let err = registry
            .mcp_config(&["slack".into()], &[], &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::MissingCredential(_)));

        let records = vec![record("slack-1", "slack")];
        let err = registry
            .mcp_config(&["slack".into()], &records, &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::MissingCredential(id) if id == "slack-1"));
    }
}
