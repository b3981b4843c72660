//! Access-token lookup for integrations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use conductor_core::config::Config;

/// Credential collaborator: maps an integration record id to its token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_access_token(&self, integration_id: &str) -> anyhow::Result<Option<String>>;
}

/// Tokens from the `integrations` section of the config.
pub struct ConfigCredentialStore {
    config: Arc<Config>,
}

impl ConfigCredentialStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn get_access_token(&self, integration_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .config
            .integration(integration_id)
            .and_then(|i| i.resolve_token()))
    }
}

/// Fixed token table.
#[derive(Default)]
pub struct StaticCredentialStore {
    tokens: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, integration_id: &str, token: &str) -> Self {
        self.tokens.insert(integration_id.to_string(), token.to_string());
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_access_token(&self, integration_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.get(integration_id).cloned())
    }
}
