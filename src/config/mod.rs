//! Application registration configuration and its storage

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::error::{LifecycleError, StoreError};
use crate::auth::scopes::GRAPH_DEFAULT;
use crate::storage::write_private;

/// Identity provider host used when no authority is configured.
pub const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Application registration used for every sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    /// Identity provider base URL, derived from the tenant when empty
    pub authority: String,
    /// Callback registered with the provider; the server's own callback when empty
    pub redirect_uri: String,
    /// User-requested scopes, never empty once normalized
    pub scopes: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            tenant_id: String::new(),
            authority: String::new(),
            redirect_uri: String::new(),
            scopes: default_scopes(),
        }
    }
}

fn default_scopes() -> Vec<String> {
    vec![GRAPH_DEFAULT.to_string()]
}

/// A partially specified configuration, as submitted by a caller or read
/// from an older config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub authority: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
    /// Single scope string used by old config files
    pub default_scopes: Option<String>,
}

impl ConfigurationUpdate {
    /// Whether this is an old-style record carrying `defaultScopes` only.
    pub fn is_legacy(&self) -> bool {
        self.default_scopes.is_some() && self.scopes.is_none()
    }

    fn resolved_scopes(&self) -> Option<Vec<String>> {
        match (&self.scopes, &self.default_scopes) {
            (Some(scopes), _) => Some(scopes.clone()),
            (None, Some(legacy)) => Some(vec![legacy.clone()]),
            (None, None) => None,
        }
    }
}

impl From<ConfigurationUpdate> for Configuration {
    /// Full replacement: unspecified fields become empty.
    fn from(update: ConfigurationUpdate) -> Self {
        let scopes = update.resolved_scopes().unwrap_or_default();
        Configuration {
            client_id: update.client_id.unwrap_or_default(),
            client_secret: update.client_secret.unwrap_or_default(),
            tenant_id: update.tenant_id.unwrap_or_default(),
            authority: update.authority.unwrap_or_default(),
            redirect_uri: update.redirect_uri.unwrap_or_default(),
            scopes,
        }
        .normalized()
    }
}

impl Configuration {
    /// Trim fields, derive the authority from the tenant, and substitute the
    /// default scope when none remain.
    pub fn normalized(mut self) -> Self {
        self.client_id = self.client_id.trim().to_string();
        self.client_secret = self.client_secret.trim().to_string();
        self.tenant_id = self.tenant_id.trim().to_string();
        self.redirect_uri = self.redirect_uri.trim().to_string();
        self.authority = self.authority.trim().trim_end_matches('/').to_string();
        if self.authority.is_empty() && !self.tenant_id.is_empty() {
            self.authority = format!("{}/{}", AUTHORITY_HOST, self.tenant_id);
        }
        self.scopes = self
            .scopes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if self.scopes.is_empty() {
            self.scopes = default_scopes();
        }
        self
    }

    /// Overlay only the fields present in `update`.
    pub fn merged(self, update: ConfigurationUpdate) -> Self {
        let scopes = update.resolved_scopes();
        // A new tenant invalidates an authority that was derived from the old one.
        let tenant_changed = update
            .tenant_id
            .as_deref()
            .map_or(false, |t| t.trim() != self.tenant_id);
        let derived = self.authority == format!("{}/{}", AUTHORITY_HOST, self.tenant_id);
        let authority = match update.authority {
            Some(a) => a,
            None if tenant_changed && derived => String::new(),
            None => self.authority,
        };
        Configuration {
            client_id: update.client_id.unwrap_or(self.client_id),
            client_secret: update.client_secret.unwrap_or(self.client_secret),
            tenant_id: update.tenant_id.unwrap_or(self.tenant_id),
            authority,
            redirect_uri: update.redirect_uri.unwrap_or(self.redirect_uri),
            scopes: scopes.unwrap_or(self.scopes),
        }
        .normalized()
    }

    /// Effective authority base URL, without a trailing slash.
    pub fn authority(&self) -> String {
        let authority = self.authority.trim().trim_end_matches('/');
        if authority.is_empty() {
            format!("{}/{}", AUTHORITY_HOST, self.tenant_id.trim())
        } else {
            authority.to_string()
        }
    }

    /// Names of the credential fields that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
            ("tenantId", &self.tenant_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn require_credentials(&self) -> Result<(), LifecycleError> {
        let missing = self.missing_credentials();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::Configuration(format!(
                "missing {}. Please configure Azure AD credentials first.",
                missing.join(", ")
            )))
        }
    }

    /// Copy safe to print: the client secret is masked.
    pub fn masked(&self) -> Self {
        Self {
            client_secret: mask(&self.client_secret),
            ..self.clone()
        }
    }
}

/// Show only the first few characters of a secret.
pub fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}

/// Configuration storage
pub trait ConfigProvider: Send {
    fn get(&self) -> Result<Configuration, StoreError>;
    fn set(&mut self, config: Configuration) -> Result<(), StoreError>;
}

/// Configuration held only for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    config: Configuration,
}

impl MemoryConfig {
    pub fn new(config: Configuration) -> Self {
        Self {
            config: config.normalized(),
        }
    }
}

impl ConfigProvider for MemoryConfig {
    fn get(&self) -> Result<Configuration, StoreError> {
        Ok(self.config.clone())
    }

    fn set(&mut self, config: Configuration) -> Result<(), StoreError> {
        self.config = config.normalized();
        Ok(())
    }
}

/// Configuration persisted as `config.toml`.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    config: Configuration,
}

impl FileConfigStore {
    /// Load from `path`, migrating and rewriting old-style files.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (config, migrated) = Self::load(&path)?;
        let store = Self { path, config };
        if migrated {
            store.save(&store.config)?;
            tracing::info!("Migrated defaultScopes to scopes list");
        }
        Ok(store)
    }

    fn load(path: &Path) -> Result<(Configuration, bool), StoreError> {
        if !path.exists() {
            return Ok((Configuration::default(), false));
        }
        let content = fs::read_to_string(path)?;
        let update: ConfigurationUpdate = toml::from_str(&content)?;
        let migrated = update.is_legacy();
        tracing::debug!("Configuration loaded from {}", path.display());
        Ok((Configuration::from(update), migrated))
    }

    fn save(&self, config: &Configuration) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(config)?;
        write_private(&self.path, &content)?;
        Ok(())
    }
}

impl ConfigProvider for FileConfigStore {
    fn get(&self) -> Result<Configuration, StoreError> {
        Ok(self.config.clone())
    }

    fn set(&mut self, config: Configuration) -> Result<(), StoreError> {
        let config = config.normalized();
        self.save(&config)?;
        self.config = config;
        tracing::info!("Configuration saved");
        Ok(())
    }
}
