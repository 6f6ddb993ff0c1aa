//! Settings loading, validation, and configuration merge.
//!
//! The file layer itself belongs to the host: it implements
//! [`SettingsPersistence`] and decides where the JSON documents live.
//! [`DirSettings`] is the directory-backed reference implementation used by
//! tests and simple hosts. [`SettingsStore`] keeps the parsed and validated
//! documents behind a read-write lock; writes happen only on host-initiated
//! saves and reload the whole store so later reads observe the new values.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use sb_domain::config::{MergedConfig, ProviderTemplate, UserConfig};
use sb_domain::error::{mask_secrets, Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One raw settings document, keyed by provider id and tagged with the name
/// of the backing file for error reporting.
#[derive(Debug, Clone)]
pub struct SettingsDocument {
    pub provider_id: String,
    pub file: String,
    pub document: Value,
}

/// The host-owned settings file layer consumed by the gateway.
#[async_trait]
pub trait SettingsPersistence: Send + Sync {
    async fn load_templates(&self) -> Result<Vec<SettingsDocument>>;
    async fn load_user_configs(&self) -> Result<Vec<SettingsDocument>>;
    async fn write_user_config(&self, provider_id: &str, config: &UserConfig) -> Result<()>;
}

/// Directory-backed persistence: `<root>/templates/*.json` and
/// `<root>/configs/*.json`, provider id = file stem.
pub struct DirSettings {
    root: PathBuf,
}

impl DirSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load_dir(&self, sub: &str) -> Result<Vec<SettingsDocument>> {
        let dir = self.root.join(sub);
        let mut documents = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // A missing directory just means no providers are set up yet.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(documents),
            Err(error) => {
                return Err(Error::ConfigurationInvalid {
                    file: dir.display().to_string(),
                    field: String::new(),
                    message: error.to_string(),
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let file = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(stem)
                .to_string();
            let text = std::fs::read_to_string(&path).map_err(|error| Error::ConfigurationInvalid {
                file: file.clone(),
                field: String::new(),
                message: error.to_string(),
            })?;
            let document: Value =
                serde_json::from_str(&text).map_err(|error| Error::ConfigurationInvalid {
                    file: file.clone(),
                    field: String::new(),
                    message: format!("not valid JSON: {error}"),
                })?;
            documents.push(SettingsDocument {
                provider_id: stem.to_string(),
                file,
                document,
            });
        }
        documents.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(documents)
    }
}

#[async_trait]
impl SettingsPersistence for DirSettings {
    async fn load_templates(&self) -> Result<Vec<SettingsDocument>> {
        self.load_dir("templates")
    }

    async fn load_user_configs(&self) -> Result<Vec<SettingsDocument>> {
        self.load_dir("configs")
    }

    async fn write_user_config(&self, provider_id: &str, config: &UserConfig) -> Result<()> {
        let dir = self.root.join("configs");
        std::fs::create_dir_all(&dir).map_err(|error| Error::ConfigurationInvalid {
            file: dir.display().to_string(),
            field: String::new(),
            message: error.to_string(),
        })?;
        let path = dir.join(format!("{provider_id}.json"));
        let text = serde_json::to_string_pretty(config)
            .map_err(|error| Error::InvalidArgument(error.to_string()))?;
        std::fs::write(&path, text).map_err(|error| Error::ConfigurationInvalid {
            file: path.display().to_string(),
            field: String::new(),
            message: error.to_string(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TemplateEntry {
    /// Parse/validation failures are recorded here and surfaced on use, so
    /// one broken template never takes the other providers down.
    template: Result<ProviderTemplate>,
}

#[derive(Default)]
struct SettingsState {
    templates: HashMap<String, TemplateEntry>,
    user_configs: HashMap<String, UserConfig>,
}

/// Validated settings behind a reader-writer lock.
pub struct SettingsStore {
    persistence: Arc<dyn SettingsPersistence>,
    state: RwLock<SettingsState>,
}

impl SettingsStore {
    /// Load everything once at startup.
    pub async fn load(persistence: Arc<dyn SettingsPersistence>) -> Result<Self> {
        let store = Self {
            persistence,
            state: RwLock::new(SettingsState::default()),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Re-read all documents from the persistence layer and swap the state
    /// atomically.
    pub async fn reload(&self) -> Result<()> {
        let template_docs = self.persistence.load_templates().await?;
        let config_docs = self.persistence.load_user_configs().await?;

        let mut state = SettingsState::default();
        for doc in template_docs {
            let template = parse_template(&doc);
            if let Err(error) = &template {
                tracing::warn!(
                    provider = %doc.provider_id,
                    error = %mask_secrets(&error.to_string()),
                    "provider template failed validation, provider disabled"
                );
            }
            state
                .templates
                .insert(doc.provider_id.clone(), TemplateEntry { template });
        }
        for doc in config_docs {
            match serde_json::from_value::<UserConfig>(doc.document.clone()) {
                Ok(config) => {
                    state.user_configs.insert(doc.provider_id.clone(), config);
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %doc.provider_id,
                        file = %doc.file,
                        error = %error,
                        "user config is malformed, ignoring"
                    );
                }
            }
        }

        tracing::debug!(
            templates = state.templates.len(),
            user_configs = state.user_configs.len(),
            "settings loaded"
        );
        *self.state.write() = state;
        Ok(())
    }

    /// Build the read-only merge of one provider's template and user config.
    pub fn merged_config(&self, provider_id: &str) -> Result<Arc<MergedConfig>> {
        let state = self.state.read();
        let entry = state
            .templates
            .get(provider_id)
            .ok_or_else(|| Error::ConfigurationMissing {
                provider: provider_id.to_string(),
            })?;
        let template = entry.template.as_ref().map_err(Clone::clone)?;
        let user = state
            .user_configs
            .get(provider_id)
            .cloned()
            .unwrap_or_default();

        if user.api_key.is_empty() && !template.http.allow_empty_api_key {
            return Err(Error::ConfigurationIncomplete {
                provider: provider_id.to_string(),
                field: "apiKey".into(),
            });
        }

        Ok(Arc::new(MergedConfig::new(provider_id, template, &user)))
    }

    /// Persist a user config, then reload so subsequent reads observe it.
    pub async fn write_user_config(&self, provider_id: &str, config: &UserConfig) -> Result<()> {
        self.persistence.write_user_config(provider_id, config).await?;
        self.reload().await
    }

    /// Whether at least one provider is fully usable.
    pub fn is_active(&self) -> bool {
        self.active_provider().is_some()
    }

    /// Merged config of the active provider, or [`Error::NotConfigured`].
    pub fn merged_active(&self) -> Result<Arc<MergedConfig>> {
        let provider_id = self.active_provider().ok_or(Error::NotConfigured)?;
        self.merged_config(&provider_id)
    }

    /// The first (by id) fully configured provider; requests without an
    /// explicit provider route here.
    pub fn active_provider(&self) -> Option<String> {
        let state = self.state.read();
        let mut ids: Vec<&String> = state.templates.keys().collect();
        ids.sort();
        ids.into_iter()
            .find(|id| {
                let Some(entry) = state.templates.get(*id) else {
                    return false;
                };
                let Ok(template) = &entry.template else {
                    return false;
                };
                let has_key = state
                    .user_configs
                    .get(*id)
                    .is_some_and(|c| !c.api_key.is_empty());
                has_key || template.http.allow_empty_api_key
            })
            .cloned()
    }

    /// All known provider ids (valid or not), sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state.templates.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn parse_template(doc: &SettingsDocument) -> Result<ProviderTemplate> {
    let template: ProviderTemplate =
        serde_json::from_value(doc.document.clone()).map_err(|error| Error::ConfigurationInvalid {
            file: doc.file.clone(),
            field: String::new(),
            message: error.to_string(),
        })?;
    template.validate(&doc.file)?;
    Ok(template)
}
