use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_store")]
    pub default_store: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub show_hidden: bool,
    #[serde(default = "CommandsConfig::default_uncategorized_label")]
    pub uncategorized_label: String,
    #[serde(default = "CommandsConfig::default_include_return_value")]
    pub include_return_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
    /// `RUST_LOG`-style filter; overrides `verbose` when set.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerConfigOverrides {
    pub store: Option<String>,
    pub show_hidden: Option<bool>,
    pub verbose: Option<bool>,
}

impl StoreConfig {
    fn default_store() -> String {
        "Default".to_string()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { default_store: Self::default_store() }
    }
}

impl CommandsConfig {
    fn default_uncategorized_label() -> String {
        "Uncategorized".to_string()
    }

    const fn default_include_return_value() -> bool {
        true
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            show_hidden: false,
            uncategorized_label: Self::default_uncategorized_label(),
            include_return_value: Self::default_include_return_value(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RunnerConfigOverrides) {
        if let Some(store) = &overrides.store {
            self.store.default_store = store.clone();
        }
        if let Some(show_hidden) = overrides.show_hidden {
            self.commands.show_hidden = show_hidden;
        }
        if let Some(verbose) = overrides.verbose {
            self.logging.verbose = verbose;
        }
    }
}

impl RunnerConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.store.is_none() && self.show_hidden.is_none() && self.verbose.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.store.is_some() {
            fields.push("store");
        }
        if self.show_hidden.is_some() {
            fields.push("show_hidden");
        }
        if self.verbose.is_some() {
            fields.push("verbose");
        }
        fields
    }
}
