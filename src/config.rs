//! Application settings, loaded from a TOML file.
//!
//! ```toml
//! [form]
//! storage_key = "sustainability-report"
//! definition = "forms/custom.toml"     # optional; built-in form otherwise
//!
//! [persistence]
//! debounce_ms = 500
//! storage_dir = "/var/lib/sustain-form" # optional
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and key is optional. The file path comes from
//! `SUSTAIN_FORM_CONFIG`; without it the defaults apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::controller::{ControllerOptions, DEFAULT_STORAGE_KEY};
use crate::form::builtin::sustainability_report;
use crate::form::{ConfigError, StepRegistry};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "SUSTAIN_FORM_CONFIG";

/// Directory under the OS data dir holding logs and saved progress.
pub const APP_DIR: &str = "sustain-form";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AppConfig {
    pub form: FormConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

/// `[form]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct FormConfig {
    pub storage_key: String,
    pub definition: Option<PathBuf>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            definition: None,
        }
    }
}

/// `[persistence]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PersistenceConfig {
    pub debounce_ms: u64,
    pub storage_dir: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            storage_dir: None,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            storage_key: self.form.storage_key.clone(),
            debounce: Duration::from_millis(self.persistence.debounce_ms),
        }
    }

    /// Where saved progress lives.
    pub fn storage_dir(&self) -> PathBuf {
        self.persistence.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_default()
                .join(APP_DIR)
                .join("storage")
        })
    }

    /// The configured form definition, or the built-in sustainability form.
    pub fn registry(&self) -> Result<StepRegistry, ConfigError> {
        match &self.form.definition {
            Some(path) => {
                let source = read(path)?;
                StepRegistry::from_toml_str(&source)
            }
            None => sustainability_report(),
        }
    }
}

/// Parse a TOML string into an [`AppConfig`], running validation.
pub fn parse(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Read and parse the settings file at `path`.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    parse(&read(path)?)
}

/// Settings from the file named by [`CONFIG_ENV`], or the defaults.
pub fn load() -> Result<AppConfig, ConfigError> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_from(Path::new(&path)),
        None => Ok(AppConfig::default()),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Parse(format!("cannot read {}: {e}", path.display())))
}

fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.form.storage_key.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "form.storage_key must not be empty".to_string(),
        ));
    }

    if cfg.persistence.debounce_ms == 0 {
        return Err(ConfigError::Invalid(
            "persistence.debounce_ms must be greater than 0".to_string(),
        ));
    }

    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&cfg.logging.level) {
        return Err(ConfigError::Invalid(format!(
            "logging.level '{}' is not a valid filter: {e}",
            cfg.logging.level
        )));
    }

    Ok(())
}
