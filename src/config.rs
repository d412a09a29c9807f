use crate::error::{ReportError, Result};
use crate::report::ReportFormat;
use crate::schema::FieldRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LEAD_MODEL: &str = "crm.lead";
pub const DEFAULT_STAGE_FIELD: &str = "stage_id";
pub const DEFAULT_STAGE_FIELD_ID: i64 = 1;

/// Top-level configuration, read from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Entity type whose stage transitions are reported
    #[serde(default = "default_lead_model")]
    pub lead_model: String,

    /// Categorical field on `lead_model` holding the pipeline stage
    #[serde(default = "default_stage_field")]
    pub stage_field: String,

    /// Tracked fields and their change-log ids
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldBinding>,

    /// File format of generated reports ("xlsx" or "csv")
    #[serde(default)]
    pub format: ReportFormat,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            lead_model: default_lead_model(),
            stage_field: default_stage_field(),
            fields: default_fields(),
            format: ReportFormat::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub model: String,
    pub name: String,
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("crm.db")
}

fn default_lead_model() -> String {
    DEFAULT_LEAD_MODEL.to_string()
}

fn default_stage_field() -> String {
    DEFAULT_STAGE_FIELD.to_string()
}

fn default_fields() -> Vec<FieldBinding> {
    vec![FieldBinding {
        model: DEFAULT_LEAD_MODEL.to_string(),
        name: DEFAULT_STAGE_FIELD.to_string(),
        id: DEFAULT_STAGE_FIELD_ID,
    }]
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl ReportConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a config file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReportError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Explicit path if given, else the per-user config file if it exists,
    /// else built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Static field registry built from the configured bindings
    pub fn field_registry(&self) -> FieldRegistry {
        FieldRegistry::from_bindings(&self.fields)
    }
}

/// `<config_dir>/crm-stage-report/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crm-stage-report").join("config.toml"))
}
