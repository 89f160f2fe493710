//! Runtime configuration.
//!
//! Loaded once at start-up. `FISCAL_CONFIG` may name a JSON file holding the
//! whole configuration; otherwise each field is read from a `FISCAL_*`
//! environment variable with a default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use fiscalflow_core::id::only_digits;
use fiscalflow_documents::BuilderConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Authority environment (`tpAmb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Homologation,
}

impl Environment {
    pub fn code(self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "production" | "producao" => Some(Environment::Production),
            "2" | "homologation" | "homologacao" => Some(Environment::Homologation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiscalConfig {
    pub environment: Environment,
    /// Two-letter state (UF).
    pub jurisdiction: String,
    /// IBGE state code (cUF).
    pub jurisdiction_code: u8,
    pub issuer_cnpj: String,
    pub issuer_name: String,
    pub issuer_ie: String,
    pub model: u8,
    pub doc_prefix: String,
    pub schemes: String,
    pub version: String,
    pub storage_root: PathBuf,
    /// Overrides the jurisdiction's default authorized reader.
    pub authorized_reader_cnpj: Option<String>,
    /// Batch worker-pool size.
    pub max_concurrent: usize,
    pub min_document_proof_bytes: u64,
    pub min_event_proof_bytes: u64,
    pub bind_addr: String,
    pub toolkit_program: String,
    pub toolkit_args: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for FiscalConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Homologation,
            jurisdiction: "BA".to_string(),
            jurisdiction_code: 29,
            issuer_cnpj: String::new(),
            issuer_name: String::new(),
            issuer_ie: String::new(),
            model: 55,
            doc_prefix: "NFe".to_string(),
            schemes: "PL_010_V1.30".to_string(),
            version: "4.00".to_string(),
            storage_root: PathBuf::from("./storage"),
            authorized_reader_cnpj: None,
            max_concurrent: 4,
            min_document_proof_bytes: 200,
            min_event_proof_bytes: 50,
            bind_addr: "0.0.0.0:8080".to_string(),
            toolkit_program: "fiscal-toolkit".to_string(),
            toolkit_args: Vec::new(),
            log_format: LogFormat::Json,
        }
    }
}

impl FiscalConfig {
    /// Load from `FISCAL_CONFIG` or the process environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("FISCAL_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::from_lookup(|name| std::env::var(name).ok())?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build from a variable lookup; missing variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = var("FISCAL_ENVIRONMENT") {
            config.environment = Environment::parse(&raw)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown environment {raw:?}")))?;
        }
        if let Some(v) = var("FISCAL_JURISDICTION") {
            config.jurisdiction = v.to_ascii_uppercase();
        }
        if let Some(v) = var("FISCAL_JURISDICTION_CODE") {
            config.jurisdiction_code = parse_number("FISCAL_JURISDICTION_CODE", &v)?;
        }
        match var("FISCAL_ISSUER_CNPJ") {
            Some(v) => config.issuer_cnpj = v,
            None => warn!("FISCAL_ISSUER_CNPJ not set"),
        }
        if let Some(v) = var("FISCAL_ISSUER_NAME") {
            config.issuer_name = v;
        }
        if let Some(v) = var("FISCAL_ISSUER_IE") {
            config.issuer_ie = v;
        }
        if let Some(v) = var("FISCAL_MODEL") {
            config.model = parse_number("FISCAL_MODEL", &v)?;
        }
        if let Some(v) = var("FISCAL_DOC_PREFIX") {
            config.doc_prefix = v;
        }
        if let Some(v) = var("FISCAL_SCHEMES") {
            config.schemes = v;
        }
        if let Some(v) = var("FISCAL_VERSION") {
            config.version = v;
        }
        if let Some(v) = var("FISCAL_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(v);
        }
        config.authorized_reader_cnpj = var("FISCAL_AUTHORIZED_READER_CNPJ");
        if let Some(v) = var("FISCAL_MAX_CONCURRENT") {
            config.max_concurrent = parse_number("FISCAL_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = var("FISCAL_MIN_DOCUMENT_PROOF_BYTES") {
            config.min_document_proof_bytes = parse_number("FISCAL_MIN_DOCUMENT_PROOF_BYTES", &v)?;
        }
        if let Some(v) = var("FISCAL_MIN_EVENT_PROOF_BYTES") {
            config.min_event_proof_bytes = parse_number("FISCAL_MIN_EVENT_PROOF_BYTES", &v)?;
        }
        if let Some(v) = var("FISCAL_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = var("FISCAL_TOOLKIT_PROGRAM") {
            config.toolkit_program = v;
        }
        if let Some(v) = var("FISCAL_TOOLKIT_ARGS") {
            config.toolkit_args = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = var("FISCAL_LOG_FORMAT") {
            config.log_format = match v.to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                _ => LogFormat::Json,
            };
        }

        debug!(
            environment = ?config.environment,
            jurisdiction = %config.jurisdiction,
            storage_root = %config.storage_root.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if only_digits(&self.issuer_cnpj).len() != 14 {
            return Err(ConfigError::Invalid(
                "issuer_cnpj must have 14 digits".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.jurisdiction.len() != 2 {
            return Err(ConfigError::Invalid(format!(
                "jurisdiction must be a two-letter state, got {:?}",
                self.jurisdiction
            )));
        }
        Ok(())
    }

    pub fn builder_config(&self) -> BuilderConfig {
        let config = BuilderConfig::new(self.jurisdiction.clone())
            .with_environment(self.environment.code());
        match self.authorized_reader_cnpj.as_deref() {
            Some(cnpj) => config.with_authorized_reader(cnpj),
            None => config,
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid number: {raw:?}")))
}
