//! Configuration of the decision engine.
//!
//! Settings come from an optional YAML file plus environment overrides:
//!
//! - `DECISION_CONFIG` – YAML file to start from;
//! - `DECISION_MODEL_PATH`, `DECISION_MODEL_NAME`, `DECISION_MODEL_VERSION` –
//!   model artifact and the identity it must declare;
//! - `DECISION_MODEL_PRELOAD` – `1`/`true`/`yes`/`on` loads the model at startup;
//! - `DECISION_LEDGER_PATH` – JSON-lines ledger file; empty keeps the
//!   in-memory ledger.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::audit::AuditRecorder;
use crate::features::FeatureExtractor;
use crate::ledger::{FileLedger, LedgerStore, MemoryLedger};
use crate::model::{LazyModel, ModelId};
use crate::orchestrator::Orchestrator;
use crate::policy_core::PolicyCore;

/// Model artifact settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// JSON artifact written by the trainer.
    pub path: PathBuf,
    /// Model family the artifact must declare.
    pub name: String,
    /// Version the artifact must declare.
    pub version: String,
    /// Load the artifact while building instead of on the first request.
    pub preload: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/resume_model_v1.json"),
            name: "resume_model".to_string(),
            version: "v1".to_string(),
            preload: false,
        }
    }
}

/// Ledger settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-lines file; `None` keeps decisions in memory only.
    pub path: Option<PathBuf>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scoring model.
    pub model: ModelConfig,
    /// Audit ledger.
    pub ledger: LedgerConfig,
}

impl EngineConfig {
    /// Reads a YAML file. Missing sections and fields keep their defaults.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read config file {path:?}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid config file {path:?}"))
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    /// YAML file named by `DECISION_CONFIG` (if set), then environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var("DECISION_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    /// Applies overrides read through `lookup` (normally the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DECISION_MODEL_PATH") {
            self.model.path = PathBuf::from(non_empty("DECISION_MODEL_PATH", &raw)?);
        }
        if let Some(raw) = lookup("DECISION_MODEL_NAME") {
            self.model.name = non_empty("DECISION_MODEL_NAME", &raw)?.to_string();
        }
        if let Some(raw) = lookup("DECISION_MODEL_VERSION") {
            self.model.version = non_empty("DECISION_MODEL_VERSION", &raw)?.to_string();
        }
        if let Some(raw) = lookup("DECISION_MODEL_PRELOAD") {
            self.model.preload = parse_bool(&raw);
        }
        if let Some(raw) = lookup("DECISION_LEDGER_PATH") {
            let trimmed = raw.trim();
            self.ledger.path = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
        }
        Ok(())
    }

    /// Builds the orchestrator described by this configuration.
    ///
    /// Opens (or creates) the ledger file. The model is only read here when
    /// `model.preload` is set; otherwise on the first request.
    pub fn build(&self) -> Result<Orchestrator> {
        let extractor = FeatureExtractor::default();
        let model = Arc::new(LazyModel::new(
            &self.model.path,
            ModelId::new(&self.model.name, &self.model.version),
            extractor.default_schema().names(),
        ));
        if self.model.preload {
            model
                .get()
                .with_context(|| format!("Unable to preload model from {:?}", self.model.path))?;
        }

        let store: Arc<dyn LedgerStore> = match &self.ledger.path {
            Some(path) => Arc::new(
                FileLedger::open(path)
                    .with_context(|| format!("Unable to open ledger {path:?}"))?,
            ),
            None => {
                info!("No ledger path configured, decisions are kept in memory only");
                Arc::new(MemoryLedger::new())
            }
        };

        Ok(Orchestrator::new(
            extractor,
            model,
            PolicyCore::new(),
            AuditRecorder::new(store),
        ))
    }
}

fn non_empty<'a>(key: &str, raw: &'a str) -> Result<&'a str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{key} must not be empty"));
    }
    Ok(trimmed)
}

/// Loose boolean: `1`, `true`, `yes`, `on` (any case) are `true`,
/// everything else is `false`.
fn parse_bool(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "on")
}
