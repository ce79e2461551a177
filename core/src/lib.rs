//! Decision core: model scoring under a deterministic policy, with an
//! append-only audit ledger.
//!
//! A request goes through four stages, always in this order:
//!
//! - [`FeatureExtractor`] turns raw inputs into a fixed-order vector,
//! - a [`ScoringModel`] turns the vector into a probability,
//! - [`PolicyCore`] turns the probability (plus raw inputs) into a verdict,
//! - [`AuditRecorder`] writes the whole chain in one ledger transaction.
//!
//! The [`Orchestrator`] runs the stages and can replay any stored decision
//! to show that it is reproducible from its inputs and model version.
//!
//! # Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         Orchestrator         │
//! │ ┌──────────────────────────┐ │
//! │ │   FeatureExtractor       │ │  inputs → vector
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │   ScoringModel           │ │  vector → score (LazyModel)
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │   PolicyCore             │ │  score → verdict (rule cascades)
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │   AuditRecorder          │ │  ledger transaction
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │   MetaObserver           │ │  counters + latency
//! │ └──────────────────────────┘ │
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use decision_core::{EngineConfig, Inputs};
//!
//! let orchestrator = EngineConfig::load()?.build()?;
//! let response = orchestrator.submit(
//!     "resume_screening",
//!     Inputs::new()
//!         .with("experience_years", 3)
//!         .with("confidence_score", 8)
//!         .with("skills", "python,sql,ml"),
//! )?;
//! println!("{} → {}", response.decision_id, response.final_decision.decision);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

/// Audit recorder and reconstructed decision records.
pub mod audit;
/// YAML / environment configuration and wiring.
pub mod config;
/// Error taxonomy of the pipeline.
pub mod error;
/// Feature schemas and extraction.
pub mod features;
/// Ledger tables, transactions and bundled stores.
pub mod ledger;
/// Pipeline metrics.
pub mod meta_observer;
/// Scoring model trait and the lazily loaded logistic model.
pub mod model;
/// Request pipeline and replay.
pub mod orchestrator;
/// Decision policies as ordered rule cascades.
pub mod policy_core;
/// Requests and raw inputs.
pub mod request;

pub use crate::audit::{AuditRecorder, DecisionRecord};
pub use crate::config::EngineConfig;
pub use crate::error::{DecisionError, Stage};
pub use crate::features::{FeatureExtractor, FeatureSchema, FeatureVector, RESUME_SCREENING};
pub use crate::ledger::{DecisionId, FileLedger, LedgerStore, MemoryLedger, StoreError};
pub use crate::model::{LazyModel, ModelId, Prediction, ScoringModel};
pub use crate::orchestrator::{DecisionOutcome, Orchestrator, Replay, SubmitResponse};
pub use crate::policy_core::{DecisionKind, PolicyCore, ResumeScreeningThresholds, Verdict};
pub use crate::request::{DecisionRequest, InputValue, Inputs};
