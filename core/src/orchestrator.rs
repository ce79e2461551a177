//! Orchestrator: runs one request through the whole pipeline.
//!
//! ```text
//! request ─▶ FeatureExtractor ─▶ ScoringModel ─▶ PolicyCore ─▶ AuditRecorder ─▶ outcome
//! ```
//!
//! Stages run strictly in this order. A failing stage stops the run: later
//! stages are skipped and nothing is recorded for the request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{AuditRecorder, DecisionRecord};
use crate::error::DecisionError;
use crate::features::FeatureExtractor;
use crate::ledger::DecisionId;
use crate::meta_observer::{MetaObserver, PipelineMetricsSnapshot};
use crate::model::{ModelId, Prediction, ScoringModel};
use crate::policy_core::{PolicyCore, Verdict};
use crate::request::{DecisionRequest, Inputs};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    /// Ledger id of the recorded decision.
    pub decision_id: DecisionId,
    /// Final verdict.
    pub verdict: Verdict,
    /// Prediction the verdict was based on.
    pub prediction: Prediction,
    /// Policy rule that fired, `None` for a fallback.
    pub rule: Option<String>,
}

/// Wire shape of the `submit` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Ledger id of the recorded decision.
    pub decision_id: DecisionId,
    /// Verdict as `{decision, reason}`.
    pub final_decision: Verdict,
}

impl From<DecisionOutcome> for SubmitResponse {
    fn from(outcome: DecisionOutcome) -> Self {
        Self {
            decision_id: outcome.decision_id,
            final_decision: outcome.verdict,
        }
    }
}

/// What re-running a stored decision showed.
#[derive(Debug, Clone, PartialEq)]
pub enum Replay {
    /// Same prediction and verdict as recorded.
    Reproduced(DecisionRecord),
    /// Same model version, different result.
    Diverged {
        /// Stored record.
        record: DecisionRecord,
        /// Freshly computed prediction.
        prediction: Prediction,
        /// Freshly computed verdict.
        verdict: Verdict,
    },
    /// The record was scored by another model version; not re-scored.
    ModelVersionMismatch {
        /// Stored record.
        record: DecisionRecord,
        /// Model currently active.
        active: ModelId,
    },
}

impl Replay {
    /// `true` for [`Replay::Reproduced`].
    pub fn is_reproduced(&self) -> bool {
        matches!(self, Self::Reproduced(_))
    }
}

/// Composes extractor, model, policy and recorder for one request at a time.
///
/// Shared by reference between threads: `handle` takes `&self`.
pub struct Orchestrator {
    extractor: FeatureExtractor,
    model: Arc<dyn ScoringModel>,
    policy: PolicyCore,
    recorder: AuditRecorder,
    meta: Mutex<MetaObserver>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.model.model_id())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wires the pipeline from already-built parts.
    pub fn new(
        extractor: FeatureExtractor,
        model: Arc<dyn ScoringModel>,
        policy: PolicyCore,
        recorder: AuditRecorder,
    ) -> Self {
        Self {
            extractor,
            model,
            policy,
            recorder,
            meta: Mutex::new(MetaObserver::new()),
        }
    }

    /// Inbound operation: decide and record one request.
    pub fn submit(
        &self,
        decision_type: &str,
        inputs: Inputs,
    ) -> Result<SubmitResponse, DecisionError> {
        self.handle(&DecisionRequest::new(decision_type, inputs))
            .map(SubmitResponse::from)
    }

    /// Runs extract → score → decide → record.
    ///
    /// # Errors
    /// The first failing stage's error; nothing is recorded in that case.
    pub fn handle(&self, request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError> {
        let started = Instant::now();
        let result = self.run(request);

        let mut meta = self.meta();
        match &result {
            Ok(outcome) => meta.observe_decision(outcome.verdict.decision, started.elapsed()),
            Err(err) => {
                warn!(
                    decision_type = %request.decision_type,
                    stage = %err.stage(),
                    error = %err,
                    "decision failed, nothing recorded"
                );
                meta.observe_failure(err.stage(), started.elapsed());
            }
        }
        result
    }

    fn run(&self, request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError> {
        // 1) Features
        let vector = self
            .extractor
            .extract(&request.decision_type, &request.inputs)?;

        // 2) Score
        let prediction = self.model.score(&vector)?;
        debug!(
            model = %prediction.model_id(),
            score = prediction.score,
            "request scored"
        );

        // 3) Policy, only ever fed the score produced above
        let (verdict, rule) =
            self.policy
                .decide_traced(&request.decision_type, prediction.score, &request.inputs);
        debug!(decision = %verdict.decision, rule = ?rule, "policy decided");

        // 4) Audit trail
        let decision_id = self.recorder.record(request, &prediction, &verdict)?;

        Ok(DecisionOutcome {
            decision_id,
            verdict,
            prediction,
            rule,
        })
    }

    /// Re-runs a stored decision against the active model and policy.
    ///
    /// A record scored by another model version is reported, not re-scored.
    pub fn replay(&self, decision_id: DecisionId) -> Result<Replay, DecisionError> {
        let Some(record) = self.recorder.load(decision_id)? else {
            self.meta().observe_lookup_miss();
            return Err(DecisionError::NotFound(decision_id));
        };

        let active = self.model.model_id();
        if record.prediction.model_id() != active {
            return Ok(Replay::ModelVersionMismatch { record, active });
        }

        let vector = self
            .extractor
            .extract(&record.decision_type, &record.inputs)?;
        let prediction = self.model.score(&vector)?;
        let verdict = self
            .policy
            .decide(&record.decision_type, prediction.score, &record.inputs);

        if prediction == record.prediction && verdict == record.verdict {
            Ok(Replay::Reproduced(record))
        } else {
            warn!(decision_id, "replay diverged from the recorded decision");
            Ok(Replay::Diverged {
                record,
                prediction,
                verdict,
            })
        }
    }

    /// Reads a stored decision.
    pub fn record(&self, decision_id: DecisionId) -> Result<Option<DecisionRecord>, DecisionError> {
        self.recorder.load(decision_id)
    }

    /// Current pipeline metrics.
    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.meta().snapshot()
    }

    /// Zeroes the pipeline metrics.
    pub fn reset_metrics(&self) {
        self.meta().reset();
    }

    /// Audit recorder used by the pipeline.
    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    fn meta(&self) -> MutexGuard<'_, MetaObserver> {
        // Counters stay usable even if a panicking thread held the lock.
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
