//! Audit recorder: the durable causal chain of every decision.
//!
//! A decision is written as header → inputs → prediction → outcome inside a
//! single ledger transaction. Either all four land or none do.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DecisionError;
use crate::ledger::{
    DecisionId, InputRow, LedgerEntry, LedgerStore, OutcomeRow, PredictionRow, StoreError,
};
use crate::model::Prediction;
use crate::policy_core::{DecisionKind, Verdict};
use crate::request::{DecisionRequest, InputValue, Inputs};

/// A committed decision, reconstructed from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Ledger identifier.
    pub decision_id: DecisionId,
    /// Decision type of the request.
    pub decision_type: String,
    /// Raw inputs, in the order they were received.
    pub inputs: Inputs,
    /// Prediction used by the policy.
    pub prediction: Prediction,
    /// Final verdict.
    pub verdict: Verdict,
}

impl DecisionRecord {
    /// The request this record was created from.
    pub fn request(&self) -> DecisionRequest {
        DecisionRequest::new(&self.decision_type, self.inputs.clone())
    }

    fn from_entry(entry: LedgerEntry) -> Result<Self, StoreError> {
        let id = entry.decision.id;
        let inputs = entry
            .inputs
            .into_iter()
            .map(|row| {
                InputValue::from_column(&row.input_value)
                    .map(|value| (row.input_key, value))
                    .map_err(|e| StoreError::Corrupt(format!("decision {id} input: {e}")))
            })
            .collect::<Result<Inputs, StoreError>>()?;

        let decision = DecisionKind::parse(&entry.outcome.final_result).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "decision {id} has unknown result `{}`",
                entry.outcome.final_result
            ))
        })?;

        Ok(Self {
            decision_id: id,
            decision_type: entry.decision.decision_type,
            inputs,
            prediction: Prediction {
                model_name: entry.prediction.model_name,
                model_version: entry.prediction.model_version,
                score: entry.prediction.score,
            },
            verdict: Verdict::new(decision, entry.outcome.feedback_notes),
        })
    }
}

/// Writes and reads decision records through a [`LedgerStore`].
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder").finish_non_exhaustive()
    }
}

impl AuditRecorder {
    /// Recorder over `store`.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Persists the full chain of one decision atomically.
    ///
    /// # Errors
    /// [`DecisionError::Persistence`] on any write or commit failure; the
    /// transaction is rolled back and no row of the decision stays visible.
    pub fn record(
        &self,
        request: &DecisionRequest,
        prediction: &Prediction,
        verdict: &Verdict,
    ) -> Result<DecisionId, DecisionError> {
        // Any early return drops `tx`, which rolls it back.
        let mut tx = self.store.begin()?;

        // 1) Header
        let decision_id = tx.insert_decision(&request.decision_type)?;

        // 2) Raw inputs
        for (key, value) in request.inputs.iter() {
            let input_value = value.to_column().ok_or_else(|| {
                StoreError::Rejected(format!("input `{key}` is not a finite number"))
            })?;
            tx.insert_input(InputRow {
                decision_id,
                input_key: key.to_string(),
                input_value,
            })?;
        }

        // 3) Prediction
        tx.insert_prediction(PredictionRow {
            decision_id,
            model_name: prediction.model_name.clone(),
            model_version: prediction.model_version.clone(),
            score: prediction.score,
        })?;

        // 4) Outcome
        tx.insert_outcome(OutcomeRow {
            decision_id,
            final_result: verdict.decision.as_str().to_string(),
            feedback_notes: verdict.reason.clone(),
        })?;

        tx.commit()?;

        info!(
            decision_id,
            decision_type = %request.decision_type,
            decision = %verdict.decision,
            model_version = %prediction.model_version,
            "decision recorded"
        );
        Ok(decision_id)
    }

    /// Reads a committed decision back.
    pub fn load(&self, decision_id: DecisionId) -> Result<Option<DecisionRecord>, DecisionError> {
        let Some(entry) = self.store.entry(decision_id)? else {
            debug!(decision_id, "no such decision");
            return Ok(None);
        };
        Ok(Some(DecisionRecord::from_entry(entry)?))
    }
}
