//! Scoring model: feature vector → calibrated probability.
//!
//! The model is consumed, never produced, by this crate: the offline trainer
//! writes a versioned JSON artifact holding a logistic regression, and
//! [`LazyModel`] loads it on first use.
//!
//! Everything that scores goes through the [`ScoringModel`] trait, so the
//! orchestrator can be built with a substitute model in tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DecisionError;
use crate::features::FeatureVector;

/// Number of decimal digits kept in a score.
pub const SCORE_DECIMALS: i32 = 4;

/// Identity of a model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    /// Model family, e.g. `resume_model`.
    pub name: String,
    /// Artifact version, e.g. `v1`.
    pub version: String,
}

impl ModelId {
    /// Creates a model identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Output of one scoring call. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Model family that produced the score.
    pub model_name: String,
    /// Exact artifact version that produced the score.
    pub model_version: String,
    /// Probability in `[0, 1]`, rounded to [`SCORE_DECIMALS`] digits.
    pub score: f64,
}

impl Prediction {
    /// Builds a prediction, rounding `raw_score`.
    ///
    /// Non-finite or out-of-range scores mean the model is broken and are
    /// reported as [`DecisionError::ModelUnavailable`].
    pub fn new(model: &ModelId, raw_score: f64) -> Result<Self, DecisionError> {
        if !raw_score.is_finite() || !(0.0..=1.0).contains(&raw_score) {
            return Err(DecisionError::ModelUnavailable {
                model: model.to_string(),
                reason: format!("score {raw_score} outside [0, 1]"),
            });
        }
        Ok(Self {
            model_name: model.name.clone(),
            model_version: model.version.clone(),
            score: round_score(raw_score),
        })
    }

    /// Identity of the model that produced this prediction.
    pub fn model_id(&self) -> ModelId {
        ModelId::new(&self.model_name, &self.model_version)
    }
}

/// Rounds to [`SCORE_DECIMALS`] decimal digits.
pub fn round_score(raw: f64) -> f64 {
    let factor = 10_f64.powi(SCORE_DECIMALS);
    (raw * factor).round() / factor
}

/// Anything that can turn a feature vector into a [`Prediction`].
pub trait ScoringModel: Send + Sync {
    /// Identity of the model that [`ScoringModel::score`] uses.
    fn model_id(&self) -> ModelId;

    /// Scores a vector.
    ///
    /// # Errors
    /// [`DecisionError::ModelUnavailable`] when the model cannot be used,
    /// [`DecisionError::InvalidVector`] on a dimensionality mismatch.
    fn score(&self, vector: &FeatureVector) -> Result<Prediction, DecisionError>;
}

/// Logistic regression as written by the offline trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticArtifact {
    /// Model family.
    pub model_name: String,
    /// Artifact version.
    pub model_version: String,
    /// Feature names, in the order the coefficients expect them.
    pub feature_names: Vec<String>,
    /// One weight per feature.
    pub coefficients: Vec<f64>,
    /// Bias term.
    pub intercept: f64,
}

impl LogisticArtifact {
    /// Identity declared by the artifact.
    pub fn model_id(&self) -> ModelId {
        ModelId::new(&self.model_name, &self.model_version)
    }

    /// Input dimensionality.
    pub fn input_dim(&self) -> usize {
        self.coefficients.len()
    }

    /// Probability of the positive class.
    ///
    /// The vector length must already have been checked.
    pub fn predict_proba(&self, values: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .coefficients
                .iter()
                .zip(values)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }

    fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() {
            return Err("artifact has no coefficients".to_string());
        }
        if self.coefficients.len() != self.feature_names.len() {
            return Err(format!(
                "{} coefficients for {} feature names",
                self.coefficients.len(),
                self.feature_names.len()
            ));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|w| !w.is_finite()) {
            return Err("artifact contains non-finite weights".to_string());
        }
        Ok(())
    }
}

impl ScoringModel for LogisticArtifact {
    fn model_id(&self) -> ModelId {
        LogisticArtifact::model_id(self)
    }

    fn score(&self, vector: &FeatureVector) -> Result<Prediction, DecisionError> {
        if vector.len() != self.input_dim() {
            return Err(DecisionError::InvalidVector {
                expected: self.input_dim(),
                actual: vector.len(),
            });
        }
        Prediction::new(&self.model_id(), self.predict_proba(vector.values()))
    }
}

/// Model loaded from disk on first use, then shared read-only.
///
/// Concurrent first callers are serialized on a mutex and re-check the cell,
/// so the artifact is read exactly once and nobody sees a half-built model.
/// After initialization every call takes the lock-free fast path. A failed
/// load leaves the cell empty; the next call tries again.
#[derive(Debug)]
pub struct LazyModel {
    path: PathBuf,
    expected: ModelId,
    expected_features: Vec<String>,
    cell: OnceLock<Arc<LogisticArtifact>>,
    init: Mutex<()>,
    loads: AtomicUsize,
}

impl LazyModel {
    /// Prepares a model without touching the filesystem.
    ///
    /// * `expected` – the artifact must declare exactly this name and version;
    /// * `expected_features` – the artifact's feature names, in order.
    pub fn new(path: impl Into<PathBuf>, expected: ModelId, expected_features: Vec<String>) -> Self {
        Self {
            path: path.into(),
            expected,
            expected_features,
            cell: OnceLock::new(),
            init: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Path of the backing artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` once the artifact has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// How many times the artifact file was actually read.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Returns the loaded artifact, loading it on first use.
    pub fn get(&self) -> Result<Arc<LogisticArtifact>, DecisionError> {
        if let Some(model) = self.cell.get() {
            return Ok(Arc::clone(model));
        }

        // A poisoned guard only means another loader panicked; the cell
        // itself is still consistent.
        let _guard = self
            .init
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(model) = self.cell.get() {
            return Ok(Arc::clone(model));
        }

        let artifact = Arc::new(self.load()?);
        Ok(Arc::clone(self.cell.get_or_init(|| artifact)))
    }

    fn load(&self) -> Result<LogisticArtifact, DecisionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let unavailable = |reason: String| {
            warn!(model = %self.expected, path = ?self.path, %reason, "model load failed");
            DecisionError::ModelUnavailable {
                model: self.expected.to_string(),
                reason,
            }
        };

        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| unavailable(format!("cannot read {}: {e}", self.path.display())))?;
        let artifact: LogisticArtifact = serde_json::from_str(&raw)
            .map_err(|e| unavailable(format!("corrupt artifact: {e}")))?;

        artifact.validate().map_err(unavailable)?;
        if artifact.model_id() != self.expected {
            return Err(unavailable(format!(
                "artifact is {}, expected {}",
                artifact.model_id(),
                self.expected
            )));
        }
        if artifact.feature_names != self.expected_features {
            return Err(unavailable(format!(
                "artifact features {:?} do not match schema {:?}",
                artifact.feature_names, self.expected_features
            )));
        }

        info!(
            "Loaded model {} ({} features) from {:?}",
            self.expected,
            artifact.input_dim(),
            self.path
        );
        Ok(artifact)
    }
}

impl ScoringModel for LazyModel {
    fn model_id(&self) -> ModelId {
        self.expected.clone()
    }

    fn score(&self, vector: &FeatureVector) -> Result<Prediction, DecisionError> {
        self.get()?.score(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    fn artifact() -> LogisticArtifact {
        LogisticArtifact {
            model_name: "resume_model".into(),
            model_version: "v1".into(),
            feature_names: vec![
                "experience_years".into(),
                "confidence_score".into(),
                "skill_count".into(),
            ],
            coefficients: vec![0.45, 0.35, 0.40],
            intercept: -3.9,
        }
    }

    fn write_artifact(dir: &tempfile::TempDir, artifact: &LogisticArtifact) -> PathBuf {
        let path = dir.path().join("model.json");
        let mut file = std::fs::File::create(&path).expect("create artifact");
        file.write_all(serde_json::to_string(artifact).expect("json").as_bytes())
            .expect("write artifact");
        path
    }

    fn lazy(path: PathBuf) -> LazyModel {
        LazyModel::new(path, ModelId::new("resume_model", "v1"), artifact().feature_names)
    }

    #[test]
    fn score_is_rounded_to_four_decimals() {
        let vector = FeatureVector::new("resume_v1", vec![3.0, 8.0, 3.0]);
        let prediction = artifact().score(&vector).expect("score");
        assert_eq!(prediction.score, 0.81);
        assert_eq!(prediction.model_version, "v1");

        assert_eq!(round_score(0.123_456), 0.1235);
    }

    #[test]
    fn wrong_dimensionality_is_invalid_vector() {
        let vector = FeatureVector::new("resume_v1", vec![3.0, 8.0]);
        match artifact().score(&vector) {
            Err(DecisionError::InvalidVector { expected, actual }) => {
                assert_eq!((expected, actual), (3, 2));
            }
            other => panic!("expected InvalidVector, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let id = ModelId::new("m", "v1");
        assert!(Prediction::new(&id, 1.2).is_err());
        assert!(Prediction::new(&id, f64::NAN).is_err());
        assert!(Prediction::new(&id, 0.0).is_ok());
        assert!(Prediction::new(&id, 1.0).is_ok());
    }

    #[test]
    fn lazy_model_loads_once_under_concurrency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = Arc::new(lazy(write_artifact(&dir, &artifact())));
        assert!(!model.is_loaded());

        let vector = FeatureVector::new("resume_v1", vec![3.0, 8.0, 3.0]);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let model = Arc::clone(&model);
                let vector = vector.clone();
                thread::spawn(move || model.score(&vector).expect("score").score)
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 0.81);
        }
        assert!(model.is_loaded());
        assert_eq!(model.load_count(), 1);
    }

    #[test]
    fn missing_artifact_is_unavailable_and_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.json");
        let model = lazy(path);

        let vector = FeatureVector::new("resume_v1", vec![1.0, 1.0, 1.0]);
        assert!(matches!(
            model.score(&vector),
            Err(DecisionError::ModelUnavailable { .. })
        ));
        assert!(!model.is_loaded());

        write_artifact(&dir, &artifact());
        assert!(model.score(&vector).is_ok());
        assert_eq!(model.load_count(), 2);
    }

    #[test]
    fn corrupt_artifact_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = lazy(path).get().unwrap_err();
        assert!(err.to_string().contains("corrupt artifact"), "{err}");
    }

    #[test]
    fn version_mismatch_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut v2 = artifact();
        v2.model_version = "v2".into();
        let err = lazy(write_artifact(&dir, &v2)).get().unwrap_err();
        assert!(matches!(err, DecisionError::ModelUnavailable { .. }));
        assert!(err.to_string().contains("expected resume_model@v1"), "{err}");
    }

    #[test]
    fn reordered_features_refuse_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut swapped = artifact();
        swapped.feature_names.swap(0, 1);
        let err = lazy(write_artifact(&dir, &swapped)).get().unwrap_err();
        assert!(err.to_string().contains("do not match schema"), "{err}");
    }
}
