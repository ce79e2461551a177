//! Feature extraction: raw inputs → fixed-order numeric vector.
//!
//! The order of the features is part of the model contract. A schema is
//! therefore versioned, and the model artifact declares the feature names it
//! was trained on (see [`crate::model`]); a mismatch refuses to load.

use std::collections::HashMap;

use tracing::debug;

use crate::error::DecisionError;
use crate::request::{InputValue, Inputs};

/// Decision type handled by the built-in resume screening schema and policy.
pub const RESUME_SCREENING: &str = "resume_screening";

/// How one input key becomes one feature value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKind {
    /// Number; absent ⇒ `0`.
    Numeric,
    /// Comma-separated list, encoded as its element count; absent ⇒ `0`.
    ListCount,
}

/// A single feature slot of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    /// Input key read by this feature.
    pub key: String,
    /// Feature name as declared by the model artifact.
    pub name: String,
    /// Encoding.
    pub kind: FeatureKind,
}

impl FeatureSpec {
    /// Numeric feature whose name is the input key.
    pub fn numeric(key: &str) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
            kind: FeatureKind::Numeric,
        }
    }

    /// List-count feature named `name`, reading `key`.
    pub fn list_count(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind: FeatureKind::ListCount,
        }
    }
}

/// Versioned, ordered list of features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    version: String,
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    /// Creates a schema. Reordering `features` requires a new `version`.
    pub fn new(version: impl Into<String>, features: Vec<FeatureSpec>) -> Self {
        Self {
            version: version.into(),
            features,
        }
    }

    /// Schema of `resume_model` v1:
    /// `[experience_years, confidence_score, skill_count]`.
    pub fn resume_v1() -> Self {
        Self::new(
            "resume_v1",
            vec![
                FeatureSpec::numeric("experience_years"),
                FeatureSpec::numeric("confidence_score"),
                FeatureSpec::list_count("skills", "skill_count"),
            ],
        )
    }

    /// Schema version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Feature names in vector order.
    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// `true` for a schema without features.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn extract(&self, inputs: &Inputs) -> Result<Vec<f64>, DecisionError> {
        self.features
            .iter()
            .map(|spec| match spec.kind {
                FeatureKind::Numeric => numeric_value(inputs, &spec.key),
                FeatureKind::ListCount => list_count(inputs, &spec.key),
            })
            .collect()
    }
}

/// Ordered feature values plus the schema version that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema_version: String,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Wraps raw values, mostly useful for feeding models directly.
    pub fn new(schema_version: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            schema_version: schema_version.into(),
            values,
        }
    }

    /// Values in schema order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Version of the schema that produced the vector.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Vector length.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` for an empty vector.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Maps a decision type to its feature schema.
///
/// Unknown decision types fall back to the default schema: they still get
/// scored and recorded, with an `UNKNOWN` verdict from the policy engine.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    schemas: HashMap<String, FeatureSchema>,
    default_schema: FeatureSchema,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        let resume = FeatureSchema::resume_v1();
        Self::new(resume.clone()).with_schema(RESUME_SCREENING, resume)
    }
}

impl FeatureExtractor {
    /// Extractor with only a default schema.
    pub fn new(default_schema: FeatureSchema) -> Self {
        Self {
            schemas: HashMap::new(),
            default_schema,
        }
    }

    /// Registers the schema for `decision_type`.
    #[must_use]
    pub fn with_schema(mut self, decision_type: &str, schema: FeatureSchema) -> Self {
        self.schemas.insert(decision_type.to_string(), schema);
        self
    }

    /// Schema used for `decision_type`.
    pub fn schema_for(&self, decision_type: &str) -> &FeatureSchema {
        self.schemas
            .get(decision_type)
            .unwrap_or(&self.default_schema)
    }

    /// Default schema, the one the scoring model is checked against.
    pub fn default_schema(&self) -> &FeatureSchema {
        &self.default_schema
    }

    /// Builds the feature vector for a request.
    ///
    /// Pure and deterministic. Missing fields default to zero; only a present
    /// value of the wrong shape fails, with [`DecisionError::MalformedInput`].
    pub fn extract(
        &self,
        decision_type: &str,
        inputs: &Inputs,
    ) -> Result<FeatureVector, DecisionError> {
        // Every input ends up in the ledger, read by a feature or not.
        if let Some(key) = inputs.first_non_finite() {
            return Err(DecisionError::malformed(key, "number is not finite"));
        }
        let schema = self.schema_for(decision_type);
        let values = schema.extract(inputs)?;
        debug!(
            decision_type,
            schema = schema.version(),
            ?values,
            "features extracted"
        );
        Ok(FeatureVector::new(schema.version(), values))
    }
}

/// Reads `key` as a number.
///
/// Shared with the policy engine so both sides coerce identically.
pub(crate) fn numeric_value(inputs: &Inputs, key: &str) -> Result<f64, DecisionError> {
    let value = match inputs.get(key) {
        None => return Ok(0.0),
        Some(InputValue::Integer(i)) => *i as f64,
        Some(InputValue::Float(f)) => *f,
        Some(InputValue::Bool(b)) => f64::from(u8::from(*b)),
        Some(InputValue::Text(raw)) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| DecisionError::malformed(key, format!("`{raw}` is not a number")))?,
        Some(InputValue::Null) => 0.0,
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecisionError::malformed(key, "number is not finite"))
    }
}

fn list_count(inputs: &Inputs, key: &str) -> Result<f64, DecisionError> {
    match inputs.get(key) {
        None => Ok(0.0),
        Some(InputValue::Text(raw)) if raw.is_empty() => Ok(0.0),
        Some(InputValue::Text(raw)) => Ok(raw.split(',').count() as f64),
        Some(_) => Err(DecisionError::malformed(
            key,
            "expected a comma-separated string",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resume_inputs() -> Inputs {
        Inputs::new()
            .with("experience_years", 3)
            .with("confidence_score", 8)
            .with("skills", "python,sql,ml")
    }

    #[test]
    fn resume_vector_follows_schema_order() {
        let fx = FeatureExtractor::default();
        let vector = fx.extract(RESUME_SCREENING, &resume_inputs()).expect("extract");
        assert_eq!(vector.values(), &[3.0, 8.0, 3.0]);
        assert_eq!(vector.schema_version(), "resume_v1");
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let fx = FeatureExtractor::default();
        let vector = fx.extract(RESUME_SCREENING, &Inputs::new()).expect("extract");
        assert_eq!(vector.values(), &[0.0, 0.0, 0.0]);

        let with_nulls = Inputs::new()
            .with("experience_years", InputValue::Null)
            .with("skills", InputValue::Null);
        let vector = fx.extract(RESUME_SCREENING, &with_nulls).expect("extract");
        assert_eq!(vector.values(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn numeric_strings_and_bools_are_coerced() {
        let fx = FeatureExtractor::default();
        let inputs = Inputs::new()
            .with("experience_years", " 2.5 ")
            .with("confidence_score", true)
            .with("skills", "");
        let vector = fx.extract(RESUME_SCREENING, &inputs).expect("extract");
        assert_eq!(vector.values(), &[2.5, 1.0, 0.0]);
    }

    #[test]
    fn malformed_number_names_the_key() {
        let fx = FeatureExtractor::default();
        let inputs = Inputs::new().with("experience_years", "three");
        match fx.extract(RESUME_SCREENING, &inputs) {
            Err(DecisionError::MalformedInput { key, .. }) => assert_eq!(key, "experience_years"),
            other => panic!("expected MalformedInput, got {other:?}"),
        }

        let inputs = Inputs::new().with("confidence_score", "NaN");
        assert!(fx.extract(RESUME_SCREENING, &inputs).is_err());
    }

    #[test]
    fn non_finite_input_is_malformed_even_when_unused() {
        let fx = FeatureExtractor::default();
        let inputs = resume_inputs().with("note", f64::INFINITY);
        match fx.extract(RESUME_SCREENING, &inputs) {
            Err(DecisionError::MalformedInput { key, .. }) => assert_eq!(key, "note"),
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn non_text_skill_list_is_malformed() {
        let fx = FeatureExtractor::default();
        let inputs = Inputs::new().with("skills", 4);
        assert!(matches!(
            fx.extract(RESUME_SCREENING, &inputs),
            Err(DecisionError::MalformedInput { .. })
        ));
    }

    #[test]
    fn unknown_type_uses_default_schema() {
        let fx = FeatureExtractor::default();
        let vector = fx.extract("loan_approval", &resume_inputs()).expect("extract");
        assert_eq!(vector.values(), &[3.0, 8.0, 3.0]);
    }

    #[test]
    fn registered_schema_wins_over_default() {
        let fx = FeatureExtractor::default().with_schema(
            "loan_approval",
            FeatureSchema::new("loan_v1", vec![FeatureSpec::numeric("income")]),
        );
        let vector = fx
            .extract("loan_approval", &Inputs::new().with("income", 42_000))
            .expect("extract");
        assert_eq!(vector.values(), &[42_000.0]);
        assert_eq!(vector.schema_version(), "loan_v1");
    }

    fn arb_value() -> impl Strategy<Value = InputValue> {
        prop_oneof![
            Just(InputValue::Null),
            any::<bool>().prop_map(InputValue::Bool),
            any::<i64>().prop_map(InputValue::Integer),
            (-1.0e9..1.0e9f64).prop_map(InputValue::Float),
            "[a-z0-9,. ]{0,16}".prop_map(InputValue::Text),
        ]
    }

    proptest! {
        #[test]
        fn extraction_is_deterministic(
            exp in arb_value(),
            conf in arb_value(),
            skills in arb_value(),
        ) {
            let fx = FeatureExtractor::default();
            let inputs = Inputs::new()
                .with("experience_years", exp)
                .with("confidence_score", conf)
                .with("skills", skills);

            let first = fx.extract(RESUME_SCREENING, &inputs);
            let second = fx.extract(RESUME_SCREENING, &inputs);
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    let a_bits: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
                    let b_bits: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
                    prop_assert_eq!(a_bits, b_bits);
                }
                (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
                _ => prop_assert!(false, "extraction outcome changed between calls"),
            }
        }
    }
}
