//! Policy core: turns a model score into a final decision.
//!
//! The model only suggests; the policy decides. Each decision type owns an
//! ordered cascade of rules. Rules are evaluated top to bottom and the first
//! match wins, so every verdict traces back to one named rule.
//!
//! Unknown decision types are not an error: they resolve to an `UNKNOWN`
//! verdict that is recorded like any other.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::features::{numeric_value, RESUME_SCREENING};
use crate::request::Inputs;

/// Reason attached to the fallback verdict for unknown decision types.
pub const UNSUPPORTED_REASON: &str = "Unsupported decision type";

/// Final outcome of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    /// Approved for the next step.
    Shortlist,
    /// Handed to a human.
    Review,
    /// Declined.
    Reject,
    /// No policy exists for the decision type.
    Unknown,
}

impl DecisionKind {
    /// Name as stored in `outcomes.final_result`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shortlist => "SHORTLIST",
            Self::Review => "REVIEW",
            Self::Reject => "REJECT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a stored `final_result`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SHORTLIST" => Some(Self::Shortlist),
            "REVIEW" => Some(Self::Review),
            "REJECT" => Some(Self::Reject),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision plus the human-readable reason behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Outcome.
    pub decision: DecisionKind,
    /// Why, in words an auditor can read.
    pub reason: String,
}

impl Verdict {
    /// Creates a verdict.
    pub fn new(decision: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }

    /// Fallback for decision types without a cascade.
    pub fn unsupported() -> Self {
        Self::new(DecisionKind::Unknown, UNSUPPORTED_REASON)
    }
}

/// What a rule gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Model score in `[0, 1]`.
    pub score: f64,
    /// Raw request inputs.
    pub inputs: &'a Inputs,
}

type Predicate = Arc<dyn Fn(&RuleContext<'_>) -> bool + Send + Sync>;

/// A named predicate with the verdict it produces when it matches.
#[derive(Clone)]
pub struct Rule {
    name: String,
    predicate: Predicate,
    verdict: Verdict,
}

impl Rule {
    /// Creates a rule.
    pub fn new<F>(name: impl Into<String>, verdict: Verdict, predicate: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            verdict,
        }
    }

    /// Rule name, for audit traces.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("verdict", &self.verdict)
            .finish_non_exhaustive()
    }
}

/// Ordered rules plus the verdict used when none matches.
#[derive(Debug, Clone)]
pub struct Cascade {
    rules: Vec<Rule>,
    fallback: Verdict,
}

impl Cascade {
    /// Cascade with no rules yet.
    pub fn new(fallback: Verdict) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Appends a rule at the bottom of the cascade.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    /// Evaluates the cascade. Returns the verdict and the matching rule name
    /// (`None` for the fallback).
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> (Verdict, Option<&str>) {
        self.rules
            .iter()
            .find(|rule| (rule.predicate)(ctx))
            .map_or_else(
                || (self.fallback.clone(), None),
                |rule| (rule.verdict.clone(), Some(rule.name())),
            )
    }
}

/// Thresholds of the `resume_screening` cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeScreeningThresholds {
    /// Scores strictly below this are rejected, whatever else is true.
    pub safety_floor: f64,
    /// Minimum score for automatic shortlisting.
    pub shortlist_score: f64,
    /// Minimum whole years of experience for automatic shortlisting.
    pub shortlist_experience_years: u32,
}

impl ResumeScreeningThresholds {
    /// Safety floor.
    pub const SAFETY_FLOOR: f64 = 0.50;
    /// Shortlist score.
    pub const SHORTLIST_SCORE: f64 = 0.70;
    /// Shortlist experience.
    pub const SHORTLIST_EXPERIENCE_YEARS: u32 = 2;
}

impl Default for ResumeScreeningThresholds {
    fn default() -> Self {
        Self {
            safety_floor: Self::SAFETY_FLOOR,
            shortlist_score: Self::SHORTLIST_SCORE,
            shortlist_experience_years: Self::SHORTLIST_EXPERIENCE_YEARS,
        }
    }
}

/// Resume screening cascade:
///
/// 1. `safety_floor` – low model confidence rejects, overriding everything;
/// 2. `business_approval` – high score with enough experience shortlists;
/// 3. fallback – a human reviews.
pub fn resume_screening(thresholds: ResumeScreeningThresholds) -> Cascade {
    let ResumeScreeningThresholds {
        safety_floor,
        shortlist_score,
        shortlist_experience_years,
    } = thresholds;

    Cascade::new(Verdict::new(
        DecisionKind::Review,
        "Borderline case, needs human review",
    ))
    .rule(Rule::new(
        "safety_floor",
        Verdict::new(DecisionKind::Reject, "Low AI confidence score"),
        move |ctx| ctx.score < safety_floor,
    ))
    .rule(Rule::new(
        "business_approval",
        Verdict::new(DecisionKind::Shortlist, "High score with sufficient experience"),
        move |ctx| {
            ctx.score >= shortlist_score
                && experience_years(ctx.inputs)
                    .is_some_and(|years| years >= f64::from(shortlist_experience_years))
        },
    ))
}

/// Whole years of experience; `None` when the value is unusable.
///
/// Fractional years are truncated, so 1.9 years is still 1 year.
fn experience_years(inputs: &Inputs) -> Option<f64> {
    numeric_value(inputs, "experience_years")
        .ok()
        .map(f64::trunc)
}

/// Registry of cascades keyed by decision type.
#[derive(Debug, Clone, Default)]
pub struct PolicyCore {
    cascades: HashMap<String, Cascade>,
}

impl PolicyCore {
    /// Policy with no cascades: everything resolves to `UNKNOWN`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in policies with default thresholds.
    pub fn new() -> Self {
        Self::with_resume_thresholds(ResumeScreeningThresholds::default())
    }

    /// Built-in policies with custom resume screening thresholds.
    pub fn with_resume_thresholds(thresholds: ResumeScreeningThresholds) -> Self {
        Self::empty().register(RESUME_SCREENING, resume_screening(thresholds))
    }

    /// Adds or replaces the cascade for `decision_type`.
    #[must_use]
    pub fn register(mut self, decision_type: &str, cascade: Cascade) -> Self {
        self.cascades.insert(decision_type.to_string(), cascade);
        self
    }

    /// `true` when `decision_type` has a cascade.
    pub fn supports(&self, decision_type: &str) -> bool {
        self.cascades.contains_key(decision_type)
    }

    /// Decides a request. Pure and deterministic; never fails.
    pub fn decide(&self, decision_type: &str, score: f64, inputs: &Inputs) -> Verdict {
        self.decide_traced(decision_type, score, inputs).0
    }

    /// Like [`PolicyCore::decide`], also naming the rule that fired
    /// (`None` for a cascade fallback or an unknown type).
    pub fn decide_traced(
        &self,
        decision_type: &str,
        score: f64,
        inputs: &Inputs,
    ) -> (Verdict, Option<String>) {
        let Some(cascade) = self.cascades.get(decision_type) else {
            return (Verdict::unsupported(), None);
        };
        let (verdict, rule) = cascade.evaluate(&RuleContext { score, inputs });
        (verdict, rule.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_experience(years: i64) -> Inputs {
        Inputs::new().with("experience_years", years)
    }

    #[test]
    fn safety_floor_overrides_experience() {
        let core = PolicyCore::new();
        let verdict = core.decide(RESUME_SCREENING, 0.49, &with_experience(10));
        assert_eq!(verdict.decision, DecisionKind::Reject);
        assert_eq!(verdict.reason, "Low AI confidence score");
    }

    #[test]
    fn shortlist_at_exact_boundary() {
        let core = PolicyCore::new();
        let (verdict, rule) = core.decide_traced(RESUME_SCREENING, 0.70, &with_experience(2));
        assert_eq!(verdict.decision, DecisionKind::Shortlist);
        assert_eq!(verdict.reason, "High score with sufficient experience");
        assert_eq!(rule.as_deref(), Some("business_approval"));
    }

    #[test]
    fn just_below_shortlist_score_goes_to_review() {
        let core = PolicyCore::new();
        let verdict = core.decide(RESUME_SCREENING, 0.699, &with_experience(5));
        assert_eq!(verdict.decision, DecisionKind::Review);
    }

    #[test]
    fn high_score_without_experience_goes_to_review() {
        let core = PolicyCore::new();
        let (verdict, rule) = core.decide_traced(RESUME_SCREENING, 0.80, &with_experience(0));
        assert_eq!(verdict.decision, DecisionKind::Review);
        assert_eq!(verdict.reason, "Borderline case, needs human review");
        assert_eq!(rule, None);
    }

    #[test]
    fn fractional_experience_is_truncated() {
        let core = PolicyCore::new();
        let inputs = Inputs::new().with("experience_years", 1.9);
        assert_eq!(core.decide(RESUME_SCREENING, 0.9, &inputs).decision, DecisionKind::Review);
    }

    #[test]
    fn unusable_experience_falls_back_to_review() {
        let core = PolicyCore::new();
        let inputs = Inputs::new().with("experience_years", "lots");
        assert_eq!(core.decide(RESUME_SCREENING, 0.95, &inputs).decision, DecisionKind::Review);
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let core = PolicyCore::new();
        let verdict = core.decide("loan_approval", 0.99, &Inputs::new());
        assert_eq!(verdict, Verdict::new(DecisionKind::Unknown, "Unsupported decision type"));
        assert!(!core.supports("loan_approval"));
    }

    #[test]
    fn thresholds_are_overridable_without_reordering() {
        let core = PolicyCore::with_resume_thresholds(ResumeScreeningThresholds {
            shortlist_experience_years: 5,
            ..ResumeScreeningThresholds::default()
        });
        assert_eq!(
            core.decide(RESUME_SCREENING, 0.9, &with_experience(3)).decision,
            DecisionKind::Review
        );
        assert_eq!(
            core.decide(RESUME_SCREENING, 0.9, &with_experience(5)).decision,
            DecisionKind::Shortlist
        );
        assert_eq!(
            resume_screening(ResumeScreeningThresholds::default()).rule_names(),
            ["safety_floor", "business_approval"]
        );
    }

    #[test]
    fn new_types_are_additive() {
        let core = PolicyCore::new().register(
            "loan_approval",
            Cascade::new(Verdict::new(DecisionKind::Review, "manual"))
                .rule(Rule::new("auto", Verdict::new(DecisionKind::Shortlist, "auto"), |ctx| {
                    ctx.score > 0.9
                })),
        );
        assert_eq!(core.decide("loan_approval", 0.95, &Inputs::new()).decision, DecisionKind::Shortlist);
        assert_eq!(
            core.decide(RESUME_SCREENING, 0.95, &with_experience(3)).decision,
            DecisionKind::Shortlist
        );
    }

    #[test]
    fn decision_kind_serializes_uppercase() {
        let json = serde_json::to_string(&Verdict::unsupported()).expect("json");
        assert_eq!(json, r#"{"decision":"UNKNOWN","reason":"Unsupported decision type"}"#);
        assert_eq!(DecisionKind::parse("SHORTLIST"), Some(DecisionKind::Shortlist));
        assert_eq!(DecisionKind::parse("shortlist"), None);
    }

    proptest! {
        #[test]
        fn below_floor_always_rejects(score in 0.0..0.50f64, years in 0i64..60) {
            let verdict = PolicyCore::new().decide(RESUME_SCREENING, score, &with_experience(years));
            prop_assert_eq!(verdict.decision, DecisionKind::Reject);
        }

        #[test]
        fn high_score_and_experience_shortlists(score in 0.70..=1.0f64, years in 2i64..60) {
            let verdict = PolicyCore::new().decide(RESUME_SCREENING, score, &with_experience(years));
            prop_assert_eq!(verdict.decision, DecisionKind::Shortlist);
        }

        #[test]
        fn everything_else_is_reviewed(score in 0.50..=1.0f64, years in 0i64..60) {
            prop_assume!(!(score >= 0.70 && years >= 2));
            let verdict = PolicyCore::new().decide(RESUME_SCREENING, score, &with_experience(years));
            prop_assert_eq!(verdict.decision, DecisionKind::Review);
        }
    }
}
