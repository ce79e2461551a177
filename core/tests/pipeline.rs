//! End-to-end runs against the bundled model artifact and a file ledger.

use std::path::{Path, PathBuf};

use decision_core::config::{LedgerConfig, ModelConfig};
use decision_core::{DecisionKind, EngineConfig, Inputs, LedgerStore, Replay};

fn bundled_model() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../models/resume_model_v1.json")
}

fn config(ledger: &Path) -> EngineConfig {
    EngineConfig {
        model: ModelConfig {
            path: bundled_model(),
            ..ModelConfig::default()
        },
        ledger: LedgerConfig {
            path: Some(ledger.to_path_buf()),
        },
    }
}

fn candidate(experience: i64, confidence: i64, skills: &str) -> Inputs {
    Inputs::new()
        .with("experience_years", experience)
        .with("confidence_score", confidence)
        .with("skills", skills)
}

#[test]
fn decisions_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = dir.path().join("ledger.jsonl");

    {
        let orch = config(&ledger).build().expect("build");

        let strong = orch
            .submit("resume_screening", candidate(3, 8, "python,sql,ml"))
            .expect("strong");
        assert_eq!(strong.decision_id, 1);
        assert_eq!(strong.final_decision.decision, DecisionKind::Shortlist);

        let weak = orch
            .submit("resume_screening", candidate(0, 2, ""))
            .expect("weak");
        assert_eq!(weak.final_decision.decision, DecisionKind::Reject);

        let borderline = orch
            .submit("resume_screening", candidate(1, 8, "python,sql"))
            .expect("borderline");
        assert_eq!(borderline.final_decision.decision, DecisionKind::Review);

        let metrics = orch.metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.verdicts.shortlist, 1);
    }

    let orch = config(&ledger).build().expect("reopen");
    assert_eq!(orch.recorder().store().ids().expect("ids"), vec![1, 2, 3]);

    let record = orch.record(1).expect("load").expect("present");
    assert_eq!(record.decision_type, "resume_screening");
    assert!((record.prediction.score - 0.81).abs() < 1e-12);
    assert_eq!(record.prediction.model_version, "v1");
    assert_eq!(record.inputs, candidate(3, 8, "python,sql,ml"));

    let counts = orch.recorder().store().row_counts(1).expect("counts");
    assert_eq!(counts.decisions, 1);
    assert_eq!(counts.inputs, 3);
    assert_eq!(counts.predictions, 1);
    assert_eq!(counts.outcomes, 1);

    for id in 1..=3 {
        assert!(orch.replay(id).expect("replay").is_reproduced(), "decision {id}");
    }

    let next = orch
        .submit("resume_screening", candidate(5, 9, "rust"))
        .expect("after reopen");
    assert_eq!(next.decision_id, 4);
}

#[test]
fn long_float_inputs_come_back_bit_exact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = dir.path().join("ledger.jsonl");
    let inputs = Inputs::new()
        .with("experience_years", 4)
        .with("confidence_score", 9.091_915_214_779_117)
        .with("skills", "rust,sql");

    let id = config(&ledger)
        .build()
        .expect("build")
        .submit("resume_screening", inputs.clone())
        .expect("submit")
        .decision_id;

    let orch = config(&ledger).build().expect("reopen");
    let record = orch.record(id).expect("load").expect("present");
    assert_eq!(record.inputs, inputs);
    assert!(orch.replay(id).expect("replay").is_reproduced());
}

#[test]
fn replay_against_a_newer_model_is_flagged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = dir.path().join("ledger.jsonl");

    let id = config(&ledger)
        .build()
        .expect("build")
        .submit("resume_screening", candidate(3, 8, "python,sql,ml"))
        .expect("submit")
        .decision_id;

    let v2 = dir.path().join("resume_model_v2.json");
    std::fs::write(
        &v2,
        r#"{"model_name":"resume_model","model_version":"v2",
            "feature_names":["experience_years","confidence_score","skill_count"],
            "coefficients":[0.5,0.3,0.2],"intercept":-2.0}"#,
    )
    .expect("write v2");

    let mut cfg = config(&ledger);
    cfg.model.path = v2;
    cfg.model.version = "v2".to_string();
    let orch = cfg.build().expect("build v2");

    match orch.replay(id).expect("replay") {
        Replay::ModelVersionMismatch { record, active } => {
            assert_eq!(record.prediction.model_version, "v1");
            assert_eq!(active.version, "v2");
        }
        other => panic!("expected a version mismatch, got {other:?}"),
    }
}

#[test]
fn malformed_requests_leave_the_file_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = dir.path().join("ledger.jsonl");
    let orch = config(&ledger).build().expect("build");

    let err = orch
        .submit(
            "resume_screening",
            Inputs::new().with("experience_years", "a decade"),
        )
        .unwrap_err();
    assert!(err.is_caller_error());

    let len = std::fs::metadata(&ledger).expect("metadata").len();
    assert_eq!(len, 0);
    assert!(orch.recorder().store().ids().expect("ids").is_empty());
}
