#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

//! Line-oriented JSON front end for the decision core.
//!
//! Reads one command per line from stdin and writes one JSON object per line
//! to stdout. Logs go to stderr (`RUST_LOG` controls the level).
//!
//! Commands:
//! - `{"decision_type": "...", "inputs": {...}}` – decide and record a request;
//! - `:replay <id>` – re-run a stored decision against the active model;
//! - `:stats` – pipeline metrics;
//! - `exit` / `quit` – stop (EOF works too).

use std::sync::Arc;

use anyhow::{Context, Result};
use decision_core::{
    DecisionError, DecisionId, DecisionRequest, EngineConfig, Orchestrator, Replay, SubmitResponse,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// One parsed input line.
#[derive(Debug)]
enum Command {
    Submit(DecisionRequest),
    Replay(DecisionId),
    Stats,
    Exit,
    Invalid(String),
}

/// Parses a line; `None` for blank lines.
fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Some(Command::Exit);
    }
    if line == ":stats" {
        return Some(Command::Stats);
    }
    if let Some(rest) = line.strip_prefix(":replay") {
        return Some(match rest.trim().parse::<DecisionId>() {
            Ok(id) => Command::Replay(id),
            Err(_) => Command::Invalid(format!("`{}` is not a decision id", rest.trim())),
        });
    }
    Some(match serde_json::from_str::<DecisionRequest>(line) {
        Ok(request) => Command::Submit(request),
        Err(e) => Command::Invalid(format!("invalid request: {e}")),
    })
}

fn error_json(err: &DecisionError) -> Value {
    json!({
        "error": {
            "stage": err.stage().as_str(),
            "message": err.to_string(),
            "caller_error": err.is_caller_error(),
        }
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        json!({ "error": { "stage": "output", "message": e.to_string(), "caller_error": false } })
    })
}

/// Runs a command against the orchestrator. Blocking: ledger I/O happens here.
fn execute(orchestrator: &Orchestrator, command: Command) -> Value {
    match command {
        Command::Submit(request) => match orchestrator.handle(&request) {
            Ok(outcome) => to_json(&SubmitResponse::from(outcome)),
            Err(err) => error_json(&err),
        },
        Command::Replay(id) => match orchestrator.replay(id) {
            Ok(Replay::Reproduced(record)) => json!({
                "decision_id": id,
                "replay": "reproduced",
                "record": to_json(&record),
            }),
            Ok(Replay::Diverged {
                record,
                prediction,
                verdict,
            }) => json!({
                "decision_id": id,
                "replay": "diverged",
                "recorded": { "score": record.prediction.score, "final_decision": to_json(&record.verdict) },
                "recomputed": { "score": prediction.score, "final_decision": to_json(&verdict) },
            }),
            Ok(Replay::ModelVersionMismatch { record, active }) => json!({
                "decision_id": id,
                "replay": "model_version_mismatch",
                "recorded_version": record.prediction.model_version,
                "active_version": active.version,
            }),
            Err(err) => error_json(&err),
        },
        Command::Stats => to_json(&orchestrator.metrics()),
        Command::Invalid(message) => json!({
            "error": { "stage": "request", "message": message, "caller_error": true }
        }),
        Command::Exit => Value::Null,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::load().context("Unable to load configuration")?;
    info!(?config, "decision-cli starting");
    let orchestrator = Arc::new(config.build().context("Unable to build the decision engine")?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Unable to read stdin")? {
        let command = match parse_line(&line) {
            None => continue,
            Some(Command::Exit) => break,
            Some(command) => command,
        };

        let orch = Arc::clone(&orchestrator);
        let reply = tokio::task::spawn_blocking(move || execute(&orch, command))
            .await
            .context("Decision task panicked")?;

        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
        stdout.flush().await?;
    }

    info!(metrics = ?orchestrator.metrics(), "decision-cli stopping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_core::{
        AuditRecorder, FeatureExtractor, FeatureVector, MemoryLedger, ModelId, PolicyCore,
        Prediction, ScoringModel,
    };

    struct FixedModel(f64);

    impl ScoringModel for FixedModel {
        fn model_id(&self) -> ModelId {
            ModelId::new("resume_model", "v1")
        }

        fn score(&self, _vector: &FeatureVector) -> Result<Prediction, DecisionError> {
            Prediction::new(&self.model_id(), self.0)
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            FeatureExtractor::default(),
            Arc::new(FixedModel(0.82)),
            PolicyCore::new(),
            AuditRecorder::new(Arc::new(MemoryLedger::new())),
        )
    }

    #[test]
    fn parses_commands() {
        assert!(parse_line("   ").is_none());
        assert!(matches!(parse_line("QUIT"), Some(Command::Exit)));
        assert!(matches!(parse_line(":stats"), Some(Command::Stats)));
        assert!(matches!(parse_line(":replay 12"), Some(Command::Replay(12))));
        assert!(matches!(parse_line(":replay x"), Some(Command::Invalid(_))));
        assert!(matches!(parse_line("{oops"), Some(Command::Invalid(_))));
        assert!(matches!(
            parse_line(r#"{"decision_type":"resume_screening","inputs":{}}"#),
            Some(Command::Submit(_))
        ));
    }

    #[test]
    fn submit_then_replay() {
        let orch = orchestrator();
        let line = r#"{"decision_type":"resume_screening","inputs":{"experience_years":3,"confidence_score":8,"skills":"python,sql,ml"}}"#;
        let reply = execute(&orch, parse_line(line).expect("command"));
        assert_eq!(reply["decision_id"], 1);
        assert_eq!(reply["final_decision"]["decision"], "SHORTLIST");

        let replay = execute(&orch, Command::Replay(1));
        assert_eq!(replay["replay"], "reproduced");
    }

    #[test]
    fn failures_carry_stage() {
        let orch = orchestrator();
        let line = r#"{"decision_type":"resume_screening","inputs":{"experience_years":"many"}}"#;
        let reply = execute(&orch, parse_line(line).expect("command"));
        assert_eq!(reply["error"]["stage"], "extraction");
        assert_eq!(reply["error"]["caller_error"], true);

        let missing = execute(&orch, Command::Replay(99));
        assert_eq!(missing["error"]["stage"], "lookup");
    }
}
