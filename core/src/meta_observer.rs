//! MetaObserver – in-process metrics of the decision pipeline.
//!
//! Collects:
//! - request count,
//! - verdict breakdown,
//! - failures per pipeline stage,
//! - pipeline latency (last, EMA, min, max).
//!
//! Nothing here touches the disk or blocks on I/O: it sits on the hot path of
//! every request. The orchestrator keeps it behind a mutex.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::Stage;
use crate::policy_core::DecisionKind;

/// EMA smoothing factor for latency.
const LATENCY_ALPHA: f64 = 0.1;

/// Latency of whole pipeline runs, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Most recent run.
    pub last_ms: f64,
    /// Exponential moving average.
    pub avg_ms_ema: f64,
    /// Slowest run.
    pub max_ms: f64,
    /// Fastest run.
    pub min_ms: f64,
}

/// How many verdicts of each kind were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerdictBreakdown {
    /// `SHORTLIST`.
    pub shortlist: u64,
    /// `REVIEW`.
    pub review: u64,
    /// `REJECT`.
    pub reject: u64,
    /// `UNKNOWN`.
    pub unknown: u64,
}

/// How many requests failed in each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureBreakdown {
    /// Malformed inputs.
    pub extraction: u64,
    /// Model unavailable / invalid vector.
    pub scoring: u64,
    /// Ledger write failures.
    pub recording: u64,
    /// Replays of unknown ids. Replays are not requests, so these do not
    /// count towards `total_requests` or latency.
    pub lookup: u64,
}

/// Point-in-time copy of the metrics, ready to be serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetricsSnapshot {
    /// Milliseconds since the Unix epoch of the last update.
    pub last_update_ms: u128,
    /// Requests seen, successful or not.
    pub total_requests: u64,
    /// Pipeline latency.
    pub latency: LatencyStats,
    /// Recorded verdicts.
    pub verdicts: VerdictBreakdown,
    /// Failed requests.
    pub failures: FailureBreakdown,
}

/// Counter set updated after every request.
#[derive(Debug, Default)]
pub struct MetaObserver {
    snapshot: PipelineMetricsSnapshot,
}

impl MetaObserver {
    /// Observer with every metric at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request that produced and recorded `decision`.
    pub fn observe_decision(&mut self, decision: DecisionKind, latency: Duration) {
        let verdicts = &mut self.snapshot.verdicts;
        let counter = match decision {
            DecisionKind::Shortlist => &mut verdicts.shortlist,
            DecisionKind::Review => &mut verdicts.review,
            DecisionKind::Reject => &mut verdicts.reject,
            DecisionKind::Unknown => &mut verdicts.unknown,
        };
        *counter = counter.saturating_add(1);
        self.observe_request(latency);
    }

    /// Records a request that failed in `stage`.
    pub fn observe_failure(&mut self, stage: Stage, latency: Duration) {
        let failures = &mut self.snapshot.failures;
        let counter = match stage {
            Stage::Extraction => &mut failures.extraction,
            Stage::Scoring => &mut failures.scoring,
            Stage::Recording => &mut failures.recording,
            Stage::Lookup => &mut failures.lookup,
        };
        *counter = counter.saturating_add(1);
        self.observe_request(latency);
    }

    /// Records a replay asked for an id the ledger does not hold.
    pub fn observe_lookup_miss(&mut self) {
        let failures = &mut self.snapshot.failures;
        failures.lookup = failures.lookup.saturating_add(1);
        self.snapshot.last_update_ms = current_unix_time_ms();
    }

    fn observe_request(&mut self, latency: Duration) {
        let snap = &mut self.snapshot;
        snap.total_requests = snap.total_requests.saturating_add(1);

        let latency_ms = latency.as_secs_f64() * 1_000.0;
        let first = snap.total_requests == 1;
        let stats = &mut snap.latency;
        stats.last_ms = latency_ms;
        if first {
            stats.avg_ms_ema = latency_ms;
            stats.min_ms = latency_ms;
            stats.max_ms = latency_ms;
        } else {
            stats.avg_ms_ema = (1.0 - LATENCY_ALPHA) * stats.avg_ms_ema + LATENCY_ALPHA * latency_ms;
            stats.max_ms = stats.max_ms.max(latency_ms);
            stats.min_ms = stats.min_ms.min(latency_ms);
        }

        snap.last_update_ms = current_unix_time_ms();
    }

    /// Copy of the current metrics.
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        self.snapshot.clone()
    }

    /// Zeroes every metric.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Milliseconds since the Unix epoch; `0` if the clock is before it.
fn current_unix_time_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
