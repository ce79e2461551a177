//! Append-only decision ledger.
//!
//! The ledger is four logical tables keyed by the same decision id:
//!
//! ```text
//! decisions        (id, decision_type)
//! decision_inputs  (decision_id, input_key, input_value)
//! predictions      (decision_id, model_name, model_version, score)
//! outcomes         (decision_id, final_result, feedback_notes)
//! ```
//!
//! Rows are only ever written through a [`LedgerTransaction`]. Nothing a
//! transaction writes is visible before [`LedgerTransaction::commit`], and a
//! transaction dropped without commit (error path, cancelled caller, panic
//! unwind) rolls back. A commit is refused unless the decision has exactly one
//! header, one prediction and one outcome.
//!
//! Two stores ship with the crate: [`MemoryLedger`] and the durable
//! [`FileLedger`].

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Identifier shared by all rows of one decision.
pub type DecisionId = i64;

/// Ledger failure. Whatever the variant, nothing was committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing medium failed.
    #[error("ledger I/O error: {0}")]
    Io(String),
    /// Stored data could not be decoded.
    #[error("ledger data is corrupt: {0}")]
    Corrupt(String),
    /// The transaction broke a ledger invariant.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// `decisions` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRow {
    /// Generated identifier.
    pub id: DecisionId,
    /// Decision type tag.
    pub decision_type: String,
}

/// `decision_inputs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRow {
    /// Owning decision.
    pub decision_id: DecisionId,
    /// Input key.
    pub input_key: String,
    /// JSON-encoded scalar.
    pub input_value: String,
}

/// `predictions` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// Owning decision.
    pub decision_id: DecisionId,
    /// Model family.
    pub model_name: String,
    /// Model version that produced the score.
    pub model_version: String,
    /// Rounded score.
    pub score: f64,
}

/// `outcomes` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRow {
    /// Owning decision.
    pub decision_id: DecisionId,
    /// Final decision name.
    pub final_result: String,
    /// Reason given by the policy.
    pub feedback_notes: String,
}

/// All committed rows of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Header.
    pub decision: DecisionRow,
    /// Inputs, in insertion order.
    pub inputs: Vec<InputRow>,
    /// Prediction.
    pub prediction: PredictionRow,
    /// Outcome.
    pub outcome: OutcomeRow,
}

/// Visible row count per table for one decision id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    /// `decisions`.
    pub decisions: usize,
    /// `decision_inputs`.
    pub inputs: usize,
    /// `predictions`.
    pub predictions: usize,
    /// `outcomes`.
    pub outcomes: usize,
}

impl RowCounts {
    /// Sum over the four tables.
    pub fn total(&self) -> usize {
        self.decisions + self.inputs + self.predictions + self.outcomes
    }

    fn of(entry: &LedgerEntry) -> Self {
        Self {
            decisions: 1,
            inputs: entry.inputs.len(),
            predictions: 1,
            outcomes: 1,
        }
    }
}

/// Connection handle to a ledger.
pub trait LedgerStore: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> Result<Box<dyn LedgerTransaction + '_>, StoreError>;

    /// Committed rows of `id`, if any.
    fn entry(&self, id: DecisionId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Committed row counts of `id` across the four tables.
    fn row_counts(&self, id: DecisionId) -> Result<RowCounts, StoreError> {
        Ok(self.entry(id)?.as_ref().map(RowCounts::of).unwrap_or_default())
    }

    /// Ids of all committed decisions, ascending.
    fn ids(&self) -> Result<Vec<DecisionId>, StoreError>;
}

/// Unit of work against a [`LedgerStore`].
pub trait LedgerTransaction {
    /// Writes the header and returns the generated id.
    fn insert_decision(&mut self, decision_type: &str) -> Result<DecisionId, StoreError>;

    /// Writes one input row.
    fn insert_input(&mut self, row: InputRow) -> Result<(), StoreError>;

    /// Writes the prediction row.
    fn insert_prediction(&mut self, row: PredictionRow) -> Result<(), StoreError>;

    /// Writes the outcome row.
    fn insert_outcome(&mut self, row: OutcomeRow) -> Result<(), StoreError>;

    /// Makes every row visible at once, or none of them.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Rows written by a transaction that is not committed yet.
#[derive(Debug, Default)]
struct Pending {
    decision: Option<DecisionRow>,
    inputs: Vec<InputRow>,
    prediction: Option<PredictionRow>,
    outcome: Option<OutcomeRow>,
}

impl Pending {
    fn header_id(&self) -> Result<DecisionId, StoreError> {
        self.decision
            .as_ref()
            .map(|d| d.id)
            .ok_or_else(|| StoreError::Rejected("no decision header written".into()))
    }

    fn check_owner(&self, decision_id: DecisionId) -> Result<(), StoreError> {
        let id = self.header_id()?;
        if id == decision_id {
            Ok(())
        } else {
            Err(StoreError::Rejected(format!(
                "row for decision {decision_id} in transaction of decision {id}"
            )))
        }
    }

    fn set_decision(&mut self, row: DecisionRow) -> Result<(), StoreError> {
        if self.decision.is_some() {
            return Err(StoreError::Rejected("decision header written twice".into()));
        }
        self.decision = Some(row);
        Ok(())
    }

    fn push_input(&mut self, row: InputRow) -> Result<(), StoreError> {
        self.check_owner(row.decision_id)?;
        if self.inputs.iter().any(|i| i.input_key == row.input_key) {
            return Err(StoreError::Rejected(format!(
                "input `{}` written twice",
                row.input_key
            )));
        }
        self.inputs.push(row);
        Ok(())
    }

    fn set_prediction(&mut self, row: PredictionRow) -> Result<(), StoreError> {
        self.check_owner(row.decision_id)?;
        if self.prediction.is_some() {
            return Err(StoreError::Rejected("prediction written twice".into()));
        }
        self.prediction = Some(row);
        Ok(())
    }

    fn set_outcome(&mut self, row: OutcomeRow) -> Result<(), StoreError> {
        self.check_owner(row.decision_id)?;
        if self.outcome.is_some() {
            return Err(StoreError::Rejected("outcome written twice".into()));
        }
        self.outcome = Some(row);
        Ok(())
    }

    /// Turns the staged rows into a complete entry, refusing partial ones.
    fn finish(self) -> Result<LedgerEntry, StoreError> {
        let decision = self
            .decision
            .ok_or_else(|| StoreError::Rejected("no decision header written".into()))?;
        let prediction = self.prediction.ok_or_else(|| {
            StoreError::Rejected(format!("decision {} has no prediction", decision.id))
        })?;
        let outcome = self.outcome.ok_or_else(|| {
            StoreError::Rejected(format!("decision {} has no outcome", decision.id))
        })?;
        Ok(LedgerEntry {
            decision,
            inputs: self.inputs,
            prediction,
            outcome,
        })
    }
}

/// Where a staged transaction lands on commit.
trait CommitTarget: Send + Sync {
    fn allocate_id(&self) -> DecisionId;
    fn apply(&self, entry: LedgerEntry) -> Result<(), StoreError>;
}

/// Transaction shared by the bundled stores: stage in memory, apply on commit.
struct StagedTransaction<'a> {
    target: &'a dyn CommitTarget,
    pending: Pending,
    done: bool,
}

impl<'a> StagedTransaction<'a> {
    fn new(target: &'a dyn CommitTarget) -> Self {
        Self {
            target,
            pending: Pending::default(),
            done: false,
        }
    }
}

impl LedgerTransaction for StagedTransaction<'_> {
    fn insert_decision(&mut self, decision_type: &str) -> Result<DecisionId, StoreError> {
        if self.pending.decision.is_some() {
            return Err(StoreError::Rejected("decision header written twice".into()));
        }
        let id = self.target.allocate_id();
        self.pending.set_decision(DecisionRow {
            id,
            decision_type: decision_type.to_string(),
        })?;
        Ok(id)
    }

    fn insert_input(&mut self, row: InputRow) -> Result<(), StoreError> {
        self.pending.push_input(row)
    }

    fn insert_prediction(&mut self, row: PredictionRow) -> Result<(), StoreError> {
        self.pending.set_prediction(row)
    }

    fn insert_outcome(&mut self, row: OutcomeRow) -> Result<(), StoreError> {
        self.pending.set_outcome(row)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        let header = pending.decision.as_ref().map(|d| d.id);
        let result = pending.finish().and_then(|entry| self.target.apply(entry));
        self.done = true;
        if let Err(err) = &result {
            warn!(decision_id = ?header, %err, "ledger commit failed, transaction rolled back");
        }
        result
    }
}

impl Drop for StagedTransaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        match self.pending.decision.as_ref() {
            Some(header) => warn!(decision_id = header.id, "ledger transaction rolled back"),
            None => debug!("empty ledger transaction dropped"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Io("ledger lock poisoned".into()))
}

/// Committed entries indexed by id.
#[derive(Debug, Default)]
struct Tables {
    entries: BTreeMap<DecisionId, LedgerEntry>,
}

impl Tables {
    fn insert(&mut self, entry: LedgerEntry) -> Result<(), StoreError> {
        let id = entry.decision.id;
        if self.entries.contains_key(&id) {
            return Err(StoreError::Rejected(format!("decision {id} already committed")));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    fn next_id(&self) -> DecisionId {
        self.entries.keys().next_back().map_or(1, |last| last + 1)
    }
}

/// In-process ledger.
///
/// Ids come from a counter, so ids of rolled-back transactions are never
/// reused (auto-increment semantics).
#[derive(Debug)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Empty ledger; the first id is `1`.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl CommitTarget for MemoryLedger {
    fn allocate_id(&self) -> DecisionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        lock(&self.tables)?.insert(entry)
    }
}

impl LedgerStore for MemoryLedger {
    fn begin(&self) -> Result<Box<dyn LedgerTransaction + '_>, StoreError> {
        Ok(Box::new(StagedTransaction::new(self)))
    }

    fn entry(&self, id: DecisionId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(lock(&self.tables)?.entries.get(&id).cloned())
    }

    fn ids(&self) -> Result<Vec<DecisionId>, StoreError> {
        Ok(lock(&self.tables)?.entries.keys().copied().collect())
    }
}

#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
    tables: Tables,
}

/// Durable ledger backed by an append-only JSON-lines file.
///
/// One line holds every row of one committed decision, so a commit is a
/// single append followed by `fsync`. A failed append is truncated away;
/// a torn trailing line left by a crash is dropped when the file is opened.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    state: Mutex<FileState>,
    next_id: AtomicI64,
}

impl FileLedger {
    /// Opens (or creates) the ledger at `path` and rebuilds its index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("cannot open {}: {e}", path.display())))?;

        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| StoreError::Io(format!("cannot read {}: {e}", path.display())))?;

        // Everything after the last newline is a torn write.
        let complete = raw.rfind('\n').map_or(0, |idx| idx + 1);
        if complete < raw.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = raw.len() - complete,
                "dropping torn trailing ledger line"
            );
            file.set_len(complete as u64)
                .map_err(|e| StoreError::Io(format!("cannot truncate torn line: {e}")))?;
        }

        let mut tables = Tables::default();
        for (lineno, line) in raw[..complete].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry = serde_json::from_str(line)
                .map_err(|e| StoreError::Corrupt(format!("line {}: {e}", lineno + 1)))?;
            tables
                .insert(entry)
                .map_err(|e| StoreError::Corrupt(format!("line {}: {e}", lineno + 1)))?;
        }

        let next_id = tables.next_id();
        info!(
            "Opened ledger {:?} with {} decisions",
            path,
            tables.entries.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file,
                len: complete as u64,
                tables,
            }),
            next_id: AtomicI64::new(next_id),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommitTarget for FileLedger {
    fn allocate_id(&self) -> DecisionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| StoreError::Rejected(format!("entry not serializable: {e}")))?;
        line.push('\n');

        let mut state = lock(&self.state)?;
        if state.tables.entries.contains_key(&entry.decision.id) {
            return Err(StoreError::Rejected(format!(
                "decision {} already committed",
                entry.decision.id
            )));
        }

        let previous_len = state.len;
        let written = state
            .file
            .write_all(line.as_bytes())
            .and_then(|()| state.file.sync_data());
        if let Err(err) = written {
            if let Err(trunc) = state.file.set_len(previous_len) {
                warn!(path = %self.path.display(), %trunc, "cannot truncate failed append");
            }
            return Err(StoreError::Io(format!("append failed: {err}")));
        }

        state.len = previous_len + line.len() as u64;
        state.tables.insert(entry)
    }
}

impl LedgerStore for FileLedger {
    fn begin(&self) -> Result<Box<dyn LedgerTransaction + '_>, StoreError> {
        Ok(Box::new(StagedTransaction::new(self)))
    }

    fn entry(&self, id: DecisionId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(lock(&self.state)?.tables.entries.get(&id).cloned())
    }

    fn ids(&self) -> Result<Vec<DecisionId>, StoreError> {
        Ok(lock(&self.state)?.tables.entries.keys().copied().collect())
    }
}
