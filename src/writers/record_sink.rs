//! Keyed long-format storage behind a small transactional interface.
//!
//! A sink holds `(fecha, variable) -> valor`. Records are staged between
//! `begin` and `commit`; nothing staged is visible until the commit applies
//! it under the sink's `ConflictPolicy`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::ops::AddAssign;
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{ConflictPolicy, LongFormRecord};
use crate::utils::progress::ProgressReporter;

pub type RecordKey = (String, String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub ignored: usize,
    pub replaced: usize,
}

impl InsertOutcome {
    pub fn staged(&self) -> usize {
        self.inserted + self.ignored + self.replaced
    }
}

impl AddAssign for InsertOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.ignored += other.ignored;
        self.replaced += other.replaced;
    }
}

pub trait RecordSink {
    /// Create the backing table if it does not exist yet
    fn create_if_absent(&mut self) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn insert_chunk(&mut self, records: &[LongFormRecord]) -> Result<()>;

    /// Apply everything staged since `begin`
    fn commit(&mut self) -> Result<InsertOutcome>;

    /// Discard everything staged since `begin`
    fn rollback(&mut self) -> Result<()>;
}

/// Staging buffer shared by the sink implementations
#[derive(Debug, Default)]
struct Transaction {
    staged: Option<Vec<LongFormRecord>>,
}

impl Transaction {
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(ProcessingError::Storage(
                "A transaction is already open".to_string(),
            ));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    pub(crate) fn stage(&mut self, records: &[LongFormRecord]) -> Result<()> {
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| ProcessingError::Storage("No open transaction".to_string()))?;

        ensure_finite(records)?;
        staged.extend_from_slice(records);
        Ok(())
    }

    pub(crate) fn take(&mut self) -> Result<Vec<LongFormRecord>> {
        self.staged
            .take()
            .ok_or_else(|| ProcessingError::Storage("No open transaction".to_string()))
    }

    pub(crate) fn discard(&mut self) {
        self.staged = None;
    }
}

/// Stored values are never NaN
pub(crate) fn ensure_finite(records: &[LongFormRecord]) -> Result<()> {
    match records.iter().find(|r| r.value.is_nan()) {
        Some(record) => Err(ProcessingError::Storage(format!(
            "NaN value for {} at {}",
            record.variable, record.timestamp
        ))),
        None => Ok(()),
    }
}

/// Apply staged records to a keyed table.
///
/// Under `Reject` any conflicting key fails the whole batch and leaves the
/// table untouched.
pub fn merge_into(
    table: &mut BTreeMap<RecordKey, f64>,
    staged: Vec<LongFormRecord>,
    policy: ConflictPolicy,
) -> Result<InsertOutcome> {
    if policy == ConflictPolicy::Reject {
        let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(staged.len());
        for record in &staged {
            let (fecha, variable) = record.key();
            if !seen.insert((fecha, variable))
                || table.contains_key(&(fecha.to_string(), variable.to_string()))
            {
                return Err(ProcessingError::Storage(format!(
                    "Key ({}, {}) already exists",
                    fecha, variable
                )));
            }
        }
    }

    let mut outcome = InsertOutcome::default();
    for record in staged {
        match table.entry((record.timestamp, record.variable)) {
            Entry::Vacant(slot) => {
                slot.insert(record.value);
                outcome.inserted += 1;
            }
            Entry::Occupied(mut slot) if policy == ConflictPolicy::Replace => {
                slot.insert(record.value);
                outcome.replaced += 1;
            }
            Entry::Occupied(_) => outcome.ignored += 1,
        }
    }

    Ok(outcome)
}

/// In-memory sink for previews and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: BTreeMap<RecordKey, f64>,
    transaction: Transaction,
    policy: ConflictPolicy,
}

impl MemoryStore {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, fecha: &str, variable: &str) -> Option<f64> {
        self.table
            .get(&(fecha.to_string(), variable.to_string()))
            .copied()
    }

    /// Stored records ordered by `(fecha, variable)`
    pub fn records(&self) -> Vec<LongFormRecord> {
        self.table
            .iter()
            .map(|((fecha, variable), value)| LongFormRecord {
                timestamp: fecha.clone(),
                variable: variable.clone(),
                value: *value,
            })
            .collect()
    }
}

impl RecordSink for MemoryStore {
    fn create_if_absent(&mut self) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.transaction.begin()
    }

    fn insert_chunk(&mut self, records: &[LongFormRecord]) -> Result<()> {
        self.transaction.stage(records)
    }

    fn commit(&mut self) -> Result<InsertOutcome> {
        let staged = self.transaction.take()?;
        merge_into(&mut self.table, staged, self.policy)
    }

    fn rollback(&mut self) -> Result<()> {
        self.transaction.discard();
        Ok(())
    }
}

/// Stream records into a sink in chunks inside one transaction.
///
/// The first error, from the record stream or from the sink, rolls the
/// transaction back and is returned.
pub fn load_records<S, I>(
    sink: &mut S,
    records: I,
    chunk_size: usize,
    progress: Option<&ProgressReporter>,
) -> Result<InsertOutcome>
where
    S: RecordSink + ?Sized,
    I: IntoIterator<Item = Result<LongFormRecord>>,
{
    let chunk_size = chunk_size.max(1);
    sink.create_if_absent()?;
    sink.begin()?;

    let result = stage_all(sink, records, chunk_size, progress).and_then(|_| sink.commit());
    match result {
        Ok(outcome) => {
            debug!(
                "Committed {} records ({} inserted, {} ignored, {} replaced)",
                outcome.staged(),
                outcome.inserted,
                outcome.ignored,
                outcome.replaced
            );
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_error) = sink.rollback() {
                warn!("Rollback failed: {}", rollback_error);
            }
            Err(e)
        }
    }
}

fn stage_all<S, I>(
    sink: &mut S,
    records: I,
    chunk_size: usize,
    progress: Option<&ProgressReporter>,
) -> Result<()>
where
    S: RecordSink + ?Sized,
    I: IntoIterator<Item = Result<LongFormRecord>>,
{
    let mut chunk = Vec::with_capacity(chunk_size);

    for record in records {
        chunk.push(record?);
        if chunk.len() == chunk_size {
            sink.insert_chunk(&chunk)?;
            if let Some(p) = progress {
                p.increment(chunk.len() as u64);
            }
            chunk.clear();
        }
    }

    if !chunk.is_empty() {
        sink.insert_chunk(&chunk)?;
        if let Some(p) = progress {
            p.increment(chunk.len() as u64);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(fecha: &str, variable: &str, value: f64) -> LongFormRecord {
        LongFormRecord {
            timestamp: fecha.to_string(),
            variable: variable.to_string(),
            value,
        }
    }

    fn batch() -> Vec<Result<LongFormRecord>> {
        vec![
            Ok(record("2023-01-01 00:00:00", "RH", 50.0)),
            Ok(record("2023-01-01 00:00:00", "Ta", 20.0)),
            Ok(record("2023-01-01 00:10:00", "RH", 51.0)),
        ]
    }

    #[test]
    fn test_load_is_idempotent() {
        let mut store = MemoryStore::new(ConflictPolicy::Ignore);

        let first = load_records(&mut store, batch(), 2, None).unwrap();
        let second = load_records(&mut store, batch(), 2, None).unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second, InsertOutcome { inserted: 0, ignored: 3, replaced: 0 });
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_error_rolls_back_whole_file() {
        let mut store = MemoryStore::new(ConflictPolicy::Ignore);
        let mut records = batch();
        records.push(Err(ProcessingError::Cast {
            timestamp: "2023-01-01 00:20:00".to_string(),
            variable: "RH".to_string(),
            value: "x".to_string(),
        }));

        assert!(load_records(&mut store, records, 1, None).is_err());
        assert!(store.is_empty());

        // The sink is usable again after a rollback
        load_records(&mut store, batch(), 10, None).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_replace_policy() {
        let mut store = MemoryStore::new(ConflictPolicy::Replace);
        load_records(&mut store, batch(), 10, None).unwrap();

        let update = vec![Ok(record("2023-01-01 00:00:00", "RH", 55.0))];
        let outcome = load_records(&mut store, update, 10, None).unwrap();

        assert_eq!(outcome.replaced, 1);
        assert_eq!(store.get("2023-01-01 00:00:00", "RH"), Some(55.0));
    }

    #[test]
    fn test_reject_policy_applies_nothing() {
        let mut store = MemoryStore::new(ConflictPolicy::Reject);
        load_records(&mut store, batch(), 10, None).unwrap();

        let update = vec![
            Ok(record("2023-01-02 00:00:00", "RH", 1.0)),
            Ok(record("2023-01-01 00:00:00", "RH", 55.0)),
        ];
        assert!(load_records(&mut store, update, 10, None).is_err());
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("2023-01-01 00:00:00", "RH"), Some(50.0));
    }

    #[test]
    fn test_nan_is_refused() {
        let mut store = MemoryStore::new(ConflictPolicy::Ignore);
        let records = vec![Ok(record("2023-01-01 00:00:00", "RH", f64::NAN))];
        assert!(load_records(&mut store, records, 10, None).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_outcomes_accumulate() {
        let mut total = InsertOutcome { inserted: 2, ignored: 0, replaced: 1 };
        total += InsertOutcome { inserted: 1, ignored: 4, replaced: 0 };
        assert_eq!(total, InsertOutcome { inserted: 3, ignored: 4, replaced: 1 });
        assert_eq!(total.staged(), 8);
    }

    #[test]
    fn test_insert_without_begin_fails() {
        let mut store = MemoryStore::default();
        assert!(store.insert_chunk(&[record("2023-01-01 00:00:00", "RH", 1.0)]).is_err());
    }
}
