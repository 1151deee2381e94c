// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Behavioral models for single MMIO registers.
//!
//! A register is fit to the simplest model that explains its observed read
//! stream. Candidates are tried in a fixed specificity order: storage,
//! repeating pattern, pattern-with-probabilistic-repeat, monotonically
//! increasing, and finally the empirical value distribution. The first model
//! that fits wins; a register nothing fits stays unmodeled and is answered
//! by stateful replay of its recorded reads.
//!
//! The family is closed, so it is a tagged variant rather than a trait
//! object. That also keeps the serialized model file self-describing.

pub mod increasing;
pub mod markov;
pub mod markov_pattern;
pub mod pattern;
pub mod storage;

pub use increasing::IncreasingModel;
pub use markov::MarkovModel;
pub use markov_pattern::MarkovPatternModel;
pub use pattern::PatternModel;
pub use storage::StorageModel;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// One recorded read, as stored in a state's read buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedRead {
    pub value: u32,
    pub pc: u32,
    pub size: u32,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegisterModel {
    Storage(StorageModel),
    Pattern(PatternModel),
    Increasing(IncreasingModel),
    Markov(MarkovModel),
    MarkovPattern(MarkovPatternModel),
}

impl RegisterModel {
    /// Synthesize the next read value. `now` is the replay clock in seconds.
    pub fn read(&mut self, rng: &mut ChaCha8Rng, now: f64) -> u32 {
        match self {
            RegisterModel::Storage(m) => m.read(),
            RegisterModel::Pattern(m) => m.read(),
            RegisterModel::Increasing(m) => m.read(now),
            RegisterModel::Markov(m) => m.read(rng),
            RegisterModel::MarkovPattern(m) => m.read(rng),
        }
    }

    /// Absorb a write. Returns false when the model cannot accept it.
    pub fn write(&mut self, value: u32) -> bool {
        match self {
            RegisterModel::Storage(m) => m.write(value),
            RegisterModel::Pattern(m) => m.write(value),
            RegisterModel::Increasing(m) => m.write(value),
            RegisterModel::Markov(m) => m.write(value),
            RegisterModel::MarkovPattern(m) => m.write(value),
        }
    }

    /// In-place merge with a model trained on another recording. Fails when
    /// the two disagree structurally; the caller then retrains from raw reads.
    pub fn merge(&mut self, other: &RegisterModel) -> bool {
        match (self, other) {
            (RegisterModel::Storage(a), RegisterModel::Storage(b)) => a.merge(b),
            (RegisterModel::Pattern(a), RegisterModel::Pattern(b)) => a.merge(b),
            (RegisterModel::Increasing(a), RegisterModel::Increasing(b)) => a.merge(b),
            (RegisterModel::Markov(a), RegisterModel::Markov(b)) => a.merge(b),
            (RegisterModel::MarkovPattern(a), RegisterModel::MarkovPattern(b)) => a.merge(b),
            (a, b) => {
                tracing::debug!(
                    "Refusing to merge mismatched models ({} != {})",
                    a.kind_name(),
                    b.kind_name()
                );
                false
            }
        }
    }

    /// Rewind replay cursors without touching trained parameters.
    pub fn reset_cursors(&mut self) {
        match self {
            RegisterModel::Storage(_) => {}
            RegisterModel::Pattern(m) => m.reset_cursors(),
            RegisterModel::Increasing(m) => m.reset_cursors(),
            RegisterModel::Markov(_) => {}
            RegisterModel::MarkovPattern(m) => m.reset_cursors(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RegisterModel::Storage(_) => "storage",
            RegisterModel::Pattern(_) => "pattern",
            RegisterModel::Increasing(_) => "increasing",
            RegisterModel::Markov(_) => "markov",
            RegisterModel::MarkovPattern(_) => "markov_pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Pattern,
    MarkovPattern,
    Increasing,
    Markov,
}

/// Candidate order for time-domain (aggregate) fitting.
pub const TIME_CANDIDATES: &[ModelKind] = &[
    ModelKind::Pattern,
    ModelKind::MarkovPattern,
    ModelKind::Increasing,
    ModelKind::Markov,
];

/// Read-index buckets carry no usable time axis, so only the value
/// distribution is attempted after the storage check.
pub const ORDERED_CANDIDATES: &[ModelKind] = &[ModelKind::Markov];

/// Candidates for retraining an ordered bucket after a failed merge.
pub const ORDERED_RETRAIN_CANDIDATES: &[ModelKind] = &[ModelKind::Pattern, ModelKind::Markov];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainDomain {
    Time,
    Ordered,
}

pub fn try_train(kind: ModelKind, reads: &[ObservedRead]) -> Option<RegisterModel> {
    if reads.is_empty() {
        return None;
    }
    match kind {
        ModelKind::Pattern => PatternModel::try_train(reads).map(RegisterModel::Pattern),
        ModelKind::MarkovPattern => {
            MarkovPatternModel::try_train(reads).map(RegisterModel::MarkovPattern)
        }
        ModelKind::Increasing => IncreasingModel::try_train(reads).map(RegisterModel::Increasing),
        ModelKind::Markov => MarkovModel::try_train(reads).map(RegisterModel::Markov),
    }
}

/// Fit the simplest model that explains `reads` within a state whose entry
/// write was `state_value`. Returns None when nothing fits; the register is
/// then answered by stateful replay.
pub fn train_best(
    state_value: u32,
    reads: &[ObservedRead],
    domain: TrainDomain,
) -> Option<RegisterModel> {
    if reads.is_empty() {
        return None;
    }

    // Every read echoing the value written on entry is plain storage.
    if reads.iter().all(|r| r.value == state_value) {
        return Some(RegisterModel::Storage(StorageModel::train(reads)));
    }

    let candidates = match domain {
        TrainDomain::Time => TIME_CANDIDATES,
        TrainDomain::Ordered => ORDERED_CANDIDATES,
    };
    for kind in candidates {
        if let Some(model) = try_train(*kind, reads) {
            return Some(model);
        }
    }
    None
}

/// After an in-place merge fails, find the first candidate type that every
/// constituent raw-read set independently fits, and merge those fresh fits
/// into one model.
pub fn retrain_common(
    ours: &[ObservedRead],
    others: &[Vec<ObservedRead>],
    candidates: &[ModelKind],
) -> Option<RegisterModel> {
    for kind in candidates {
        let Some(mut merged) = try_train(*kind, ours) else {
            continue;
        };
        let mut all_good = true;
        for reads in others {
            if reads.is_empty() {
                continue;
            }
            let fits = match try_train(*kind, reads) {
                Some(theirs) => merged.merge(&theirs),
                None => false,
            };
            if !fits {
                all_good = false;
                break;
            }
        }
        if all_good {
            return Some(merged);
        }
    }
    None
}

#[cfg(test)]
pub(crate) fn reads_from_values(values: &[u32]) -> Vec<ObservedRead> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| ObservedRead {
            value,
            pc: 0x0800_0000,
            size: 4,
            timestamp: 0.01 * i as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_wins_when_reads_echo_state_value() {
        let reads = reads_from_values(&[0x55, 0x55, 0x55]);
        let model = train_best(0x55, &reads, TrainDomain::Time).unwrap();
        assert!(matches!(model, RegisterModel::Storage(_)));
    }

    #[test]
    fn test_pattern_wins_over_markov() {
        let reads = reads_from_values(&[1, 2, 3, 1, 2, 3, 1, 2, 3]);
        let model = train_best(0, &reads, TrainDomain::Time).unwrap();
        assert!(matches!(model, RegisterModel::Pattern(_)));
    }

    #[test]
    fn test_increasing_wins_for_counter() {
        let reads = reads_from_values(&[100, 110, 120, 130, 140]);
        let model = train_best(0, &reads, TrainDomain::Time).unwrap();
        assert!(matches!(model, RegisterModel::Increasing(_)));
    }

    #[test]
    fn test_markov_is_the_last_resort() {
        // Not periodic, no majority value, not increasing.
        let reads = reads_from_values(&[9, 1, 7, 2, 8, 1, 3, 9, 2, 1, 6, 4]);
        let model = train_best(0, &reads, TrainDomain::Time).unwrap();
        assert!(matches!(model, RegisterModel::Markov(_)));
    }

    #[test]
    fn test_empty_reads_stay_unmodeled() {
        assert!(train_best(0, &[], TrainDomain::Time).is_none());
    }

    #[test]
    fn test_retrain_common_finds_shared_pattern() {
        let ours = reads_from_values(&[4, 5, 4, 5]);
        let theirs = vec![reads_from_values(&[4, 5, 4, 5, 4, 5])];
        let model = retrain_common(&ours, &theirs, TIME_CANDIDATES).unwrap();
        match model {
            RegisterModel::Pattern(mut m) => {
                assert_eq!(m.read(), 4);
                assert_eq!(m.read(), 5);
            }
            other => panic!("expected pattern, got {}", other.kind_name()),
        }
    }

    #[test]
    fn test_retrain_common_falls_back_to_markov() {
        let ours = reads_from_values(&[1, 2, 3]);
        let theirs = vec![reads_from_values(&[3, 1, 9])];
        let model = retrain_common(&ours, &theirs, ORDERED_RETRAIN_CANDIDATES).unwrap();
        assert!(matches!(model, RegisterModel::Markov(_)));
    }
}
