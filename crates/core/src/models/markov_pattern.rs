// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ObservedRead;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCount {
    pub len: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCount {
    pub values: Vec<u32>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Cursor {
    StaticRun { remaining: u64 },
    Pattern { values: Vec<u32>, index: usize },
}

/// A register dominated by one static value, interrupted by short bursts.
///
/// Typical for status registers: a ready flag most of the time, with
/// occasional multi-read sequences while an operation is in flight. Replay
/// alternates between a sampled run of the static value and a sampled burst,
/// with run lengths and bursts drawn from their recorded histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkovPatternModel {
    pub static_value: u32,
    starts_with_static: bool,
    runs: Vec<RunCount>,
    total_runs: u64,
    patterns: Vec<PatternCount>,
    total_patterns: u64,
    #[serde(skip)]
    cursor: Option<Cursor>,
    #[serde(skip)]
    next_is_pattern: Option<bool>,
}

impl MarkovPatternModel {
    /// The most frequent value, if it accounts for at least half the reads.
    pub fn static_value_of(values: &[u32]) -> Option<u32> {
        let mut counts: std::collections::BTreeMap<u32, usize> = std::collections::BTreeMap::new();
        for &v in values {
            *counts.entry(v).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by_key(|&(_, count)| count)
            .filter(|&(_, count)| 2 * count >= values.len())
            .map(|(value, _)| value)
    }

    pub fn try_train(reads: &[ObservedRead]) -> Option<Self> {
        let values: Vec<u32> = reads.iter().map(|r| r.value).collect();
        let static_value = Self::static_value_of(&values)?;

        let mut model = Self {
            static_value,
            starts_with_static: values.first() == Some(&static_value),
            runs: Vec::new(),
            total_runs: 0,
            patterns: Vec::new(),
            total_patterns: 0,
            cursor: None,
            next_is_pattern: None,
        };

        let mut run_len: u64 = 0;
        let mut burst: Vec<u32> = Vec::new();
        for &v in &values {
            if v == static_value {
                if !burst.is_empty() {
                    model.tally_pattern(std::mem::take(&mut burst));
                }
                run_len += 1;
            } else {
                if run_len > 0 {
                    model.tally_run(run_len);
                    run_len = 0;
                }
                burst.push(v);
            }
        }
        if run_len > 0 {
            model.tally_run(run_len);
        }
        if !burst.is_empty() {
            model.tally_pattern(burst);
        }

        model.reset_cursors();
        Some(model)
    }

    fn tally_run(&mut self, len: u64) {
        match self.runs.iter_mut().find(|r| r.len == len) {
            Some(r) => r.count += 1,
            None => self.runs.push(RunCount { len, count: 1 }),
        }
        self.total_runs += 1;
    }

    fn tally_pattern(&mut self, values: Vec<u32>) {
        match self.patterns.iter_mut().find(|p| p.values == values) {
            Some(p) => p.count += 1,
            None => self.patterns.push(PatternCount { values, count: 1 }),
        }
        self.total_patterns += 1;
    }

    fn sample_run(&self, rng: &mut ChaCha8Rng) -> u64 {
        if self.total_runs == 0 {
            return 1;
        }
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut last = 1;
        for r in &self.runs {
            cumulative += r.count as f64 / self.total_runs as f64;
            last = r.len;
            if roll < cumulative {
                return r.len;
            }
        }
        last
    }

    fn sample_pattern(&self, rng: &mut ChaCha8Rng) -> Vec<u32> {
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut last = &self.patterns[self.patterns.len() - 1];
        for p in &self.patterns {
            cumulative += p.count as f64 / self.total_patterns as f64;
            last = p;
            if roll < cumulative {
                return p.values.clone();
            }
        }
        last.values.clone()
    }

    pub fn read(&mut self, rng: &mut ChaCha8Rng) -> u32 {
        loop {
            match self.cursor.take() {
                Some(Cursor::StaticRun { remaining }) => {
                    if remaining > 1 {
                        self.cursor = Some(Cursor::StaticRun {
                            remaining: remaining - 1,
                        });
                    } else {
                        self.next_is_pattern = Some(true);
                    }
                    return self.static_value;
                }
                Some(Cursor::Pattern { values, index }) => {
                    let value = values[index];
                    if index + 1 < values.len() {
                        self.cursor = Some(Cursor::Pattern {
                            values,
                            index: index + 1,
                        });
                    } else {
                        self.next_is_pattern = Some(false);
                    }
                    return value;
                }
                None => {
                    let want_pattern = self
                        .next_is_pattern
                        .unwrap_or(!self.starts_with_static);
                    if want_pattern && !self.patterns.is_empty() {
                        self.cursor = Some(Cursor::Pattern {
                            values: self.sample_pattern(rng),
                            index: 0,
                        });
                    } else {
                        self.cursor = Some(Cursor::StaticRun {
                            remaining: self.sample_run(rng).max(1),
                        });
                    }
                }
            }
        }
    }

    pub fn write(&mut self, _value: u32) -> bool {
        true
    }

    pub fn merge(&mut self, other: &MarkovPatternModel) -> bool {
        if self.static_value != other.static_value {
            tracing::debug!(
                "Static values differ ({:#x} != {:#x})",
                self.static_value,
                other.static_value
            );
            return false;
        }
        for r in &other.runs {
            match self.runs.iter_mut().find(|mine| mine.len == r.len) {
                Some(mine) => mine.count += r.count,
                None => self.runs.push(r.clone()),
            }
        }
        self.total_runs += other.total_runs;
        for p in &other.patterns {
            match self.patterns.iter_mut().find(|mine| mine.values == p.values) {
                Some(mine) => mine.count += p.count,
                None => self.patterns.push(p.clone()),
            }
        }
        self.total_patterns += other.total_patterns;
        true
    }

    pub fn reset_cursors(&mut self) {
        self.cursor = None;
        self.next_is_pattern = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reads_from_values;
    use rand::SeedableRng;

    #[test]
    fn test_static_value_majority() {
        assert_eq!(
            MarkovPatternModel::static_value_of(&[0xC0, 0xC0, 0xC0, 1, 2]),
            Some(0xC0)
        );
        assert_eq!(MarkovPatternModel::static_value_of(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn test_train_extracts_runs_and_bursts() {
        // 0xC0 runs of 2 and 3, bursts [1, 2] and [7].
        let m = MarkovPatternModel::try_train(&reads_from_values(&[
            0xC0, 0xC0, 1, 2, 0xC0, 0xC0, 0xC0, 7,
        ]))
        .unwrap();
        assert_eq!(m.static_value, 0xC0);
        assert!(m.starts_with_static);
        assert_eq!(m.total_runs, 2);
        assert_eq!(m.total_patterns, 2);
        assert!(m.runs.iter().any(|r| r.len == 2 && r.count == 1));
        assert!(m.runs.iter().any(|r| r.len == 3 && r.count == 1));
        assert!(m.patterns.iter().any(|p| p.values == vec![1, 2]));
        assert!(m.patterns.iter().any(|p| p.values == vec![7]));
    }

    #[test]
    fn test_replay_alternates_runs_and_bursts() {
        let mut m =
            MarkovPatternModel::try_train(&reads_from_values(&[9, 9, 9, 1, 2, 9, 9, 9, 1, 2]))
                .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let got: Vec<u32> = (0..10).map(|_| m.read(&mut rng)).collect();
        // Only one run length (3) and one burst ([1, 2]) were observed, so
        // replay reproduces the recording exactly.
        assert_eq!(got, vec![9, 9, 9, 1, 2, 9, 9, 9, 1, 2]);
    }

    #[test]
    fn test_replay_starting_with_burst() {
        let mut m =
            MarkovPatternModel::try_train(&reads_from_values(&[5, 6, 0, 0, 0, 5, 6, 0, 0, 0]))
                .unwrap();
        assert!(!m.starts_with_static);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let got: Vec<u32> = (0..10).map(|_| m.read(&mut rng)).collect();
        assert_eq!(got, vec![5, 6, 0, 0, 0, 5, 6, 0, 0, 0]);
    }

    #[test]
    fn test_merge_sums_histograms() {
        let mut a =
            MarkovPatternModel::try_train(&reads_from_values(&[9, 9, 1, 9, 9])).unwrap();
        let b = MarkovPatternModel::try_train(&reads_from_values(&[9, 9, 2, 9, 9])).unwrap();
        assert!(a.merge(&b));
        assert_eq!(a.total_runs, 4);
        assert_eq!(a.total_patterns, 2);
        assert!(a.patterns.iter().any(|p| p.values == vec![1]));
        assert!(a.patterns.iter().any(|p| p.values == vec![2]));
    }

    #[test]
    fn test_merge_requires_same_static_value() {
        let mut a = MarkovPatternModel::try_train(&reads_from_values(&[9, 9, 1])).unwrap();
        let b = MarkovPatternModel::try_train(&reads_from_values(&[4, 4, 1])).unwrap();
        assert!(!a.merge(&b));
    }
}
