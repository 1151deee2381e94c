// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

use super::ObservedRead;

/// Repeating read sequence. Replay cycles through the detected period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternModel {
    pub pattern: Vec<u32>,
    #[serde(skip)]
    count: usize,
}

impl PatternModel {
    /// Detect a period in the read values. A stream fits when every value is
    /// equal (period 1) or when some period L in [2, N/2] repeats across all
    /// complete blocks with the trailing partial block a prefix of the first.
    pub fn detect(values: &[u32]) -> Option<Vec<u32>> {
        if values.is_empty() {
            return None;
        }
        if values.iter().all(|v| *v == values[0]) {
            return Some(vec![values[0]]);
        }

        let max_len = values.len() / 2;
        for len in 2..=max_len {
            if values[0..len] != values[len..2 * len] {
                continue;
            }
            let last_complete = values.len() - values.len() % len;
            let blocks_match = (2 * len..last_complete)
                .step_by(len)
                .all(|start| values[start..start + len] == values[0..len]);
            let remainder = &values[last_complete..];
            if blocks_match && remainder == &values[0..remainder.len()] {
                return Some(values[0..len].to_vec());
            }
        }
        None
    }

    pub fn try_train(reads: &[ObservedRead]) -> Option<Self> {
        let values: Vec<u32> = reads.iter().map(|r| r.value).collect();
        Self::detect(&values).map(|pattern| Self { pattern, count: 0 })
    }

    pub fn read(&mut self) -> u32 {
        let value = self.pattern[self.count % self.pattern.len()];
        self.count += 1;
        value
    }

    /// Writes are consumed without affecting the replayed sequence.
    pub fn write(&mut self, _value: u32) -> bool {
        true
    }

    pub fn merge(&mut self, other: &PatternModel) -> bool {
        if self.pattern != other.pattern {
            tracing::debug!(
                "Patterns differ ({:?} != {:?})",
                self.pattern,
                other.pattern
            );
            return false;
        }
        true
    }

    pub fn reset_cursors(&mut self) {
        self.count = 0;
    }
}
