// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ObservedRead;

/// Empirical value distribution. Every read samples the multiset of values
/// observed during recording. Fits anything, so it is always the last
/// candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MarkovModel {
    counts: BTreeMap<u32, u64>,
    total: u64,
}

impl MarkovModel {
    pub fn try_train(reads: &[ObservedRead]) -> Option<Self> {
        if reads.is_empty() {
            return None;
        }
        let mut model = Self::default();
        for r in reads {
            *model.counts.entry(r.value).or_insert(0) += 1;
        }
        model.total = reads.len() as u64;
        Some(model)
    }

    pub fn read(&self, rng: &mut ChaCha8Rng) -> u32 {
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut last = 0;
        for (&value, &count) in &self.counts {
            cumulative += count as f64 / self.total as f64;
            last = value;
            if roll < cumulative {
                return value;
            }
        }
        // Floating point shortfall on the last bucket.
        last
    }

    pub fn write(&mut self, _value: u32) -> bool {
        true
    }

    pub fn merge(&mut self, other: &MarkovModel) -> bool {
        self.total += other.total;
        for (&value, &count) in &other.counts {
            *self.counts.entry(value).or_insert(0) += count;
        }
        true
    }
}
