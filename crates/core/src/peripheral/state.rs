// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{
    self, ObservedRead, RegisterModel, TrainDomain, ORDERED_RETRAIN_CANDIDATES, TIME_CANDIDATES,
};

/// Identity of a peripheral state. States are keyed by the write that enters
/// them; the start state holds everything observed before the first write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateKey {
    Start,
    Write { addr: u32, value: u32 },
}

impl StateKey {
    pub fn label(&self) -> String {
        match self {
            StateKey::Start => "start".to_string(),
            StateKey::Write { addr, value } => format!("write:{:#010x}:{:#x}", addr, value),
        }
    }

    /// The write value that entered this state (0 for the start state).
    pub fn entry_value(&self) -> u32 {
        match self {
            StateKey::Start => 0,
            StateKey::Write { value, .. } => *value,
        }
    }
}

type ReadBuckets = BTreeMap<u32, Vec<Vec<ObservedRead>>>;

#[derive(Debug, Clone, Copy)]
enum ModelChoice {
    Ordered(usize),
    Aggregate,
    Stateful,
}

/// One state of a peripheral's write-keyed machine.
///
/// Reads observed while the state was active are kept in per-address buckets
/// indexed by the read position within a visit, so a revisit reproduces the
/// ordered sub-sequence seen during recording. `train` fits a model per
/// bucket and an aggregate model per address; `collapse` switches replay to
/// the aggregate, discarding read-index granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralModelState {
    pub key: StateKey,
    reads: ReadBuckets,
    #[serde(skip)]
    read_count: BTreeMap<u32, usize>,
    model_per_address: BTreeMap<u32, Option<RegisterModel>>,
    model_per_address_ordered: BTreeMap<u32, Vec<Option<RegisterModel>>>,
    is_collapsed: bool,
    #[serde(default)]
    merged_reads: Vec<ReadBuckets>,
}

impl PeripheralModelState {
    pub fn new(key: StateKey) -> Self {
        Self {
            key,
            reads: BTreeMap::new(),
            read_count: BTreeMap::new(),
            model_per_address: BTreeMap::new(),
            model_per_address_ordered: BTreeMap::new(),
            is_collapsed: false,
            merged_reads: Vec::new(),
        }
    }

    /// True when this state has data or a fitted model for the address. A
    /// placeholder entry left for stateful replay does not count.
    pub fn address_observed(&self, addr: u32) -> bool {
        self.reads.contains_key(&addr)
            || matches!(self.model_per_address.get(&addr), Some(Some(_)))
    }

    /// True when the address is at least keyed in this state, fitted or not.
    pub fn covers_address(&self, addr: u32) -> bool {
        self.reads.contains_key(&addr) || self.model_per_address.contains_key(&addr)
    }

    /// Key every peripheral address into the model map; addresses nothing
    /// was fitted for hold a placeholder meaning stateful replay.
    pub fn ensure_address(&mut self, addr: u32) {
        self.model_per_address.entry(addr).or_insert(None);
    }

    pub fn observed_addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.model_per_address.keys().copied()
    }

    pub fn aggregate_model(&self, addr: u32) -> Option<&RegisterModel> {
        self.model_per_address.get(&addr).and_then(|m| m.as_ref())
    }

    /// Adopt a model borrowed from a sibling state for an address this state
    /// never saw.
    pub fn adopt_model(&mut self, addr: u32, model: RegisterModel) {
        let slot = self.model_per_address.entry(addr).or_insert(None);
        if slot.is_none() {
            *slot = Some(model);
        }
        self.read_count.entry(addr).or_insert(0);
    }

    pub fn collapse(&mut self) {
        tracing::debug!("Collapsed {}", self.key.label());
        self.is_collapsed = true;
    }

    pub fn expand(&mut self) {
        tracing::debug!("Expanded {}", self.key.label());
        self.is_collapsed = false;
    }

    pub fn is_collapsed(&self) -> bool {
        self.is_collapsed
    }

    /// Zero the read cursors and rewind every model, as if the state had
    /// never been visited.
    pub fn reset(&mut self) {
        for count in self.read_count.values_mut() {
            *count = 0;
        }
        for model in self.model_per_address.values_mut().flatten() {
            model.reset_cursors();
        }
        for model in self
            .model_per_address_ordered
            .values_mut()
            .flatten()
            .flatten()
        {
            model.reset_cursors();
        }
    }

    pub fn append_read(&mut self, addr: u32, read: ObservedRead) {
        let count = self.read_count.entry(addr).or_insert(0);
        let buckets = self.reads.entry(addr).or_default();
        while buckets.len() <= *count {
            buckets.push(Vec::new());
        }
        buckets[*count].push(read);
        *count += 1;
    }

    /// Fit one model per read bucket and one aggregate per address.
    pub fn train(&mut self) {
        let entry_value = self.key.entry_value();
        for (addr, buckets) in &self.reads {
            let mut combined = Vec::new();
            let mut ordered = Vec::with_capacity(buckets.len());
            for bucket in buckets {
                combined.extend_from_slice(bucket);
                ordered.push(models::train_best(entry_value, bucket, TrainDomain::Ordered));
            }
            let aggregate = models::train_best(entry_value, &combined, TrainDomain::Time);
            if aggregate.is_none() && !combined.is_empty() {
                tracing::info!(
                    "No model fits {:#010x} in {}; falling back to stateful replay",
                    addr,
                    self.key.label()
                );
            } else if let Some(m) = &aggregate {
                tracing::debug!(
                    "Address {:#010x} in {} is {}",
                    addr,
                    self.key.label(),
                    m.kind_name()
                );
            }
            self.model_per_address.insert(*addr, aggregate);
            self.model_per_address_ordered.insert(*addr, ordered);
        }
    }

    fn choose_model(&self, addr: u32, index: usize) -> ModelChoice {
        if !self.is_collapsed {
            if let Some(ordered) = self.model_per_address_ordered.get(&addr) {
                if !ordered.is_empty() {
                    let idx = index.min(ordered.len() - 1);
                    if ordered[idx].is_some() {
                        return ModelChoice::Ordered(idx);
                    }
                    return ModelChoice::Stateful;
                }
            }
        }
        match self.model_per_address.get(&addr) {
            Some(Some(_)) => ModelChoice::Aggregate,
            _ => ModelChoice::Stateful,
        }
    }

    /// Stateful replay: hand back the recorded read for this cursor.
    fn replay_recorded(&self, addr: u32, index: usize) -> u32 {
        if let Some(buckets) = self.reads.get(&addr) {
            if !buckets.is_empty() {
                let idx = index.min(buckets.len() - 1);
                if let Some(read) = buckets[idx].first() {
                    return read.value;
                }
            }
        }
        tracing::warn!(
            "Read of {:#010x} in {} has no model and no recording; returning 0",
            addr,
            self.key.label()
        );
        0
    }

    pub fn read(&mut self, addr: u32, rng: &mut ChaCha8Rng, now: f64) -> u32 {
        let index = *self.read_count.get(&addr).unwrap_or(&0);
        *self.read_count.entry(addr).or_insert(0) += 1;

        match self.choose_model(addr, index) {
            ModelChoice::Ordered(idx) => {
                let model = self
                    .model_per_address_ordered
                    .get_mut(&addr)
                    .and_then(|v| v.get_mut(idx))
                    .and_then(|m| m.as_mut())
                    .expect("choice points at a fitted model");
                model.read(rng, now)
            }
            ModelChoice::Aggregate => {
                let model = self
                    .model_per_address
                    .get_mut(&addr)
                    .and_then(|m| m.as_mut())
                    .expect("choice points at a fitted model");
                model.read(rng, now)
            }
            ModelChoice::Stateful => self.replay_recorded(addr, index),
        }
    }

    /// Forward a write into the active model for the address. Returns false
    /// when no model is there to absorb it.
    pub fn write(&mut self, addr: u32, value: u32) -> bool {
        let index = *self.read_count.get(&addr).unwrap_or(&0);
        match self.choose_model(addr, index) {
            ModelChoice::Ordered(idx) => self
                .model_per_address_ordered
                .get_mut(&addr)
                .and_then(|v| v.get_mut(idx))
                .and_then(|m| m.as_mut())
                .map(|m| m.write(value))
                .unwrap_or(false),
            ModelChoice::Aggregate => self
                .model_per_address
                .get_mut(&addr)
                .and_then(|m| m.as_mut())
                .map(|m| m.write(value))
                .unwrap_or(false),
            ModelChoice::Stateful => {
                tracing::debug!(
                    "Write of {:#x} to {:#010x} in {} has no model",
                    value,
                    addr,
                    self.key.label()
                );
                false
            }
        }
    }

    /// Merge another recording of the same state into this one.
    pub fn merge(&mut self, other: &PeripheralModelState) {
        tracing::debug!("Merging state {}", self.key.label());
        self.merged_reads.push(other.reads.clone());

        for (addr, other_buckets) in &other.reads {
            if !self.model_per_address_ordered.contains_key(addr) {
                // Nothing local for this address: copy the other side verbatim.
                self.model_per_address_ordered.insert(
                    *addr,
                    other
                        .model_per_address_ordered
                        .get(addr)
                        .cloned()
                        .unwrap_or_default(),
                );
                if let Some(model) = other.model_per_address.get(addr) {
                    self.model_per_address.insert(*addr, model.clone());
                }
                self.read_count.insert(*addr, 0);
                tracing::debug!(
                    "No data exists for {:#010x} (copying model verbatim)",
                    addr
                );
                continue;
            }
            self.read_count.entry(*addr).or_insert(0);

            for (bucket_idx, _) in other_buckets.iter().enumerate() {
                let theirs = other
                    .model_per_address_ordered
                    .get(addr)
                    .and_then(|v| v.get(bucket_idx))
                    .cloned()
                    .flatten();
                let ordered = self
                    .model_per_address_ordered
                    .get_mut(addr)
                    .expect("checked above");
                if bucket_idx >= ordered.len() {
                    // Their recording reads further into the state.
                    ordered.push(theirs);
                    continue;
                }
                let merged_ok = match (ordered[bucket_idx].as_mut(), theirs.as_ref()) {
                    (Some(mine), Some(theirs)) => mine.merge(theirs),
                    (None, None) => true,
                    _ => false,
                };
                if !merged_ok {
                    tracing::debug!(
                        "Merge failed for {:#010x}/{} (retraining models and trying again)",
                        addr,
                        bucket_idx
                    );
                    let ours: Vec<ObservedRead> = self
                        .reads
                        .get(addr)
                        .and_then(|b| b.get(bucket_idx))
                        .cloned()
                        .unwrap_or_default();
                    let others: Vec<Vec<ObservedRead>> = self
                        .merged_reads
                        .iter()
                        .filter_map(|data| data.get(addr).and_then(|b| b.get(bucket_idx)).cloned())
                        .collect();
                    if let Some(model) =
                        models::retrain_common(&ours, &others, ORDERED_RETRAIN_CANDIDATES)
                    {
                        self.model_per_address_ordered.get_mut(addr).unwrap()[bucket_idx] =
                            Some(model);
                    }
                }
            }

            // Aggregate models.
            let merged_ok = match (
                self.model_per_address.get_mut(addr),
                other.model_per_address.get(addr),
            ) {
                (Some(Some(mine)), Some(Some(theirs))) => mine.merge(theirs),
                (Some(None), Some(None)) | (_, None) => true,
                _ => false,
            };
            if !merged_ok {
                tracing::warn!(
                    "Merge failed for {:#010x}, searching for a common model",
                    addr
                );
                let ours: Vec<ObservedRead> = self
                    .reads
                    .get(addr)
                    .map(|buckets| buckets.iter().flatten().copied().collect())
                    .unwrap_or_default();
                let others: Vec<Vec<ObservedRead>> = self
                    .merged_reads
                    .iter()
                    .filter_map(|data| data.get(addr))
                    .map(|buckets| buckets.iter().flatten().copied().collect())
                    .collect();
                if let Some(model) = models::retrain_common(&ours, &others, TIME_CANDIDATES) {
                    self.model_per_address.insert(*addr, Some(model));
                }
            }
        }
    }

    /// Rough one-line description for diagnostics.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (addr, model) in &self.model_per_address {
            let name = model
                .as_ref()
                .map(|m| m.kind_name())
                .unwrap_or("stateful");
            parts.push(format!("{:#010x}: {}", addr, name));
        }
        let mut line = format!("{} ({})", self.key.label(), parts.join(", "));
        if self.is_collapsed {
            line.push_str(" (collapsed)");
        }
        line
    }
}
