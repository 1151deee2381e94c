// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod state;

pub use state::{PeripheralModelState, StateKey};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::inference::InterruptTrigger;
use crate::interrupter::InterruptGate;
use crate::models::ObservedRead;
use mimic_trace::{AccessKind, AccessRecord};

fn default_true() -> bool {
    true
}

/// A synthetic peripheral trained from one or more recordings.
///
/// The peripheral is a state machine over the writes the firmware issued to
/// it; each state owns the models for the reads observed while that state
/// was active. Replay walks the same machine: writes transition, reads are
/// answered by the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralModel {
    pub addresses: BTreeSet<u32>,
    states: Vec<PeripheralModelState>,
    #[serde(skip)]
    current: usize,
    pub irq_num: Option<u32>,
    pub trigger: Option<InterruptTrigger>,
    #[serde(default)]
    pub timings: Vec<f64>,
    #[serde(default)]
    pub oneshot: bool,
    pub seed: u64,
    /// Borrow sibling-state models on a first-time read of an address the
    /// current state never observed.
    #[serde(default = "default_true")]
    pub merge_on_miss: bool,
    #[serde(skip)]
    rng: Option<ChaCha8Rng>,
    #[serde(skip)]
    gate: Option<Arc<InterruptGate>>,
    #[serde(skip)]
    clock_origin: Option<Instant>,
    #[serde(skip)]
    irq_fired: u64,
}

impl PeripheralModel {
    pub fn new(addresses: BTreeSet<u32>, seed: u64) -> Self {
        Self {
            addresses,
            states: vec![PeripheralModelState::new(StateKey::Start)],
            current: 0,
            irq_num: None,
            trigger: None,
            timings: Vec::new(),
            oneshot: false,
            seed,
            merge_on_miss: true,
            rng: None,
            gate: None,
            clock_origin: None,
            irq_fired: 0,
        }
    }

    pub fn with_interrupt(
        mut self,
        irq_num: Option<u32>,
        trigger: Option<InterruptTrigger>,
        timings: Vec<f64>,
        oneshot: bool,
    ) -> Self {
        self.irq_num = irq_num;
        self.trigger = trigger;
        self.timings = timings;
        self.oneshot = oneshot;
        self
    }

    /// All interrupt metadata needed to arm an interrupter.
    pub fn can_interrupt(&self) -> bool {
        self.irq_num.is_some() && self.trigger.is_some() && !self.timings.is_empty()
    }

    pub fn start_state(&self) -> &PeripheralModelState {
        &self.states[0]
    }

    pub fn current_state(&self) -> &PeripheralModelState {
        &self.states[self.current]
    }

    pub fn states(&self) -> &[PeripheralModelState] {
        &self.states
    }

    pub fn set_gate(&mut self, gate: Arc<InterruptGate>) {
        self.gate = Some(gate);
    }

    pub fn gate(&self) -> Option<&Arc<InterruptGate>> {
        self.gate.as_ref()
    }

    pub fn interrupts_fired(&self) -> u64 {
        self.irq_fired
    }

    fn ensure_state(&mut self, key: StateKey) -> usize {
        if let Some(idx) = self.states.iter().position(|s| s.key == key) {
            return idx;
        }
        self.states.push(PeripheralModelState::new(key));
        self.states.len() - 1
    }

    fn now(&mut self) -> f64 {
        let origin = *self.clock_origin.get_or_insert_with(Instant::now);
        origin.elapsed().as_secs_f64()
    }

    /// Build the state machine from a recording and fit every register.
    pub fn train(&mut self, records: &[AccessRecord]) {
        for rec in records {
            if !rec.kind.is_mmio() || !self.addresses.contains(&rec.addr) {
                continue;
            }
            match rec.kind {
                AccessKind::Write => {
                    let idx = self.ensure_state(StateKey::Write {
                        addr: rec.addr,
                        value: rec.value,
                    });
                    // A revisit restarts the state's read indexing.
                    self.states[idx].reset();
                    self.current = idx;
                }
                AccessKind::Read => {
                    self.states[self.current].append_read(
                        rec.addr,
                        ObservedRead {
                            value: rec.value,
                            pc: rec.pc,
                            size: rec.size,
                            timestamp: rec.timestamp,
                        },
                    );
                }
                _ => {}
            }
        }

        let addresses = self.addresses.clone();
        for state in &mut self.states {
            state.train();
            for &addr in &addresses {
                state.ensure_address(addr);
            }
            state.reset();
        }
        self.current = 0;
    }

    /// Answer a read from the current state. `size` is informational.
    pub fn read(&mut self, addr: u32, size: u32) -> u32 {
        let now = self.now();
        self.read_at(addr, size, now)
    }

    /// Read against an explicit replay clock.
    pub fn read_at(&mut self, addr: u32, _size: u32, now: f64) -> u32 {
        if self.merge_on_miss && !self.states[self.current].address_observed(addr) {
            // Best effort: borrow a model from a sibling state that has one.
            let borrowed = self
                .states
                .iter()
                .find_map(|s| s.aggregate_model(addr).cloned());
            if let Some(model) = borrowed {
                tracing::debug!(
                    "State {} never observed {:#010x}; borrowing a {} model",
                    self.states[self.current].key.label(),
                    addr,
                    model.kind_name()
                );
                self.states[self.current].adopt_model(addr, model);
            }
        }

        let seed = self.seed;
        let rng = self
            .rng
            .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(seed));
        self.states[self.current].read(addr, rng, now)
    }

    /// Absorb a write. Transitions to the state keyed by `(addr, value)`,
    /// falling back to a random known value for the address. Returns false
    /// for addresses this peripheral never saw written; the caller then
    /// treats the register as plain storage.
    pub fn write(&mut self, addr: u32, _size: u32, value: u32) -> bool {
        let exact = self
            .states
            .iter()
            .position(|s| s.key == StateKey::Write { addr, value });
        let target = match exact {
            Some(idx) => idx,
            None => {
                let known: Vec<usize> = self
                    .states
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| matches!(s.key, StateKey::Write { addr: a, .. } if a == addr))
                    .map(|(i, _)| i)
                    .collect();
                if known.is_empty() {
                    tracing::info!(
                        "Write to new address {:#010x} with value {:#x}",
                        addr,
                        value
                    );
                    return false;
                }
                tracing::info!(
                    "Writing to {:#010x} with new value {:#x}",
                    addr,
                    value
                );
                let seed = self.seed;
                let rng = self
                    .rng
                    .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(seed));
                known[rng.gen_range(0..known.len())]
            }
        };

        self.current = target;
        self.states[target].write(addr, value);
        self.update_gate(addr, value);
        true
    }

    fn update_gate(&self, addr: u32, value: u32) {
        let (Some(trigger), Some(gate)) = (&self.trigger, &self.gate) else {
            return;
        };
        if addr != trigger.addr {
            return;
        }
        if value & trigger.mask == trigger.mask {
            tracing::info!("IRQ {:?} triggered by write to {:#010x}", self.irq_num, addr);
            gate.raise();
        } else {
            tracing::info!("IRQ {:?} disabled by write to {:#010x}", self.irq_num, addr);
            gate.lower();
        }
    }

    /// Interrupter callback on injection. Serialized by the peripheral lock.
    pub fn enter(&mut self, irq_num: u32) {
        self.irq_fired += 1;
        tracing::debug!("IRQ {} fired ({} injections)", irq_num, self.irq_fired);
    }

    /// Back to the start state with every cursor rewound.
    pub fn reset(&mut self) {
        tracing::debug!("Resetting peripheral ({:#010x?})", self.addresses);
        self.current = 0;
        for state in &mut self.states {
            state.reset();
        }
        self.rng = Some(ChaCha8Rng::seed_from_u64(self.seed));
        self.clock_origin = None;
    }

    pub fn collapse(&mut self) {
        for state in &mut self.states {
            state.collapse();
        }
    }

    pub fn expand(&mut self) {
        for state in &mut self.states {
            state.expand();
        }
    }

    /// Merge another recording's peripheral into this one. The other side
    /// must not own addresses this peripheral does not.
    pub fn merge(&mut self, other: &PeripheralModel) -> bool {
        if !other.addresses.is_subset(&self.addresses) {
            return false;
        }
        tracing::debug!(
            "Merging peripherals ({:#010x?} <= {:#010x?})",
            self.addresses,
            other.addresses
        );

        if !self.can_interrupt() && other.can_interrupt() {
            self.irq_num = other.irq_num;
            self.trigger = other.trigger;
            self.timings = other.timings.clone();
            self.oneshot = other.oneshot;
        }

        for state in &mut self.states {
            if let Some(theirs) = other.states.iter().find(|s| s.key == state.key) {
                state.merge(theirs);
            }
        }
        for theirs in &other.states {
            if !self.states.iter().any(|s| s.key == theirs.key) {
                tracing::debug!(
                    "State {} does not exist locally, copying verbatim",
                    theirs.key.label()
                );
                self.states.push(theirs.clone());
            }
        }
        true
    }
}
