// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Top-level training and replay orchestration.
//!
//! `MimicModel` turns one recording into a set of trained peripherals:
//! gather the accessed addresses, cluster them into peripherals, attribute
//! interrupts, then build and train a state machine per cluster. During
//! replay it routes each MMIO access to the owning peripheral and runs one
//! interrupter per armed interrupt.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::cluster::cluster_peripherals;
use crate::inference::{infer_interrupts, InferenceResult};
use crate::interrupter::Interrupter;
use crate::peripheral::PeripheralModel;
use crate::{InterruptHost, ModelResult};
use mimic_trace::{read_trace, AccessRecord};

#[derive(Debug)]
pub struct MimicModel {
    peripherals: Vec<Arc<Mutex<PeripheralModel>>>,
    routing: BTreeMap<u32, usize>,
    clusters: BTreeMap<usize, BTreeSet<u32>>,
    accessed: BTreeSet<u32>,
    seed: u64,
    merge_on_miss: bool,
    interrupters: Vec<Interrupter>,
}

impl MimicModel {
    pub fn new(seed: u64) -> Self {
        Self {
            peripherals: Vec::new(),
            routing: BTreeMap::new(),
            clusters: BTreeMap::new(),
            accessed: BTreeSet::new(),
            seed,
            merge_on_miss: true,
            interrupters: Vec::new(),
        }
    }

    pub fn from_config(config: &mimic_config::EngineConfig) -> Self {
        let mut model = Self::new(config.seed);
        model.merge_on_miss = config.merge_on_miss;
        model
    }

    pub(crate) fn from_parts(
        seed: u64,
        accessed: BTreeSet<u32>,
        clusters: BTreeMap<usize, BTreeSet<u32>>,
        peripherals: Vec<PeripheralModel>,
    ) -> Self {
        let mut model = Self {
            peripherals: peripherals
                .into_iter()
                .map(|p| Arc::new(Mutex::new(p)))
                .collect(),
            routing: BTreeMap::new(),
            clusters,
            accessed,
            seed,
            merge_on_miss: true,
            interrupters: Vec::new(),
        };
        model.rebuild_routing();
        model
    }

    fn rebuild_routing(&mut self) {
        self.routing.clear();
        for (idx, peripheral) in self.peripherals.iter().enumerate() {
            for addr in &peripheral.lock().unwrap().addresses {
                self.routing.insert(*addr, idx);
            }
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn accessed_addresses(&self) -> &BTreeSet<u32> {
        &self.accessed
    }

    pub fn clusters(&self) -> &BTreeMap<usize, BTreeSet<u32>> {
        &self.clusters
    }

    pub fn peripherals(&self) -> &[Arc<Mutex<PeripheralModel>>] {
        &self.peripherals
    }

    pub fn peripheral_for(&self, addr: u32) -> Option<&Arc<Mutex<PeripheralModel>>> {
        self.routing.get(&addr).map(|idx| &self.peripherals[*idx])
    }

    /// Train from a trace file on disk.
    pub fn train<P: AsRef<Path>>(&mut self, trace_path: P) -> ModelResult<()> {
        tracing::info!("Training peripheral models ({:?})", trace_path.as_ref());
        let records = read_trace(trace_path)?;
        self.train_records(&records)
    }

    /// Train from an in-memory recording.
    pub fn train_records(&mut self, records: &[AccessRecord]) -> ModelResult<()> {
        self.accessed = records
            .iter()
            .filter(|r| r.kind.is_mmio())
            .map(|r| r.addr)
            .collect();

        self.clusters = cluster_peripherals(&self.accessed);
        tracing::info!("Estimated number of clusters: {}", self.clusters.len());

        let inference = infer_interrupts(records, &self.clusters)?;

        self.peripherals.clear();
        for (&cluster_id, addrs) in &self.clusters {
            tracing::info!("Packing peripheral {}", cluster_id);
            let mut peripheral = self.build_peripheral(cluster_id, addrs.clone(), &inference);
            peripheral.train(records);
            peripheral.reset();
            self.peripherals.push(Arc::new(Mutex::new(peripheral)));
        }
        self.rebuild_routing();
        Ok(())
    }

    fn build_peripheral(
        &self,
        cluster_id: usize,
        addrs: BTreeSet<u32>,
        inference: &InferenceResult,
    ) -> PeripheralModel {
        let irq_num = inference.irq_for_cluster(cluster_id);
        let trigger = irq_num.and_then(|irq| inference.triggers.get(&irq).copied());
        let timings = irq_num
            .and_then(|irq| inference.timings.get(&irq).cloned())
            .unwrap_or_default();
        let oneshot = irq_num.is_some_and(|irq| inference.oneshots.contains(&irq));

        let mut peripheral = PeripheralModel::new(addrs, self.seed.wrapping_add(cluster_id as u64))
            .with_interrupt(irq_num, trigger, timings, oneshot);
        peripheral.merge_on_miss = self.merge_on_miss;
        peripheral
    }

    /// Bind every armed peripheral's interrupter to the emulator.
    pub fn send_interrupts_to(&mut self, host: Arc<dyn InterruptHost>) {
        for peripheral in &self.peripherals {
            let irq = peripheral.lock().unwrap().irq_num;
            if let Some(irq) = irq {
                if self.interrupters.iter().any(|i| i.irq_num == irq) {
                    continue;
                }
            }
            if let Some(interrupter) = Interrupter::spawn(peripheral, host.clone()) {
                self.interrupters.push(interrupter);
            }
        }
    }

    pub fn shutdown(&mut self) {
        for interrupter in &mut self.interrupters {
            interrupter.shutdown();
        }
        self.interrupters.clear();
    }

    pub fn reset(&mut self) {
        for peripheral in &self.peripherals {
            peripheral.lock().unwrap().reset();
        }
    }

    pub fn collapse_all(&mut self) {
        tracing::info!("Collapsing all states");
        for peripheral in &self.peripherals {
            peripheral.lock().unwrap().collapse();
        }
    }

    pub fn expand_all(&mut self) {
        for peripheral in &self.peripherals {
            peripheral.lock().unwrap().expand();
        }
    }

    /// Combine two trained models. Addresses from both sides are re-clustered
    /// and each constituent peripheral is merged into the cluster that now
    /// covers it.
    pub fn merge(&self, other: &MimicModel) -> MimicModel {
        let mut merged = MimicModel::new(self.seed);
        merged.accessed = self
            .accessed
            .union(&other.accessed)
            .copied()
            .collect();
        merged.clusters = cluster_peripherals(&merged.accessed);

        for (&cluster_id, addrs) in &merged.clusters.clone() {
            let peripheral = PeripheralModel::new(
                addrs.clone(),
                merged.seed.wrapping_add(cluster_id as u64),
            );
            let cell = Arc::new(Mutex::new(peripheral));
            {
                let mut fresh = cell.lock().unwrap();
                for side in [&self.peripherals, &other.peripherals] {
                    for constituent in side.iter() {
                        fresh.merge(&constituent.lock().unwrap());
                    }
                }
                fresh.reset();
            }
            merged.peripherals.push(cell);
        }
        merged.rebuild_routing();
        merged
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        crate::modelfile::save(self, path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        crate::modelfile::load(path)
    }
}

impl Drop for MimicModel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
