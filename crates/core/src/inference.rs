// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Interrupt attribution from a recorded trace.
//!
//! Works out, for every interrupt number seen in the trace, which peripheral
//! cluster it belongs to, which register write arms it, how its enable bits
//! look, whether the hardware auto-clears them, and how the firings space
//! out in time. Every step is best effort: an IRQ that cannot be resolved is
//! dropped from the result and reported at info level.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::cluster::cluster_of;
use crate::{ModelError, ModelResult};
use mimic_trace::{AccessKind, AccessRecord};

/// The write that arms an interrupt: a register and the enable bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptTrigger {
    pub addr: u32,
    pub mask: u32,
}

impl InterruptTrigger {
    pub fn matches(&self, value: u32) -> bool {
        value & self.mask == self.mask
    }
}

#[derive(Debug, Default, Clone)]
pub struct InferenceResult {
    /// Peripheral cluster that owns each interrupt.
    pub cluster_irqs: BTreeMap<usize, u32>,
    pub triggers: BTreeMap<u32, InterruptTrigger>,
    /// Inter-fire intervals, replayed cyclically.
    pub timings: BTreeMap<u32, Vec<f64>>,
    /// Interrupts whose enable bit the hardware clears on firing.
    pub oneshots: BTreeSet<u32>,
}

impl InferenceResult {
    pub fn irq_for_cluster(&self, cluster: usize) -> Option<u32> {
        self.cluster_irqs.get(&cluster).copied()
    }
}

struct IsrInvocation {
    /// Indices into the trace between ENTER and its matching EXIT.
    body: Vec<usize>,
}

/// Cut the trace into per-IRQ handler invocations. An EXIT closes only the
/// slice of its own interrupt number; nesting is not supported, so an inner
/// handler produces its own slice.
fn slice_invocations(trace: &[AccessRecord]) -> BTreeMap<u32, Vec<IsrInvocation>> {
    let mut activity: BTreeMap<u32, Vec<IsrInvocation>> = BTreeMap::new();
    for (i, rec) in trace.iter().enumerate() {
        if rec.kind != AccessKind::Enter {
            continue;
        }
        let irq = rec.addr;
        let mut body = Vec::new();
        let mut closed = false;
        for (j, inner) in trace.iter().enumerate().skip(i + 1) {
            match inner.kind {
                AccessKind::Exit if inner.addr == irq => {
                    closed = true;
                    break;
                }
                _ => body.push(j),
            }
        }
        if !closed {
            tracing::warn!("Mismatched ISR enter for IRQ {} at seq {}", irq, rec.seq);
            continue;
        }
        activity.entry(irq).or_default().push(IsrInvocation { body });
    }
    activity
}

/// Tiered vote: the MMIO accesses inside each invocation elect a cluster,
/// and the invocation winners elect the final owner.
fn associate_with_cluster(
    trace: &[AccessRecord],
    invocations: &[IsrInvocation],
    clusters: &BTreeMap<usize, BTreeSet<u32>>,
) -> Option<usize> {
    let mut votes: BTreeMap<usize, usize> = BTreeMap::new();
    for invocation in invocations {
        let mut my_votes: BTreeMap<usize, usize> = BTreeMap::new();
        for &idx in &invocation.body {
            let rec = &trace[idx];
            if !rec.kind.is_mmio() {
                continue;
            }
            if let Some(cluster) = cluster_of(clusters, rec.addr) {
                *my_votes.entry(cluster).or_insert(0) += 1;
            }
        }
        let winner = my_votes
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(cluster, _)| *cluster);
        if let Some(winner) = winner {
            *votes.entry(winner).or_insert(0) += 1;
        }
    }
    votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(cluster, _)| *cluster)
}

struct TriggerScan {
    trigger: InterruptTrigger,
    oneshot: bool,
}

/// Find the write that armed the IRQ, refine its enable bits across the
/// whole trace, and watch for hardware auto-clear.
fn find_trigger(
    trace: &[AccessRecord],
    irq: u32,
    cluster_addrs: &BTreeSet<u32>,
) -> Option<TriggerScan> {
    // Nearest preceding in-cluster write before the first ENTER.
    let first_enter = trace
        .iter()
        .position(|r| r.kind == AccessKind::Enter && r.addr == irq)?;
    let provisional = trace[..first_enter]
        .iter()
        .rev()
        .find(|r| r.kind == AccessKind::Write && cluster_addrs.contains(&r.addr))?;
    let trigger_addr = provisional.addr;
    tracing::info!(
        "Found trigger for IRQ {} at address {:#010x} with value {:#010x}",
        irq,
        trigger_addr,
        provisional.value
    );

    // Sweep the trace: every value live in the register at an ENTER is an
    // enable pattern; OR them into the refined mask.
    let mut cur_val: Option<u32> = None;
    let mut enable_values: BTreeMap<u32, usize> = BTreeMap::new();
    let mut observed_bits = 0u32;
    let mut distinct_writes: BTreeSet<u32> = BTreeSet::new();
    let mut oneshot = false;
    for rec in trace {
        match rec.kind {
            AccessKind::Write if rec.addr == trigger_addr => {
                cur_val = Some(rec.value);
                observed_bits |= rec.value;
                distinct_writes.insert(rec.value);
            }
            AccessKind::Read if rec.addr == trigger_addr => {
                if let Some(v) = cur_val {
                    if rec.value != v && !oneshot {
                        tracing::warn!(
                            "One-shot detected for interrupt {} ({:#010x} read back {:#x} after writing {:#x})",
                            irq,
                            trigger_addr,
                            rec.value,
                            v
                        );
                        oneshot = true;
                    }
                }
            }
            AccessKind::Enter if rec.addr == irq => {
                if let Some(v) = cur_val {
                    *enable_values.entry(v).or_insert(0) += 1;
                }
            }
            _ => {}
        }
    }

    let mask = enable_values.keys().fold(0u32, |acc, v| acc | v);
    if mask == observed_bits && distinct_writes.len() > 1 {
        tracing::warn!(
            "Refined mask {:#010x} for IRQ {} covers every bit ever written to {:#010x}; likely imprecise",
            mask,
            irq,
            trigger_addr
        );
    }
    tracing::info!("Refined trigger value for IRQ {} is {:#010x}", irq, mask);
    Some(TriggerScan {
        trigger: InterruptTrigger {
            addr: trigger_addr,
            mask,
        },
        oneshot,
    })
}

/// Inter-fire intervals from the first arming write onward. Writes that drop
/// enable bits open a window where firings are not sampled.
fn collect_timings(
    trace: &[AccessRecord],
    irq: u32,
    trigger: InterruptTrigger,
) -> ModelResult<Vec<f64>> {
    // The refined mask can union enable bits armed by separate writes, so a
    // full masked match may never appear in the trace. Sampling starts at
    // the first write that sets any trigger bit; only a trace with no arming
    // write at all is a bug.
    let start = trace
        .iter()
        .position(|r| {
            r.kind == AccessKind::Write && r.addr == trigger.addr && r.value & trigger.mask != 0
        })
        .ok_or(ModelError::TriggerInference {
            irq,
            addr: trigger.addr,
            mask: trigger.mask,
        })?;

    let mut timings = Vec::new();
    let mut prev_time = trace[start].timestamp;
    let mut disabled = false;
    let mut entered = false;
    for rec in &trace[start + 1..] {
        match rec.kind {
            AccessKind::Enter if rec.addr == irq => {
                if !disabled {
                    timings.push(rec.timestamp - prev_time);
                    entered = true;
                }
            }
            AccessKind::Exit if rec.addr == irq => {
                if entered {
                    prev_time = rec.timestamp;
                    entered = false;
                }
            }
            AccessKind::Write if rec.addr == trigger.addr => {
                if trigger.matches(rec.value) {
                    if disabled {
                        tracing::debug!("IRQ {} re-enabled by write of {:#x}", irq, rec.value);
                    }
                    disabled = false;
                } else {
                    tracing::debug!("IRQ {} disabled by write of {:#x}", irq, rec.value);
                    disabled = true;
                }
            }
            _ => {}
        }
    }

    if !timings.is_empty() {
        let mean = timings.iter().sum::<f64>() / timings.len() as f64;
        let var = timings
            .iter()
            .map(|t| (t - mean) * (t - mean))
            .sum::<f64>()
            / timings.len() as f64;
        tracing::info!(
            "Got timings for interrupt {} (mean {:.6}, stdev {:.6})",
            irq,
            mean,
            var.sqrt()
        );
    }
    Ok(timings)
}

pub fn infer_interrupts(
    trace: &[AccessRecord],
    clusters: &BTreeMap<usize, BTreeSet<u32>>,
) -> ModelResult<InferenceResult> {
    let mut result = InferenceResult::default();

    let activity = slice_invocations(trace);
    for (&irq, invocations) in &activity {
        tracing::debug!("Associating ISR {}", irq);
        match associate_with_cluster(trace, invocations, clusters) {
            Some(cluster) => {
                tracing::info!(
                    "IRQ {} belongs to cluster {} ({:#010x?})",
                    irq,
                    cluster,
                    clusters[&cluster]
                );
                result.cluster_irqs.insert(cluster, irq);
            }
            None => {
                tracing::info!("Could not associate IRQ {} to a peripheral", irq);
            }
        }
    }

    for (&cluster, &irq) in &result.cluster_irqs.clone() {
        let Some(cluster_addrs) = clusters.get(&cluster) else {
            continue;
        };
        tracing::info!("Finding a trigger for interrupt {}", irq);
        let Some(scan) = find_trigger(trace, irq, cluster_addrs) else {
            tracing::info!("Could not find a trigger for IRQ {}", irq);
            continue;
        };
        result.triggers.insert(irq, scan.trigger);
        if scan.oneshot {
            result.oneshots.insert(irq);
        }

        let timings = collect_timings(trace, irq, scan.trigger)?;
        result.timings.insert(irq, timings);
    }

    Ok(result)
}
