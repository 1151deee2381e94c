// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Replay-side interrupt injection.
//!
//! One thread per armed interrupt. The thread waits for its gate (raised by
//! the trigger write), then cycles through the recorded inter-fire intervals,
//! injecting into the emulator after each sleep. The peripheral owns the
//! interrupter; the interrupter only holds a weak handle back, so peripheral
//! teardown ends the loop rather than leaking it.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::peripheral::PeripheralModel;
use crate::{HostState, InterruptHost};

#[derive(Debug, Default)]
struct GateFlags {
    enabled: bool,
    shutdown: bool,
}

/// Enable gate shared between the peripheral (writer) and the interrupter
/// (waiter). Raising and lowering follow the trigger writes; shutdown is
/// one-way.
#[derive(Debug, Default)]
pub struct InterruptGate {
    flags: Mutex<GateFlags>,
    cond: Condvar,
}

impl InterruptGate {
    pub fn raise(&self) {
        self.flags.lock().unwrap().enabled = true;
        self.cond.notify_all();
    }

    pub fn lower(&self) {
        self.flags.lock().unwrap().enabled = false;
        self.cond.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.lock().unwrap().enabled
    }

    pub fn shut_down(&self) {
        self.flags.lock().unwrap().shutdown = true;
        self.cond.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.flags.lock().unwrap().shutdown
    }

    /// Block until the gate is enabled. Returns false on shutdown.
    fn wait_enabled(&self) -> bool {
        let mut flags = self.flags.lock().unwrap();
        while !flags.enabled && !flags.shutdown {
            flags = self.cond.wait(flags).unwrap();
        }
        !flags.shutdown
    }

    /// Sleep that a shutdown can cut short. Returns false on shutdown.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = std::time::Instant::now() + duration;
        let mut flags = self.flags.lock().unwrap();
        loop {
            if flags.shutdown {
                return false;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self.cond.wait_timeout(flags, deadline - now).unwrap();
            flags = guard;
        }
    }
}

pub struct Interrupter {
    pub irq_num: u32,
    gate: Arc<InterruptGate>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupter")
            .field("irq_num", &self.irq_num)
            .field("enabled", &self.gate.is_enabled())
            .finish()
    }
}

impl Interrupter {
    /// Start an interrupter for the peripheral if it carries full interrupt
    /// metadata. The gate is installed on the peripheral so trigger writes
    /// control the thread.
    pub fn spawn(
        peripheral: &Arc<Mutex<PeripheralModel>>,
        host: Arc<dyn InterruptHost>,
    ) -> Option<Interrupter> {
        let (irq_num, timings, oneshot) = {
            let p = peripheral.lock().unwrap();
            if !p.can_interrupt() {
                return None;
            }
            (p.irq_num.expect("checked"), p.timings.clone(), p.oneshot)
        };

        tracing::info!("Building an interrupter for IRQ {}", irq_num);
        let gate = Arc::new(InterruptGate::default());
        peripheral.lock().unwrap().set_gate(gate.clone());

        let weak: Weak<Mutex<PeripheralModel>> = Arc::downgrade(peripheral);
        let thread_gate = gate.clone();
        let handle = std::thread::Builder::new()
            .name(format!("interrupter-{}", irq_num))
            .spawn(move || run(irq_num, timings, oneshot, thread_gate, weak, host))
            .ok()?;

        Some(Interrupter {
            irq_num,
            gate,
            handle: Some(handle),
        })
    }

    pub fn gate(&self) -> Arc<InterruptGate> {
        self.gate.clone()
    }

    /// Stop the thread. Observed within one loop iteration plus the current
    /// sleep.
    pub fn shutdown(&mut self) {
        self.gate.shut_down();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Interrupter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    irq_num: u32,
    timings: Vec<f64>,
    oneshot: bool,
    gate: Arc<InterruptGate>,
    peripheral: Weak<Mutex<PeripheralModel>>,
    host: Arc<dyn InterruptHost>,
) {
    tracing::info!("Starting interrupter for IRQ {}", irq_num);
    let mut ignored = false;
    let mut slot = 0usize;
    loop {
        if !gate.wait_enabled() {
            break;
        }
        if host.state() != HostState::Running {
            if !gate.sleep(Duration::from_millis(1)) {
                break;
            }
            continue;
        }

        let interval = timings[slot % timings.len()];
        tracing::debug!("[{}] Sleeping for {:.6}", irq_num, interval);
        if !gate.sleep(Duration::from_secs_f64(interval.max(0.0))) {
            break;
        }
        if !gate.is_enabled() {
            // Disabled while we slept; do not fire.
            continue;
        }

        if !ignored {
            tracing::info!("Ignoring interrupt returns for IRQ {}", irq_num);
            host.ignore_interrupt_return(irq_num);
            ignored = true;
        }
        tracing::info!("Sending IRQ {}", irq_num);
        host.inject_interrupt(irq_num);
        match peripheral.upgrade() {
            Some(p) => match p.lock() {
                Ok(mut p) => p.enter(irq_num),
                Err(_) => {
                    tracing::warn!("Peripheral lock poisoned; stopping IRQ {}", irq_num);
                    break;
                }
            },
            None => break,
        }
        slot += 1;

        if oneshot {
            tracing::warn!("One-shotted IRQ {}", irq_num);
            gate.lower();
        }
    }
    tracing::debug!("Interrupter for IRQ {} stopped", irq_num);
}
