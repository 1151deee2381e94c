// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Routing front between the emulator and the trained peripherals.
//!
//! Every MMIO access lands here. Addresses owned by a trained peripheral go
//! to its state machine; addresses nobody owns get a lazily created storage
//! cell; configured serial addresses go to the external serial adapter. A
//! broken model must never take the emulation down, so panics and poisoned
//! locks coerce to a read of 0 and an accepted write.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::engine::MimicModel;
use crate::models::StorageModel;
use crate::{InterruptHost, SerialAdapter};

pub struct MmioGateway {
    model: MimicModel,
    fallback: BTreeMap<u32, StorageModel>,
    serial_addrs: BTreeSet<u32>,
    serial: Option<Box<dyn SerialAdapter>>,
}

impl MmioGateway {
    pub fn new(model: MimicModel) -> Self {
        Self {
            model,
            fallback: BTreeMap::new(),
            serial_addrs: BTreeSet::new(),
            serial: None,
        }
    }

    /// Route the given addresses to an external serial adapter instead of
    /// the trained models.
    pub fn attach_serial(&mut self, addrs: impl IntoIterator<Item = u32>, adapter: Box<dyn SerialAdapter>) {
        self.serial_addrs = addrs.into_iter().collect();
        self.serial = Some(adapter);
        tracing::info!("Attaching virtual serial port ({:#010x?})", self.serial_addrs);
    }

    pub fn model(&self) -> &MimicModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut MimicModel {
        &mut self.model
    }

    pub fn read(&mut self, addr: u32, size: u32) -> u32 {
        if self.serial_addrs.contains(&addr) {
            if let Some(serial) = &mut self.serial {
                return serial.read(addr, size);
            }
        }

        if let Some(peripheral) = self.model.peripheral_for(addr) {
            let peripheral = Arc::clone(peripheral);
            let result = catch_unwind(AssertUnwindSafe(|| match peripheral.lock() {
                Ok(mut p) => p.read(addr, size),
                Err(poisoned) => poisoned.into_inner().read(addr, size),
            }));
            return match result {
                Ok(value) => value,
                Err(_) => {
                    tracing::error!("Model panicked on read of {:#010x}; returning 0", addr);
                    0
                }
            };
        }

        tracing::debug!(
            "No model found for {:#010x}, using simple storage",
            addr
        );
        self.fallback.entry(addr).or_default().read()
    }

    pub fn write(&mut self, addr: u32, size: u32, value: u32) -> bool {
        if self.serial_addrs.contains(&addr) {
            if let Some(serial) = &mut self.serial {
                return serial.write(addr, size, value);
            }
        }

        if let Some(peripheral) = self.model.peripheral_for(addr) {
            let peripheral = Arc::clone(peripheral);
            let result = catch_unwind(AssertUnwindSafe(|| match peripheral.lock() {
                Ok(mut p) => p.write(addr, size, value),
                Err(poisoned) => poisoned.into_inner().write(addr, size, value),
            }));
            match result {
                Ok(true) => return true,
                Ok(false) => {
                    // Never-written register: treat it as storage from here on.
                    self.fallback.entry(addr).or_default().write(value);
                    return true;
                }
                Err(_) => {
                    tracing::error!(
                        "Model panicked on write of {:#x} to {:#010x}; accepting",
                        value,
                        addr
                    );
                    return true;
                }
            }
        }

        tracing::debug!(
            "No model found for {:#010x}, using simple storage",
            addr
        );
        self.fallback.entry(addr).or_default().write(value)
    }

    pub fn send_interrupts_to(&mut self, host: Arc<dyn InterruptHost>) {
        self.model.send_interrupts_to(host);
    }

    pub fn shutdown(&mut self) {
        self.model.shutdown();
    }

    pub fn reset(&mut self) {
        self.model.reset();
        for cell in self.fallback.values_mut() {
            *cell = StorageModel::default();
        }
    }
}
