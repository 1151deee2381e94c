// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod cluster;
pub mod engine;
pub mod gateway;
pub mod inference;
pub mod interrupter;
pub mod modelfile;
pub mod models;
pub mod peripheral;

pub use engine::MimicModel;
pub use gateway::MmioGateway;
pub use inference::InterruptTrigger;
pub use models::RegisterModel;
pub use peripheral::PeripheralModel;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("trace error: {0}")]
    Trace(#[from] mimic_trace::TraceError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model file error: {0}")]
    ModelFile(#[from] serde_json::Error),
    #[error("unsupported model schema version '{0}' (expected '{1}')")]
    SchemaVersion(String, &'static str),
    #[error("trigger inference bug: no WRITE matching trigger {addr:#010x}/{mask:#010x} for IRQ {irq}")]
    TriggerInference { irq: u32, addr: u32, mask: u32 },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Observable lifecycle of the emulator, as far as the interrupters care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Running,
    Stopped,
}

/// The emulator's interrupt controller, as seen by the interrupters.
pub trait InterruptHost: Send + Sync {
    /// Asynchronously raise an interrupt line.
    fn inject_interrupt(&self, irq: u32);
    /// Suppress the emulator's automatic EXIT accounting for this line.
    fn ignore_interrupt_return(&self, irq: u32);
    fn state(&self) -> HostState;
}

/// External serial adapter for addresses configured as virtual serial ports.
pub trait SerialAdapter: Send {
    fn read(&mut self, addr: u32, size: u32) -> u32;
    fn write(&mut self, addr: u32, size: u32, value: u32) -> bool;
}
