// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "128KB"
}

/// ROM region additionally names the firmware image that backs it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RomRange {
    pub base: u64,
    pub size: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Memory layout and recording metadata for one target board.
///
/// The MMIO window is the region the recorder tees into the trace log and
/// the region the replay engine answers for. Addresses listed under `serial`
/// are handed to the virtual serial adapter instead of the trained models.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub rom: RomRange,
    pub ram: MemoryRange,
    pub mmio: MemoryRange,
    #[serde(default)]
    pub serial: Vec<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("Failed to open board descriptor {:?}", path.as_ref()))?;
        let desc: Self =
            serde_yaml::from_reader(f).context("Failed to parse Board Descriptor YAML")?;
        if desc.schema_version != default_schema_version() {
            tracing::warn!(
                "Board descriptor {:?} has schema version '{}'; this build expects '{}'",
                path.as_ref(),
                desc.schema_version,
                default_schema_version()
            );
        }
        let (mmio_base, mmio_size) = desc.mmio_span()?;
        for addr in &desc.serial {
            let addr = u64::from(*addr);
            if addr < mmio_base || addr >= mmio_base + mmio_size {
                tracing::warn!(
                    "Serial port address {:#010x} lies outside the MMIO window {:#x}+{:#x}",
                    addr,
                    mmio_base,
                    mmio_size
                );
            }
        }
        Ok(desc)
    }

    pub fn mmio_span(&self) -> Result<(u64, u64)> {
        Ok((self.mmio.base, parse_size(&self.mmio.size)?))
    }
}

fn default_seed() -> u64 {
    0
}

fn default_true() -> bool {
    true
}

/// Replay-side knobs for the peripheral engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Seed for the sampling streams. Identical seeds reproduce identical
    /// replay responses for the same emulator write sequence.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Borrow register models from sibling states when the current state has
    /// never observed the address being read.
    #[serde(default = "default_true")]
    pub merge_on_miss: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            merge_on_miss: true,
        }
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
