// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Versioned on-disk form of a trained model.
//!
//! A single JSON document carrying the peripherals with their states, fitted
//! models and interrupt metadata. The schema version is checked on load;
//! interrupters are never serialized and are rebuilt lazily when the model
//! is bound to an emulator. Older documents without the one-shot flag load
//! with it defaulted off.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::engine::MimicModel;
use crate::peripheral::PeripheralModel;
use crate::{ModelError, ModelResult};

pub const MODEL_SCHEMA_VERSION: &str = "1.0";

fn default_schema_version() -> String {
    MODEL_SCHEMA_VERSION.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelDocument {
    #[serde(default = "default_schema_version")]
    schema_version: String,
    seed: u64,
    accessed: BTreeSet<u32>,
    clusters: BTreeMap<usize, BTreeSet<u32>>,
    peripherals: Vec<PeripheralModel>,
}

pub fn save<P: AsRef<Path>>(model: &MimicModel, path: P) -> ModelResult<()> {
    tracing::info!("Saving model to {:?}", path.as_ref());
    let document = ModelDocument {
        schema_version: MODEL_SCHEMA_VERSION.to_string(),
        seed: model.seed(),
        accessed: model.accessed_addresses().clone(),
        clusters: model.clusters().clone(),
        peripherals: model
            .peripherals()
            .iter()
            .map(|p| p.lock().unwrap().clone())
            .collect(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> ModelResult<MimicModel> {
    tracing::info!("Loading model from {:?}", path.as_ref());
    let file = File::open(path)?;
    let document: ModelDocument = serde_json::from_reader(BufReader::new(file))?;
    if document.schema_version != MODEL_SCHEMA_VERSION {
        return Err(ModelError::SchemaVersion(
            document.schema_version,
            MODEL_SCHEMA_VERSION,
        ));
    }

    let mut peripherals = document.peripherals;
    for peripheral in &mut peripherals {
        peripheral.reset();
    }

    Ok(MimicModel::from_parts(
        document.seed,
        document.accessed,
        document.clusters,
        peripherals,
    ))
}
