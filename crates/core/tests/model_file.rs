// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Model file round-trips, schema checks and backward compatibility.

use mimic_core::MimicModel;
use mimic_trace::{AccessKind, AccessRecord};

fn rec(kind: AccessKind, seq: u64, addr: u32, value: u32, ts: f64) -> AccessRecord {
    AccessRecord {
        kind,
        seq,
        addr,
        value,
        pc: 0,
        size: 4,
        timestamp: ts,
    }
}

fn sample_trace() -> Vec<AccessRecord> {
    vec![
        rec(AccessKind::Write, 0, 0x4000_4400, 0x55, 0.0),
        rec(AccessKind::Read, 1, 0x4000_4400, 0x55, 0.1),
        rec(AccessKind::Read, 2, 0x4000_4404, 0xC0, 0.2),
        rec(AccessKind::Write, 3, 0x4002_0010, 0x01, 0.3),
        rec(AccessKind::Enter, 4, 28, 0, 0.4),
        rec(AccessKind::Read, 5, 0x4002_0014, 7, 0.41),
        rec(AccessKind::Exit, 6, 28, 0, 0.42),
        rec(AccessKind::Enter, 7, 28, 0, 0.52),
        rec(AccessKind::Read, 8, 0x4002_0014, 7, 0.53),
        rec(AccessKind::Exit, 9, 28, 0, 0.54),
        rec(AccessKind::Write, 10, 0x4002_0010, 0x00, 0.6),
    ]
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut model = MimicModel::new(3);
    model.train_records(&sample_trace()).unwrap();
    model.save(&path).unwrap();

    let loaded = MimicModel::load(&path).unwrap();
    assert_eq!(loaded.seed(), 3);
    assert_eq!(loaded.accessed_addresses(), model.accessed_addresses());
    assert_eq!(loaded.clusters(), model.clusters());
    assert_eq!(loaded.peripherals().len(), model.peripherals().len());

    let p = loaded.peripheral_for(0x4002_0010).unwrap().lock().unwrap();
    assert_eq!(p.irq_num, Some(28));
    assert_eq!(p.trigger.map(|t| t.mask), Some(0x01));
    assert_eq!(p.timings.len(), 2);
}

#[test]
fn test_loaded_model_replays_like_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut model = MimicModel::new(0);
    model.train_records(&sample_trace()).unwrap();
    model.save(&path).unwrap();

    let loaded = MimicModel::load(&path).unwrap();
    let mut p = loaded.peripheral_for(0x4000_4400).unwrap().lock().unwrap();
    assert!(p.write(0x4000_4400, 4, 0x99));
    assert_eq!(p.read_at(0x4000_4400, 4, 0.0), 0x99);
}

#[test]
fn test_identical_training_produces_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.json");
    let path_b = dir.path().join("b.json");

    let mut a = MimicModel::new(9);
    a.train_records(&sample_trace()).unwrap();
    a.save(&path_a).unwrap();

    let mut b = MimicModel::new(9);
    b.train_records(&sample_trace()).unwrap();
    b.save(&path_b).unwrap();

    let bytes_a = std::fs::read(&path_a).unwrap();
    let bytes_b = std::fs::read(&path_b).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn test_schema_version_mismatch_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut model = MimicModel::new(0);
    model.train_records(&sample_trace()).unwrap();
    model.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let bumped = text.replace("\"schema_version\": \"1.0\"", "\"schema_version\": \"9.9\"");
    assert_ne!(text, bumped);
    std::fs::write(&path, bumped).unwrap();

    let err = MimicModel::load(&path).unwrap_err();
    assert!(err.to_string().contains("9.9"), "unexpected error: {}", err);
}

#[test]
fn test_missing_oneshot_defaults_to_false() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut model = MimicModel::new(0);
    model.train_records(&sample_trace()).unwrap();
    model.save(&path).unwrap();

    // Strip the oneshot field the way an older writer would have.
    let text = std::fs::read_to_string(&path).unwrap();
    let mut doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    for peripheral in doc["peripherals"].as_array_mut().unwrap() {
        peripheral.as_object_mut().unwrap().remove("oneshot");
        peripheral.as_object_mut().unwrap().remove("timings");
    }
    std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

    let loaded = MimicModel::load(&path).unwrap();
    let p = loaded.peripheral_for(0x4002_0010).unwrap().lock().unwrap();
    assert!(!p.oneshot);
    assert!(p.timings.is_empty());
}

#[test]
fn test_truncated_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, "{\"schema_version\": \"1.0\", \"peri").unwrap();
    assert!(MimicModel::load(&path).is_err());
}
