// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use mimic_config::BoardDescriptor;

#[test]
fn test_minimal_board_parses() {
    let yaml = r#"
name: "nucleo-l152re"
rom:
  base: 0x08000000
  size: "512KB"
ram:
  base: 0x20000000
  size: "80KB"
mmio:
  base: 0x40000000
  size: "256MiB"
"#;
    let desc: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(desc.schema_version, "1.0");
    assert_eq!(desc.rom.base, 0x0800_0000);
    assert_eq!(desc.rom.file, None);
    assert!(desc.serial.is_empty());
    assert_eq!(desc.seed, None);

    let (base, size) = desc.mmio_span().unwrap();
    assert_eq!(base, 0x4000_0000);
    assert_eq!(size, 256 * 1024 * 1024);
}

#[test]
fn test_full_board_parses() {
    let yaml = r#"
schema_version: "1.0"
name: "max32600"
rom:
  base: 0x0
  size: "256KiB"
  file: "firmware/blinky.bin"
ram:
  base: 0x20000000
  size: "32KiB"
mmio:
  base: 0x40000000
  size: "256MiB"
serial:
  - 0x40004400
  - 0x40004404
seed: 1337
"#;
    let desc: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(desc.name, "max32600");
    assert_eq!(desc.serial, vec![0x4000_4400, 0x4000_4404]);
    assert_eq!(desc.seed, Some(1337));
    assert_eq!(
        desc.rom.file.as_deref(),
        Some(std::path::Path::new("firmware/blinky.bin"))
    );
}

#[test]
fn test_from_file_loads_and_tolerates_odd_fields() {
    let yaml = r#"
schema_version: "0.9"
name: "legacy-board"
rom:
  base: 0x0
  size: "64KiB"
ram:
  base: 0x20000000
  size: "16KiB"
mmio:
  base: 0x40000000
  size: "1MiB"
serial:
  - 0x40004400
  - 0x10000000
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.yaml");
    std::fs::write(&path, yaml).unwrap();

    // Off-version schema and the out-of-window serial address are warned
    // about, not refused.
    let desc = BoardDescriptor::from_file(&path).unwrap();
    assert_eq!(desc.schema_version, "0.9");
    assert_eq!(desc.serial.len(), 2);

    assert!(BoardDescriptor::from_file(dir.path().join("missing.yaml")).is_err());
}

#[test]
fn test_unknown_version_is_preserved() {
    let yaml = r#"
schema_version: "2.7"
name: "board"
rom:
  base: 0x0
  size: "1KB"
ram:
  base: 0x20000000
  size: "1KB"
mmio:
  base: 0x40000000
  size: "1KB"
"#;
    let desc: BoardDescriptor = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(desc.schema_version, "2.7");
}
