// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

use super::ObservedRead;

/// Plain backing storage. Reads return the last written value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageModel {
    pub value: u32,
    #[serde(default)]
    pub init_timestamp: Option<f64>,
}

impl Default for StorageModel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StorageModel {
    pub fn new(init_value: u32) -> Self {
        Self {
            value: init_value,
            init_timestamp: None,
        }
    }

    pub fn train(reads: &[ObservedRead]) -> Self {
        match reads.first() {
            Some(first) => Self {
                value: first.value,
                init_timestamp: Some(first.timestamp),
            },
            None => Self::new(0),
        }
    }

    pub fn read(&self) -> u32 {
        self.value
    }

    pub fn write(&mut self, value: u32) -> bool {
        self.value = value;
        true
    }

    /// On disagreement the value observed earlier wins; with nothing to
    /// compare the merged cell zeroes out.
    pub fn merge(&mut self, other: &StorageModel) -> bool {
        if self.value != other.value {
            match (self.init_timestamp, other.init_timestamp) {
                (Some(a), Some(b)) if a < b => {}
                (Some(a), Some(b)) if b < a => {
                    self.value = other.value;
                    self.init_timestamp = other.init_timestamp;
                }
                _ => {
                    self.value = 0;
                }
            }
        } else if self.init_timestamp.is_none() {
            self.init_timestamp = other.init_timestamp;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reads_from_values;

    #[test]
    fn test_read_follows_write() {
        let mut m = StorageModel::new(0x55);
        assert_eq!(m.read(), 0x55);
        assert!(m.write(0x77));
        assert_eq!(m.read(), 0x77);
    }

    #[test]
    fn test_train_takes_first_read() {
        let m = StorageModel::train(&reads_from_values(&[0xAA, 0xAA]));
        assert_eq!(m.value, 0xAA);
        assert_eq!(m.init_timestamp, Some(0.0));
    }

    #[test]
    fn test_merge_earlier_timestamp_wins() {
        let mut a = StorageModel {
            value: 1,
            init_timestamp: Some(5.0),
        };
        let b = StorageModel {
            value: 2,
            init_timestamp: Some(1.0),
        };
        assert!(a.merge(&b));
        assert_eq!(a.value, 2);
    }

    #[test]
    fn test_merge_disagreement_without_timestamps_zeroes() {
        let mut a = StorageModel::new(1);
        let b = StorageModel::new(2);
        assert!(a.merge(&b));
        assert_eq!(a.value, 0);
    }
}
