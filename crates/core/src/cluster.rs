// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Spatial clustering of accessed MMIO addresses into peripherals.
//!
//! Density-based clustering over the 1-D address space with a neighborhood
//! of 0x100 and a minimum density of one sample. Every address is a core
//! point, so clusters are exactly the connected components of the
//! eps-neighborhood graph: two addresses share a peripheral when they are
//! linked by a chain of gaps no larger than `CLUSTER_EPS`.
//!
//! Cluster ids are assigned in ascending address order. They are stable for
//! a fixed address set but carry no meaning beyond membership.

use std::collections::{BTreeMap, BTreeSet};

pub const CLUSTER_EPS: u32 = 0x100;

pub fn cluster_peripherals(addresses: &BTreeSet<u32>) -> BTreeMap<usize, BTreeSet<u32>> {
    let mut clusters: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    let mut current = BTreeSet::new();
    let mut prev: Option<u32> = None;

    for &addr in addresses {
        if let Some(p) = prev {
            if addr - p > CLUSTER_EPS {
                clusters.insert(clusters.len(), std::mem::take(&mut current));
            }
        }
        current.insert(addr);
        prev = Some(addr);
    }
    if !current.is_empty() {
        clusters.insert(clusters.len(), current);
    }

    for (id, members) in &clusters {
        tracing::debug!(
            "Cluster {}: {:#010x}..={:#010x} ({} registers)",
            id,
            members.iter().next().unwrap(),
            members.iter().next_back().unwrap(),
            members.len()
        );
    }
    clusters
}

/// Cluster id owning `addr`, if any.
pub fn cluster_of(clusters: &BTreeMap<usize, BTreeSet<u32>>, addr: u32) -> Option<usize> {
    clusters
        .iter()
        .find(|(_, members)| members.contains(&addr))
        .map(|(id, _)| *id)
}
