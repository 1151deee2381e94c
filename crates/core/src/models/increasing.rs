// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

use super::ObservedRead;

/// Critical value of the studentized residual for dropping a leading setup
/// read into the verbatim replay prefix. Corresponds to a two-sided t test
/// at roughly p = 1e-4 for the trace lengths we see.
const OUTLIER_CRITICAL: f64 = 4.0;

/// Linear-in-time register, typically a free-running counter.
///
/// Leading reads that sit far off the regression line (setup values observed
/// before the counter started) are replayed verbatim; once the prefix runs
/// out, reads are predicted from the fitted line against the replay clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncreasingModel {
    pub slope: f64,
    pub intercept: f64,
    #[serde(default)]
    pub outlier_prefix: Vec<u32>,
    #[serde(skip)]
    read_count: usize,
    #[serde(skip)]
    first_guess: Option<f64>,
}

fn linreg(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x) * (x - mean_x)).sum();
    if sxx < f64::EPSILON {
        return (0.0, mean_y);
    }
    let sxy: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

/// Externally studentized residual test for the first point: fit the tail
/// without it and ask how far the first observation falls from that line.
fn leading_outlier(xs: &[f64], ys: &[f64]) -> bool {
    let n = xs.len();
    if n < 4 {
        return false;
    }
    let (tail_x, tail_y) = (&xs[1..], &ys[1..]);
    let m = tail_x.len();
    let (slope, intercept) = linreg(tail_x, tail_y);
    let residual = ys[0] - (slope * xs[0] + intercept);

    let sse: f64 = tail_x
        .iter()
        .zip(tail_y)
        .map(|(x, y)| {
            let e = y - (slope * x + intercept);
            e * e
        })
        .sum();
    let dof = m as f64 - 2.0;
    if dof <= 0.0 {
        return false;
    }
    let s2 = sse / dof;
    if s2 < 1e-12 {
        // The tail is an exact line; any measurable miss is an outlier.
        return residual.abs() > 0.5;
    }

    let mean_x = tail_x.iter().sum::<f64>() / m as f64;
    let sxx: f64 = tail_x.iter().map(|x| (x - mean_x) * (x - mean_x)).sum();
    let mut leverage = 1.0 + 1.0 / m as f64;
    if sxx > f64::EPSILON {
        leverage += (xs[0] - mean_x) * (xs[0] - mean_x) / sxx;
    }
    let t = residual / (s2 * leverage).sqrt();
    t.abs() > OUTLIER_CRITICAL
}

impl IncreasingModel {
    /// The read stream converges to monotonically increasing: fewer than half
    /// the steps go down, and the last downward step sits in the first half.
    pub fn fits(values: &[u32]) -> bool {
        if values.len() < 3 {
            return false;
        }
        let inversions: Vec<usize> = (1..values.len())
            .filter(|&i| values[i] < values[i - 1])
            .collect();
        match inversions.last() {
            None => true,
            Some(&last) => {
                let half = 0.5 * values.len() as f64;
                (inversions.len() as f64) < half && (last as f64) < half
            }
        }
    }

    pub fn try_train(reads: &[ObservedRead]) -> Option<Self> {
        let values: Vec<u32> = reads.iter().map(|r| r.value).collect();
        if !Self::fits(&values) {
            return None;
        }

        let t0 = reads[0].timestamp;
        let mut xs: Vec<f64> = reads.iter().map(|r| r.timestamp - t0).collect();
        let mut ys: Vec<f64> = values.iter().map(|&v| v as f64).collect();

        let mut outlier_prefix = Vec::new();
        while leading_outlier(&xs, &ys) {
            outlier_prefix.push(ys[0] as u32);
            xs.remove(0);
            ys.remove(0);
        }

        // Re-zero time on the first surviving observation.
        let x0 = xs[0];
        for x in &mut xs {
            *x -= x0;
        }

        let (slope, intercept) = if xs.len() == 1 {
            (0.0, ys[0])
        } else {
            linreg(&xs, &ys)
        };

        Some(Self {
            slope,
            intercept,
            outlier_prefix,
            read_count: 0,
            first_guess: None,
        })
    }

    pub fn read(&mut self, now: f64) -> u32 {
        if self.read_count < self.outlier_prefix.len() {
            let value = self.outlier_prefix[self.read_count];
            self.read_count += 1;
            return value;
        }
        if self.first_guess.is_none() {
            self.first_guess = Some(now);
        }
        self.read_count += 1;

        let elapsed = now - self.first_guess.unwrap_or(now);
        let predicted = self.slope * elapsed + self.intercept;
        predicted.round().clamp(0.0, u32::MAX as f64) as u32
    }

    /// Read-only register; writes are accepted and ignored.
    pub fn write(&mut self, _value: u32) -> bool {
        true
    }

    pub fn merge(&mut self, other: &IncreasingModel) -> bool {
        if self.outlier_prefix != other.outlier_prefix {
            tracing::debug!(
                "Replay prefixes differ ({:?} != {:?})",
                self.outlier_prefix,
                other.outlier_prefix
            );
            return false;
        }
        self.slope = (self.slope + other.slope) / 2.0;
        self.intercept = (self.intercept + other.intercept) / 2.0;
        true
    }

    pub fn reset_cursors(&mut self) {
        self.read_count = 0;
        self.first_guess = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObservedRead;

    fn timed_reads(pairs: &[(u32, f64)]) -> Vec<ObservedRead> {
        pairs
            .iter()
            .map(|&(value, timestamp)| ObservedRead {
                value,
                pc: 0,
                size: 4,
                timestamp,
            })
            .collect()
    }

    #[test]
    fn test_fits_monotonic() {
        assert!(IncreasingModel::fits(&[100, 110, 120, 130, 140]));
        assert!(!IncreasingModel::fits(&[100, 110]));
        // One early dip converges; a late dip does not.
        assert!(IncreasingModel::fits(&[50, 10, 20, 30, 40, 50, 60, 70]));
        assert!(!IncreasingModel::fits(&[10, 20, 30, 40, 50, 60, 70, 5]));
    }

    #[test]
    fn test_counter_regression() {
        let reads = timed_reads(&[
            (100, 0.0),
            (110, 0.01),
            (120, 0.02),
            (130, 0.03),
            (140, 0.04),
        ]);
        let m = IncreasingModel::try_train(&reads).unwrap();
        assert!(m.outlier_prefix.is_empty());
        assert!((m.slope - 1000.0).abs() < 1.0, "slope {}", m.slope);
        assert!((m.intercept - 100.0).abs() < 1.0, "intercept {}", m.intercept);
    }

    #[test]
    fn test_replay_predicts_from_first_guess() {
        let reads = timed_reads(&[
            (100, 0.0),
            (110, 0.01),
            (120, 0.02),
            (130, 0.03),
            (140, 0.04),
        ]);
        let mut m = IncreasingModel::try_train(&reads).unwrap();
        assert_eq!(m.read(10.0), 100);
        let later = m.read(10.005);
        assert!((102..=108).contains(&later), "got {}", later);
    }

    #[test]
    fn test_setup_value_pinned_as_prefix() {
        let reads = timed_reads(&[
            (5000, 0.0),
            (0, 0.01),
            (10, 0.02),
            (20, 0.03),
            (30, 0.04),
            (40, 0.05),
            (50, 0.06),
        ]);
        let m = IncreasingModel::try_train(&reads).unwrap();
        assert_eq!(m.outlier_prefix, vec![5000]);
        assert!((m.slope - 1000.0).abs() < 1.0, "slope {}", m.slope);

        let mut m = m;
        assert_eq!(m.read(3.0), 5000);
        assert_eq!(m.read(3.0), 0);
        let v = m.read(3.01);
        assert!((8..=12).contains(&v), "got {}", v);
    }

    #[test]
    fn test_reads_non_decreasing_after_prefix() {
        let reads = timed_reads(&[(0, 0.0), (7, 0.01), (14, 0.02), (21, 0.03)]);
        let mut m = IncreasingModel::try_train(&reads).unwrap();
        let mut last = m.read(0.0);
        for i in 1..10 {
            let v = m.read(0.002 * i as f64);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn test_merge_averages_when_prefixes_match() {
        let a_reads = timed_reads(&[(0, 0.0), (10, 0.01), (20, 0.02), (30, 0.03)]);
        let b_reads = timed_reads(&[(0, 0.0), (20, 0.01), (40, 0.02), (60, 0.03)]);
        let mut a = IncreasingModel::try_train(&a_reads).unwrap();
        let b = IncreasingModel::try_train(&b_reads).unwrap();
        assert!(a.merge(&b));
        assert!((a.slope - 1500.0).abs() < 1.0, "slope {}", a.slope);
    }

    #[test]
    fn test_merge_fails_on_prefix_mismatch() {
        let mut a = IncreasingModel {
            slope: 1.0,
            intercept: 0.0,
            outlier_prefix: vec![1],
            read_count: 0,
            first_guess: None,
        };
        let b = IncreasingModel {
            slope: 1.0,
            intercept: 0.0,
            outlier_prefix: vec![2],
            read_count: 0,
            first_guess: None,
        };
        assert!(!a.merge(&b));
    }
}
