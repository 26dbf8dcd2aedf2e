use sha2::{Digest, Sha256};

use aqe_db::error::{AqeError, AqeResult};

const DEFAULT_B: u8 = 10;

/// Cardinality estimator using HyperLogLog. Parameterized by `b`
/// (register-selection bits, clamped into `[4, 16]`), with `m = 2^b`
/// single-byte registers.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperLogLog {
    b: u8,
    m: u32,
    registers: Vec<u8>,
    alpha: f64,
}

impl HyperLogLog {
    pub fn new(b: u8) -> Self {
        let b = if (4..=16).contains(&b) { b } else { DEFAULT_B };
        let m = 1u32 << b;

        let alpha = if m >= 128 {
            0.7213 / (1.0 + 1.079 / m as f64)
        } else if m >= 64 {
            0.709
        } else if m >= 32 {
            0.697
        } else if m >= 16 {
            0.673
        } else {
            0.5
        };

        Self {
            b,
            m,
            registers: vec![0u8; m as usize],
            alpha,
        }
    }

    pub fn add(&mut self, value: &[u8]) {
        let hash = hash64(value);

        let j = (hash & ((1u64 << self.b) - 1)) as usize;
        let w = hash >> self.b;

        // `w` only ever has the remaining `64 - b` bits set, so
        // `trailing_zeros()` already stays within that window; it returns 64
        // for `w == 0`, which the all-zero window maps back down to.
        let max_shift = 64 - self.b as u32;
        let rho = if w == 0 {
            max_shift + 1
        } else {
            w.trailing_zeros() + 1
        };
        let rho = rho as u8;

        if rho > self.registers[j] {
            self.registers[j] = rho;
        }
    }

    pub fn add_str(&mut self, value: &str) {
        self.add(value.as_bytes());
    }

    /// Estimated number of distinct items added so far.
    pub fn count(&self) -> u64 {
        let harmonic_mean: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw_estimate = self.alpha * (self.m as f64).powi(2) / harmonic_mean;

        if raw_estimate <= 2.5 * self.m as f64 {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros != 0 {
                return (self.m as f64 * (self.m as f64 / zeros as f64).ln()) as u64;
            }
        }

        let two_32 = (1u64 << 32) as f64;
        if raw_estimate <= two_32 / 30.0 {
            return raw_estimate as u64;
        }

        (-1.0 * two_32 * (1.0 - raw_estimate / two_32).ln()) as u64
    }

    /// Theoretical relative standard error of the estimator, `1.04/√m`.
    pub fn standard_error(&self) -> f64 {
        1.04 / (self.m as f64).sqrt()
    }

    /// Confidence interval for `count()` at the given confidence level.
    /// Supports 0.90, 0.95 and 0.99; anything else defaults to 95%.
    pub fn confidence_interval(&self, confidence: f64) -> (u64, u64) {
        let estimate = self.count() as f64;
        let std_err = self.standard_error() * estimate;

        let z = if (confidence - 0.90).abs() < 1e-9 {
            1.645
        } else if (confidence - 0.99).abs() < 1e-9 {
            2.576
        } else {
            1.96
        };

        let margin = z * std_err;
        let lower = (estimate - margin).max(0.0);
        let upper = estimate + margin;

        (lower as u64, upper as u64)
    }

    /// Merge another sketch's registers into this one (register-wise max).
    /// Both sketches must share the same `b`/`m`.
    pub fn merge(&mut self, other: &HyperLogLog) -> AqeResult<()> {
        if self.m != other.m || self.b != other.b {
            return Err(AqeError::InvariantViolation(format!(
                "cannot merge HLLs with different parameters: ({}, {}) vs ({}, {})",
                self.b, self.m, other.b, other.m
            )));
        }

        for (r, &o) in self.registers.iter_mut().zip(other.registers.iter()) {
            if o > *r {
                *r = o;
            }
        }

        Ok(())
    }

    /// `b` (1 byte) ‖ `m` (4 bytes LE) ‖ registers (`m` bytes).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.registers.len());
        out.push(self.b);
        out.extend_from_slice(&self.m.to_le_bytes());
        out.extend_from_slice(&self.registers);
        out
    }

    pub fn deserialize(data: &[u8]) -> AqeResult<Self> {
        if data.len() < 5 {
            return Err(AqeError::InvariantViolation(
                "insufficient data for HLL deserialization".to_string(),
            ));
        }

        let b = data[0];
        let m = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);

        if data.len() != 5 + m as usize {
            return Err(AqeError::InvariantViolation(
                "HLL serialized data length mismatch".to_string(),
            ));
        }

        let mut hll = HyperLogLog::new(b);
        // new() may clamp b; an out-of-range byte in stored data is itself
        // invalid, since a real serialize() call always wrote a valid b.
        if hll.b != b {
            return Err(AqeError::InvariantViolation(format!(
                "HLL serialized with out-of-range b={b}"
            )));
        }
        hll.m = m;
        hll.registers = data[5..].to_vec();
        Ok(hll)
    }
}

fn hash64(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_b_clamps_to_default() {
        let hll = HyperLogLog::new(2);
        assert_eq!(hll.b, DEFAULT_B);

        let hll = HyperLogLog::new(20);
        assert_eq!(hll.b, DEFAULT_B);
    }

    #[test]
    fn counts_large_cardinality_within_tolerance() {
        let mut hll = HyperLogLog::new(12);
        for i in 0..100_000 {
            hll.add_str(&format!("item-{i}"));
        }

        let estimate = hll.count() as f64;
        let rel_error = (estimate - 100_000.0).abs() / 100_000.0;
        assert!(rel_error < 0.05, "relative error {rel_error} too high");
    }

    #[test]
    fn serialize_round_trips_exactly() {
        let mut hll = HyperLogLog::new(8);
        for i in 0..5000 {
            hll.add_str(&format!("value-{i}"));
        }

        let bytes = hll.serialize();
        let restored = HyperLogLog::deserialize(&bytes).unwrap();
        assert_eq!(hll, restored);
        assert_eq!(hll.count(), restored.count());
    }

    #[test]
    fn merge_with_self_is_idempotent() {
        let mut hll = HyperLogLog::new(8);
        for i in 0..1000 {
            hll.add_str(&format!("x-{i}"));
        }

        let clone = HyperLogLog::deserialize(&hll.serialize()).unwrap();
        hll.merge(&clone).unwrap();

        assert_eq!(hll, clone);
    }

    #[test]
    fn merge_rejects_mismatched_parameters() {
        let mut a = HyperLogLog::new(8);
        let b = HyperLogLog::new(10);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_data() {
        assert!(HyperLogLog::deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn deserialize_rejects_length_mismatch() {
        let mut hll = HyperLogLog::new(8);
        hll.add_str("a");
        let mut bytes = hll.serialize();
        bytes.pop();
        assert!(HyperLogLog::deserialize(&bytes).is_err());
    }
}
