use sha2::{Digest, Sha256};

use aqe_db::error::{AqeError, AqeResult};

/// Frequency estimator using a Count-Min Sketch. Width/depth are derived
/// from `(epsilon, delta)`: `w = ⌈e/ε⌉`, `d = ⌈ln(1/δ)⌉`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMinSketch {
    w: u32,
    d: u32,
    epsilon: f64,
    delta: f64,
    table: Vec<u64>,
}

impl CountMinSketch {
    pub fn new(epsilon: f64, delta: f64) -> Self {
        let w = (std::f64::consts::E / epsilon).ceil() as u32;
        let d = (1.0_f64 / delta).ln().ceil() as u32;

        Self {
            w,
            d,
            epsilon,
            delta,
            table: vec![0u64; (w * d) as usize],
        }
    }

    pub fn add(&mut self, key: &[u8], count: u64) {
        for i in 0..self.d {
            let col = self.hash(key, i) % self.w as u64;
            let idx = (i * self.w) as usize + col as usize;
            self.table[idx] += count;
        }
    }

    pub fn add_str(&mut self, key: &str, count: u64) {
        self.add(key.as_bytes(), count);
    }

    /// Estimated count for `key`. Never underestimates the true count.
    pub fn estimate(&self, key: &[u8]) -> u64 {
        (0..self.d)
            .map(|i| {
                let col = self.hash(key, i) % self.w as u64;
                let idx = (i * self.w) as usize + col as usize;
                self.table[idx]
            })
            .min()
            .unwrap_or(0)
    }

    pub fn estimate_str(&self, key: &str) -> u64 {
        self.estimate(key.as_bytes())
    }

    /// `w` (4 LE) ‖ `d` (4 LE) ‖ `ε` (f64 LE) ‖ `δ` (f64 LE) ‖ row-major counts.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.table.len() * 8);
        out.extend_from_slice(&self.w.to_le_bytes());
        out.extend_from_slice(&self.d.to_le_bytes());
        out.extend_from_slice(&self.epsilon.to_le_bytes());
        out.extend_from_slice(&self.delta.to_le_bytes());
        for &v in &self.table {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> AqeResult<Self> {
        if data.len() < 24 {
            return Err(AqeError::InvariantViolation(
                "insufficient data for CMS deserialization".to_string(),
            ));
        }

        let w = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let d = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let epsilon = f64::from_le_bytes(data[8..16].try_into().unwrap());
        let delta = f64::from_le_bytes(data[16..24].try_into().unwrap());

        let expected_len = 24 + (w as usize * d as usize) * 8;
        if data.len() != expected_len {
            return Err(AqeError::InvariantViolation(
                "CMS serialized data length mismatch".to_string(),
            ));
        }

        let mut table = Vec::with_capacity(w as usize * d as usize);
        let mut offset = 24;
        for _ in 0..(w * d) {
            table.push(u64::from_le_bytes(
                data[offset..offset + 8].try_into().unwrap(),
            ));
            offset += 8;
        }

        Ok(Self {
            w,
            d,
            epsilon,
            delta,
            table,
        })
    }

    fn hash(&self, key: &[u8], seed: u32) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(seed.to_string().as_bytes());
        let digest = hasher.finalize();
        u64::from_le_bytes(digest[0..8].try_into().unwrap())
    }
}
