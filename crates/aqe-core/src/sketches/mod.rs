//! Probabilistic sketches used by the sketch execution strategy and by
//! the `create-sketch` operation: cardinality (HyperLogLog) and frequency
//! (Count-Min) estimators, both byte-exact on the wire.

pub mod cms;
pub mod hll;

pub use cms::CountMinSketch;
pub use hll::HyperLogLog;
