//! Prometheus metrics for the controllers
//!
//! Counters are labelled by controller name, and by step where a step is involved.

mod prometheus;

pub use prometheus::*;
