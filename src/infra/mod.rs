//! Runtime bootstrap: logging, metrics descriptions and service wiring.

pub mod error;
pub mod runtime;
pub mod telemetry;
