//! Admission validation engine: fans mutating operations out to policy
//! webhooks and enforces their verdicts.

pub mod admission;
pub mod platform_dirs;

pub use admission::{AdmissionError, AdmissionManager, AdmissionResult};
