//! Strategic merge patch module - structure-aware JSON diff and merge.
//!
//! This module powers declarative configuration reconciliation: two-way
//! diffing, application of patches with directive markers, and three-way
//! reconciliation with conflict detection, all driven by per-field patch
//! metadata from a pluggable provider.

mod meta;
mod patch;

#[cfg(test)]
mod patch_test;

pub use meta::*;
pub use patch::*;
