//! # Kube Client Core
//!
//! Controller-side primitives for a Kubernetes-style client.
//!
//! This library provides the two cores a reconciler-style controller is
//! built on: a concurrent, deduplicating, priority-ordered work queue for
//! event loops, and a strategic merge patch engine for declarative
//! configuration reconciliation.
//!
//! ## Modules
//!
//! - [`workqueue`] - Priority work queue with coalescing re-enqueues,
//!   cooperative shutdown, and pluggable metrics
//! - [`strategicpatch`] - Strategic merge patch: two-way diff, patch
//!   application, three-way reconciliation with conflict detection
//! - [`mergepatch`] - Shared patch plumbing: errors, preconditions, and
//!   conflict rendering

pub mod mergepatch;
pub mod strategicpatch;
pub mod workqueue;

pub use mergepatch::{JsonMap, PatchError, PreconditionFunc};
pub use strategicpatch::{
    create_three_way_merge_patch, create_two_way_merge_patch, merging_maps_have_conflicts,
    strategic_merge_patch, LookupPatchMeta, PatchMeta, PatchStrategy, SchemaDescriptor,
};
pub use workqueue::PriorityQueue;
