//! # corral-image
//!
//! Image layer management for the corral runtime.
//!
//! Handles:
//! - **Layers**: extracting plain or gzip-compressed tar archives.
//! - **Storage**: the shared, read-only lower layer per image, extracted
//!   exactly once and published atomically.
//! - **Hashing**: SHA-256 digests identifying the archive a layer came from.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod storage;

pub use storage::{LayerStore, LowerLayer};
