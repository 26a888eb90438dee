//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` mounting, `pivot_root` for switching the root
//! filesystem, and the mount utilities used on both sides of the
//! namespace boundary.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;

pub use mount::{HostMounter, Mounter};
pub use overlayfs::OverlayConfig;
