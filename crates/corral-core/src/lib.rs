//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: the clone flags for UTS, PID, mount, network and IPC isolation.
//! - **Cgroups v1**: memory, swap, CPU and cpuset controllers behind one manager.
//! - **Filesystem**: `OverlayFS` mounting, bind mounts, pseudo-filesystems and `pivot_root`.
//!
//! Every system call is wrapped in a function returning
//! [`corral_common::error::Result`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
