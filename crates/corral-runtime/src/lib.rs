//! Container lifecycle management for the corral runtime.
//!
//! The launcher side assembles a [`workspace`], clones the container's
//! init into fresh namespaces through [`process`], constrains it with the
//! cgroup manager and hands it the command; [`init`] is the code that runs
//! on the other side of that handshake. [`engine`] sequences the whole run
//! and the thin management commands built on [`state`] and [`logs`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod exec;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;
pub mod workspace;

pub use engine::{Engine, RunOptions, RunOutcome};
