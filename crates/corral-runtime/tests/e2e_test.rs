//! End-to-end tests of the launch pipeline pieces that run unprivileged:
//!
//! 1. Cgroup manager over a fake v1 hierarchy (set, apply, destroy)
//! 2. Workspace assembly and teardown ordering with a recording mounter
//! 3. Shared lower layer under concurrent first use
//! 4. Command handoff from launcher pipe to init

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ResourceConfig};
use corral_core::cgroup::{CgroupHierarchy, CgroupManager};
use corral_core::filesystem::{Mounter, OverlayConfig};
use corral_core::namespace::NamespaceConfig;
use corral_runtime::process::{self, LaunchConfig};
use corral_runtime::workspace::Workspace;

// ── Fixtures ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TraceMounter {
    calls: Mutex<Vec<String>>,
}

impl TraceMounter {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Mounter for TraceMounter {
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("overlay {}", config.merged_dir.display()));
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("bind {} {}", source.display(), target.display()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("umount {}", target.display()));
        Ok(())
    }
}

/// Temp tree with `memory`, `cpu` and `cpuset` controller directories and
/// a mount table pointing at them.
fn fake_cgroup_root(dir: &Path) -> CgroupHierarchy {
    let mut table = String::from("proc /proc proc rw,nosuid,nodev,noexec 0 0\n");
    for controller in ["memory", "cpu", "cpuset"] {
        let mount = dir.join("cgroup").join(controller);
        std::fs::create_dir_all(&mount).unwrap();
        table.push_str(&format!(
            "cgroup {} cgroup rw,nosuid,nodev,noexec,relatime,{controller} 0 0\n",
            mount.display()
        ));
    }
    std::fs::write(dir.join("cgroup/cpuset/cpuset.mems"), "0\n").unwrap();
    let mounts = dir.join("mounts");
    std::fs::write(&mounts, table).unwrap();
    CgroupHierarchy::new(mounts)
}

fn write_rootfs(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    let data = b"#!/bin/sh\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_uid(u64::from(nix::unistd::geteuid().as_raw()));
    header.set_gid(u64::from(nix::unistd::getegid().as_raw()));
    header.set_cksum();
    builder.append_data(&mut header, "bin/sh", &data[..]).unwrap();
    builder.finish().unwrap();
}

fn runtime_root(dir: &Path) -> RuntimeConfig {
    let config = RuntimeConfig::with_root(dir);
    std::fs::create_dir_all(config.images_dir()).unwrap();
    write_rootfs(&config.images_dir().join("busybox.tar"));
    config
}

// ── Cgroups ──────────────────────────────────────────────────────────

#[test]
fn pipeline_cgroup_limits_attach_and_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let hierarchy = Arc::new(fake_cgroup_root(dir.path()));
    let manager = CgroupManager::for_container("0a1b2c3d4e", hierarchy);
    let resources = ResourceConfig::builder()
        .memory_limit("100m")
        .cpu_shares("512")
        .cpuset_cpus("0")
        .build()
        .unwrap();

    manager.set(&resources).unwrap();
    manager.apply(4242, &resources).unwrap();

    let group = |c: &str| dir.path().join("cgroup").join(c).join("corral-0a1b2c3d4e");
    let read = |c: &str, f: &str| std::fs::read_to_string(group(c).join(f)).unwrap();
    assert_eq!(read("memory", "memory.limit_in_bytes"), "104857600");
    assert_eq!(read("cpu", "cpu.shares"), "512");
    assert_eq!(read("cpuset", "cpuset.cpus"), "0");
    for controller in ["memory", "cpu", "cpuset"] {
        assert_eq!(read(controller, "tasks").trim(), "4242");
    }

    // Plain directories hold files the kernel would not have; destroy
    // falls back to a recursive removal.
    manager.destroy().unwrap();
    manager.destroy().unwrap();
    for controller in ["memory", "cpu", "cpuset"] {
        assert!(!group(controller).exists());
    }
}

#[test]
fn pipeline_unconstrained_config_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let hierarchy = Arc::new(fake_cgroup_root(dir.path()));
    let manager = CgroupManager::for_container("ffffffffff", hierarchy);
    let resources = ResourceConfig::default();

    manager.set(&resources).unwrap();
    manager.apply(1, &resources).unwrap();
    assert!(!dir.path().join("cgroup/memory/corral-ffffffffff").exists());
}

// ── Workspace ────────────────────────────────────────────────────────

#[test]
fn pipeline_workspace_volume_lifecycle_is_strictly_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let config = runtime_root(dir.path());
    let host = dir.path().join("host");
    std::fs::create_dir_all(&host).unwrap();
    let mounter = Arc::new(TraceMounter::default());
    let workspace = Workspace::new(config, mounter.clone());
    let volume = format!("{}:/mnt/data", host.display());

    let merged = workspace.build("c1", "busybox", Some(&volume)).unwrap();
    workspace.teardown("c1", Some(&volume)).unwrap();

    let target = merged.join("mnt/data");
    assert_eq!(
        mounter.calls(),
        vec![
            format!("overlay {}", merged.display()),
            format!("bind {} {}", host.display(), target.display()),
            format!("umount {}", target.display()),
            format!("umount {}", merged.display()),
        ]
    );
    assert!(host.is_dir());
}

#[test]
fn pipeline_invalid_volume_never_reaches_mount() {
    let dir = tempfile::tempdir().unwrap();
    let mounter = Arc::new(TraceMounter::default());
    let workspace = Workspace::new(runtime_root(dir.path()), mounter.clone());

    for spec in ["onlyonepart", "a:b:c", "relative:/x", "/x:"] {
        let err = workspace.build("c1", "busybox", Some(spec)).unwrap_err();
        assert!(matches!(err, CorralError::VolumeSpec { .. }), "{spec}");
    }
    assert!(mounter.calls().is_empty());
}

#[test]
fn pipeline_concurrent_containers_share_one_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(Workspace::new(
        runtime_root(dir.path()),
        Arc::new(TraceMounter::default()),
    ));

    let handles: Vec<_> = ["c1", "c2", "c3"]
        .into_iter()
        .map(|id| {
            let ws = Arc::clone(&workspace);
            std::thread::spawn(move || ws.build(id, "busybox", None).unwrap())
        })
        .collect();
    let merged: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(merged.len(), 3);
    let layer_entries: Vec<_> = std::fs::read_dir(dir.path().join("layers"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.ends_with(".lock"))
        .collect();
    assert_eq!(layer_entries, vec!["busybox"]);
    assert!(dir.path().join("layers/busybox/bin/sh").is_file());
}

// ── Handoff ──────────────────────────────────────────────────────────

#[test]
fn pipeline_detached_launch_then_command_handoff() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::with_root(dir.path());
    let launch = LaunchConfig {
        container_id: ContainerId::new("0a1b2c3d4e"),
        interactive: false,
        merged_dir: dir.path().join("merged"),
        env: Vec::new(),
        namespaces: NamespaceConfig::default(),
        pipe_fd: 3,
        init_flags: Vec::new(),
    };
    let (process, pipe) = process::launch(&config, &launch).unwrap();
    assert_eq!(process.container_id().as_str(), "0a1b2c3d4e");
    assert!(config.log_file("0a1b2c3d4e").is_file());

    drop(pipe);

    let (reader, writer) = nix::unistd::pipe().unwrap();
    let sender = std::thread::spawn(move || {
        process::send_command(
            std::fs::File::from(writer),
            &["ls".into(), "-al".into(), "/".into()],
        )
    });
    let argv = corral_runtime::init::read_command(std::fs::File::from(reader)).unwrap();
    sender.join().unwrap().unwrap();
    assert_eq!(argv, vec!["ls", "-al", "/"]);
}
