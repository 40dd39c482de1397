// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The tracing control surface: what the muxer is allowed to do to the
//! kernel, and the adapter that does it through a tracefs mount.
//!
//! Everything here is stateless; the kernel owns the state. Adapter
//! failures are logged and folded into the `bool`/empty contract the
//! [`TracingControl`] trait promises, so callers only ever reason about
//! "did the kernel take it".

use std::collections::BTreeSet;
use std::fs;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use log::warn;

use crate::muxer::page_size_kb;

const PROCFS_MOUNTS: &str = "/proc/mounts";
const TRACEFS: &str = "tracefs";
const DEBUGFS: &str = "debugfs";

/// The muxer's whole view of the kernel tracing facility.
pub trait TracingControl {
    /// Whether tracing is currently recording, regardless of who enabled it.
    fn is_tracing_enabled(&self) -> bool;

    /// Enables a single event. Returns false if the kernel refused.
    fn enable_event(&self, group: &str, name: &str) -> bool;

    /// Disables a single event. Returns false if the kernel refused.
    fn disable_event(&self, group: &str, name: &str) -> bool;

    /// Blanket-disables every event in one write.
    fn disable_all_events(&self) -> bool;

    fn enable_tracing(&self) -> bool;

    fn disable_tracing(&self) -> bool;

    /// The currently selected trace clock, or empty if unreadable.
    fn clock(&self) -> String;

    /// Every clock the kernel offers, the selected one included.
    fn available_clocks(&self) -> BTreeSet<String>;

    fn set_clock(&self, clock: &str) -> bool;

    /// Sizes each per-CPU ring buffer. 0 pages gives the memory back.
    fn set_cpu_buffer_size_pages(&self, pages: usize) -> bool;

    /// Discards everything recorded so far.
    fn clear_trace(&self) -> bool;
}

/// Returns the mount points for a filesystem type.
fn fs_mounts(mount_type: &str) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(PROCFS_MOUNTS)
        .with_context(|| format!("Failed to open {}", PROCFS_MOUNTS))?;
    let reader = BufReader::new(file);

    let mut mounts = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from /proc/mounts")?;
        let mount_info: Vec<&str> = line.split_whitespace().collect();

        if mount_info.len() > 3 && mount_info[2] == mount_type {
            mounts.push(PathBuf::from(mount_info[1]));
        }
    }

    Ok(mounts)
}

/// Returns the tracefs mount point.
pub fn tracefs_mount() -> Result<PathBuf> {
    let mounts = fs_mounts(TRACEFS)?;
    mounts.into_iter().next().context("No tracefs mount found")
}

/// Returns the debugfs mount point.
fn debugfs_mount() -> Result<PathBuf> {
    let mounts = fs_mounts(DEBUGFS)?;
    mounts.into_iter().next().context("No debugfs mount found")
}

/// Control-file adapter over a mounted tracefs instance.
pub struct Tracefs {
    root: PathBuf,
}

impl Tracefs {
    /// Discovers the tracefs mount from /proc/mounts, falling back to the
    /// legacy location under debugfs.
    pub fn new() -> Result<Self> {
        let root = match tracefs_mount() {
            Ok(root) => root,
            Err(_) => debugfs_mount()?.join("tracing"),
        };
        Ok(Self { root })
    }

    /// Uses `root` as the control directory instead of discovering a mount.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the `group:name` pairs the kernel can trace. Events of the
    /// `ftrace` group are not part of this enumeration.
    pub fn available_events(&self) -> Result<Vec<String>> {
        let path = self.root.join("available_events");
        let file =
            fs::File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                events.push(line.trim().to_owned());
            }
        }

        Ok(events)
    }

    fn read_control(&self, rel: &str) -> Result<String> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn write_control(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write '{}' to {}", contents, path.display()))
    }

    fn write_checked(&self, rel: &str, contents: &str) -> bool {
        match self.write_control(rel, contents) {
            Ok(()) => true,
            Err(e) => {
                warn!("{:#}", e);
                false
            }
        }
    }
}

impl TracingControl for Tracefs {
    fn is_tracing_enabled(&self) -> bool {
        match self.read_control("tracing_on") {
            Ok(contents) => contents.trim() == "1",
            Err(e) => {
                warn!("{:#}", e);
                false
            }
        }
    }

    fn enable_event(&self, group: &str, name: &str) -> bool {
        self.write_checked(&format!("events/{}/{}/enable", group, name), "1")
    }

    fn disable_event(&self, group: &str, name: &str) -> bool {
        self.write_checked(&format!("events/{}/{}/enable", group, name), "0")
    }

    fn disable_all_events(&self) -> bool {
        self.write_checked("events/enable", "0")
    }

    fn enable_tracing(&self) -> bool {
        self.write_checked("tracing_on", "1")
    }

    fn disable_tracing(&self) -> bool {
        self.write_checked("tracing_on", "0")
    }

    fn clock(&self) -> String {
        // trace_clock lists every clock, the selected one in brackets:
        // "[local] global boot".
        let contents = match self.read_control("trace_clock") {
            Ok(contents) => contents,
            Err(e) => {
                warn!("{:#}", e);
                return String::new();
            }
        };
        for word in contents.split_whitespace() {
            if let Some(current) = word.strip_prefix('[').and_then(|w| w.strip_suffix(']')) {
                return current.to_owned();
            }
        }
        String::new()
    }

    fn available_clocks(&self) -> BTreeSet<String> {
        let contents = match self.read_control("trace_clock") {
            Ok(contents) => contents,
            Err(e) => {
                warn!("{:#}", e);
                return BTreeSet::new();
            }
        };
        contents
            .split_whitespace()
            .map(|word| word.trim_matches(|c| c == '[' || c == ']').to_owned())
            .collect()
    }

    fn set_clock(&self, clock: &str) -> bool {
        self.write_checked("trace_clock", clock)
    }

    fn set_cpu_buffer_size_pages(&self, pages: usize) -> bool {
        // buffer_size_kb takes KB and rejects 0; 1 KB is the smallest
        // accepted request and the kernel clamps it up to its own minimum.
        let kb = (pages * page_size_kb()).max(1);
        self.write_checked("buffer_size_kb", &kb.to_string())
    }

    fn clear_trace(&self) -> bool {
        let path = self.root.join("trace");
        match fs::File::create(&path) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to truncate {}: {}", path.display(), e);
                false
            }
        }
    }
}
