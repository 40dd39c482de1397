// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Reconciles the demands of every live tracing client into one kernel-side
//! configuration.
//!
//! The muxer owns a table of accepted configurations and its own record of
//! what it has imposed on the kernel. A request merges into that record; a
//! release recomputes the union of what is still needed and disables the
//! rest. The first request of a session performs the one-shot setup (atrace,
//! clock, buffer sizing) and the last release tears everything down again.
//!
//! The kernel facility is shared machine-wide and there are no
//! transactions: if some other agent is found using ftrace, or turns it off
//! under a live session, the muxer declines further work rather than fight
//! over the control files.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use log::debug;
use thiserror::Error;

use crate::atrace::AtraceRunner;
use crate::catalog::EventCatalog;
use crate::config::AcceptedConfig;
use crate::config::FtraceConfig;
use crate::config::FtraceConfigId;
use crate::tracefs::TracingControl;

// trace_clocks in preference order.
const TRACE_CLOCKS: [&str; 3] = ["boot", "global", "local"];

const DEFAULT_PER_CPU_BUFFER_SIZE_KB: usize = 512;
const MAX_PER_CPU_BUFFER_SIZE_KB: usize = 2 * 1024;

lazy_static::lazy_static! {
    static ref PAGE_SIZE_KB: usize = {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            panic!("sysconf(_SC_PAGESIZE) failed");
        }
        page_size as usize / 1024
    };
}

/// Host page size in KB, the unit the per-CPU ring buffers are sized in.
pub fn page_size_kb() -> usize {
    *PAGE_SIZE_KB
}

/// Maps a requested per-CPU buffer size in KB to whole ring-buffer pages.
///
/// A request of 0 selects the default, and so does anything above the
/// per-CPU ceiling. The result is always at least one page.
pub fn compute_cpu_buffer_size_in_pages(requested_kb: usize) -> usize {
    let requested_kb = if requested_kb == 0 || requested_kb > MAX_PER_CPU_BUFFER_SIZE_KB {
        DEFAULT_PER_CPU_BUFFER_SIZE_KB
    } else {
        requested_kb
    };
    (requested_kb / page_size_kb()).max(1)
}

// The full event set a request needs: the named events, plus the "print"
// marker event that carries atrace annotations from userspace.
fn effective_events(request: &FtraceConfig) -> BTreeSet<String> {
    let mut events = request.event_names.clone();
    if request.requires_atrace() {
        events.insert("print".to_owned());
    }
    events
}

/// Why a request for tracing could not be granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Tracing was already enabled by an agent outside this process; the
    /// facility is not ours to configure.
    #[error("ftrace is in use by another agent")]
    ForeignOwner,
    /// Tracing was switched off behind our back while sessions were live.
    #[error("ftrace was disabled outside of the active session")]
    TornDown,
}

/// What the muxer believes it has imposed on the kernel.
#[derive(Debug, Default)]
struct CurrentState {
    // Events enabled by this muxer, and nobody else.
    ftrace_events: BTreeSet<String>,
    tracing_on: bool,
    atrace_on: bool,
    cpu_buffer_size_pages: usize,
}

/// Merges a dynamic set of [`FtraceConfig`] requests into a single
/// consistent configuration of the kernel tracing facility.
pub struct FtraceConfigMuxer<'a> {
    tracefs: &'a dyn TracingControl,
    catalog: &'a dyn EventCatalog,
    atrace: &'a dyn AtraceRunner,
    current_state: CurrentState,
    configs: BTreeMap<FtraceConfigId, AcceptedConfig>,
    last_id: u64,
}

impl<'a> FtraceConfigMuxer<'a> {
    pub fn new(
        tracefs: &'a dyn TracingControl,
        catalog: &'a dyn EventCatalog,
        atrace: &'a dyn AtraceRunner,
    ) -> Self {
        Self {
            tracefs,
            catalog,
            atrace,
            current_state: CurrentState::default(),
            configs: BTreeMap::new(),
            last_id: 0,
        }
    }

    /// Grants a tracing request, enabling whatever subset of it the kernel
    /// accepts, and returns a handle to release it with later.
    ///
    /// The first grant of a session also selects the trace clock, sizes the
    /// per-CPU buffers, starts atrace if the request calls for it and turns
    /// tracing on. A rejection mutates nothing, kernel-side or here.
    pub fn request_config(
        &mut self,
        request: &FtraceConfig,
    ) -> Result<FtraceConfigId, RequestError> {
        let is_ftrace_enabled = self.tracefs.is_tracing_enabled();

        if self.configs.is_empty() {
            debug_assert!(!self.current_state.tracing_on);

            // Someone outside this process is using ftrace. Give up now.
            if is_ftrace_enabled {
                return Err(RequestError::ForeignOwner);
            }

            if request.requires_atrace() {
                self.enable_atrace(request);
            }
            self.setup_clock();
            self.setup_buffer_size(request);
        } else if !is_ftrace_enabled {
            // Someone turned ftrace off behind our back. Give up.
            return Err(RequestError::TornDown);
        }

        let mut accepted = AcceptedConfig::default();
        for name in effective_events(request) {
            let Some(event) = self.catalog.event_by_name(&name) else {
                debug!("Can't enable {}, event not known", name);
                continue;
            };
            // The "ftrace" group has no per-event enable state; its members
            // are always on while tracing is.
            if self.current_state.ftrace_events.contains(&name) || event.group == "ftrace" {
                accepted.event_names.insert(name);
                continue;
            }
            if self.tracefs.enable_event(&event.group, &event.name) {
                self.current_state.ftrace_events.insert(name.clone());
                accepted.event_names.insert(name);
            }
        }

        if self.configs.is_empty() {
            self.tracefs.enable_tracing();
            self.current_state.tracing_on = true;
        }

        self.last_id += 1;
        let id = FtraceConfigId(self.last_id);
        self.configs.insert(id, accepted);
        Ok(id)
    }

    /// Releases a previously granted configuration, disabling the events no
    /// other live configuration still needs.
    ///
    /// Releasing the last configuration tears the session down: tracing
    /// off, buffers returned, all events disabled, trace cleared and atrace
    /// stopped if it was started. Returns false for an unknown handle.
    pub fn remove_config(&mut self, id: FtraceConfigId) -> bool {
        if self.configs.remove(&id).is_none() {
            return false;
        }

        let still_required: BTreeSet<String> = self
            .configs
            .values()
            .flat_map(|config| config.event_names.iter().cloned())
            .collect();

        let to_disable: Vec<String> = self
            .current_state
            .ftrace_events
            .difference(&still_required)
            .cloned()
            .collect();

        for name in to_disable {
            let Some(event) = self.catalog.event_by_name(&name) else {
                continue;
            };
            if self.tracefs.disable_event(&event.group, &event.name) {
                self.current_state.ftrace_events.remove(&name);
            }
        }

        if self.configs.is_empty() {
            debug_assert!(self.current_state.tracing_on);
            self.tracefs.disable_tracing();
            self.tracefs.set_cpu_buffer_size_pages(0);
            self.tracefs.disable_all_events();
            self.tracefs.clear_trace();
            self.current_state.tracing_on = false;
            self.current_state.cpu_buffer_size_pages = 0;
            if self.current_state.atrace_on {
                self.disable_atrace();
            }
        }

        true
    }

    /// The accepted projection of a granted request.
    pub fn get_config(&self, id: FtraceConfigId) -> Option<&AcceptedConfig> {
        self.configs.get(&id)
    }

    /// Pages this muxer has reserved per CPU, 0 while idle.
    pub fn cpu_buffer_size_pages(&self) -> usize {
        self.current_state.cpu_buffer_size_pages
    }

    fn setup_clock(&self) {
        let current_clock = self.tracefs.clock();
        let available = self.tracefs.available_clocks();

        for clock in TRACE_CLOCKS {
            if !available.contains(clock) {
                continue;
            }
            if current_clock != clock {
                self.tracefs.set_clock(clock);
            }
            break;
        }
    }

    fn setup_buffer_size(&mut self, request: &FtraceConfig) {
        let pages = compute_cpu_buffer_size_in_pages(request.buffer_size_kb as usize);
        self.tracefs.set_cpu_buffer_size_pages(pages);
        self.current_state.cpu_buffer_size_pages = pages;
    }

    // A started atrace cannot be partially backed out, so a helper failure
    // is fatal. atrace_on is set iff a matching stop will be issued.
    fn enable_atrace(&mut self, request: &FtraceConfig) {
        debug_assert!(!self.current_state.atrace_on);
        self.current_state.atrace_on = true;

        debug!("Starting atrace");
        let mut args = vec!["atrace".to_owned(), "--async_start".to_owned()];
        args.extend(request.atrace_categories.iter().cloned());
        if !request.atrace_apps.is_empty() {
            args.push("-a".to_owned());
            args.extend(request.atrace_apps.iter().cloned());
        }

        if !self.atrace.run(&args) {
            panic!("atrace --async_start failed");
        }
    }

    fn disable_atrace(&mut self) {
        debug_assert!(self.current_state.atrace_on);

        debug!("Stopping atrace");
        if !self
            .atrace
            .run(&["atrace".to_owned(), "--async_stop".to_owned()])
        {
            panic!("atrace --async_stop failed");
        }

        self.current_state.atrace_on = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_zero_selects_the_default() {
        let default_pages = DEFAULT_PER_CPU_BUFFER_SIZE_KB / page_size_kb();
        assert_eq!(compute_cpu_buffer_size_in_pages(0), default_pages);
    }

    #[test]
    fn buffer_size_above_ceiling_selects_the_default() {
        let default_pages = DEFAULT_PER_CPU_BUFFER_SIZE_KB / page_size_kb();
        assert_eq!(
            compute_cpu_buffer_size_in_pages(MAX_PER_CPU_BUFFER_SIZE_KB + 1),
            default_pages
        );
        assert_eq!(compute_cpu_buffer_size_in_pages(8192), default_pages);
    }

    #[test]
    fn buffer_size_in_range_is_respected() {
        assert_eq!(
            compute_cpu_buffer_size_in_pages(1024),
            1024 / page_size_kb()
        );
        assert_eq!(
            compute_cpu_buffer_size_in_pages(MAX_PER_CPU_BUFFER_SIZE_KB),
            MAX_PER_CPU_BUFFER_SIZE_KB / page_size_kb()
        );
    }

    #[test]
    fn buffer_size_is_at_least_one_page() {
        // Smaller than a page still reserves one.
        assert_eq!(compute_cpu_buffer_size_in_pages(1), 1);
        for kb in 0..=MAX_PER_CPU_BUFFER_SIZE_KB + 16 {
            assert!(compute_cpu_buffer_size_in_pages(kb) >= 1);
        }
    }

    #[test]
    fn buffer_size_never_exceeds_the_ceiling() {
        for kb in 0..=4 * MAX_PER_CPU_BUFFER_SIZE_KB {
            let pages = compute_cpu_buffer_size_in_pages(kb);
            assert!(pages * page_size_kb() <= MAX_PER_CPU_BUFFER_SIZE_KB);
        }
    }

    #[test]
    fn buffer_size_is_idempotent_on_valid_sizes() {
        for kb in 1..=MAX_PER_CPU_BUFFER_SIZE_KB {
            let pages = compute_cpu_buffer_size_in_pages(kb);
            assert_eq!(compute_cpu_buffer_size_in_pages(pages * page_size_kb()), pages);
        }
    }

    #[test]
    fn atrace_requests_force_the_print_event() {
        let plain = FtraceConfig {
            event_names: ["sched_switch".to_owned()].into_iter().collect(),
            ..Default::default()
        };
        assert!(!effective_events(&plain).contains("print"));

        let with_atrace = FtraceConfig {
            event_names: ["sched_switch".to_owned()].into_iter().collect(),
            atrace_categories: vec!["gfx".to_owned()],
            ..Default::default()
        };
        let events = effective_events(&with_atrace);
        assert!(events.contains("print"));
        assert!(events.contains("sched_switch"));
    }
}
