// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// One client's tracing request.
///
/// A request is immutable once submitted. The muxer may grant less than was
/// asked for; the granted subset is reported back as an [`AcceptedConfig`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtraceConfig {
    /// ftrace events to enable, by bare event name. Names unknown to the
    /// kernel are skipped, they do not fail the request.
    pub event_names: BTreeSet<String>,
    /// Requested per-CPU ring buffer size in KB. 0 selects the default.
    pub buffer_size_kb: u32,
    /// atrace categories to hand to the helper, in order.
    pub atrace_categories: Vec<String>,
    /// App identifiers appended to the helper invocation after `-a`.
    pub atrace_apps: Vec<String>,
}

impl FtraceConfig {
    /// Whether granting this request involves the atrace helper.
    pub fn requires_atrace(&self) -> bool {
        !self.atrace_categories.is_empty() || !self.atrace_apps.is_empty()
    }
}

/// Handle to an accepted configuration.
///
/// Ids are allocated monotonically starting at 1 and are never re-issued
/// for the lifetime of a muxer, released ones included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FtraceConfigId(pub u64);

/// The slice of a request the muxer actually imposed on the kernel: only
/// the event names that were enabled, found already enabled, or implicitly
/// enabled by their group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedConfig {
    pub event_names: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atrace_required_by_categories_or_apps() {
        assert!(!FtraceConfig::default().requires_atrace());

        let categories = FtraceConfig {
            atrace_categories: vec!["gfx".to_owned()],
            ..Default::default()
        };
        assert!(categories.requires_atrace());

        let apps = FtraceConfig {
            atrace_apps: vec!["com.android.settings".to_owned()],
            ..Default::default()
        };
        assert!(apps.requires_atrace());
    }
}
