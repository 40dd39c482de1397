// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::HashMap;

use anyhow::Result;

use crate::tracefs::Tracefs;

/// A single traceable event, identified by its two-level tracefs name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub group: String,
    pub name: String,
}

/// Lookup from a user-visible event name to its tracefs identity.
pub trait EventCatalog {
    fn event_by_name(&self, name: &str) -> Option<&Event>;
}

/// Catalog built from the kernel's own event enumeration.
pub struct TracefsCatalog {
    events: HashMap<String, Event>,
}

impl TracefsCatalog {
    /// Reads `available_events` from the mounted instance and builds the
    /// name lookup.
    pub fn discover(tracefs: &Tracefs) -> Result<Self> {
        Ok(Self::from_available_events(tracefs.available_events()?))
    }

    /// Builds the lookup from `group:name` lines as `available_events`
    /// formats them. The same bare name can appear under several groups;
    /// the first occurrence wins. Events of the `ftrace` group are absent
    /// from the enumeration but always exist, so the ones clients ask for
    /// by name are seeded by hand.
    pub fn from_available_events<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut events = HashMap::new();
        for line in lines {
            let Some((group, name)) = line.split_once(':') else {
                continue;
            };
            events.entry(name.to_owned()).or_insert_with(|| Event {
                group: group.to_owned(),
                name: name.to_owned(),
            });
        }

        for name in ["print"] {
            events.insert(
                name.to_owned(),
                Event {
                    group: "ftrace".to_owned(),
                    name: name.to_owned(),
                },
            );
        }

        Self { events }
    }
}

impl EventCatalog for TracefsCatalog {
    fn event_by_name(&self, name: &str) -> Option<&Event> {
        self.events.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_and_name() {
        let catalog = TracefsCatalog::from_available_events(vec![
            "sched:sched_switch".to_owned(),
            "power:cpu_idle".to_owned(),
        ]);

        let event = catalog.event_by_name("sched_switch").unwrap();
        assert_eq!(event.group, "sched");
        assert_eq!(event.name, "sched_switch");

        let event = catalog.event_by_name("cpu_idle").unwrap();
        assert_eq!(event.group, "power");

        assert!(catalog.event_by_name("does_not_exist").is_none());
    }

    #[test]
    fn first_group_wins_on_duplicate_names() {
        let catalog = TracefsCatalog::from_available_events(vec![
            "sched:wakeup".to_owned(),
            "other:wakeup".to_owned(),
        ]);

        assert_eq!(catalog.event_by_name("wakeup").unwrap().group, "sched");
    }

    #[test]
    fn seeds_the_ftrace_group() {
        let catalog = TracefsCatalog::from_available_events(Vec::new());

        let event = catalog.event_by_name("print").unwrap();
        assert_eq!(event.group, "ftrace");
        assert_eq!(event.name, "print");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let catalog = TracefsCatalog::from_available_events(vec![
            "no_separator_here".to_owned(),
            "sched:sched_switch".to_owned(),
        ]);

        assert!(catalog.event_by_name("no_separator_here").is_none());
        assert!(catalog.event_by_name("sched_switch").is_some());
    }
}
