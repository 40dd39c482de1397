// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use log::warn;

/// Path of the atrace helper binary on device.
pub const ATRACE_PATH: &str = "/system/bin/atrace";

/// Runs the atrace helper with a start/stop argument vector.
///
/// `args[0]` carries the conventional `"atrace"` argv\[0\]; the rest is the
/// helper command line. Returns true iff the helper exited successfully.
pub trait AtraceRunner {
    fn run(&self, args: &[String]) -> bool;
}

/// The on-device helper at [`ATRACE_PATH`].
///
/// atrace exists only on Android; on other platforms this runner logs the
/// invocation it would have made and reports success without spawning
/// anything.
pub struct Atrace;

impl AtraceRunner for Atrace {
    #[cfg(target_os = "android")]
    fn run(&self, args: &[String]) -> bool {
        use std::os::unix::process::CommandExt;
        use std::process::Command;

        let mut cmd = Command::new(ATRACE_PATH);
        if let Some((argv0, rest)) = args.split_first() {
            cmd.arg0(argv0).args(rest);
        }
        match cmd.status() {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("Failed to run {}: {}", ATRACE_PATH, e);
                false
            }
        }
    }

    #[cfg(not(target_os = "android"))]
    fn run(&self, args: &[String]) -> bool {
        warn!("atrace is only supported on Android, ignoring {:?}", args);
        true
    }
}
