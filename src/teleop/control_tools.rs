// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Scheduling helpers for the thread that runs the device ticks.
use std::io;
use std::path::Path;

use libc::c_int;
use log::{info, warn};

use crate::exception::{TeleopException, TeleopResult};

/// Distance of the tick priority from the SCHED_FIFO maximum.
const PRIORITY_BELOW_MAX: c_int = 1;

/// Whether a tick thread must run with realtime priority.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

fn realtime_exception(what: &str, error: io::Error) -> TeleopException {
    TeleopException::RealTimeException {
        message: format!("{}: {}", what, error),
    }
}

fn tick_priority() -> TeleopResult<c_int> {
    let max_priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max_priority == -1 {
        return Err(realtime_exception(
            "cannot read the SCHED_FIFO priority range",
            io::Error::last_os_error(),
        ));
    }
    Ok((max_priority - PRIORITY_BELOW_MAX).max(1))
}

fn schedule_fifo(priority: c_int) -> TeleopResult<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let status = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if status != 0 {
        return Err(realtime_exception(
            "cannot switch the tick thread to SCHED_FIFO (check rtprio in /etc/security/limits.conf)",
            io::Error::from_raw_os_error(status),
        ));
    }
    Ok(())
}

fn lock_memory() -> TeleopResult<()> {
    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        return Err(realtime_exception(
            "cannot lock process memory",
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Prepares the calling thread for running device ticks: SCHED_FIFO one step below the
/// maximum priority, with the process memory locked.
///
/// # Errors
/// * [`RealTimeException`](`TeleopException::RealTimeException`) with
///   [`RealtimeConfig::Enforce`] if the kernel is not a realtime kernel or the thread cannot
///   be rescheduled. With [`RealtimeConfig::Ignore`] these failures are only logged.
pub fn prepare_tick_thread(config: RealtimeConfig) -> TeleopResult<()> {
    if !has_realtime_kernel() {
        if config == RealtimeConfig::Enforce {
            return Err(TeleopException::RealTimeException {
                message: "running kernel does not have realtime capabilities".to_string(),
            });
        }
        info!("no realtime kernel, ticks run with normal priority");
        return Ok(());
    }
    let result = tick_priority().and_then(|priority| {
        schedule_fifo(priority)?;
        lock_memory()?;
        Ok(priority)
    });
    match result {
        Ok(priority) => {
            info!("tick thread runs with SCHED_FIFO priority {}", priority);
            Ok(())
        }
        Err(e) if config == RealtimeConfig::Ignore => {
            warn!("{}, ticks run with normal priority", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
