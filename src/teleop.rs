// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the teleoperation core: mapping, drag sessions, spring feedback and the per-device
//! control loop.
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

pub mod axis_mapping;
pub mod control_handle;
pub mod control_loop;
pub mod control_tools;
pub mod drag_session;
pub mod rate_limiting;
pub mod spring;
pub mod tuning;

pub use control_handle::{ArmStatus, ControlHandle};
pub use control_loop::{ControlLoop, DeviceSample, BUTTON_1, BUTTON_2};

/// Locks `mutex`, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Like [`lock`], but returns `None` instead of waiting if the mutex is held.
pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
    }
}
