/// COM Apartment Guard
///
/// Every thread that touches provider interfaces must be COM-initialized
/// before the first call. Initialization is reference-counted per thread:
/// the first guard on a thread calls CoInitializeEx, the last one dropped
/// calls CoUninitialize, and nested guards are free. The host's planning
/// thread and its scan workers may differ, so a guard is created both at
/// bind time and at scan-init time.
use crate::core::{DaxqlError, Result};
use std::cell::Cell;
use std::marker::PhantomData;
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED};

thread_local! {
    static COM_INIT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Reference-counted per-thread COM initialization.
///
/// Deliberately `!Send`: the CoUninitialize must happen on the thread that
/// initialized.
pub struct ComGuard {
    _not_send: PhantomData<*const ()>,
}

impl ComGuard {
    /// Initializes COM for the calling thread if this is the thread's first
    /// live guard.
    pub fn new() -> Result<ComGuard> {
        COM_INIT_DEPTH.with(|depth| {
            if depth.get() == 0 {
                // S_FALSE ("already initialized") is success here; the
                // matching CoUninitialize is still required either way.
                let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
                if hr.is_err() {
                    return Err(DaxqlError::com(hr.0, "COM initialization"));
                }
            }
            depth.set(depth.get() + 1);
            Ok(ComGuard {
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        COM_INIT_DEPTH.with(|depth| {
            let current = depth.get();
            debug_assert!(current > 0, "unbalanced COM guard");
            depth.set(current.saturating_sub(1));
            if current == 1 {
                unsafe { CoUninitialize() };
            }
        });
    }
}
