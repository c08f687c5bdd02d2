use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::JobStatus;

/// Progress reporting and cancellation for long-running operations.
///
/// Implementations must be cheap to call, since operations report
/// progress from their inner loops (e.g. once per image row).
pub trait Progress: Sync {
    fn set_progress(&self, text: &str, ratio: f32);
    fn is_canceled(&self) -> bool;
}

impl Progress for Mutex<JobStatus> {
    fn set_progress(&self, text: &str, ratio: f32) {
        let update_fn = {
            let mut status = self.lock().unwrap();
            status.set_progress(text.to_string(), ratio);
            status.update_fn()
        };
        if let Some(f) = update_fn {
            f();
        }
    }

    fn is_canceled(&self) -> bool {
        self.lock().unwrap().is_canceled()
    }
}

/// Ignores progress and is never canceled.
#[derive(Debug, Copy, Clone, Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn set_progress(&self, _text: &str, _ratio: f32) {}

    fn is_canceled(&self) -> bool {
        false
    }
}

/// A shareable cancel switch.  Progress text is dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Progress for CancelFlag {
    fn set_progress(&self, _text: &str, _ratio: f32) {}

    fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Forwards progress to a callback, and cancellation to a `CancelFlag`.
pub struct CallbackProgress<F: Fn(&str, f32) + Sync> {
    callback: F,
    cancel: CancelFlag,
}

impl<F: Fn(&str, f32) + Sync> CallbackProgress<F> {
    pub fn new(callback: F, cancel: CancelFlag) -> CallbackProgress<F> {
        CallbackProgress {
            callback: callback,
            cancel: cancel,
        }
    }
}

impl<F: Fn(&str, f32) + Sync> Progress for CallbackProgress<F> {
    fn set_progress(&self, text: &str, ratio: f32) {
        (self.callback)(text, ratio);
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}
