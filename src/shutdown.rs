//! Process teardown.
//!
//! Once [`shutdown`] has run, handle drops and native deleters stop calling
//! into the native runtime; whatever is still referenced at that point is
//! leaked on purpose.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{backend, function::callback, leak_detector, tensor::keepalive};

static EXITING: AtomicBool = AtomicBool::new(false);

pub fn is_exiting() -> bool {
    EXITING.load(Ordering::Acquire)
}

/// Flags the process as exiting, flushes device backends, then drops the
/// keep-alive and callback tables without touching native refcounts.
///
/// Safe to call more than once; only the first call does any work.
pub fn shutdown() {
    if EXITING.swap(true, Ordering::AcqRel) {
        return;
    }
    let stats = leak_detector::snapshot();
    match serde_json::to_string(&stats) {
        Ok(report) => log::debug!("shutdown: lifecycle counters {}", report),
        Err(err) => log::warn!("shutdown: cannot render lifecycle counters: {}", err),
    }
    log::debug!("shutdown: synchronizing device backends");
    backend::synchronize_all();

    let pinned = keepalive::drain();
    log::debug!("shutdown: leaking {} pinned host arrays", pinned.len());
    // Native tensors may still point into these buffers.
    std::mem::forget(pinned);

    let callbacks = callback::drain();
    log::debug!("shutdown: dropped {} callback entries", callbacks);
}
