use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeakStats {
    pub handles_retained: usize,
    pub handles_released: usize,
    pub tensors_exported: usize,
    pub tensors_released: usize,
    pub callbacks_registered: usize,
    pub callbacks_released: usize,
}

impl LeakStats {
    /// Host handles currently holding a native reference.
    pub fn live_handles(&self) -> usize {
        self.handles_retained.saturating_sub(self.handles_released)
    }

    /// Host arrays pinned on behalf of native tensors.
    pub fn live_exports(&self) -> usize {
        self.tensors_exported.saturating_sub(self.tensors_released)
    }

    pub fn live_callbacks(&self) -> usize {
        self.callbacks_registered
            .saturating_sub(self.callbacks_released)
    }
}

static HANDLES_RETAINED: AtomicUsize = AtomicUsize::new(0);
static HANDLES_RELEASED: AtomicUsize = AtomicUsize::new(0);
static TENSORS_EXPORTED: AtomicUsize = AtomicUsize::new(0);
static TENSORS_RELEASED: AtomicUsize = AtomicUsize::new(0);
static CALLBACKS_REGISTERED: AtomicUsize = AtomicUsize::new(0);
static CALLBACKS_RELEASED: AtomicUsize = AtomicUsize::new(0);

pub fn record_handle_retained() {
    HANDLES_RETAINED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_handle_released() {
    HANDLES_RELEASED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tensor_exported() {
    TENSORS_EXPORTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tensor_released() {
    TENSORS_RELEASED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_callback_registered() {
    CALLBACKS_REGISTERED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_callback_released() {
    CALLBACKS_RELEASED.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> LeakStats {
    LeakStats {
        handles_retained: HANDLES_RETAINED.load(Ordering::Relaxed),
        handles_released: HANDLES_RELEASED.load(Ordering::Relaxed),
        tensors_exported: TENSORS_EXPORTED.load(Ordering::Relaxed),
        tensors_released: TENSORS_RELEASED.load(Ordering::Relaxed),
        callbacks_registered: CALLBACKS_REGISTERED.load(Ordering::Relaxed),
        callbacks_released: CALLBACKS_RELEASED.load(Ordering::Relaxed),
    }
}
