//! Host arrays pinned while a native tensor points into them.

use std::{
    collections::BTreeMap,
    sync::{
        LazyLock, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::tensor::HostArray;

static TABLE: LazyLock<Mutex<BTreeMap<u64, HostArray>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

pub(crate) fn retain(array: HostArray) -> u64 {
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    let mut table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    table.insert(key, array);
    log::debug!("keep-alive: pinned array #{} ({} live)", key, table.len());
    key
}

pub(crate) fn release(key: u64) -> Option<HostArray> {
    let mut table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    let array = table.remove(&key);
    if array.is_some() {
        log::debug!("keep-alive: released array #{} ({} live)", key, table.len());
    }
    array
}

/// Arrays currently pinned on behalf of native tensors.
pub fn live_count() -> usize {
    TABLE.lock().unwrap_or_else(PoisonError::into_inner).len()
}

pub(crate) fn drain() -> Vec<HostArray> {
    let mut table = TABLE.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *table).into_values().collect()
}
