//! Shutdown is process-wide, so this binary holds a single test.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use ffi_bridge::{
    DeviceKind, FfiError, Function, HostArray, Tensor, Value,
    backend::{self, DeviceBackend, ForeignBuffer},
    function::registered_callbacks,
    leak_detector,
    native::local,
    shutdown::{is_exiting, shutdown},
    tensor::keepalive,
};

struct CountingBackend {
    syncs: Arc<AtomicUsize>,
}

impl DeviceBackend for CountingBackend {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Metal
    }

    fn wrap(&self, buffer: ForeignBuffer<'_>) -> Result<HostArray, FfiError> {
        buffer.into_host_array()
    }

    fn synchronize(&self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn shutdown_flushes_devices_and_stops_native_releases() {
    let syncs = Arc::new(AtomicUsize::new(0));
    backend::register_backend(Arc::new(CountingBackend {
        syncs: Arc::clone(&syncs),
    }));

    let callback = Function::from_closure(|_| Ok(Value::None)).unwrap();
    let array = HostArray::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
    let tensor = Tensor::from_host_array(&array).unwrap();
    assert_eq!(registered_callbacks(), 1);
    assert_eq!(keepalive::live_count(), 1);
    assert!(!is_exiting());
    let stats = leak_detector::snapshot();
    assert_eq!(stats.live_callbacks(), 1);
    assert_eq!(stats.live_exports(), 1);

    shutdown();
    assert!(is_exiting());
    assert_eq!(syncs.load(Ordering::SeqCst), 1);
    assert_eq!(registered_callbacks(), 0);
    assert_eq!(keepalive::live_count(), 0);

    // Late drops leave native refcounts alone.
    let (tensor_raw, callback_raw) = (tensor.as_raw(), callback.as_raw());
    let tensor_before = local::ledger(tensor_raw);
    let callback_before = local::ledger(callback_raw);
    drop(tensor);
    drop(callback);
    assert_eq!(local::ledger(tensor_raw).decrements, tensor_before.decrements);
    assert_eq!(local::ledger(callback_raw).decrements, callback_before.decrements);
    // The pinned clone was leaked, not released.
    assert_eq!(array.ref_count(), 2);

    shutdown();
    assert_eq!(syncs.load(Ordering::SeqCst), 1);
}
