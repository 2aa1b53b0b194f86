//! Pluggable device backends.
//!
//! A backend owns everything device-specific: recognizing its arrays,
//! wrapping a contiguous device buffer as a [`HostArray`], and flushing
//! in-flight work at shutdown. Nothing is registered by default, so any
//! device buffer fails with [`FfiError::UnsupportedDevice`].

use std::{
    os::raw::c_void,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use crate::{
    error::FfiError,
    tensor::{HostArray, KeepAlive, layout},
    value::{DataType, Device, DeviceKind},
};

/// A device buffer handed to [`DeviceBackend::wrap`].
///
/// Only the crate builds these, from descriptors the native side or a
/// backend has vouched for.
pub struct ForeignBuffer<'a> {
    data: *mut c_void,
    byte_offset: u64,
    device: Device,
    dtype: DataType,
    shape: &'a [i64],
    strides: &'a [i64],
    owner: Option<KeepAlive>,
}

impl<'a> ForeignBuffer<'a> {
    pub(crate) fn new(
        data: *mut c_void,
        byte_offset: u64,
        device: Device,
        dtype: DataType,
        shape: &'a [i64],
        strides: &'a [i64],
        owner: Option<KeepAlive>,
    ) -> Self {
        Self {
            data,
            byte_offset,
            device,
            dtype,
            shape,
            strides,
            owner,
        }
    }

    pub fn data(&self) -> *mut c_void {
        self.data
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        self.shape
    }

    pub fn strides(&self) -> &[i64] {
        self.strides
    }

    /// Device array sharing this buffer; keeps the owner alive.
    pub fn into_host_array(self) -> Result<HostArray, FfiError> {
        // SAFETY: the descriptor came from the native side and the owner (or
        // the enclosing call) keeps the memory valid.
        unsafe {
            HostArray::from_raw_parts(
                self.data,
                self.dtype,
                self.device,
                self.shape,
                self.strides,
                self.byte_offset as usize,
                self.owner,
            )
        }
    }
}

pub trait DeviceBackend: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Device of an array this backend recognizes as its own.
    fn detect(&self, _array: &HostArray) -> Option<Device> {
        None
    }

    /// Wraps a contiguous buffer on this backend's device.
    fn wrap(&self, buffer: ForeignBuffer<'_>) -> Result<HostArray, FfiError>;

    /// Blocks until queued device work has finished.
    fn synchronize(&self) {}
}

static BACKENDS: LazyLock<RwLock<Vec<Arc<dyn DeviceBackend>>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

fn snapshot() -> Vec<Arc<dyn DeviceBackend>> {
    BACKENDS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Installs `backend`, returning the one it replaces for the same kind.
pub fn register_backend(backend: Arc<dyn DeviceBackend>) -> Option<Arc<dyn DeviceBackend>> {
    let mut backends = BACKENDS.write().unwrap_or_else(PoisonError::into_inner);
    let kind = backend.kind();
    log::debug!("registering device backend for {:?}", kind);
    match backends.iter().position(|b| b.kind() == kind) {
        Some(pos) => Some(std::mem::replace(&mut backends[pos], backend)),
        None => {
            backends.push(backend);
            None
        }
    }
}

pub fn unregister_backend(kind: DeviceKind) -> Option<Arc<dyn DeviceBackend>> {
    let mut backends = BACKENDS.write().unwrap_or_else(PoisonError::into_inner);
    let pos = backends.iter().position(|b| b.kind() == kind)?;
    Some(backends.remove(pos))
}

pub fn backend_for(kind: DeviceKind) -> Option<Arc<dyn DeviceBackend>> {
    snapshot().into_iter().find(|b| b.kind() == kind)
}

/// First device any backend claims for `array`.
pub fn detect_device(array: &HostArray) -> Option<Device> {
    snapshot().iter().find_map(|b| b.detect(array))
}

pub(crate) fn wrap_view(buffer: ForeignBuffer<'_>) -> Result<HostArray, FfiError> {
    let device = buffer.device();
    if !layout::is_row_major(buffer.shape(), buffer.strides())
        && !layout::is_column_major(buffer.shape(), buffer.strides())
    {
        return Err(FfiError::unsupported_device(
            device,
            "zero-copy wrap of a non-contiguous device buffer",
        ));
    }
    match backend_for(device.kind) {
        Some(backend) => backend.wrap(buffer),
        None => Err(FfiError::unsupported_device(
            device,
            "no backend registered",
        )),
    }
}

/// Runs every backend's synchronization hook once; panics are logged and
/// swallowed.
pub fn synchronize_all() {
    for backend in snapshot() {
        let kind = backend.kind();
        if catch_unwind(AssertUnwindSafe(|| backend.synchronize())).is_err() {
            log::warn!("device backend {:?} panicked during synchronize", kind);
        }
    }
}
