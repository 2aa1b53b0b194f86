//! Refcounted native tensors and the DLPack exchange.

use std::{os::raw::c_void, ptr::NonNull, sync::Arc};

use crate::{
    abi::{DLManagedTensor, DLTensor, ObjectHandle},
    backend, config,
    error::FfiError,
    leak_detector, native,
    object::Tensor,
    shutdown,
    tensor::{
        HostArray, keepalive,
        view::{TensorOwnership, TensorView},
    },
    value::{DataType, Device},
};

/// Backing allocation of a host array exported to the native side.
#[repr(C)]
struct ExportContext {
    managed: DLManagedTensor,
    key: u64,
    shape: Box<[i64]>,
    strides: Box<[i64]>,
}

unsafe extern "C" fn release_host_buffer(managed: *mut DLManagedTensor) {
    // SAFETY: `manager_ctx` is the box created in `export_host_array`.
    let context = unsafe { Box::from_raw((*managed).manager_ctx as *mut ExportContext) };
    // After shutdown the table is already drained and this finds nothing.
    if let Some(array) = keepalive::release(context.key) {
        leak_detector::record_tensor_released();
        drop(array);
    }
}

fn export_host_array(array: &HostArray, device: Device) -> *mut DLManagedTensor {
    let key = keepalive::retain(array.clone());
    leak_detector::record_tensor_exported();
    let mut context = Box::new(ExportContext {
        managed: DLManagedTensor {
            dl_tensor: DLTensor {
                data: array.data_ptr(),
                device: device.to_dl(),
                ndim: array.ndim() as i32,
                dtype: array.dtype().to_dl(),
                shape: std::ptr::null_mut(),
                strides: std::ptr::null_mut(),
                byte_offset: array.byte_offset() as u64,
            },
            manager_ctx: std::ptr::null_mut(),
            deleter: Some(release_host_buffer),
        },
        key,
        shape: array.shape().into(),
        strides: array.strides().into(),
    });
    context.managed.dl_tensor.shape = context.shape.as_mut_ptr();
    context.managed.dl_tensor.strides = context.strides.as_mut_ptr();
    let raw = Box::into_raw(context);
    // SAFETY: `raw` is a live box; `managed` is its first field.
    unsafe {
        (*raw).managed.manager_ctx = raw as *mut c_void;
        std::ptr::addr_of_mut!((*raw).managed)
    }
}

/// Whether `array` is exactly the full view of `tensor`.
fn same_view(array: &HostArray, tensor: &Tensor) -> bool {
    let dl = tensor.dltensor();
    // SAFETY: the tensor keeps its descriptor alive.
    let (shape, strides) = unsafe { (dl.shape_slice(), dl.strides_slice()) };
    dl.data == array.data_ptr()
        && dl.byte_offset == array.byte_offset() as u64
        && shape == array.shape()
        && strides.is_none_or(|s| s == array.strides())
}

/// Alignment argument for the native import primitive.
pub(crate) fn alignment_requirement(bytes: usize) -> Result<i32, FfiError> {
    i32::try_from(bytes).map_err(|_| {
        FfiError::invalid(format!(
            "require_alignment {} does not fit the native import",
            bytes
        ))
    })
}

/// Refcounted native tensor sharing `array`'s buffer.
///
/// An array that already wraps a native tensor gets that tensor back. A
/// callback argument lent for one call is copied, since the tensor may
/// outlive the loan. Otherwise the array is pinned in the keep-alive table
/// until the native side drops its last reference. The descriptor carries
/// the device a registered backend detects, falling back to the array's.
pub fn tensor_from_host_array(array: &HostArray) -> Result<Tensor, FfiError> {
    let device = backend::detect_device(array).unwrap_or_else(|| array.device());
    tensor_on_device(array, device)
}

/// [`tensor_from_host_array`] with the device already resolved.
pub(crate) fn tensor_on_device(array: &HostArray, device: Device) -> Result<Tensor, FfiError> {
    if let Some(tensor) = array.native_tensor()
        && same_view(array, &tensor)
    {
        return Ok(tensor);
    }
    if array.is_lent() {
        return tensor_from_host_array(&array.to_owned_copy()?);
    }
    let alignment = alignment_requirement(config::current().require_alignment)?;
    let managed = export_host_array(array, device);
    let mut raw: ObjectHandle = std::ptr::null_mut();
    // SAFETY: `managed` is a fresh managed tensor; on failure it stays ours.
    let status = unsafe { native::api().tensor_from_dlpack(managed, alignment, 0, &mut raw) };
    if status != 0 {
        let err = native::take_raised_error();
        // SAFETY: the native side refused ownership of `managed`.
        unsafe { release_host_buffer(managed) };
        return Err(FfiError::Native(err));
    }
    Tensor::from_owned_raw(raw)
}

impl Tensor {
    pub fn from_host_array(array: &HostArray) -> Result<Self, FfiError> {
        tensor_from_host_array(array)
    }

    pub fn dltensor(&self) -> &DLTensor {
        // SAFETY: tensor objects start their cell with a DLTensor.
        unsafe { self.cell::<DLTensor>() }
    }

    pub fn view(&self) -> Result<TensorView<'_>, FfiError> {
        // SAFETY: the descriptor lives as long as `self`.
        unsafe { TensorView::from_dltensor(self.dltensor(), TensorOwnership::NativeOwned) }
    }

    pub fn shape(&self) -> &[i64] {
        // SAFETY: as for `dltensor`.
        unsafe { self.dltensor().shape_slice() }
    }

    pub fn dtype(&self) -> DataType {
        DataType::from_dl(self.dltensor().dtype)
    }

    pub fn device(&self) -> Device {
        Device::from_dl(self.dltensor().device)
    }

    /// Host array over the tensor's memory; the array keeps the tensor
    /// alive. Strided host tensors are copied.
    pub fn to_host_array(&self) -> Result<HostArray, FfiError> {
        self.view()?.to_host_array(Some(Arc::new(self.clone())))
    }

    /// Managed descriptor holding one reference to the tensor.
    pub fn export_dlpack(&self) -> Result<DlpackCapsule, FfiError> {
        let mut managed: *mut DLManagedTensor = std::ptr::null_mut();
        // SAFETY: `self` is a live tensor and `managed` a valid out slot.
        native::check(unsafe { native::api().tensor_to_dlpack(self.as_raw(), &mut managed) })?;
        NonNull::new(managed)
            .map(|managed| DlpackCapsule { managed })
            .ok_or(FfiError::NullHandle)
    }

    /// Adopts a managed tensor produced elsewhere.
    pub fn from_dlpack(capsule: DlpackCapsule) -> Result<Self, FfiError> {
        let alignment = alignment_requirement(config::current().require_alignment)?;
        let mut raw: ObjectHandle = std::ptr::null_mut();
        let managed = capsule.managed.as_ptr();
        // SAFETY: the capsule owns `managed`; ownership moves only on success.
        let status = unsafe { native::api().tensor_from_dlpack(managed, alignment, 0, &mut raw) };
        if status != 0 {
            // Dropping the capsule runs the producer's deleter.
            return Err(FfiError::Native(native::take_raised_error()));
        }
        std::mem::forget(capsule);
        Tensor::from_owned_raw(raw)
    }
}

/// Owned `DLManagedTensor`; runs the producer's deleter exactly once unless
/// handed off with [`DlpackCapsule::into_raw`].
#[derive(Debug)]
pub struct DlpackCapsule {
    managed: NonNull<DLManagedTensor>,
}

// SAFETY: the capsule is the unique owner of the managed tensor.
unsafe impl Send for DlpackCapsule {}

impl DlpackCapsule {
    /// # Safety
    /// `managed` must be a valid managed tensor the caller owns.
    pub unsafe fn from_raw(managed: *mut DLManagedTensor) -> Option<Self> {
        NonNull::new(managed).map(|managed| Self { managed })
    }

    pub fn into_raw(self) -> *mut DLManagedTensor {
        let raw = self.managed.as_ptr();
        std::mem::forget(self);
        raw
    }

    pub fn dltensor(&self) -> &DLTensor {
        // SAFETY: the capsule owns a live managed tensor.
        unsafe { &self.managed.as_ref().dl_tensor }
    }
}

impl Drop for DlpackCapsule {
    fn drop(&mut self) {
        if shutdown::is_exiting() {
            return;
        }
        // SAFETY: unique owner; the deleter runs once.
        unsafe {
            if let Some(deleter) = self.managed.as_ref().deleter {
                deleter(self.managed.as_ptr());
            }
        }
    }
}
