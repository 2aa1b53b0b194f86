//! DLPack structures, laid out exactly as `dlpack.h` defines them.

use std::os::raw::c_void;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DLDevice {
    pub device_type: i32,
    pub device_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DLDataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

/// Borrowed description of an N-dimensional buffer.
///
/// `strides` may be null, meaning compact row-major. Strides count
/// elements, not bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DLTensor {
    pub data: *mut c_void,
    pub device: DLDevice,
    pub ndim: i32,
    pub dtype: DLDataType,
    pub shape: *mut i64,
    pub strides: *mut i64,
    pub byte_offset: u64,
}

impl DLTensor {
    /// # Safety
    /// `shape` must point to `ndim` readable extents for `'a`.
    pub unsafe fn shape_slice<'a>(&self) -> &'a [i64] {
        if self.ndim <= 0 || self.shape.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.shape, self.ndim as usize) }
    }

    /// # Safety
    /// `strides`, when non-null, must point to `ndim` readable values for `'a`.
    pub unsafe fn strides_slice<'a>(&self) -> Option<&'a [i64]> {
        if self.strides.is_null() {
            return None;
        }
        if self.ndim <= 0 {
            return Some(&[]);
        }
        Some(unsafe { std::slice::from_raw_parts(self.strides, self.ndim as usize) })
    }
}

pub type DLManagedTensorDeleter = unsafe extern "C" fn(managed: *mut DLManagedTensor);

/// A [`DLTensor`] bundled with the producer's release hook.
#[repr(C)]
#[derive(Debug)]
pub struct DLManagedTensor {
    pub dl_tensor: DLTensor,
    pub manager_ctx: *mut c_void,
    pub deleter: Option<DLManagedTensorDeleter>,
}
