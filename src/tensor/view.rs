use std::{marker::PhantomData, os::raw::c_void};

use crate::{
    abi::DLTensor,
    backend::{self, ForeignBuffer},
    error::FfiError,
    tensor::{
        array::{HostArray, KeepAlive, Lease},
        layout::{self, Layout},
    },
    value::{DataType, Device},
};

/// Who keeps the memory behind a view alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorOwnership {
    HostOwned,
    NativeOwned,
}

const INLINE_DIMS: usize = 6;

/// Shape or strides, stored inline up to `INLINE_DIMS` entries.
#[derive(Debug, Clone)]
enum Dims {
    Inline { len: usize, data: [i64; INLINE_DIMS] },
    Heap(Box<[i64]>),
}

impl Dims {
    fn from_slice(values: &[i64]) -> Self {
        if values.len() <= INLINE_DIMS {
            let mut data = [0i64; INLINE_DIMS];
            data[..values.len()].copy_from_slice(values);
            Dims::Inline {
                len: values.len(),
                data,
            }
        } else {
            Dims::Heap(values.into())
        }
    }

    fn as_slice(&self) -> &[i64] {
        match self {
            Dims::Inline { len, data } => &data[..*len],
            Dims::Heap(values) => values,
        }
    }
}

/// Non-owning, stride-aware description of an N-dimensional buffer.
///
/// A view borrowed from a [`HostArray`] holds that borrow for its whole
/// lifetime, which keeps the buffer alive while native code reads it.
#[derive(Debug, Clone)]
pub struct TensorView<'a> {
    data: *mut c_void,
    device: Device,
    dtype: DataType,
    shape: Dims,
    strides: Dims,
    byte_offset: u64,
    ownership: TensorOwnership,
    _source: PhantomData<&'a HostArray>,
}

impl<'a> TensorView<'a> {
    pub fn from_host_array(array: &'a HostArray) -> Self {
        let device = backend::detect_device(array).unwrap_or_else(|| array.device());
        Self {
            data: array.data_ptr(),
            device,
            dtype: array.dtype(),
            shape: Dims::from_slice(array.shape()),
            strides: Dims::from_slice(array.strides()),
            byte_offset: array.byte_offset() as u64,
            ownership: TensorOwnership::HostOwned,
            _source: PhantomData,
        }
    }

    /// Reads a native descriptor. Missing strides mean row-major.
    ///
    /// # Safety
    /// `tensor` must point at a valid `DLTensor` whose buffer outlives `'a`.
    pub unsafe fn from_dltensor(
        tensor: *const DLTensor,
        ownership: TensorOwnership,
    ) -> Result<Self, FfiError> {
        if tensor.is_null() {
            return Err(FfiError::NullHandle);
        }
        // SAFETY: guaranteed by the caller.
        let dl = unsafe { &*tensor };
        if dl.ndim < 0 {
            return Err(FfiError::invalid(format!("negative ndim {}", dl.ndim)));
        }
        let shape = unsafe { dl.shape_slice() };
        if shape.iter().any(|&d| d < 0) {
            return Err(FfiError::invalid(format!("negative extent in {:?}", shape)));
        }
        let strides = match unsafe { dl.strides_slice() } {
            Some(strides) => Dims::from_slice(strides),
            None => Dims::from_slice(&layout::row_major_strides(shape)),
        };
        Ok(Self {
            data: dl.data,
            device: Device::from_dl(dl.device),
            dtype: DataType::from_dl(dl.dtype),
            shape: Dims::from_slice(shape),
            strides,
            byte_offset: dl.byte_offset,
            ownership,
            _source: PhantomData,
        })
    }

    /// Descriptor pointing into this view; valid while the view is neither
    /// moved nor dropped.
    pub fn as_dltensor(&self) -> DLTensor {
        DLTensor {
            data: self.data,
            device: self.device.to_dl(),
            ndim: self.ndim() as i32,
            dtype: self.dtype.to_dl(),
            shape: self.shape.as_slice().as_ptr() as *mut i64,
            strides: self.strides.as_slice().as_ptr() as *mut i64,
            byte_offset: self.byte_offset,
        }
    }

    pub fn data_ptr(&self) -> *mut c_void {
        self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        self.shape.as_slice()
    }

    pub fn strides(&self) -> &[i64] {
        self.strides.as_slice()
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn ownership(&self) -> TensorOwnership {
        self.ownership
    }

    pub fn layout(&self) -> Layout {
        layout::classify(self.shape(), self.strides())
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout() != Layout::Strided
    }

    fn first_element(&self) -> *const u8 {
        (self.data as *const u8).wrapping_add(self.byte_offset as usize)
    }

    /// Copies the elements into a fresh row-major host array.
    pub fn copy_to_host(&self) -> Result<HostArray, FfiError> {
        if !self.device.is_host() {
            return Err(FfiError::unsupported_device(
                self.device,
                "raw tensor pointers to device memory cannot be copied; pass a refcounted tensor",
            ));
        }
        // SAFETY: the view describes memory that is live for 'a.
        unsafe { HostArray::copy_from_raw(self.first_element(), self.dtype, self.shape(), self.strides()) }
    }

    /// Host array over this view's memory.
    ///
    /// Contiguous host memory is wrapped without copying and `owner` is kept
    /// alive by the result. Strided host memory is copied. Device memory
    /// goes to the registered backend, which only accepts contiguous buffers.
    pub fn to_host_array(&self, owner: Option<KeepAlive>) -> Result<HostArray, FfiError> {
        if !self.device.is_host() {
            return backend::wrap_view(self.foreign(owner));
        }
        if self.is_contiguous() {
            // SAFETY: `owner` keeps the memory alive for the array's lifetime.
            unsafe { self.wrap(owner) }
        } else {
            self.copy_to_host()
        }
    }

    /// Zero-copy wrap for a buffer borrowed for the duration of a callback.
    /// Host memory of any layout is wrapped in place. With a `lease`, reads
    /// of the result fail once the lease is revoked.
    ///
    /// # Safety
    /// The memory must stay valid until `lease` is revoked or, without one,
    /// for as long as the result is used.
    pub(crate) unsafe fn wrap_borrowed(&self, lease: Option<&Lease>) -> Result<HostArray, FfiError> {
        if !self.device.is_host() {
            return backend::wrap_view(self.foreign(None));
        }
        match lease {
            Some(lease) => unsafe {
                HostArray::from_lent_parts(
                    self.data,
                    self.dtype,
                    self.device,
                    self.shape(),
                    self.strides(),
                    self.byte_offset as usize,
                    lease.clone(),
                )
            },
            None => unsafe { self.wrap(None) },
        }
    }

    unsafe fn wrap(&self, owner: Option<KeepAlive>) -> Result<HostArray, FfiError> {
        unsafe {
            HostArray::from_raw_parts(
                self.data,
                self.dtype,
                self.device,
                self.shape(),
                self.strides(),
                self.byte_offset as usize,
                owner,
            )
        }
    }

    fn foreign(&self, owner: Option<KeepAlive>) -> ForeignBuffer<'_> {
        ForeignBuffer::new(
            self.data,
            self.byte_offset,
            self.device,
            self.dtype,
            self.shape(),
            self.strides(),
            owner,
        )
    }
}
