use std::{
    alloc::{self, Layout as AllocLayout},
    any::Any,
    fmt,
    os::raw::c_void,
    ptr::NonNull,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
};

use crate::{
    config,
    error::FfiError,
    object::Tensor,
    tensor::layout::{self, Layout},
    value::{DataType, Device},
};

/// Rust element types with a fixed dtype.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DTYPE: DataType;
}

macro_rules! element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DataType = $dtype;
        })*
    };
}

element! {
    f32 => DataType::F32,
    f64 => DataType::F64,
    i8 => DataType::I8,
    i16 => DataType::I16,
    i32 => DataType::I32,
    i64 => DataType::I64,
    u8 => DataType::U8,
    u16 => DataType::U16,
    u32 => DataType::U32,
    u64 => DataType::U64,
}

/// Anything that must outlive a borrowed buffer.
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

pub(crate) const BUFFER_ALIGNMENT: usize = 64;

struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl AlignedBuffer {
    fn zeroed(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len,
            };
        }
        let Ok(layout) = AllocLayout::from_size_align(len, BUFFER_ALIGNMENT) else {
            alloc::handle_alloc_error(AllocLayout::new::<u8>());
        };
        // SAFETY: non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, len }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        if let Ok(layout) = AllocLayout::from_size_align(self.len, BUFFER_ALIGNMENT) {
            // SAFETY: allocated in `zeroed` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// Memory lent to a callback for the length of one call.
///
/// Reads of lent memory hold the lease open; once revoked, every read
/// fails instead of touching the memory.
#[derive(Debug, Clone, Default)]
pub(crate) struct Lease {
    revoked: Arc<RwLock<bool>>,
}

impl Lease {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits for reads in flight, then ends the loan.
    pub(crate) fn revoke(&self) {
        *self.revoked.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn hold(&self) -> Result<RwLockReadGuard<'_, bool>, FfiError> {
        let guard = self.revoked.read().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            return Err(FfiError::invalid(
                "array lent to a callback was used after the callback returned",
            ));
        }
        Ok(guard)
    }
}

enum Storage {
    Owned(AlignedBuffer),
    /// Memory owned elsewhere, kept valid by `owner` or, for callback
    /// arguments, until `lease` is revoked.
    Foreign {
        ptr: *mut u8,
        owner: Option<KeepAlive>,
        lease: Option<Lease>,
    },
}

// SAFETY: storage is only reached through raw pointers; concurrent writes
// are the caller's contract, as with any shared native buffer.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    fn base(&self) -> *mut u8 {
        match self {
            Storage::Owned(buffer) => buffer.ptr.as_ptr(),
            Storage::Foreign { ptr, .. } => *ptr,
        }
    }

    fn capacity(&self) -> Option<usize> {
        match self {
            Storage::Owned(buffer) => Some(buffer.len),
            Storage::Foreign { .. } => None,
        }
    }
}

struct ArrayInner {
    storage: Arc<Storage>,
    dtype: DataType,
    device: Device,
    shape: Vec<i64>,
    strides: Vec<i64>,
    byte_offset: usize,
}

/// Shared, strided N-dimensional host array.
///
/// Cloning shares the buffer. The array owns its memory, or borrows memory
/// owned elsewhere (a native tensor, a device backend) and keeps that owner
/// alive.
#[derive(Clone)]
pub struct HostArray {
    inner: Arc<ArrayInner>,
}

impl HostArray {
    /// Row-major array holding `data`.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[i64]) -> Result<Self, FfiError> {
        let strides = layout::row_major_strides(shape);
        Self::from_vec_with_strides(data, shape, &strides)
    }

    /// Array over `data` with explicit element strides, e.g. a column-major
    /// buffer.
    pub fn from_vec_with_strides<T: Element>(
        data: Vec<T>,
        shape: &[i64],
        strides: &[i64],
    ) -> Result<Self, FfiError> {
        check_shape(shape, strides)?;
        if let Some((low, high)) = layout::offset_bounds(shape, strides)?
            && (low < 0 || high as usize >= data.len())
        {
            return Err(FfiError::invalid(format!(
                "strides {:?} over shape {:?} reach outside {} elements",
                strides,
                shape,
                data.len()
            )));
        }
        if layout::numel(shape) > data.len() {
            return Err(FfiError::invalid(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                layout::numel(shape),
                data.len()
            )));
        }
        let bytes = std::mem::size_of_val(data.as_slice());
        let buffer = AlignedBuffer::zeroed(bytes);
        // SAFETY: fresh buffer of exactly `bytes` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, buffer.ptr.as_ptr(), bytes)
        };
        Ok(Self::build(
            Storage::Owned(buffer),
            T::DTYPE,
            Device::cpu(),
            shape.to_vec(),
            strides.to_vec(),
            0,
        ))
    }

    pub fn zeros<T: Element>(shape: &[i64]) -> Result<Self, FfiError> {
        let strides = layout::row_major_strides(shape);
        check_shape(shape, &strides)?;
        let buffer = AlignedBuffer::zeroed(byte_len(shape, T::DTYPE)?);
        Ok(Self::build(
            Storage::Owned(buffer),
            T::DTYPE,
            Device::cpu(),
            shape.to_vec(),
            strides,
            0,
        ))
    }

    /// Array over memory owned by someone else.
    ///
    /// # Safety
    /// Every element described by the arguments must stay valid while
    /// `owner` (or, when `None`, the caller) keeps it alive.
    pub unsafe fn from_raw_parts(
        data: *mut c_void,
        dtype: DataType,
        device: Device,
        shape: &[i64],
        strides: &[i64],
        byte_offset: usize,
        owner: Option<KeepAlive>,
    ) -> Result<Self, FfiError> {
        check_shape(shape, strides)?;
        Ok(Self::build(
            Storage::Foreign {
                ptr: data as *mut u8,
                owner,
                lease: None,
            },
            dtype,
            device,
            shape.to_vec(),
            strides.to_vec(),
            byte_offset,
        ))
    }

    /// Array over memory lent for the length of one callback. Reads fail
    /// once `lease` is revoked.
    ///
    /// # Safety
    /// Every element described by the arguments must stay valid until
    /// `lease` is revoked.
    pub(crate) unsafe fn from_lent_parts(
        data: *mut c_void,
        dtype: DataType,
        device: Device,
        shape: &[i64],
        strides: &[i64],
        byte_offset: usize,
        lease: Lease,
    ) -> Result<Self, FfiError> {
        check_shape(shape, strides)?;
        Ok(Self::build(
            Storage::Foreign {
                ptr: data as *mut u8,
                owner: None,
                lease: Some(lease),
            },
            dtype,
            device,
            shape.to_vec(),
            strides.to_vec(),
            byte_offset,
        ))
    }

    fn build(
        storage: Storage,
        dtype: DataType,
        device: Device,
        shape: Vec<i64>,
        strides: Vec<i64>,
        byte_offset: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                storage: Arc::new(storage),
                dtype,
                device,
                shape,
                strides,
                byte_offset,
            }),
        }
    }

    /// A new view over the same buffer, starting `element_offset` elements
    /// past this array's first element.
    pub fn strided_view(
        &self,
        shape: &[i64],
        strides: &[i64],
        element_offset: i64,
    ) -> Result<Self, FfiError> {
        check_shape(shape, strides)?;
        let elem = self.dtype().bytes_per_element() as i64;
        let out_of_bounds = || {
            FfiError::invalid(format!(
                "view {:?}/{:?} at offset {} is out of bounds",
                shape, strides, element_offset
            ))
        };
        let byte_offset = element_offset
            .checked_mul(elem)
            .and_then(|bytes| bytes.checked_add(self.inner.byte_offset as i64))
            .ok_or_else(out_of_bounds)?;
        if let (Some(capacity), Some((low, high))) = (
            self.inner.storage.capacity(),
            layout::offset_bounds(shape, strides)?,
        ) {
            let first = low
                .checked_mul(elem)
                .and_then(|bytes| bytes.checked_add(byte_offset));
            let end = high
                .checked_add(1)
                .and_then(|count| count.checked_mul(elem))
                .and_then(|bytes| bytes.checked_add(byte_offset));
            match (first, end) {
                (Some(first), Some(end)) if first >= 0 && end <= capacity as i64 => {}
                _ => return Err(out_of_bounds()),
            }
        }
        if byte_offset < 0 {
            return Err(FfiError::invalid("view starts before the buffer"));
        }
        Ok(Self {
            inner: Arc::new(ArrayInner {
                storage: Arc::clone(&self.inner.storage),
                dtype: self.inner.dtype,
                device: self.inner.device,
                shape: shape.to_vec(),
                strides: strides.to_vec(),
                byte_offset: byte_offset as usize,
            }),
        })
    }

    pub fn dtype(&self) -> DataType {
        self.inner.dtype
    }

    pub fn device(&self) -> Device {
        self.inner.device
    }

    pub fn shape(&self) -> &[i64] {
        &self.inner.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.inner.strides
    }

    pub fn ndim(&self) -> usize {
        self.inner.shape.len()
    }

    pub fn numel(&self) -> usize {
        layout::numel(&self.inner.shape)
    }

    pub fn byte_offset(&self) -> usize {
        self.inner.byte_offset
    }

    /// Buffer base address, before `byte_offset`.
    pub fn data_ptr(&self) -> *mut c_void {
        self.inner.storage.base() as *mut c_void
    }

    pub fn layout(&self) -> Layout {
        layout::classify(&self.inner.shape, &self.inner.strides)
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout() != Layout::Strided
    }

    /// True when the memory belongs to someone else.
    pub fn is_borrowed(&self) -> bool {
        matches!(*self.inner.storage, Storage::Foreign { .. })
    }

    /// True for a callback argument wrapped in place. Its elements are
    /// readable only until the callback returns; [`to_owned_copy`] keeps
    /// them past that.
    ///
    /// [`to_owned_copy`]: Self::to_owned_copy
    pub fn is_lent(&self) -> bool {
        self.lease().is_some()
    }

    fn lease(&self) -> Option<&Lease> {
        match &*self.inner.storage {
            Storage::Foreign {
                lease: Some(lease), ..
            } => Some(lease),
            _ => None,
        }
    }

    /// Fails when the memory was lent and the loan has ended.
    pub(crate) fn check_lease(&self) -> Result<(), FfiError> {
        match self.lease() {
            Some(lease) => lease.hold().map(drop),
            None => Ok(()),
        }
    }

    /// Host read access, held until the guard drops.
    fn access(&self) -> Result<Option<RwLockReadGuard<'_, bool>>, FfiError> {
        self.require_host()?;
        self.lease().map(Lease::hold).transpose()
    }

    /// Number of handles sharing this array object, pins included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Same array object, not merely equal contents.
    pub fn ptr_eq(&self, other: &HostArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The native tensor backing this array, when it wraps one.
    pub fn native_tensor(&self) -> Option<Tensor> {
        match &*self.inner.storage {
            Storage::Foreign {
                owner: Some(owner), ..
            } => owner.downcast_ref::<Tensor>().cloned(),
            _ => None,
        }
    }

    /// Elements in logical row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, FfiError> {
        if self.dtype() != T::DTYPE {
            return Err(FfiError::invalid(format!(
                "array holds {}, not {}",
                self.dtype(),
                T::DTYPE
            )));
        }
        let _access = self.access()?;
        let mut out = vec![T::default(); self.numel()];
        // SAFETY: `out` has exactly `numel` elements of the array's dtype.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(
                out.as_mut_ptr() as *mut u8,
                out.len() * std::mem::size_of::<T>(),
            )
        };
        self.gather_into(bytes);
        Ok(out)
    }

    /// Reads one element.
    pub fn get<T: Element>(&self, index: &[i64]) -> Result<T, FfiError> {
        if self.dtype() != T::DTYPE {
            return Err(FfiError::invalid(format!(
                "array holds {}, not {}",
                self.dtype(),
                T::DTYPE
            )));
        }
        let _access = self.access()?;
        if index.len() != self.ndim() {
            return Err(FfiError::invalid(format!(
                "index of rank {} into array of rank {}",
                index.len(),
                self.ndim()
            )));
        }
        let mut offset = 0i64;
        for (axis, (&i, (&extent, &stride))) in index
            .iter()
            .zip(self.shape().iter().zip(self.strides()))
            .enumerate()
        {
            if i < 0 || i >= extent {
                return Err(FfiError::invalid(format!(
                    "index {} out of bounds for axis {} of size {}",
                    i, axis, extent
                )));
            }
            offset += i * stride;
        }
        // SAFETY: in-bounds element of a live buffer.
        let value = unsafe {
            let ptr = self.first_element().wrapping_offset(offset as isize * std::mem::size_of::<T>() as isize);
            std::ptr::read_unaligned(ptr as *const T)
        };
        Ok(value)
    }

    /// Row-major copy, or `self` when already row-major.
    pub fn to_contiguous(&self) -> Result<HostArray, FfiError> {
        if self.layout() == Layout::RowMajor {
            return Ok(self.clone());
        }
        self.to_owned_copy()
    }

    /// Row-major copy into a fresh buffer, whatever the layout.
    pub fn to_owned_copy(&self) -> Result<HostArray, FfiError> {
        let _access = self.access()?;
        // SAFETY: shape/strides were validated against the buffer when the
        // array was built.
        unsafe {
            Self::copy_from_raw(
                self.first_element(),
                self.dtype(),
                self.shape(),
                self.strides(),
            )
        }
    }

    /// Fresh row-major array filled from a strided view of raw memory.
    ///
    /// # Safety
    /// `first` must point at the view's first element and every offset the
    /// shape/strides describe must be readable.
    pub(crate) unsafe fn copy_from_raw(
        first: *const u8,
        dtype: DataType,
        shape: &[i64],
        strides: &[i64],
    ) -> Result<HostArray, FfiError> {
        check_shape(shape, strides)?;
        if dtype.is_packed() {
            return Err(FfiError::invalid(format!(
                "cannot copy sub-byte dtype {}",
                dtype
            )));
        }
        let buffer = AlignedBuffer::zeroed(byte_len(shape, dtype)?);
        // SAFETY: the buffer is exclusively ours until wrapped below.
        let bytes = unsafe { std::slice::from_raw_parts_mut(buffer.ptr.as_ptr(), buffer.len) };
        let threshold = config::current().parallel_copy_threshold;
        unsafe {
            layout::strided_copy(
                first,
                shape,
                strides,
                dtype.bytes_per_element(),
                bytes,
                threshold,
            )
        };
        Ok(Self::build(
            Storage::Owned(buffer),
            dtype,
            Device::cpu(),
            shape.to_vec(),
            layout::row_major_strides(shape),
            0,
        ))
    }

    fn require_host(&self) -> Result<(), FfiError> {
        if self.device().is_host() {
            Ok(())
        } else {
            Err(FfiError::unsupported_device(
                self.device(),
                "host access to device memory",
            ))
        }
    }

    pub(crate) fn first_element(&self) -> *const u8 {
        self.inner
            .storage
            .base()
            .wrapping_add(self.inner.byte_offset)
    }

    fn gather_into(&self, dst: &mut [u8]) {
        let threshold = config::current().parallel_copy_threshold;
        // SAFETY: shape/strides were validated against the buffer when the
        // array was built.
        unsafe {
            layout::strided_copy(
                self.first_element(),
                self.shape(),
                self.strides(),
                self.dtype().bytes_per_element(),
                dst,
                threshold,
            )
        };
    }
}

fn check_shape(shape: &[i64], strides: &[i64]) -> Result<(), FfiError> {
    if shape.len() != strides.len() {
        return Err(FfiError::invalid(format!(
            "shape has {} dims but strides have {}",
            shape.len(),
            strides.len()
        )));
    }
    if let Some(extent) = shape.iter().find(|&&d| d < 0) {
        return Err(FfiError::invalid(format!("negative extent {}", extent)));
    }
    if layout::checked_numel(shape).is_none() {
        return Err(FfiError::invalid(format!(
            "shape {:?} has more elements than fit in memory",
            shape
        )));
    }
    Ok(())
}

fn byte_len(shape: &[i64], dtype: DataType) -> Result<usize, FfiError> {
    layout::numel(shape)
        .checked_mul(dtype.bytes_per_element())
        .ok_or_else(|| FfiError::invalid(format!("{:?} {} elements overflow", shape, dtype)))
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostArray")
            .field("dtype", &self.dtype().to_string())
            .field("device", &self.device().to_string())
            .field("shape", &self.shape())
            .field("strides", &self.strides())
            .field("byte_offset", &self.byte_offset())
            .field("borrowed", &self.is_borrowed())
            .field("lent", &self.is_lent())
            .finish()
    }
}
