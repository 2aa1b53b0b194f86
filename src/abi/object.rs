use std::{
    os::raw::c_void,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::abi::any::RawAny;

pub type ObjectHandle = *mut ObjectHeader;

/// Invoked by the native side when a count reaches zero.
pub type ObjectDeleter = unsafe extern "C" fn(object: *mut c_void, flags: i32);

pub const DELETER_FLAG_STRONG: i32 = 1;
pub const DELETER_FLAG_WEAK: i32 = 2;
pub const DELETER_FLAG_BOTH: i32 = DELETER_FLAG_STRONG | DELETER_FLAG_WEAK;

pub const STRONG_COUNT_MASK: u64 = 0xFFFF_FFFF;
pub const WEAK_COUNT_SHIFT: u32 = 32;

/// Prefix of every heap object.
///
/// The strong count lives in the low 32 bits of `combined_ref_count` and the
/// weak count in the high 32 bits. Only the native increment/decrement
/// primitives may write the count.
#[repr(C)]
pub struct ObjectHeader {
    pub combined_ref_count: AtomicU64,
    pub type_index: i32,
    pub padding: u32,
    pub deleter: Option<ObjectDeleter>,
}

/// Byte distance from the header to the type-specific cell.
pub const CELL_OFFSET: usize = std::mem::size_of::<ObjectHeader>();

impl ObjectHeader {
    /// Header for a freshly allocated object holding one strong reference.
    pub fn new(type_index: i32, deleter: Option<ObjectDeleter>) -> Self {
        Self {
            combined_ref_count: AtomicU64::new(1),
            type_index,
            padding: 0,
            deleter,
        }
    }

    pub fn strong_count(&self) -> u32 {
        (self.combined_ref_count.load(Ordering::Acquire) & STRONG_COUNT_MASK) as u32
    }

    pub fn weak_count(&self) -> u32 {
        (self.combined_ref_count.load(Ordering::Acquire) >> WEAK_COUNT_SHIFT) as u32
    }
}

/// Pointer to the cell that follows the header of `object`.
///
/// # Safety
/// `object` must point to a live heap object whose cell has type `T`.
pub unsafe fn cell_ptr<T>(object: ObjectHandle) -> *mut T {
    unsafe { (object as *mut u8).add(CELL_OFFSET) as *mut T }
}

/// Borrowed `(data, size)` pair; strings are not NUL-terminated by contract.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ByteArray {
    pub data: *const u8,
    pub size: usize,
}

impl ByteArray {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.as_ptr(),
            size: bytes.len(),
        }
    }

    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            size: 0,
        }
    }

    /// # Safety
    /// `data` must point to `size` readable bytes for `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.data.is_null() || self.size == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.size) }
    }
}

/// Cell of `ffi.Error` objects.
#[repr(C)]
#[derive(Debug)]
pub struct ErrorCell {
    pub kind: ByteArray,
    pub message: ByteArray,
    pub backtrace: ByteArray,
}

/// Cell of `ffi.Shape` objects.
#[repr(C)]
#[derive(Debug)]
pub struct ShapeCell {
    pub data: *const i64,
    pub size: usize,
}

/// Fixed signature every native function object is invoked through.
pub type SafeCallFn = unsafe extern "C" fn(
    handle: *mut c_void,
    args: *const RawAny,
    num_args: i32,
    result: *mut RawAny,
) -> i32;

/// Releases the context token handed to `FunctionCreate`.
pub type ContextDeleter = unsafe extern "C" fn(context: *mut c_void);

/// Registry entry describing one object type.
#[repr(C)]
#[derive(Debug)]
pub struct TypeInfo {
    pub type_index: i32,
    pub type_depth: i32,
    pub type_key: ByteArray,
    pub parent_index: i32,
}
