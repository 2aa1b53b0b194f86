//! C ABI layouts shared with the native runtime.
//!
//! Nothing here owns memory. These are the `#[repr(C)]` shapes the native
//! side reads and writes; ownership rules live in [`crate::any`] and
//! [`crate::object`].

pub mod any;
pub mod dlpack;
pub mod object;

pub use any::{AnyTag, HeapKind, RawAny, SMALL_PAYLOAD_CAPACITY, type_index};
pub use dlpack::{DLDataType, DLDevice, DLManagedTensor, DLTensor};
pub use object::{
    ByteArray, CELL_OFFSET, ContextDeleter, ErrorCell, ObjectDeleter, ObjectHandle, ObjectHeader,
    SafeCallFn, ShapeCell, TypeInfo, cell_ptr,
};

#[cfg(test)]
mod any_test;
