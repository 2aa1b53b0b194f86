//! The one exhaustive switch from [`RawAny`] to [`Value`].

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::{
    abi::{AnyTag, ByteArray, DLTensor, HeapKind, ObjectHandle, RawAny, ShapeCell, cell_ptr},
    error::FfiError,
    object::{ErrorRef, Handle, ObjectKind, ObjectRef, Tensor},
    tensor::{Lease, TensorOwnership, TensorView},
    value::{DataType, Device, Value},
};

use super::Ownership;

/// How a raw tensor pointer is turned into an array.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RawTensor<'l> {
    /// Read the elements into a fresh host buffer.
    Copy,
    /// Wrap the memory in place. Only valid while the producer's borrow
    /// lasts, which the lease, when given, enforces.
    Wrap(Option<&'l Lease>),
}

/// Decodes `raw`. Under [`Ownership::Owned`] the one reference `raw`
/// carries is consumed on every path, success or error.
///
/// # Safety
/// Pointer payloads must be valid for the tag they are stored under.
pub(crate) unsafe fn decode(
    raw: RawAny,
    ownership: Ownership,
    raw_tensor: RawTensor<'_>,
) -> Result<Value, FfiError> {
    let value = match raw.tag()? {
        AnyTag::None => Value::None,
        AnyTag::Int => Value::Int(raw.as_i64()),
        AnyTag::Bool => Value::Bool(raw.payload != 0),
        AnyTag::Float => Value::Float(raw.as_f64()),
        AnyTag::Device => Value::Device(Device::from_dl(raw.as_device())),
        AnyTag::DataType => Value::DataType(DataType::from_dl(raw.as_dtype())),
        AnyTag::OpaquePtr => Value::OpaquePtr(raw.payload as usize),
        AnyTag::SmallStr => Value::Str(utf8(raw.inline_bytes())?),
        AnyTag::SmallBytes => Value::Bytes(raw.inline_bytes().to_vec()),
        AnyTag::RawStr => {
            let ptr: *mut c_char = raw.as_ptr();
            if ptr.is_null() {
                return Err(FfiError::NullHandle);
            }
            // SAFETY: raw strings are NUL-terminated per the tag contract.
            Value::Str(utf8(unsafe { CStr::from_ptr(ptr) }.to_bytes())?)
        }
        AnyTag::ByteArrayPtr => {
            let array: *mut ByteArray = raw.as_ptr();
            if array.is_null() {
                return Err(FfiError::NullHandle);
            }
            Value::Bytes(unsafe { (*array).as_slice() }.to_vec())
        }
        AnyTag::DLTensorPtr => unsafe { decode_dltensor(raw.as_ptr(), raw_tensor)? },
        AnyTag::ObjectRValueRef => {
            let slot: *mut ObjectHandle = raw.as_ptr();
            if slot.is_null() {
                return Err(FfiError::NullHandle);
            }
            // The slot is only read; moving out is the native side's job.
            let handle = unsafe { *slot };
            if handle.is_null() {
                Value::None
            } else {
                let index = unsafe { (*handle).type_index };
                unsafe {
                    decode(
                        RawAny::object(index, handle),
                        Ownership::Borrowed,
                        raw_tensor,
                    )?
                }
            }
        }
        AnyTag::Object(kind) => unsafe { decode_object(raw.as_object(), kind, ownership)? },
    };
    Ok(value)
}

unsafe fn decode_dltensor(tensor: *const DLTensor, mode: RawTensor<'_>) -> Result<Value, FfiError> {
    // SAFETY: the producer vouches for the descriptor for the current call.
    let view = unsafe { TensorView::from_dltensor(tensor, TensorOwnership::NativeOwned)? };
    let array = match mode {
        // A raw pointer carries no ownership, so only a copy may outlive it.
        RawTensor::Copy => view.copy_to_host()?,
        RawTensor::Wrap(lease) => unsafe { view.wrap_borrowed(lease)? },
    };
    Ok(Value::Array(array))
}

fn handle<K: ObjectKind>(raw: ObjectHandle, ownership: Ownership) -> Result<Handle<K>, FfiError> {
    match ownership {
        Ownership::Owned => Handle::from_owned_raw(raw),
        Ownership::Borrowed => Handle::from_borrowed_raw(raw),
    }
}

unsafe fn decode_object(
    raw: ObjectHandle,
    kind: HeapKind,
    ownership: Ownership,
) -> Result<Value, FfiError> {
    if raw.is_null() {
        return Err(FfiError::NullHandle);
    }
    let value = match kind {
        HeapKind::Str | HeapKind::Bytes | HeapKind::Shape => {
            // Copied out; an owned reference is released on the way out.
            let _guard = match ownership {
                Ownership::Owned => Some(ObjectRef::from_owned_raw(raw)?),
                Ownership::Borrowed => None,
            };
            unsafe { copy_out(raw, kind)? }
        }
        HeapKind::Function => Value::Function(handle(raw, ownership)?),
        HeapKind::Module => Value::Module(handle(raw, ownership)?),
        HeapKind::Error => {
            let handle = handle(raw, ownership)?;
            Value::Error(ErrorRef::new(handle))
        }
        HeapKind::Tensor => {
            let tensor: Tensor = handle(raw, ownership)?;
            Value::Array(tensor.to_host_array()?)
        }
        HeapKind::Object | HeapKind::Array | HeapKind::Map | HeapKind::Other(_) => {
            Value::Object(handle(raw, ownership)?)
        }
    };
    Ok(value)
}

unsafe fn copy_out(raw: ObjectHandle, kind: HeapKind) -> Result<Value, FfiError> {
    let value = match kind {
        HeapKind::Str => {
            // SAFETY: string objects start their cell with a byte array.
            let bytes = unsafe { (*cell_ptr::<ByteArray>(raw)).as_slice() };
            Value::Str(utf8(bytes)?)
        }
        HeapKind::Bytes => {
            let bytes = unsafe { (*cell_ptr::<ByteArray>(raw)).as_slice() };
            Value::Bytes(bytes.to_vec())
        }
        _ => {
            let cell = unsafe { &*cell_ptr::<ShapeCell>(raw) };
            let dims = if cell.data.is_null() || cell.size == 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(cell.data, cell.size) }.to_vec()
            };
            Value::Shape(dims)
        }
    };
    Ok(value)
}

fn utf8(bytes: &[u8]) -> Result<String, FfiError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| FfiError::invalid(format!("string payload is not UTF-8: {}", err)))
}
