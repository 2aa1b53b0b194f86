//! Host values to owned [`RawAny`] slots.

use crate::{
    abi::{ByteArray, RawAny, type_index},
    error::FfiError,
    native,
    tensor::tensor_from_host_array,
    value::Value,
};

/// Encodes `value` into a slot holding exactly one reference of its own.
///
/// Strings and bytes go inline when they fit and become heap objects
/// otherwise. Arrays become refcounted tensors so the native side can keep
/// them past the current call.
pub(crate) fn encode_owned(value: &Value) -> Result<RawAny, FfiError> {
    let raw = match value {
        Value::None => RawAny::none(),
        Value::Int(v) => RawAny::int(*v),
        Value::Bool(v) => RawAny::bool(*v),
        Value::Float(v) => RawAny::float(*v),
        Value::Device(v) => RawAny::device(v.to_dl()),
        Value::DataType(v) => RawAny::dtype(v.to_dl()),
        Value::OpaquePtr(v) => RawAny::opaque_ptr(*v as *mut _),
        Value::Str(text) => match RawAny::small_str(text) {
            Some(raw) => raw,
            None => heap_bytes(text.as_bytes(), true)?,
        },
        Value::Bytes(bytes) => match RawAny::small_bytes(bytes) {
            Some(raw) => raw,
            None => heap_bytes(bytes, false)?,
        },
        Value::Shape(dims) => {
            let mut out = RawAny::none();
            // SAFETY: `dims` is live for the call and `out` is a valid slot.
            native::check(unsafe { native::api().shape_create(dims.as_ptr(), dims.len(), &mut out) })?;
            out
        }
        Value::Array(array) => {
            let tensor = tensor_from_host_array(array)?;
            RawAny::object(type_index::TENSOR, tensor.into_raw())
        }
        Value::Function(f) => RawAny::object(type_index::FUNCTION, f.clone().into_raw()),
        Value::Module(m) => RawAny::object(type_index::MODULE, m.clone().into_raw()),
        Value::Error(e) => RawAny::object(type_index::ERROR, e.handle().clone().into_raw()),
        Value::Object(o) => RawAny::object(o.type_index(), o.clone().into_raw()),
    };
    Ok(raw)
}

fn heap_bytes(bytes: &[u8], is_str: bool) -> Result<RawAny, FfiError> {
    let array = ByteArray::from_slice(bytes);
    let mut out = RawAny::none();
    // SAFETY: `array` borrows `bytes` for the duration of the call.
    let status = unsafe {
        if is_str {
            native::api().string_create(&array, &mut out)
        } else {
            native::api().bytes_create(&array, &mut out)
        }
    };
    native::check(status)?;
    Ok(out)
}
