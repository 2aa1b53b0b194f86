//! Queries against the native type registry.

use crate::{
    abi::{ByteArray, type_index},
    error::FfiError,
    native,
};

pub fn type_index_of(key: &str) -> Result<i32, FfiError> {
    let key = ByteArray::from_slice(key.as_bytes());
    let mut index = 0i32;
    // SAFETY: `key` borrows a live string and `index` is a valid out slot.
    native::check(unsafe { native::api().type_key_to_index(&key, &mut index) })?;
    Ok(index)
}

pub fn type_key_of(index: i32) -> Result<String, FfiError> {
    // SAFETY: the registry returns null or a pointer valid for the process.
    let info = unsafe { native::api().get_type_info(index) };
    if info.is_null() {
        return Err(FfiError::UnsupportedType { type_index: index });
    }
    let bytes = unsafe { (*info).type_key.as_slice() };
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Depth of `index` in the type hierarchy, and its parent.
pub fn type_ancestry(index: i32) -> Result<(i32, i32), FfiError> {
    // SAFETY: as for `type_key_of`.
    let info = unsafe { native::api().get_type_info(index) };
    if info.is_null() {
        return Err(FfiError::UnsupportedType { type_index: index });
    }
    let info = unsafe { &*info };
    Ok((info.type_depth, info.parent_index))
}

/// Registers `key` as a dynamic type under `parent`, or returns the index it
/// already has.
pub fn register_type(key: &str, parent: i32) -> Result<i32, FfiError> {
    let (parent_depth, _) = type_ancestry(parent)?;
    let key_bytes = ByteArray::from_slice(key.as_bytes());
    // SAFETY: `key_bytes` borrows a live string for the call.
    let index = unsafe {
        native::api().type_get_or_alloc_index(&key_bytes, -1, parent_depth + 1, 0, 1, parent)
    };
    if index < type_index::STATIC_OBJECT_BEGIN {
        return Err(FfiError::invalid(format!(
            "native runtime refused to register type '{}'",
            key
        )));
    }
    Ok(index)
}
