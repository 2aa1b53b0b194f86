use crate::{
    abi::{ErrorCell, ObjectHandle},
    error::{FfiError, NativeError},
};

use super::{ErrorKind, Handle};

/// A native error object with its text read out eagerly.
///
/// The strings are copied at construction so they stay readable after the
/// native object is gone.
#[derive(Debug, Clone)]
pub struct ErrorRef {
    handle: Handle<ErrorKind>,
    error: NativeError,
}

impl ErrorRef {
    pub fn new(handle: Handle<ErrorKind>) -> Self {
        // SAFETY: error objects carry an `ErrorCell`.
        let cell: &ErrorCell = unsafe { handle.cell() };
        let text = |array: &crate::abi::ByteArray| {
            String::from_utf8_lossy(unsafe { array.as_slice() }).into_owned()
        };
        let error = NativeError {
            kind: text(&cell.kind),
            message: text(&cell.message),
            backtrace: text(&cell.backtrace),
        };
        Self { handle, error }
    }

    pub fn from_owned_raw(raw: ObjectHandle) -> Result<Self, FfiError> {
        Handle::from_owned_raw(raw).map(Self::new)
    }

    pub fn from_borrowed_raw(raw: ObjectHandle) -> Result<Self, FfiError> {
        Handle::from_borrowed_raw(raw).map(Self::new)
    }

    pub fn kind(&self) -> &str {
        &self.error.kind
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    pub fn backtrace(&self) -> &str {
        &self.error.backtrace
    }

    pub fn handle(&self) -> &Handle<ErrorKind> {
        &self.handle
    }

    pub fn into_handle(self) -> Handle<ErrorKind> {
        self.handle
    }

    pub fn to_native_error(&self) -> NativeError {
        self.error.clone()
    }
}
