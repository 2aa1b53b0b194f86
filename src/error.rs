use std::fmt;

use crate::value::Device;

/// Stable code attached to every [`FfiError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: &'static str,
    pub title: &'static str,
}

pub const NULL_HANDLE: ErrorCode = ErrorCode {
    code: "E3001",
    title: "NULL HANDLE",
};

pub const CONVERSION_FAILED: ErrorCode = ErrorCode {
    code: "E3002",
    title: "CONVERSION FAILED",
};

pub const UNSUPPORTED_TYPE: ErrorCode = ErrorCode {
    code: "E3003",
    title: "UNSUPPORTED TYPE",
};

pub const UNSUPPORTED_DEVICE: ErrorCode = ErrorCode {
    code: "E3004",
    title: "UNSUPPORTED DEVICE",
};

pub const NATIVE_ERROR: ErrorCode = ErrorCode {
    code: "E3005",
    title: "NATIVE ERROR",
};

pub const INVALID_ARGUMENT: ErrorCode = ErrorCode {
    code: "E3006",
    title: "INVALID ARGUMENT",
};

/// Error raised on the native side and moved out of its thread-local slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Exception family, e.g. `"RuntimeError"` or `"ValueError"`.
    pub kind: String,
    pub message: String,
    /// Rendered most-recent-call-last; empty when the raiser had none.
    pub backtrace: String,
}

impl NativeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            backtrace: String::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = backtrace.into();
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.backtrace.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for line in self.backtrace.lines() {
                writeln!(f, "  {}", line)?;
            }
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Clone, PartialEq)]
pub enum FfiError {
    /// A wrapper was asked to operate on a null native handle.
    NullHandle,
    /// A native conversion primitive reported a nonzero status.
    Conversion { status: i32, context: String },
    /// Decoding met a type index with no host representation.
    UnsupportedType { type_index: i32 },
    /// No backend for the device, or the buffer cannot be wrapped there.
    UnsupportedDevice { device: Device, reason: String },
    Native(NativeError),
    /// Host-side misuse: shape/element-count mismatch, wrong dtype, etc.
    InvalidArgument(String),
}

impl FfiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FfiError::NullHandle => NULL_HANDLE,
            FfiError::Conversion { .. } => CONVERSION_FAILED,
            FfiError::UnsupportedType { .. } => UNSUPPORTED_TYPE,
            FfiError::UnsupportedDevice { .. } => UNSUPPORTED_DEVICE,
            FfiError::Native(_) => NATIVE_ERROR,
            FfiError::InvalidArgument(_) => INVALID_ARGUMENT,
        }
    }

    pub fn unsupported_device(device: Device, reason: impl Into<String>) -> Self {
        FfiError::UnsupportedDevice {
            device,
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        FfiError::InvalidArgument(message.into())
    }

    /// Kind string of a native error, if this is one.
    pub fn native_kind(&self) -> Option<&str> {
        match self {
            FfiError::Native(err) => Some(&err.kind),
            _ => None,
        }
    }
}

impl fmt::Display for FfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "[{}] ", code.code)?;
        match self {
            FfiError::NullHandle => write!(f, "operation on a null native handle"),
            FfiError::Conversion { status, context } => {
                write!(f, "conversion failed with status {}: {}", status, context)
            }
            FfiError::UnsupportedType { type_index } => {
                write!(f, "unsupported type index {}", type_index)
            }
            FfiError::UnsupportedDevice { device, reason } => {
                write!(f, "unsupported device {}: {}", device, reason)
            }
            FfiError::Native(err) => write!(f, "{}", err),
            FfiError::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
        }
    }
}

impl std::error::Error for FfiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FfiError::Native(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NativeError> for FfiError {
    fn from(err: NativeError) -> Self {
        FfiError::Native(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_renders_kind_and_message() {
        let err = NativeError::new("ValueError", "bad shape");
        assert_eq!(err.to_string(), "ValueError: bad shape");
    }

    #[test]
    fn native_error_renders_traceback_first() {
        let err = NativeError::new("RuntimeError", "boom")
            .with_backtrace("File \"a.cc\", line 3\nFile \"b.cc\", line 9");
        insta::assert_snapshot!(err.to_string(), @r###"
        Traceback (most recent call last):
          File "a.cc", line 3
          File "b.cc", line 9
        RuntimeError: boom
        "###);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(FfiError::NullHandle.code().code, "E3001");
        assert_eq!(
            FfiError::UnsupportedType { type_index: 99 }.to_string(),
            "[E3003] unsupported type index 99"
        );
        assert_eq!(
            FfiError::unsupported_device(Device::cuda(1), "no backend registered").to_string(),
            "[E3004] unsupported device cuda:1: no backend registered"
        );
    }

    #[test]
    fn native_kind_is_exposed() {
        let err: FfiError = NativeError::new("KeyError", "missing").into();
        assert_eq!(err.native_kind(), Some("KeyError"));
        assert_eq!(FfiError::NullHandle.native_kind(), None);
    }
}
