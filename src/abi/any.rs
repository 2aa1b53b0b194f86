use std::{fmt, os::raw::c_void};

use crate::{
    abi::{
        dlpack::{DLDataType, DLDevice, DLTensor},
        object::{ByteArray, ObjectHandle},
    },
    error::FfiError,
};

/// Type indices understood by the native runtime.
///
/// Indices below [`STATIC_OBJECT_BEGIN`](type_index::STATIC_OBJECT_BEGIN)
/// carry their value inline; everything at or above it is a pointer to an
/// [`ObjectHeader`](crate::abi::ObjectHeader).
pub mod type_index {
    pub const NONE: i32 = 0;
    pub const INT: i32 = 1;
    pub const BOOL: i32 = 2;
    pub const FLOAT: i32 = 3;
    pub const OPAQUE_PTR: i32 = 4;
    pub const DATA_TYPE: i32 = 5;
    pub const DEVICE: i32 = 6;
    pub const DLTENSOR_PTR: i32 = 7;
    pub const RAW_STR: i32 = 8;
    pub const BYTE_ARRAY_PTR: i32 = 9;
    pub const OBJECT_RVALUE_REF: i32 = 10;
    pub const SMALL_STR: i32 = 11;
    pub const SMALL_BYTES: i32 = 12;

    pub const STATIC_OBJECT_BEGIN: i32 = 64;
    pub const OBJECT: i32 = 64;
    pub const STR: i32 = 65;
    pub const BYTES: i32 = 66;
    pub const ERROR: i32 = 67;
    pub const FUNCTION: i32 = 68;
    pub const SHAPE: i32 = 69;
    pub const TENSOR: i32 = 70;
    pub const ARRAY: i32 = 71;
    pub const MAP: i32 = 72;
    pub const MODULE: i32 = 73;

    pub const DYN_OBJECT_BEGIN: i32 = 128;
}

/// Largest string or byte payload stored inline in a [`RawAny`].
///
/// One of the eight payload bytes is kept for the NUL terminator native
/// readers expect after small strings.
pub const SMALL_PAYLOAD_CAPACITY: usize = 7;

/// Fixed-size tagged value crossing the native boundary.
///
/// Layout: 4-byte type index, 4-byte small length (zero for every tag but
/// the small string/bytes ones), 8-byte payload holding either POD bits or a
/// pointer.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawAny {
    pub type_index: i32,
    pub small_len: u32,
    pub payload: u64,
}

impl Default for RawAny {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RawAny {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match AnyTag::from_type_index(self.type_index) {
            Ok(tag) => write!(f, "RawAny({:?}, {:#018x})", tag, self.payload),
            Err(_) => write!(f, "RawAny(#{}, {:#018x})", self.type_index, self.payload),
        }
    }
}

impl RawAny {
    pub const fn none() -> Self {
        Self {
            type_index: type_index::NONE,
            small_len: 0,
            payload: 0,
        }
    }

    pub const fn int(value: i64) -> Self {
        Self {
            type_index: type_index::INT,
            small_len: 0,
            payload: value as u64,
        }
    }

    pub const fn bool(value: bool) -> Self {
        Self {
            type_index: type_index::BOOL,
            small_len: 0,
            payload: value as u64,
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            type_index: type_index::FLOAT,
            small_len: 0,
            payload: value.to_bits(),
        }
    }

    pub fn device(device: DLDevice) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&device.device_type.to_ne_bytes());
        bytes[4..].copy_from_slice(&device.device_id.to_ne_bytes());
        Self {
            type_index: type_index::DEVICE,
            small_len: 0,
            payload: u64::from_ne_bytes(bytes),
        }
    }

    pub fn dtype(dtype: DLDataType) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = dtype.code;
        bytes[1] = dtype.bits;
        bytes[2..4].copy_from_slice(&dtype.lanes.to_ne_bytes());
        Self {
            type_index: type_index::DATA_TYPE,
            small_len: 0,
            payload: u64::from_ne_bytes(bytes),
        }
    }

    pub fn opaque_ptr(ptr: *mut c_void) -> Self {
        Self::pointer(type_index::OPAQUE_PTR, ptr as *const c_void)
    }

    pub fn dltensor_ptr(tensor: *const DLTensor) -> Self {
        Self::pointer(type_index::DLTENSOR_PTR, tensor as *const c_void)
    }

    pub fn byte_array_ptr(array: *const ByteArray) -> Self {
        Self::pointer(type_index::BYTE_ARRAY_PTR, array as *const c_void)
    }

    /// Encodes a heap object pointer under its own type index.
    pub fn object(type_index: i32, handle: ObjectHandle) -> Self {
        Self::pointer(type_index, handle as *const c_void)
    }

    fn pointer(type_index: i32, ptr: *const c_void) -> Self {
        Self {
            type_index,
            small_len: 0,
            payload: ptr as usize as u64,
        }
    }

    /// Packs a string inline, or returns `None` when it does not fit.
    pub fn small_str(value: &str) -> Option<Self> {
        Self::inline(type_index::SMALL_STR, value.as_bytes())
    }

    /// Packs bytes inline, or returns `None` when they do not fit.
    pub fn small_bytes(value: &[u8]) -> Option<Self> {
        Self::inline(type_index::SMALL_BYTES, value)
    }

    fn inline(type_index: i32, data: &[u8]) -> Option<Self> {
        if data.len() > SMALL_PAYLOAD_CAPACITY {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            type_index,
            small_len: data.len() as u32,
            payload: u64::from_ne_bytes(bytes),
        })
    }

    pub fn tag(&self) -> Result<AnyTag, FfiError> {
        AnyTag::from_type_index(self.type_index)
    }

    pub fn is_object(&self) -> bool {
        self.type_index >= type_index::STATIC_OBJECT_BEGIN
    }

    pub fn as_i64(&self) -> i64 {
        self.payload as i64
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.payload)
    }

    pub fn as_device(&self) -> DLDevice {
        let bytes = self.payload.to_ne_bytes();
        DLDevice {
            device_type: i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            device_id: i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn as_dtype(&self) -> DLDataType {
        let bytes = self.payload.to_ne_bytes();
        DLDataType {
            code: bytes[0],
            bits: bytes[1],
            lanes: u16::from_ne_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn as_ptr<T>(&self) -> *mut T {
        self.payload as usize as *mut T
    }

    pub fn as_object(&self) -> ObjectHandle {
        self.as_ptr()
    }

    /// Inline payload bytes of a small string or small bytes value.
    pub fn inline_bytes(&self) -> &[u8] {
        let len = (self.small_len as usize).min(8);
        // SAFETY: `payload` is eight initialized bytes owned by `self`.
        unsafe { std::slice::from_raw_parts(&self.payload as *const u64 as *const u8, len) }
    }
}

/// Closed set of tags a [`RawAny`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyTag {
    None,
    Int,
    Bool,
    Float,
    OpaquePtr,
    DataType,
    Device,
    DLTensorPtr,
    RawStr,
    ByteArrayPtr,
    ObjectRValueRef,
    SmallStr,
    SmallBytes,
    Object(HeapKind),
}

/// Heap object families with a dedicated decoding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    Object,
    Str,
    Bytes,
    Error,
    Function,
    Shape,
    Tensor,
    Array,
    Map,
    Module,
    /// Any other registered object type; decoded as a generic object.
    Other(i32),
}

impl AnyTag {
    pub fn from_type_index(index: i32) -> Result<Self, FfiError> {
        use type_index as ti;
        let tag = match index {
            ti::NONE => AnyTag::None,
            ti::INT => AnyTag::Int,
            ti::BOOL => AnyTag::Bool,
            ti::FLOAT => AnyTag::Float,
            ti::OPAQUE_PTR => AnyTag::OpaquePtr,
            ti::DATA_TYPE => AnyTag::DataType,
            ti::DEVICE => AnyTag::Device,
            ti::DLTENSOR_PTR => AnyTag::DLTensorPtr,
            ti::RAW_STR => AnyTag::RawStr,
            ti::BYTE_ARRAY_PTR => AnyTag::ByteArrayPtr,
            ti::OBJECT_RVALUE_REF => AnyTag::ObjectRValueRef,
            ti::SMALL_STR => AnyTag::SmallStr,
            ti::SMALL_BYTES => AnyTag::SmallBytes,
            ti::OBJECT => AnyTag::Object(HeapKind::Object),
            ti::STR => AnyTag::Object(HeapKind::Str),
            ti::BYTES => AnyTag::Object(HeapKind::Bytes),
            ti::ERROR => AnyTag::Object(HeapKind::Error),
            ti::FUNCTION => AnyTag::Object(HeapKind::Function),
            ti::SHAPE => AnyTag::Object(HeapKind::Shape),
            ti::TENSOR => AnyTag::Object(HeapKind::Tensor),
            ti::ARRAY => AnyTag::Object(HeapKind::Array),
            ti::MAP => AnyTag::Object(HeapKind::Map),
            ti::MODULE => AnyTag::Object(HeapKind::Module),
            other if other > ti::STATIC_OBJECT_BEGIN => AnyTag::Object(HeapKind::Other(other)),
            other => return Err(FfiError::UnsupportedType { type_index: other }),
        };
        Ok(tag)
    }

    pub fn type_index(self) -> i32 {
        use type_index as ti;
        match self {
            AnyTag::None => ti::NONE,
            AnyTag::Int => ti::INT,
            AnyTag::Bool => ti::BOOL,
            AnyTag::Float => ti::FLOAT,
            AnyTag::OpaquePtr => ti::OPAQUE_PTR,
            AnyTag::DataType => ti::DATA_TYPE,
            AnyTag::Device => ti::DEVICE,
            AnyTag::DLTensorPtr => ti::DLTENSOR_PTR,
            AnyTag::RawStr => ti::RAW_STR,
            AnyTag::ByteArrayPtr => ti::BYTE_ARRAY_PTR,
            AnyTag::ObjectRValueRef => ti::OBJECT_RVALUE_REF,
            AnyTag::SmallStr => ti::SMALL_STR,
            AnyTag::SmallBytes => ti::SMALL_BYTES,
            AnyTag::Object(kind) => match kind {
                HeapKind::Object => ti::OBJECT,
                HeapKind::Str => ti::STR,
                HeapKind::Bytes => ti::BYTES,
                HeapKind::Error => ti::ERROR,
                HeapKind::Function => ti::FUNCTION,
                HeapKind::Shape => ti::SHAPE,
                HeapKind::Tensor => ti::TENSOR,
                HeapKind::Array => ti::ARRAY,
                HeapKind::Map => ti::MAP,
                HeapKind::Module => ti::MODULE,
                HeapKind::Other(index) => index,
            },
        }
    }

    pub fn is_object(self) -> bool {
        matches!(self, AnyTag::Object(_))
    }
}
