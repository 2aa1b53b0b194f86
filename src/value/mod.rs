mod device;
mod dtype;

use std::fmt;

pub use device::{Device, DeviceKind};
pub use dtype::{DataType, TypeCode};

use crate::{
    object::{ErrorRef, Function, Module, ObjectRef},
    tensor::HostArray,
};

/// Host-side value exchanged with the native runtime.
///
/// Scalars, descriptors and strings are plain data. Arrays share their
/// buffer. Functions, modules, errors and generic objects hold one native
/// reference each and release it on drop.
///
/// Equality on `Array` and on handle variants is identity: two values are
/// equal when they refer to the same buffer or the same native object.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Int(i64),
    Bool(bool),
    Float(f64),
    Device(Device),
    DataType(DataType),
    /// Raw address the native side treats as opaque.
    OpaquePtr(usize),
    Str(String),
    Bytes(Vec<u8>),
    Shape(Vec<i64>),
    Array(HostArray),
    Function(Function),
    Module(Module),
    Error(ErrorRef),
    Object(ObjectRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Float(_) => "Float",
            Value::Device(_) => "Device",
            Value::DataType(_) => "DataType",
            Value::OpaquePtr(_) => "OpaquePtr",
            Value::Str(_) => "Str",
            Value::Bytes(_) => "Bytes",
            Value::Shape(_) => "Shape",
            Value::Array(_) => "Array",
            Value::Function(_) => "Function",
            Value::Module(_) => "Module",
            Value::Error(_) => "Error",
            Value::Object(_) => "Object",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&HostArray> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<HostArray> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// True when both values denote the same shared buffer or native object.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Module(a), Value::Module(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => a.handle().ptr_eq(b.handle()),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Device(a), Value::Device(b)) => a == b,
            (Value::DataType(a), Value::DataType(b)) => a == b,
            (Value::OpaquePtr(a), Value::OpaquePtr(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Shape(a), Value::Shape(b)) => a == b,
            _ => self.same_object(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Device(v) => write!(f, "{}", v),
            Value::DataType(v) => write!(f, "{}", v),
            Value::OpaquePtr(v) => write!(f, "<ptr {:#x}>", v),
            Value::Str(v) => write!(f, "\"{}\"", v),
            Value::Bytes(v) => write!(f, "<bytes len={}>", v.len()),
            Value::Shape(v) => write!(f, "Shape{:?}", v),
            Value::Array(v) => write!(f, "<array {} {:?} on {}>", v.dtype(), v.shape(), v.device()),
            Value::Function(_) => write!(f, "<function>"),
            Value::Module(_) => write!(f, "<module>"),
            Value::Error(v) => write!(f, "{}", v.to_native_error()),
            Value::Object(v) => write!(f, "<object type_index={}>", v.type_index()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Device> for Value {
    fn from(v: Device) -> Self {
        Value::Device(v)
    }
}

impl From<DataType> for Value {
    fn from(v: DataType) -> Self {
        Value::DataType(v)
    }
}

impl From<HostArray> for Value {
    fn from(v: HostArray) -> Self {
        Value::Array(v)
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Value::Function(v)
    }
}

impl From<Module> for Value {
    fn from(v: Module) -> Self {
        Value::Module(v)
    }
}

#[cfg(test)]
mod value_test;
