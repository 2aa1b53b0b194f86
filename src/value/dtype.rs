use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{abi::DLDataType, error::FfiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Int,
    UInt,
    Float,
    OpaqueHandle,
    BFloat,
    Complex,
    Bool,
    Other(u8),
}

impl TypeCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TypeCode::Int,
            1 => TypeCode::UInt,
            2 => TypeCode::Float,
            3 => TypeCode::OpaqueHandle,
            4 => TypeCode::BFloat,
            5 => TypeCode::Complex,
            6 => TypeCode::Bool,
            other => TypeCode::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TypeCode::Int => 0,
            TypeCode::UInt => 1,
            TypeCode::Float => 2,
            TypeCode::OpaqueHandle => 3,
            TypeCode::BFloat => 4,
            TypeCode::Complex => 5,
            TypeCode::Bool => 6,
            TypeCode::Other(code) => code,
        }
    }

    fn prefix(self) -> Option<&'static str> {
        match self {
            TypeCode::Int => Some("int"),
            TypeCode::UInt => Some("uint"),
            TypeCode::Float => Some("float"),
            TypeCode::OpaqueHandle => Some("handle"),
            TypeCode::BFloat => Some("bfloat"),
            TypeCode::Complex => Some("complex"),
            TypeCode::Bool => Some("bool"),
            TypeCode::Other(_) => None,
        }
    }
}

/// Element type descriptor: `{code, bits, lanes}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DataType {
    pub code: TypeCode,
    pub bits: u8,
    pub lanes: u16,
}

impl DataType {
    pub const fn new(code: TypeCode, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }

    pub const BOOL: DataType = DataType::new(TypeCode::Bool, 8, 1);
    pub const I8: DataType = DataType::new(TypeCode::Int, 8, 1);
    pub const I16: DataType = DataType::new(TypeCode::Int, 16, 1);
    pub const I32: DataType = DataType::new(TypeCode::Int, 32, 1);
    pub const I64: DataType = DataType::new(TypeCode::Int, 64, 1);
    pub const U8: DataType = DataType::new(TypeCode::UInt, 8, 1);
    pub const U16: DataType = DataType::new(TypeCode::UInt, 16, 1);
    pub const U32: DataType = DataType::new(TypeCode::UInt, 32, 1);
    pub const U64: DataType = DataType::new(TypeCode::UInt, 64, 1);
    pub const F16: DataType = DataType::new(TypeCode::Float, 16, 1);
    pub const F32: DataType = DataType::new(TypeCode::Float, 32, 1);
    pub const F64: DataType = DataType::new(TypeCode::Float, 64, 1);
    pub const BF16: DataType = DataType::new(TypeCode::BFloat, 16, 1);
    pub const HANDLE: DataType = DataType::new(TypeCode::OpaqueHandle, 64, 1);

    /// Storage size of one element including all lanes, rounded up to bytes.
    pub fn bytes_per_element(&self) -> usize {
        (self.bits as usize * self.lanes as usize).div_ceil(8)
    }

    /// True for sub-byte types whose elements are not byte-addressable.
    pub fn is_packed(&self) -> bool {
        self.bits % 8 != 0
    }

    pub fn to_dl(self) -> DLDataType {
        DLDataType {
            code: self.code.code(),
            bits: self.bits,
            lanes: self.lanes,
        }
    }

    pub fn from_dl(dtype: DLDataType) -> Self {
        Self::new(TypeCode::from_code(dtype.code), dtype.bits, dtype.lanes)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == DataType::BOOL {
            return write!(f, "bool");
        }
        if *self == DataType::HANDLE {
            return write!(f, "handle");
        }
        match self.code.prefix() {
            Some(prefix) => write!(f, "{}{}", prefix, self.bits)?,
            None => write!(f, "custom[{}]{}", self.code.code(), self.bits)?,
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

impl FromStr for DataType {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FfiError::invalid(format!("cannot parse dtype '{}'", s));
        match s {
            "bool" => return Ok(DataType::BOOL),
            "handle" => return Ok(DataType::HANDLE),
            _ => {}
        }
        // The lane suffix follows the bit width, e.g. "int64x4"; the 'x' in
        // "complex" is part of the name.
        let (base, lanes) = match s.rsplit_once('x') {
            Some((base, lanes)) if base.ends_with(|c: char| c.is_ascii_digit()) => {
                (base, lanes.parse::<u16>().map_err(|_| bad())?)
            }
            _ => (s, 1),
        };
        // Longest prefixes first so "uint" is not read as "int".
        let prefixes = [
            ("bfloat", TypeCode::BFloat),
            ("complex", TypeCode::Complex),
            ("float", TypeCode::Float),
            ("uint", TypeCode::UInt),
            ("int", TypeCode::Int),
        ];
        let (code, digits) = prefixes
            .iter()
            .find_map(|(prefix, code)| base.strip_prefix(prefix).map(|rest| (*code, rest)))
            .ok_or_else(bad)?;
        let bits = if digits.is_empty() {
            match code {
                TypeCode::BFloat => 16,
                TypeCode::Complex => 64,
                _ => 32,
            }
        } else {
            digits.parse::<u8>().map_err(|_| bad())?
        };
        if bits == 0 || lanes == 0 {
            return Err(bad());
        }
        Ok(DataType::new(code, bits, lanes))
    }
}

impl From<DataType> for String {
    fn from(dtype: DataType) -> Self {
        dtype.to_string()
    }
}

impl TryFrom<String> for DataType {
    type Error = FfiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
