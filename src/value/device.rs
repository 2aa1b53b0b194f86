use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{abi::DLDevice, error::FfiError};

/// DLPack device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    CudaHost,
    OpenCl,
    Vulkan,
    Metal,
    Vpi,
    Rocm,
    RocmHost,
    ExtDev,
    CudaManaged,
    OneApi,
    WebGpu,
    Hexagon,
    Unknown(i32),
}

const KINDS: &[(DeviceKind, i32, &str)] = &[
    (DeviceKind::Cpu, 1, "cpu"),
    (DeviceKind::Cuda, 2, "cuda"),
    (DeviceKind::CudaHost, 3, "cuda_host"),
    (DeviceKind::OpenCl, 4, "opencl"),
    (DeviceKind::Vulkan, 7, "vulkan"),
    (DeviceKind::Metal, 8, "metal"),
    (DeviceKind::Vpi, 9, "vpi"),
    (DeviceKind::Rocm, 10, "rocm"),
    (DeviceKind::RocmHost, 11, "rocm_host"),
    (DeviceKind::ExtDev, 12, "ext_dev"),
    (DeviceKind::CudaManaged, 13, "cuda_managed"),
    (DeviceKind::OneApi, 14, "oneapi"),
    (DeviceKind::WebGpu, 15, "webgpu"),
    (DeviceKind::Hexagon, 16, "hexagon"),
];

impl DeviceKind {
    pub fn from_code(code: i32) -> Self {
        KINDS
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(kind, _, _)| *kind)
            .unwrap_or(DeviceKind::Unknown(code))
    }

    pub fn code(self) -> i32 {
        match self {
            DeviceKind::Unknown(code) => code,
            known => KINDS
                .iter()
                .find(|(kind, _, _)| *kind == known)
                .map(|(_, code, _)| *code)
                .unwrap_or(0),
        }
    }

    pub fn name(self) -> Option<&'static str> {
        KINDS
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map(|(_, _, name)| *name)
    }

    /// Host-addressable memory: plain CPU and pinned host buffers.
    pub fn is_host(self) -> bool {
        matches!(
            self,
            DeviceKind::Cpu | DeviceKind::CudaHost | DeviceKind::RocmHost
        )
    }
}

/// A `(kind, index)` pair naming where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Device {
    pub kind: DeviceKind,
    pub index: i32,
}

impl Device {
    pub const fn new(kind: DeviceKind, index: i32) -> Self {
        Self { kind, index }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, 0)
    }

    pub const fn cuda(index: i32) -> Self {
        Self::new(DeviceKind::Cuda, index)
    }

    pub const fn metal(index: i32) -> Self {
        Self::new(DeviceKind::Metal, index)
    }

    pub fn is_host(&self) -> bool {
        self.kind.is_host()
    }

    pub fn to_dl(self) -> DLDevice {
        DLDevice {
            device_type: self.kind.code(),
            device_id: self.index,
        }
    }

    pub fn from_dl(device: DLDevice) -> Self {
        Self::new(DeviceKind::from_code(device.device_type), device.device_id)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.name() {
            Some(name) => write!(f, "{}:{}", name, self.index),
            None => write!(f, "device({}):{}", self.kind.code(), self.index),
        }
    }
}

impl FromStr for Device {
    type Err = FfiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, index) = match s.split_once(':') {
            Some((name, index)) => {
                let index = index
                    .parse::<i32>()
                    .map_err(|_| FfiError::invalid(format!("bad device index in '{}'", s)))?;
                (name, index)
            }
            None => (s, 0),
        };
        KINDS
            .iter()
            .find(|(_, _, n)| *n == name)
            .map(|(kind, _, _)| Device::new(*kind, index))
            .ok_or_else(|| FfiError::invalid(format!("unknown device '{}'", s)))
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl TryFrom<String> for Device {
    type Error = FfiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
