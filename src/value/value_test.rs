use super::*;

#[test]
fn parses_and_formats_common_dtypes() {
    for text in ["float32", "int64", "uint8", "bfloat16", "int64x4", "complex64", "bool", "handle"] {
        let dtype: DataType = text.parse().unwrap();
        assert_eq!(dtype.to_string(), text);
    }
}

#[test]
fn bare_dtype_names_default_their_width() {
    assert_eq!("float".parse::<DataType>().unwrap(), DataType::F32);
    assert_eq!("int".parse::<DataType>().unwrap(), DataType::I32);
    assert_eq!("bfloat".parse::<DataType>().unwrap(), DataType::BF16);
}

#[test]
fn rejects_malformed_dtypes() {
    for text in ["", "floaty", "int0", "float32x", "float32x0", "quux8"] {
        assert!(text.parse::<DataType>().is_err(), "accepted {:?}", text);
    }
}

#[test]
fn dtype_byte_width_covers_lanes() {
    assert_eq!(DataType::F32.bytes_per_element(), 4);
    assert_eq!("int16x4".parse::<DataType>().unwrap().bytes_per_element(), 8);
    assert_eq!(DataType::BOOL.bytes_per_element(), 1);
}

#[test]
fn dtype_roundtrips_through_dlpack_struct() {
    let dtype: DataType = "uint16x2".parse().unwrap();
    assert_eq!(DataType::from_dl(dtype.to_dl()), dtype);
}

#[test]
fn device_display_and_parse() {
    insta::assert_snapshot!(Device::cuda(1).to_string(), @"cuda:1");
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu());
    assert_eq!("metal:2".parse::<Device>().unwrap(), Device::metal(2));
    assert!("tpu:0".parse::<Device>().is_err());
    assert!("cuda:x".parse::<Device>().is_err());
}

#[test]
fn unknown_device_codes_survive() {
    let device = Device::from_dl(crate::abi::DLDevice {
        device_type: 42,
        device_id: 3,
    });
    assert_eq!(device.kind, DeviceKind::Unknown(42));
    assert_eq!(device.to_dl().device_type, 42);
    assert_eq!(device.to_string(), "device(42):3");
}

#[test]
fn host_kinds() {
    assert!(Device::cpu().is_host());
    assert!(Device::new(DeviceKind::CudaHost, 0).is_host());
    assert!(!Device::cuda(0).is_host());
}

#[test]
fn device_and_dtype_serialize_as_strings() {
    let json = serde_json::to_string(&(Device::cuda(0), DataType::F16)).unwrap();
    assert_eq!(json, r#"["cuda:0","float16"]"#);
    let (device, dtype): (Device, DataType) = serde_json::from_str(&json).unwrap();
    assert_eq!(device, Device::cuda(0));
    assert_eq!(dtype, DataType::F16);
}

#[test]
fn scalar_values_compare_by_value() {
    assert_eq!(Value::from(3i64), Value::Int(3));
    assert_eq!(Value::from("abc"), Value::Str("abc".into()));
    assert_ne!(Value::Int(1), Value::Bool(true));
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
}

#[test]
fn arrays_compare_by_identity() {
    let a = HostArray::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
    let b = HostArray::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
    assert_eq!(Value::Array(a.clone()), Value::Array(a.clone()));
    assert_ne!(Value::Array(a), Value::Array(b));
}

#[test]
fn display_is_compact() {
    assert_eq!(Value::None.to_string(), "None");
    assert_eq!(Value::from("hi").to_string(), "\"hi\"");
    assert_eq!(Value::Shape(vec![2, 3]).to_string(), "Shape[2, 3]");
    assert_eq!(Value::DataType(DataType::F64).to_string(), "float64");
}
