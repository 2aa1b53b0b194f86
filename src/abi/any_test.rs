use super::*;
use crate::{
    error::FfiError,
    value::{DataType, Device},
};

#[test]
fn layouts_match_the_native_side() {
    assert_eq!(std::mem::size_of::<RawAny>(), 16);
    assert_eq!(std::mem::size_of::<ObjectHeader>(), 24);
    assert_eq!(CELL_OFFSET, 24);
    assert_eq!(std::mem::size_of::<DLDevice>(), 8);
    assert_eq!(std::mem::size_of::<DLDataType>(), 4);
}

#[test]
fn pod_values_survive_the_payload() {
    for value in [0i64, 1, -1, i64::MIN, i64::MAX, 1 << 53] {
        assert_eq!(RawAny::int(value).as_i64(), value);
    }
    for value in [0.0f64, -0.0, 1.5, f64::INFINITY, f64::MIN_POSITIVE] {
        assert_eq!(RawAny::float(value).as_f64().to_bits(), value.to_bits());
    }
    assert!(RawAny::float(f64::NAN).as_f64().is_nan());
    assert_eq!(RawAny::bool(true).as_i64(), 1);
    assert_eq!(RawAny::bool(false).as_i64(), 0);

    let device = Device::cuda(3);
    assert_eq!(Device::from_dl(RawAny::device(device.to_dl()).as_device()), device);
    let dtype: DataType = "float16x4".parse().unwrap();
    assert_eq!(DataType::from_dl(RawAny::dtype(dtype.to_dl()).as_dtype()), dtype);
}

#[test]
fn small_strings_pack_inline() {
    let packed = RawAny::small_str("hello").unwrap();
    assert_eq!(packed.type_index, type_index::SMALL_STR);
    assert_eq!(packed.small_len, 5);
    assert_eq!(packed.inline_bytes(), b"hello");

    let empty = RawAny::small_str("").unwrap();
    assert_eq!(empty.inline_bytes(), b"");

    assert!(RawAny::small_str("seven!!").is_some());
    assert!(RawAny::small_str("eight!!!").is_none());
    assert!(RawAny::small_bytes(&[0u8; SMALL_PAYLOAD_CAPACITY + 1]).is_none());
    assert_eq!(RawAny::small_bytes(&[0, 255]).unwrap().inline_bytes(), &[0, 255]);
}

#[test]
fn tags_map_both_ways() {
    let pairs = [
        (type_index::NONE, AnyTag::None),
        (type_index::DLTENSOR_PTR, AnyTag::DLTensorPtr),
        (type_index::SMALL_BYTES, AnyTag::SmallBytes),
        (type_index::STR, AnyTag::Object(HeapKind::Str)),
        (type_index::TENSOR, AnyTag::Object(HeapKind::Tensor)),
        (200, AnyTag::Object(HeapKind::Other(200))),
    ];
    for (index, tag) in pairs {
        assert_eq!(AnyTag::from_type_index(index).unwrap(), tag);
        assert_eq!(tag.type_index(), index);
    }
    assert!(AnyTag::Object(HeapKind::Module).is_object());
    assert!(!AnyTag::SmallStr.is_object());
}

#[test]
fn reserved_indices_are_rejected() {
    for index in [13, 40, 63, -1] {
        assert!(matches!(
            AnyTag::from_type_index(index),
            Err(FfiError::UnsupportedType { type_index }) if type_index == index
        ));
    }
}

#[test]
fn pointers_keep_their_address() {
    let mut slot = 0u32;
    let ptr = &mut slot as *mut u32;
    let raw = RawAny::opaque_ptr(ptr.cast());
    assert_eq!(raw.as_ptr::<u32>(), ptr);
    assert!(!raw.is_object());
    assert!(RawAny::object(type_index::FUNCTION, std::ptr::null_mut()).is_object());
}

#[test]
fn debug_shows_tag_and_payload() {
    insta::assert_snapshot!(format!("{:?}", RawAny::int(42)), @"RawAny(Int, 0x000000000000002a)");
    insta::assert_snapshot!(format!("{:?}", RawAny { type_index: 20, small_len: 0, payload: 1 }), @"RawAny(#20, 0x0000000000000001)");
}
