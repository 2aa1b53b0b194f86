use super::{owned::alignment_requirement, *};
use crate::{error::FfiError, object::Tensor};

#[test]
fn tensor_pins_host_array_until_dropped() {
    let array = HostArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    let before = array.ref_count();

    let tensor = tensor_from_host_array(&array).unwrap();
    assert_eq!(array.ref_count(), before + 1);
    assert_eq!(tensor.shape(), &[2, 2]);
    assert_eq!(tensor.dltensor().data, array.data_ptr());
    assert_eq!(tensor.type_key().unwrap(), "ffi.Tensor");

    drop(tensor);
    assert_eq!(array.ref_count(), before);
}

#[test]
fn wrapped_tensor_round_trips_to_same_handle() {
    let array = HostArray::from_vec(vec![7i32, 8, 9], &[3]).unwrap();
    let tensor = Tensor::from_host_array(&array).unwrap();

    let wrapped = tensor.to_host_array().unwrap();
    assert!(wrapped.is_borrowed());
    assert_eq!(wrapped.data_ptr(), array.data_ptr());
    assert_eq!(wrapped.to_vec::<i32>().unwrap(), vec![7, 8, 9]);

    let again = tensor_from_host_array(&wrapped).unwrap();
    assert!(again.ptr_eq(&tensor));
}

#[test]
fn strided_export_keeps_strides() {
    let base = HostArray::from_vec((0..6).map(|v| v as f64).collect(), &[6]).unwrap();
    let odd = base.strided_view(&[3], &[2], 1).unwrap();
    let tensor = tensor_from_host_array(&odd).unwrap();

    let view = tensor.view().unwrap();
    assert_eq!(view.strides(), &[2]);
    assert_eq!(view.byte_offset(), 8);
    assert_eq!(view.layout(), Layout::Strided);

    let copied = tensor.to_host_array().unwrap();
    assert!(!copied.is_borrowed());
    assert_eq!(copied.to_vec::<f64>().unwrap(), vec![1.0, 3.0, 5.0]);
}

#[test]
fn dlpack_capsule_holds_one_reference() {
    let array = HostArray::from_vec(vec![1u8, 2, 3], &[3]).unwrap();
    let tensor = tensor_from_host_array(&array).unwrap();
    let before = tensor.strong_count();

    let capsule = tensor.export_dlpack().unwrap();
    assert_eq!(tensor.strong_count(), before + 1);
    assert_eq!(capsule.dltensor().data, array.data_ptr());

    drop(capsule);
    assert_eq!(tensor.strong_count(), before);
}

#[test]
fn dlpack_import_shares_memory() {
    let array = HostArray::from_vec(vec![1.5f32, 2.5], &[2]).unwrap();
    let tensor = tensor_from_host_array(&array).unwrap();
    let before = tensor.strong_count();

    let raw = tensor.export_dlpack().unwrap().into_raw();
    let capsule = unsafe { DlpackCapsule::from_raw(raw) }.unwrap();
    let imported = Tensor::from_dlpack(capsule).unwrap();
    assert!(!imported.ptr_eq(&tensor));
    assert_eq!(imported.dltensor().data, array.data_ptr());
    assert_eq!(imported.dtype(), crate::value::DataType::F32);
    assert_eq!(tensor.strong_count(), before + 1);

    drop(imported);
    assert_eq!(tensor.strong_count(), before);
}

#[test]
fn alignment_requirements_must_fit_the_native_import() {
    assert_eq!(alignment_requirement(0).unwrap(), 0);
    assert_eq!(alignment_requirement(64).unwrap(), 64);
    let err = alignment_requirement(1 << 40).unwrap_err();
    assert!(matches!(err, FfiError::InvalidArgument(_)));
    assert!(err.to_string().contains("1099511627776"));
}
