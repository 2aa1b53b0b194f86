use super::layout::*;

fn gather_f32(data: &[f32], shape: &[i64], strides: &[i64], threshold: usize) -> Vec<f32> {
    let mut out = vec![0f32; numel(shape)];
    let bytes = unsafe {
        std::slice::from_raw_parts_mut(out.as_mut_ptr() as *mut u8, out.len() * 4)
    };
    unsafe { strided_copy(data.as_ptr() as *const u8, shape, strides, 4, bytes, threshold) };
    out
}

#[test]
fn column_major_view_is_detected() {
    assert!(is_column_major(&[3, 4], &[1, 3]));
    assert!(!is_row_major(&[3, 4], &[1, 3]));
    assert_eq!(classify(&[3, 4], &[1, 3]), Layout::ColumnMajor);
}

#[test]
fn every_second_element_is_neither() {
    assert!(!is_row_major(&[4], &[2]));
    assert!(!is_column_major(&[4], &[2]));
    assert_eq!(classify(&[4], &[2]), Layout::Strided);
}

#[test]
fn singleton_dimensions_ignore_their_stride() {
    assert!(is_row_major(&[1, 5], &[99, 1]));
    assert!(is_row_major(&[3, 1], &[1, 7]));
    assert_eq!(classify(&[6], &[1]), Layout::RowMajor);
    assert_eq!(classify(&[0, 3], &[5, 9]), Layout::RowMajor);
}

#[test]
fn canonical_strides() {
    assert_eq!(row_major_strides(&[2, 3, 4]), vec![12, 4, 1]);
    assert_eq!(column_major_strides(&[2, 3, 4]), vec![1, 2, 6]);
    assert!(row_major_strides(&[]).is_empty());
}

#[test]
fn row_and_column_major_gather_to_the_same_matrix() {
    let row_major = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let column_major = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
    let expected = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    assert_eq!(gather_f32(&row_major, &[2, 3], &[3, 1], usize::MAX), expected);
    assert_eq!(gather_f32(&column_major, &[2, 3], &[1, 2], usize::MAX), expected);
}

#[test]
fn parallel_gather_matches_serial() {
    let data: Vec<f32> = (0..4 * 5 * 6).map(|i| i as f32).collect();
    // Transposed view of a (6, 5, 4) row-major buffer.
    let shape = [4, 5, 6];
    let strides = [1, 4, 20];
    let serial = gather_f32(&data, &shape, &strides, usize::MAX);
    let parallel = gather_f32(&data, &shape, &strides, 0);
    assert_eq!(serial, parallel);
    assert_eq!(serial[1], 20.0);
}

#[test]
fn negative_strides_walk_backwards() {
    let data = [1.0f32, 2.0, 3.0, 4.0];
    let reversed = unsafe {
        let mut out = vec![0f32; 4];
        let bytes = std::slice::from_raw_parts_mut(out.as_mut_ptr() as *mut u8, 16);
        strided_copy((data.as_ptr() as *const u8).add(12), &[4], &[-1], 4, bytes, usize::MAX);
        out
    };
    assert_eq!(reversed, vec![4.0, 3.0, 2.0, 1.0]);
    assert_eq!(offset_bounds(&[4], &[-1]).unwrap(), Some((-3, 0)));
}

#[test]
fn scalar_and_empty_views() {
    assert_eq!(gather_f32(&[7.5], &[], &[], usize::MAX), vec![7.5]);
    assert!(gather_f32(&[], &[0, 3], &[3, 1], usize::MAX).is_empty());
    assert_eq!(offset_bounds(&[0, 3], &[3, 1]).unwrap(), None);
    assert_eq!(offset_bounds(&[2, 3], &[1, 2]).unwrap(), Some((0, 5)));
}

#[test]
fn huge_strides_are_reported_not_wrapped() {
    assert!(offset_bounds(&[3], &[i64::MAX]).is_err());
    assert!(offset_bounds(&[2, 2], &[i64::MAX, i64::MAX]).is_err());
    assert!(offset_bounds(&[2], &[i64::MIN]).is_err());
    // A single element never moves, whatever its stride.
    assert_eq!(offset_bounds(&[1], &[i64::MAX]).unwrap(), Some((0, 0)));
}

#[test]
fn element_counts_past_usize_are_detected() {
    assert_eq!(checked_numel(&[2, 3]), Some(6));
    assert_eq!(checked_numel(&[]), Some(1));
    assert_eq!(checked_numel(&[i64::MAX, 0]), Some(0));
    assert_eq!(checked_numel(&[i64::MAX, i64::MAX]), None);
    assert_eq!(numel(&[i64::MAX, i64::MAX]), usize::MAX);
}
