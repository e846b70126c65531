use strided_dtype::{AssignErrorMode, DTypeError, IndexRange, NdType, NdValue};

fn type_of(v: &NdValue) -> Option<NdType> {
    v.as_type().unwrap()
}

#[test]
fn test_scalar_type_value() {
    let stored = NdType::strided_dim(NdType::of::<i32>()).unwrap();
    let mut v = NdValue::empty(&NdType::type_type()).unwrap();
    assert_eq!(type_of(&v), None);
    assert_eq!(stored.use_count(), Some(1));

    v.assign(&NdValue::from_type(&stored), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.use_count(), Some(2));
    assert_eq!(type_of(&v), Some(stored.clone()));

    v.assign(&NdValue::from_type(&NdType::of::<f64>()), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.use_count(), Some(1));
    assert_eq!(type_of(&v), Some(NdType::of::<f64>()));

    v.assign(&NdValue::from_type(&stored), AssignErrorMode::default())
        .unwrap();
    drop(v);
    assert_eq!(stored.use_count(), Some(1));
}

#[test]
fn test_strided_array_of_types() {
    let stored = NdType::string();
    let tp = NdType::strided_dim(NdType::type_type()).unwrap();
    let mut v = NdValue::empty_with_shape(&tp, &[3]).unwrap();
    v.assign(&NdValue::from_type(&stored), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.use_count(), Some(4));

    v.assign_at(
        &[IndexRange::index(1)],
        &NdValue::from_type(&NdType::of::<u8>()),
        AssignErrorMode::default(),
    )
    .unwrap();
    assert_eq!(stored.use_count(), Some(3));
    let middle = v.index(&[IndexRange::index(1)]).unwrap();
    assert_eq!(type_of(&middle), Some(NdType::of::<u8>()));

    let copy = v.try_clone().unwrap();
    assert_eq!(stored.use_count(), Some(5));
    assert!(copy.all_equal(&v).unwrap());
    drop(v);
    assert_eq!(stored.use_count(), Some(3));
    drop(copy);
    assert_eq!(stored.use_count(), Some(1));
}

#[test]
fn test_fixed_array_of_types() {
    let a = NdType::fixed_dim(2, NdType::of::<i16>()).unwrap();
    let b = NdType::var_dim(NdType::of::<f32>()).unwrap();
    let tp = NdType::fixed_dim(2, NdType::type_type()).unwrap();
    let mut v = NdValue::empty(&tp).unwrap();
    v.assign_at(&[IndexRange::index(0)], &NdValue::from_type(&a), AssignErrorMode::default())
        .unwrap();
    v.assign_at(&[IndexRange::index(1)], &NdValue::from_type(&b), AssignErrorMode::default())
        .unwrap();
    assert_eq!(a.use_count(), Some(2));
    assert_eq!(b.use_count(), Some(2));

    let second = v.index(&[IndexRange::index(1)]).unwrap();
    assert_eq!(type_of(&second), Some(b.clone()));
    assert_eq!(b.use_count(), Some(3));
    drop(second);

    // Overwriting the whole array releases both old descriptors.
    v.assign(&NdValue::from_type(&NdType::of::<bool>()), AssignErrorMode::default())
        .unwrap();
    assert_eq!(a.use_count(), Some(1));
    assert_eq!(b.use_count(), Some(1));
}

#[test]
fn test_var_array_of_types() {
    let stored = NdType::tuple(vec![NdType::of::<i8>(), NdType::of::<i64>()]).unwrap();
    let fixed_tp = NdType::fixed_dim(2, NdType::type_type()).unwrap();
    let mut src = NdValue::empty(&fixed_tp).unwrap();
    src.assign(&NdValue::from_type(&stored), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.use_count(), Some(3));

    let mut var = NdValue::empty(&NdType::var_dim(NdType::type_type()).unwrap()).unwrap();
    var.assign(&src, AssignErrorMode::default()).unwrap();
    assert_eq!(var.shape(), vec![2]);
    assert_eq!(stored.use_count(), Some(5));
    drop(src);
    assert_eq!(stored.use_count(), Some(3));

    let back = var.cast(&fixed_tp, AssignErrorMode::default()).unwrap();
    let first = back.index(&[IndexRange::index(0)]).unwrap();
    assert_eq!(type_of(&first), Some(stored.clone()));
    drop(first);
    drop(back);
    assert_eq!(stored.use_count(), Some(3));

    // The var elements live in the value's memory block.
    drop(var);
    assert_eq!(stored.use_count(), Some(1));
}

#[test]
fn test_struct_with_type_field() {
    let stored = NdType::strided_dim(NdType::of::<u32>()).unwrap();
    let tp = NdType::struct_type(
        vec!["label".to_string(), "kind".to_string()],
        vec![NdType::string(), NdType::type_type()],
    )
    .unwrap();
    let mut v = NdValue::empty(&tp).unwrap();
    v.set_field("kind", &NdValue::from_type(&stored), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.use_count(), Some(2));

    let kind = v.field("kind").unwrap();
    assert_eq!(type_of(&kind), Some(stored.clone()));
    assert_eq!(stored.use_count(), Some(3));
    drop(kind);

    let copy = v.try_clone().unwrap();
    assert_eq!(stored.use_count(), Some(3));
    drop(v);
    drop(copy);
    assert_eq!(stored.use_count(), Some(1));
}

#[test]
fn test_type_value_formats_as_string() {
    let v = NdValue::from_type(&NdType::of::<i32>());
    let s = v.cast(&NdType::string(), AssignErrorMode::default()).unwrap();
    assert_eq!(s.as_str().unwrap(), "int32");

    let empty = NdValue::empty(&NdType::type_type()).unwrap();
    let err = empty
        .cast(&NdType::string(), AssignErrorMode::default())
        .unwrap_err();
    assert!(matches!(err, DTypeError::InvalidArgument(_)));

    let err = NdValue::from_scalar(1i32)
        .cast(&NdType::type_type(), AssignErrorMode::default())
        .unwrap_err();
    assert!(matches!(err, DTypeError::AssignmentNotSupported { .. }));
}
