use approx::assert_relative_eq;
use strided_dtype::{
    is_lossless_assignment, make_comparison, make_kernel, struct_concat, Arrmeta, AssignErrorMode,
    ComparisonType, DTypeError, DateUnit, EvalContext, IndexRange, NdType, NdValue, TypeId,
    TypeVarMap,
};

fn int32() -> NdType {
    NdType::builtin(TypeId::Int32)
}

fn fill_i32(v: &mut NdValue, values: &[i32]) {
    let bytes: Vec<u8> = values.iter().flat_map(|x| x.to_ne_bytes()).collect();
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), v.data_ptr_mut(), bytes.len()) };
}

fn read_i32(v: &NdValue, n: usize) -> Vec<i32> {
    v.data()[..4 * n]
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn test_builtin_identity_roundtrip() {
    for id in TypeId::BUILTINS {
        let tp = NdType::builtin(id);
        let kernel =
            make_kernel(&tp, &[], &tp, &[], AssignErrorMode::None, &EvalContext::default())
                .unwrap();
        let src = [0x5Au8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 1, 2, 3, 4, 5, 6, 7, 8];
        let size = tp.data_size();
        let mut dst = [0u8; 16];
        // Use a valid bool.
        let src: Vec<u8> = if id == TypeId::Bool { vec![1] } else { src[..size].to_vec() };
        unsafe { kernel.single(dst.as_mut_ptr(), &[src.as_ptr()]).unwrap() };
        assert_eq!(&dst[..size], &src[..], "{tp}");
    }
}

#[test]
fn test_int32_to_int8_overflow() {
    let v = NdValue::from_scalar(300i32);
    let i8_tp = NdType::of::<i8>();
    let err = v.cast(&i8_tp, AssignErrorMode::Overflow).unwrap_err();
    assert!(matches!(err, DTypeError::Overflow { .. }));
    assert_eq!(
        err.to_string(),
        "overflow while assigning int32 value 300 to int8"
    );
    let wrapped = v.cast(&i8_tp, AssignErrorMode::None).unwrap();
    assert_eq!(wrapped.as_scalar::<i8>().unwrap(), 44);
}

#[test]
fn test_fractional_mode() {
    let i8_tp = NdType::of::<i8>();
    let ok = NdValue::from_scalar(3i32)
        .cast(&i8_tp, AssignErrorMode::Fractional)
        .unwrap();
    assert_eq!(ok.as_scalar::<i8>().unwrap(), 3);

    let whole = NdValue::from_scalar(3.0f64)
        .cast(&i8_tp, AssignErrorMode::Fractional)
        .unwrap();
    assert_eq!(whole.as_scalar::<i8>().unwrap(), 3);

    let err = NdValue::from_scalar(3.5f64)
        .cast(&i8_tp, AssignErrorMode::Fractional)
        .unwrap_err();
    assert!(matches!(err, DTypeError::Fractional { .. }));

    let truncated = NdValue::from_scalar(3.5f64)
        .cast(&i8_tp, AssignErrorMode::Overflow)
        .unwrap();
    assert_eq!(truncated.as_scalar::<i8>().unwrap(), 3);
}

#[test]
fn test_inexact_float_narrowing() {
    let f32_tp = NdType::of::<f32>();
    let exact = NdValue::from_scalar(3.5f64)
        .cast(&f32_tp, AssignErrorMode::Inexact)
        .unwrap();
    assert_relative_eq!(exact.as_scalar::<f32>().unwrap(), 3.5f32);

    let err = NdValue::from_scalar(0.1f64)
        .cast(&f32_tp, AssignErrorMode::Inexact)
        .unwrap_err();
    assert!(matches!(err, DTypeError::Inexact { .. }));

    let rounded = NdValue::from_scalar(0.1f64)
        .cast(&f32_tp, AssignErrorMode::Fractional)
        .unwrap();
    assert_relative_eq!(rounded.as_scalar::<f32>().unwrap(), 0.1f32, epsilon = 1e-7);
}

#[test]
fn test_lossless_pairs_ignore_errmode() {
    let pairs = [
        (TypeId::Int64, TypeId::Int32),
        (TypeId::Float64, TypeId::Float32),
        (TypeId::Float64, TypeId::Int32),
        (TypeId::ComplexFloat64, TypeId::Float64),
    ];
    for (d, s) in pairs {
        let (dst, src) = (NdType::builtin(d), NdType::builtin(s));
        assert!(is_lossless_assignment(&dst, &src), "{dst} <- {src}");
        let value = NdValue::from_scalar(-17i32).cast(&src, AssignErrorMode::None).unwrap();
        let baseline = value.cast(&dst, AssignErrorMode::None).unwrap();
        for mode in AssignErrorMode::ALL {
            let out = value.cast(&dst, mode).unwrap();
            assert_eq!(out.data(), baseline.data(), "{dst} <- {src} under {mode}");
        }
    }
}

#[test]
fn test_tuple_single_int32_layout() {
    let tp = NdType::tuple(vec![int32()]).unwrap();
    assert_eq!(tp.data_size(), 4);
    assert_eq!(tp.alignment(), 4);
    let t = tp.as_tuple().unwrap();
    assert_eq!(t.field_count(), 1);
    assert_eq!(t.data_offsets(), &[0]);
    assert!(t.is_standard_layout());

    let explicit = NdType::tuple_with_layout(vec![int32()], vec![0], 4, 4).unwrap();
    assert_eq!(explicit, tp);
}

#[test]
fn test_struct_lookup_and_matching() {
    let tp = NdType::struct_type(
        vec!["a".into(), "b".into()],
        vec![int32(), NdType::string()],
    )
    .unwrap();
    let st = tp.as_struct().unwrap();
    assert_eq!(st.field_index("a"), Some(0));
    assert_eq!(st.field_index("z"), None);

    let pattern = NdType::variadic_struct(
        vec!["a".into(), "b".into()],
        vec![int32(), NdType::string()],
    )
    .unwrap();
    let wider = NdType::struct_type(
        vec!["a".into(), "b".into(), "c".into()],
        vec![int32(), NdType::string(), NdType::of::<f32>()],
    )
    .unwrap();
    let wrong = NdType::struct_type(
        vec!["a".into(), "b".into()],
        vec![NdType::string(), NdType::string()],
    )
    .unwrap();
    assert!(pattern.matches(&wider, &mut TypeVarMap::new()));
    assert!(!pattern.matches(&wrong, &mut TypeVarMap::new()));
    assert!(!tp.matches(&wider, &mut TypeVarMap::new()));
}

#[test]
fn test_typevar_binding_is_consistent() {
    let t = NdType::typevar("T").unwrap();
    let pattern = NdType::tuple(vec![t.clone(), t]).unwrap();
    let same = NdType::tuple(vec![int32(), int32()]).unwrap();
    let mixed = NdType::tuple(vec![int32(), NdType::of::<f64>()]).unwrap();
    let mut tvars = TypeVarMap::new();
    assert!(pattern.matches(&same, &mut tvars));
    assert_eq!(tvars.get("T"), Some(&int32()));
    assert!(!pattern.matches(&mixed, &mut TypeVarMap::new()));
}

#[test]
fn test_struct_assignment_by_name() {
    let src_tp = NdType::struct_type(
        vec!["x".into(), "y".into()],
        vec![NdType::of::<i16>(), NdType::of::<f64>()],
    )
    .unwrap();
    let dst_tp = NdType::struct_type(
        vec!["y".into(), "x".into()],
        vec![NdType::of::<f32>(), NdType::of::<i64>()],
    )
    .unwrap();
    let mut src = NdValue::empty(&src_tp).unwrap();
    src.set_field("x", &NdValue::from_scalar(-5i16), AssignErrorMode::None)
        .unwrap();
    src.set_field("y", &NdValue::from_scalar(0.25f64), AssignErrorMode::None)
        .unwrap();

    let dst = src.cast(&dst_tp, AssignErrorMode::default()).unwrap();
    assert_eq!(dst.field("x").unwrap().as_scalar::<i64>().unwrap(), -5);
    assert_relative_eq!(dst.field("y").unwrap().as_scalar::<f32>().unwrap(), 0.25);
}

#[test]
fn test_struct_concat_identity_and_order() {
    let a_tp = NdType::struct_type(vec!["n".into()], vec![int32()]).unwrap();
    let b_tp = NdType::struct_type(
        vec!["label".into(), "w".into()],
        vec![NdType::string(), NdType::of::<f64>()],
    )
    .unwrap();
    let mut a = NdValue::empty(&a_tp).unwrap();
    a.set_field("n", &NdValue::from_scalar(7i32), AssignErrorMode::None)
        .unwrap();
    let mut b = NdValue::empty(&b_tp).unwrap();
    b.set_field("label", &"edge".parse().unwrap(), AssignErrorMode::None)
        .unwrap();
    b.set_field("w", &NdValue::from_scalar(1.5f64), AssignErrorMode::None)
        .unwrap();

    let left = struct_concat(None, Some(&b)).unwrap().unwrap();
    assert_eq!(left.tp(), b.tp());
    assert!(left.all_equal(&b).unwrap());

    let ab = struct_concat(Some(&a), Some(&b)).unwrap().unwrap();
    let st = ab.tp().as_struct().unwrap();
    assert_eq!(st.field_names(), &["n", "label", "w"]);
    assert_eq!(ab.field("n").unwrap().as_scalar::<i32>().unwrap(), 7);
    assert_eq!(ab.field("label").unwrap().as_str().unwrap(), "edge");
    assert_relative_eq!(ab.field("w").unwrap().as_scalar::<f64>().unwrap(), 1.5);
}

#[test]
fn test_view_of_view_roundtrip() {
    let outer = NdType::convert(NdType::of::<f64>(), int32(), AssignErrorMode::default()).unwrap();
    let inner = NdType::byteswap(int32()).unwrap();
    let tp = outer.with_replaced_storage_type(&inner).unwrap();
    assert_eq!(tp.storage_type(), NdType::fixed_bytes(4, 4).unwrap());
    assert_eq!(tp.value_type(), NdType::of::<f64>());

    let mut stored = NdValue::empty(&tp).unwrap();
    stored
        .assign(&NdValue::from_scalar(-1234.0f64), AssignErrorMode::default())
        .unwrap();
    assert_eq!(stored.data()[..4], (-1234i32).swap_bytes().to_ne_bytes());

    let back = stored.cast(&NdType::of::<f64>(), AssignErrorMode::default()).unwrap();
    assert_relative_eq!(back.as_scalar::<f64>().unwrap(), -1234.0);
}

#[test]
fn test_strided_broadcast_assignment() {
    let dst_tp = NdType::strided_dim(NdType::fixed_dim(3, int32()).unwrap()).unwrap();
    let mut dst = NdValue::empty_with_shape(&dst_tp, &[2, 3]).unwrap();
    let row_tp = NdType::fixed_dim(3, NdType::of::<i16>()).unwrap();
    let mut row = NdValue::empty(&row_tp).unwrap();
    let vals: Vec<u8> = [1i16, 2, 3].iter().flat_map(|x| x.to_ne_bytes()).collect();
    unsafe { std::ptr::copy_nonoverlapping(vals.as_ptr(), row.data_ptr_mut(), vals.len()) };

    dst.assign(&row, AssignErrorMode::default()).unwrap();
    assert_eq!(dst.shape(), vec![2, 3]);
    assert_eq!(read_i32(&dst, 6), vec![1, 2, 3, 1, 2, 3]);

    let bad_tp = NdType::fixed_dim(2, int32()).unwrap();
    let bad = NdValue::empty(&bad_tp).unwrap();
    let err = dst.assign(&bad, AssignErrorMode::default()).unwrap_err();
    assert!(matches!(err, DTypeError::Broadcast { .. }));
}

#[test]
fn test_var_dim_allocation() {
    let fixed_tp = NdType::fixed_dim(3, int32()).unwrap();
    let mut fixed = NdValue::empty(&fixed_tp).unwrap();
    fill_i32(&mut fixed, &[4, 5, 6]);

    let var_tp = NdType::var_dim(NdType::of::<i64>()).unwrap();
    let mut var = NdValue::empty(&var_tp).unwrap();
    assert_eq!(var.shape(), vec![0]);
    var.assign(&fixed, AssignErrorMode::default()).unwrap();
    assert_eq!(var.shape(), vec![3]);

    let back = var.cast(&fixed_tp, AssignErrorMode::default()).unwrap();
    assert_eq!(read_i32(&back, 3), vec![4, 5, 6]);
    assert!(back.all_equal(&fixed).unwrap());
}

#[test]
fn test_indexing_and_errors() {
    let tp = NdType::fixed_dim(2, NdType::fixed_dim(3, int32()).unwrap()).unwrap();
    let mut v = NdValue::empty(&tp).unwrap();
    fill_i32(&mut v, &[0, 1, 2, 10, 11, 12]);

    let col = v
        .index(&[IndexRange::all(), IndexRange::index(1)])
        .unwrap();
    assert_eq!(col.shape(), vec![2]);
    assert_eq!(read_i32(&col, 2), vec![1, 11]);

    let reversed = v
        .index(&[IndexRange::index(1), IndexRange::all().with_step(-1)])
        .unwrap();
    assert_eq!(read_i32(&reversed, 3), vec![12, 11, 10]);

    assert!(matches!(
        v.index(&[IndexRange::index(2)]),
        Err(DTypeError::IndexOutOfBounds { .. })
    ));
    assert!(matches!(
        tp.index(&[IndexRange::index(0), IndexRange::index(0), IndexRange::index(0)]),
        Err(DTypeError::TooManyIndices { .. })
    ));
}

#[test]
fn test_date_properties_and_comparison() {
    let day = NdType::date(DateUnit::Day);
    let month = NdType::date(DateUnit::Month);
    let d = day.as_date().unwrap();
    let mut a = NdValue::empty(&day).unwrap();
    let raw = d.encode(1999, 12, 31).unwrap();
    unsafe { std::ptr::copy_nonoverlapping(raw.to_ne_bytes().as_ptr(), a.data_ptr_mut(), 4) };

    assert_eq!(a.elwise_property("month").unwrap().as_scalar::<i32>().unwrap(), 12);
    let m = a.cast(&month, AssignErrorMode::default()).unwrap();
    assert!(matches!(
        m.elwise_property("day"),
        Err(DTypeError::UnknownProperty { .. })
    ));

    let kernel = make_comparison(&day, &[], &month, &[], ComparisonType::Less, &EvalContext::default());
    assert!(matches!(kernel, Err(DTypeError::NotComparable { .. })));
}

#[test]
fn test_string_comparison() {
    let s = NdType::string();
    let meta = Arrmeta::default_for(&s, &[]).unwrap();
    let kernel = make_comparison(
        &s,
        meta.as_bytes(),
        &s,
        meta.as_bytes(),
        ComparisonType::Less,
        &EvalContext::default(),
    )
    .unwrap();
    let a: NdValue = "apple".parse().unwrap();
    let b: NdValue = "apricot".parse().unwrap();
    let mut out = 0u8;
    unsafe { kernel.single(&mut out, &[a.data_ptr(), b.data_ptr()]).unwrap() };
    assert_eq!(out, 1);
    unsafe { kernel.single(&mut out, &[b.data_ptr(), a.data_ptr()]).unwrap() };
    assert_eq!(out, 0);
}

#[test]
fn test_struct_property_view() {
    let tp = NdType::struct_type(
        vec!["lo".into(), "hi".into()],
        vec![NdType::of::<u8>(), NdType::of::<u16>()],
    )
    .unwrap();
    let mut v = NdValue::empty(&tp).unwrap();
    v.set_field("hi", &NdValue::from_scalar(513u16), AssignErrorMode::None)
        .unwrap();
    let hi = v.elwise_property("hi").unwrap();
    assert_eq!(*hi.tp(), NdType::of::<u16>());
    assert_eq!(hi.as_scalar::<u16>().unwrap(), 513);
}

#[test]
fn test_unsupported_assignment_message() {
    let err = NdValue::from_scalar(1i32)
        .cast(&NdType::string(), AssignErrorMode::None)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "assignment from int32 to string is not supported"
    );
}
