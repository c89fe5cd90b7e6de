use super::*;

fn sample_bundle() -> TensorBundle {
    let mut bundle = TensorBundle::new();
    bundle
        .insert(
            "c_proj.weight",
            &Tensor::from_vec(vec![2, 2], vec![1.0f32, -2.0, 3.5, 0.25]).unwrap(),
        )
        .unwrap();
    bundle
        .insert(
            "attention_mask",
            &Tensor::from_vec(vec![1, 1, 1, 3], vec![0.0f32, 0.0, -10000.0]).unwrap(),
        )
        .unwrap();
    bundle
        .insert("positions", &Tensor::from_vec(vec![3], vec![0i64, 1, 2]).unwrap())
        .unwrap();
    bundle.set_metadata("weight_layout", "out_features,in_features");
    bundle
}

#[test]
fn test_round_trip_preserves_tensors_and_metadata() {
    let bundle = sample_bundle();
    let bytes = bundle.to_bytes().unwrap();
    let parsed = TensorBundle::from_bytes(&bytes).unwrap();

    assert_eq!(parsed, bundle);
    let mask: Tensor<f32> = parsed.get("attention_mask").unwrap();
    assert_eq!(mask.shape(), &[1, 1, 1, 3]);
    assert_eq!(mask.data(), &[0.0, 0.0, -10000.0]);
    let positions: Tensor<i64> = parsed.get("positions").unwrap();
    assert_eq!(positions.data(), &[0, 1, 2]);
    assert_eq!(
        parsed.metadata_value("weight_layout"),
        Some("out_features,in_features")
    );
}

#[test]
fn test_serialization_is_stable() {
    // Insertion order must not leak into the bytes.
    let a = sample_bundle();
    let mut b = TensorBundle::new();
    b.set_metadata("weight_layout", "out_features,in_features");
    for name in ["positions", "attention_mask", "c_proj.weight"] {
        let entry = a.entry(name).unwrap();
        match entry.dtype {
            Dtype::F32 => b.insert(name, &a.get::<f32>(name).unwrap()).unwrap(),
            Dtype::I64 => b.insert(name, &a.get::<i64>(name).unwrap()).unwrap(),
            Dtype::F64 => unreachable!(),
        }
    }
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}

#[test]
fn test_keys_are_sorted() {
    let bundle = sample_bundle();
    let keys: Vec<&str> = bundle.keys().collect();
    assert_eq!(keys, vec!["attention_mask", "c_proj.weight", "positions"]);
}

#[test]
fn test_header_layout() {
    let bytes = sample_bundle().to_bytes().unwrap();
    let header_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    assert_eq!(header_len % 8, 0);
    let header: serde_json::Value = serde_json::from_slice(&bytes[8..8 + header_len]).unwrap();
    assert_eq!(header["c_proj.weight"]["dtype"], "F32");
    assert_eq!(header["c_proj.weight"]["shape"], serde_json::json!([2, 2]));
    assert_eq!(header["attention_mask"]["data_offsets"], serde_json::json!([0, 12]));
    assert_eq!(
        header[METADATA_KEY]["weight_layout"],
        "out_features,in_features"
    );
    // 12 (mask) + 16 (weight) + 24 (positions)
    assert_eq!(bytes.len(), 8 + header_len + 52);
}

#[test]
fn test_data_is_little_endian() {
    let mut bundle = TensorBundle::new();
    bundle
        .insert("x", &Tensor::from_vec(vec![1], vec![1.0f32]).unwrap())
        .unwrap();
    let bytes = bundle.to_bytes().unwrap();
    assert_eq!(&bytes[bytes.len() - 4..], &1.0f32.to_le_bytes());
}

#[test]
fn test_duplicate_key_rejected() {
    let mut bundle = sample_bundle();
    let err = bundle
        .insert("positions", &Tensor::from_vec(vec![1], vec![5i64]).unwrap())
        .unwrap_err();
    assert!(matches!(err, ComprobarError::SerializationError { .. }));
}

#[test]
fn test_reserved_key_rejected() {
    let mut bundle = TensorBundle::new();
    let err = bundle
        .insert(METADATA_KEY, &Tensor::from_vec(vec![1], vec![0.0f32]).unwrap())
        .unwrap_err();
    assert!(matches!(err, ComprobarError::SerializationError { .. }));
}

#[test]
fn test_get_missing_and_wrong_dtype() {
    let bundle = sample_bundle();
    assert!(matches!(
        bundle.get::<f32>("output").unwrap_err(),
        ComprobarError::TensorNotFound { .. }
    ));
    assert!(matches!(
        bundle.get::<f32>("positions").unwrap_err(),
        ComprobarError::DtypeMismatch { .. }
    ));
}

#[test]
fn test_empty_bundle_round_trip() {
    let bundle = TensorBundle::new();
    let parsed = TensorBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();
    assert!(parsed.is_empty());
    assert!(parsed.metadata().is_empty());
}

#[test]
fn test_truncated_input_rejected() {
    assert!(matches!(
        TensorBundle::from_bytes(&[1, 2, 3]).unwrap_err(),
        ComprobarError::FormatError { .. }
    ));

    let bytes = sample_bundle().to_bytes().unwrap();
    assert!(TensorBundle::from_bytes(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_header_length_out_of_range() {
    let mut bytes = u64::MAX.to_le_bytes().to_vec();
    bytes.extend_from_slice(b"{}");
    assert!(matches!(
        TensorBundle::from_bytes(&bytes).unwrap_err(),
        ComprobarError::FormatError { .. }
    ));
}

fn raw_bundle(header: &str, payload: &[u8]) -> Vec<u8> {
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn test_offsets_must_match_shape() {
    let header = r#"{"x":{"dtype":"F32","shape":[2],"data_offsets":[0,4]}}"#;
    let err = TensorBundle::from_bytes(&raw_bundle(header, &[0; 4])).unwrap_err();
    assert!(matches!(err, ComprobarError::FormatError { .. }));
}

#[test]
fn test_oversized_shape_is_format_error() {
    let header = r#"{"x":{"dtype":"F32","shape":[4611686018427387904,8],"data_offsets":[0,0]}}"#;
    let err = TensorBundle::from_bytes(&raw_bundle(header, &[])).unwrap_err();
    assert!(matches!(err, ComprobarError::FormatError { .. }));
    assert!(err.to_string().contains("overflows"));
}

#[test]
fn test_gap_between_tensors_rejected() {
    let header = r#"{"a":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"b":{"dtype":"F32","shape":[1],"data_offsets":[8,12]}}"#;
    let err = TensorBundle::from_bytes(&raw_bundle(header, &[0; 12])).unwrap_err();
    assert!(err.to_string().contains("gap or overlap"));
}

#[test]
fn test_trailing_bytes_rejected() {
    let header = r#"{"a":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#;
    let err = TensorBundle::from_bytes(&raw_bundle(header, &[0; 8])).unwrap_err();
    assert!(err.to_string().contains("trailing"));
}

#[test]
fn test_unknown_dtype_rejected() {
    let header = r#"{"a":{"dtype":"F16","shape":[1],"data_offsets":[0,2]}}"#;
    let err = TensorBundle::from_bytes(&raw_bundle(header, &[0; 2])).unwrap_err();
    assert!(matches!(err, ComprobarError::FormatError { .. }));
}

#[test]
fn test_f64_entry_is_listed_but_not_decoded() {
    let header = r#"{"x":{"dtype":"F64","shape":[2],"data_offsets":[0,16]}}"#;
    let bundle = TensorBundle::from_bytes(&raw_bundle(header, &[0; 16])).unwrap();
    let entry = bundle.entry("x").unwrap();
    assert_eq!(entry.dtype, Dtype::F64);
    assert_eq!(entry.bytes().len(), 16);
    assert!(matches!(
        bundle.get::<f32>("x").unwrap_err(),
        ComprobarError::DtypeMismatch { .. }
    ));
}

#[test]
fn test_write_and_read_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("golden.safetensors");
    let bundle = sample_bundle();
    bundle.write(&path).unwrap();

    let loaded = TensorBundle::read(&path).unwrap();
    assert_eq!(loaded, bundle);

    // Only the final file remains; the temporary was renamed, not copied.
    let names: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("golden.safetensors")]);
}

#[test]
fn test_write_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("golden.safetensors");
    fs::write(&path, b"stale").unwrap();
    sample_bundle().write(&path).unwrap();
    assert_eq!(TensorBundle::read(&path).unwrap(), sample_bundle());
}

#[test]
fn test_read_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = TensorBundle::read(dir.path().join("absent.safetensors")).unwrap_err();
    assert!(matches!(err, ComprobarError::IoError { .. }));
}
