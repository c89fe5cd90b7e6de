use clap::Parser;

use super::*;
use crate::golden::GenerationRecord;
use crate::tensor::Tensor;

// -------------------------------------------------------------------------
// Argument Parsing
// -------------------------------------------------------------------------

#[test]
fn test_parse_attention_overrides() {
    let cli = Cli::try_parse_from([
        "comprobar",
        "attention",
        "--seed",
        "7",
        "--seq-len",
        "4",
        "--mask-value",
        "-1e9",
    ])
    .unwrap();
    let Commands::Attention { overrides, .. } = cli.command else {
        panic!("expected attention command");
    };
    let case = overrides.apply(AttentionCaseConfig::default());
    assert_eq!(case.seed, 7);
    assert_eq!(case.seq_len, 4);
    assert_eq!(case.mask_value, -1e9);
    assert_eq!(case.embed_dim, 64);
}

#[test]
fn test_parse_verify_attention_defaults() {
    let cli = Cli::try_parse_from(["comprobar", "-v", "verify-attention", "a.safetensors"]).unwrap();
    assert!(cli.verbose);
    match cli.command {
        Commands::VerifyAttention {
            bundle,
            num_heads,
            tolerance,
        } => {
            assert_eq!(bundle, PathBuf::from("a.safetensors"));
            assert_eq!(num_heads, None);
            assert_eq!(tolerance, DEFAULT_TOLERANCE);
        },
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_parse_rejects_unknown_command() {
    assert!(Cli::try_parse_from(["comprobar", "serve"]).is_err());
}

#[test]
fn test_empty_overrides_are_identity() {
    let case = AttentionCaseConfig::default();
    assert_eq!(AttentionOverrides::default().apply(case.clone()), case);
}

// -------------------------------------------------------------------------
// Handlers
// -------------------------------------------------------------------------

#[test]
fn test_attention_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.safetensors");
    let overrides = AttentionOverrides {
        seq_len: Some(3),
        embed_dim: Some(8),
        num_heads: Some(2),
        ..AttentionOverrides::default()
    };
    run_attention(None, Some(&path), &overrides).unwrap();
    assert!(path.exists());
    run_verify_attention(&path, None, DEFAULT_TOLERANCE).unwrap();
}

#[test]
fn test_verify_attention_tampered_output_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tampered.safetensors");
    let case = AttentionCaseConfig::default()
        .with_seq_len(3)
        .with_embed_dim(8)
        .with_num_heads(2);
    let generator = AttentionVectorGenerator::new(case).unwrap();
    let mut golden = generator.generate().unwrap();
    let mut data = golden.output.data().to_vec();
    data[0] += 1.0;
    golden.output = Tensor::from_vec(golden.output.shape().to_vec(), data).unwrap();
    generator.bundle(&golden).unwrap().write(&path).unwrap();

    assert!(matches!(
        run_verify_attention(&path, None, DEFAULT_TOLERANCE).unwrap_err(),
        ComprobarError::VerificationFailed { .. }
    ));
}

#[test]
fn test_verify_attention_rejects_negative_tolerance() {
    assert!(matches!(
        run_verify_attention(Path::new("unused"), None, -1.0).unwrap_err(),
        ComprobarError::InvalidConfiguration { .. }
    ));
}

#[test]
fn test_verify_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let golden = dir.path().join("golden.json");
    let candidate = dir.path().join("candidate.json");
    let record = |response: &str| GenerationRecord {
        prompt: "p".to_string(),
        response: response.to_string(),
    };

    GenerationCorpus::new(vec![record("p q")]).write(&golden).unwrap();
    GenerationCorpus::new(vec![record("p q")]).write(&candidate).unwrap();
    run_verify_corpus(&golden, &candidate).unwrap();

    GenerationCorpus::new(vec![record("p r")]).write(&candidate).unwrap();
    assert!(matches!(
        run_verify_corpus(&golden, &candidate).unwrap_err(),
        ComprobarError::VerificationFailed { .. }
    ));
}

#[test]
fn test_load_config_defaults_without_file() {
    assert_eq!(load_config(None).unwrap(), HarnessConfig::default());
}

// -------------------------------------------------------------------------
// Rendering
// -------------------------------------------------------------------------

#[test]
fn test_render_bundle() {
    let mut bundle = TensorBundle::new();
    bundle
        .insert("b", &Tensor::from_vec(vec![2, 2], vec![1.0f32; 4]).unwrap())
        .unwrap();
    bundle
        .insert("a", &Tensor::from_vec(vec![3], vec![1i64, 2, 3]).unwrap())
        .unwrap();
    bundle.set_metadata("seed", "42");

    let text = render_bundle(&bundle);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "2 tensors, 40 B");
    assert_eq!(lines[1], "  a  I64  [3]  24 B");
    assert_eq!(lines[2], "  b  F32  [2, 2]  16 B");
    assert_eq!(lines[3], "metadata:");
    assert_eq!(lines[4], "  seed = 42");
}

#[test]
fn test_format_size() {
    assert_eq!(format_size(0), "0 B");
    assert_eq!(format_size(1023), "1023 B");
    assert_eq!(format_size(1536), "1.5 KB");
    assert_eq!(format_size(10 * 1024 * 1024), "10.0 MB");
}
