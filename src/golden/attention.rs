//! Golden vectors for the GPT-2 attention sublayer
//!
//! The generator draws a module state and an input batch from a seeded RNG,
//! runs one causal self-attention forward pass and packs everything into a
//! [`TensorBundle`]:
//!
//! | key              | shape                          |
//! |------------------|--------------------------------|
//! | `hidden_states`  | `[batch, seq_len, embed_dim]`  |
//! | `attention_mask` | `[batch, 1, 1, seq_len]`       |
//! | `output`         | `[batch, seq_len, embed_dim]`  |
//! | `c_attn.weight`  | `[3 * embed_dim, embed_dim]`   |
//! | `c_attn.bias`    | `[3 * embed_dim]`              |
//! | `c_proj.weight`  | `[embed_dim, embed_dim]`       |
//! | `c_proj.bias`    | `[embed_dim]`                  |
//!
//! Weights are stored `(out_features, in_features)`. The bundle metadata says
//! so under `weight_layout`, next to the generating configuration.

use std::fmt;
use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{
    bundle::TensorBundle,
    config::AttentionCaseConfig,
    error::{ComprobarError, Result},
    layers::{
        layout::Conv1dParams, AttentionConfig, AttentionModuleState, CausalSelfAttention, Linear,
    },
    tensor::Tensor,
};

/// Bundle keys
pub mod keys {
    /// Input batch
    pub const HIDDEN_STATES: &str = "hidden_states";
    /// Additive attention mask
    pub const ATTENTION_MASK: &str = "attention_mask";
    /// Forward output
    pub const OUTPUT: &str = "output";
    /// Fused QKV weight
    pub const C_ATTN_WEIGHT: &str = "c_attn.weight";
    /// Fused QKV bias
    pub const C_ATTN_BIAS: &str = "c_attn.bias";
    /// Output projection weight
    pub const C_PROJ_WEIGHT: &str = "c_proj.weight";
    /// Output projection bias
    pub const C_PROJ_BIAS: &str = "c_proj.bias";
}

/// Value of the `weight_layout` metadata entry
pub const WEIGHT_LAYOUT: &str = "out_features,in_features";

/// Value of the `format_version` metadata entry
pub const FORMAT_VERSION: &str = "1";

/// Value of the `generator` metadata entry
pub const GENERATOR_NAME: &str = "comprobar.attention";

/// One complete golden attention case
#[derive(Debug, Clone)]
pub struct AttentionTestCase {
    /// `[batch, seq_len, embed_dim]`
    pub hidden_states: Tensor<f32>,
    /// `[batch, 1, 1, seq_len]`, additive
    pub attention_mask: Tensor<f32>,
    /// `[batch, seq_len, embed_dim]`
    pub output: Tensor<f32>,
    /// Canonical-orientation parameters
    pub state: AttentionModuleState,
}

impl AttentionTestCase {
    /// Pack the case into a bundle with the standard keys
    ///
    /// # Errors
    ///
    /// Returns error if a key collides (never for a well-formed case)
    pub fn to_bundle(&self) -> Result<TensorBundle> {
        let mut bundle = TensorBundle::new();
        bundle.insert(keys::HIDDEN_STATES, &self.hidden_states)?;
        bundle.insert(keys::ATTENTION_MASK, &self.attention_mask)?;
        bundle.insert(keys::OUTPUT, &self.output)?;
        bundle.insert(keys::C_ATTN_WEIGHT, self.state.c_attn().weight())?;
        bundle.insert(keys::C_ATTN_BIAS, self.state.c_attn().bias())?;
        bundle.insert(keys::C_PROJ_WEIGHT, self.state.c_proj().weight())?;
        bundle.insert(keys::C_PROJ_BIAS, self.state.c_proj().bias())?;
        bundle.set_metadata("format_version", FORMAT_VERSION);
        bundle.set_metadata("weight_layout", WEIGHT_LAYOUT);
        Ok(bundle)
    }

    /// Rebuild a case from a bundle
    ///
    /// The head count is not recoverable from tensor shapes; it comes from
    /// `num_heads` when given, otherwise from the `num_heads` metadata entry.
    ///
    /// # Errors
    ///
    /// Returns error if a key is missing, the layout is not canonical, the head
    /// count is unknown, or any tensor has the wrong shape
    pub fn from_bundle(
        bundle: &TensorBundle,
        num_heads: Option<usize>,
    ) -> Result<(Self, AttentionConfig)> {
        if let Some(layout) = bundle.metadata_value("weight_layout") {
            if layout != WEIGHT_LAYOUT {
                return Err(ComprobarError::FormatError {
                    reason: format!(
                        "Bundle weight_layout is '{layout}', expected '{WEIGHT_LAYOUT}'"
                    ),
                });
            }
        }

        let hidden_states: Tensor<f32> = bundle.get(keys::HIDDEN_STATES)?;
        hidden_states.expect_ndim(keys::HIDDEN_STATES, 3)?;
        let embed_dim = hidden_states.shape()[2];

        let num_heads = match num_heads {
            Some(n) => n,
            None => metadata_usize(bundle, "num_heads")?,
        };
        let config = AttentionConfig::new(embed_dim, num_heads)?;

        let c_attn = Linear::from_parts(
            bundle.get(keys::C_ATTN_WEIGHT)?,
            bundle.get(keys::C_ATTN_BIAS)?,
        )?;
        let c_proj = Linear::from_parts(
            bundle.get(keys::C_PROJ_WEIGHT)?,
            bundle.get(keys::C_PROJ_BIAS)?,
        )?;
        let state = AttentionModuleState::new(&config, c_attn, c_proj)?;

        let attention_mask: Tensor<f32> = bundle.get(keys::ATTENTION_MASK)?;
        let output: Tensor<f32> = bundle.get(keys::OUTPUT)?;
        output.expect_shape(keys::OUTPUT, hidden_states.shape())?;

        Ok((
            Self {
                hidden_states,
                attention_mask,
                output,
                state,
            },
            config,
        ))
    }
}

fn metadata_usize(bundle: &TensorBundle, key: &str) -> Result<usize> {
    let raw = bundle
        .metadata_value(key)
        .ok_or_else(|| ComprobarError::FormatError {
            reason: format!("Bundle metadata has no '{key}' entry and none was supplied"),
        })?;
    raw.parse().map_err(|_| ComprobarError::FormatError {
        reason: format!("Bundle metadata '{key}' is not an integer: '{raw}'"),
    })
}

/// Additive mask that suppresses the last position of every sequence
///
/// Shape `[batch, 1, 1, seq_len]`; `0.0` everywhere except `mask_value` at
/// index `seq_len - 1`.
///
/// # Errors
///
/// Returns error if `batch` or `seq_len` is zero
pub fn last_position_mask(batch: usize, seq_len: usize, mask_value: f32) -> Result<Tensor<f32>> {
    let mut mask = vec![0.0; batch * seq_len];
    for row in mask.chunks_exact_mut(seq_len.max(1)) {
        if let Some(last) = row.last_mut() {
            *last = mask_value;
        }
    }
    Tensor::from_vec(vec![batch, 1, 1, seq_len], mask)
}

/// Produces golden attention cases from a seeded RNG
#[derive(Debug, Clone)]
pub struct AttentionVectorGenerator {
    case: AttentionCaseConfig,
    geometry: AttentionConfig,
}

impl AttentionVectorGenerator {
    /// Validate the configuration up front
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidConfiguration`] for an unusable config
    pub fn new(case: AttentionCaseConfig) -> Result<Self> {
        let geometry = case.validate()?;
        Ok(Self { case, geometry })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &AttentionCaseConfig {
        &self.case
    }

    /// Draw parameters and inputs, then run the forward pass
    ///
    /// Draw order is fixed: `c_attn` weight, `c_attn` bias, `c_proj` weight,
    /// `c_proj` bias, `hidden_states`. Weights and biases are
    /// `N(0, init_std)` in Conv1D orientation and are exported to canonical
    /// orientation before use; hidden states are `N(0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns error if the forward pass rejects a shape
    pub fn generate(&self) -> Result<AttentionTestCase> {
        let AttentionCaseConfig {
            batch_size,
            seq_len,
            embed_dim,
            seed,
            mask_value,
            init_std,
            ..
        } = self.case;
        let mut rng = StdRng::seed_from_u64(seed);

        let c_attn = Conv1dParams::new(
            normal_tensor(&mut rng, vec![embed_dim, 3 * embed_dim], init_std)?,
            normal_tensor(&mut rng, vec![3 * embed_dim], init_std)?,
        )?;
        let c_proj = Conv1dParams::new(
            normal_tensor(&mut rng, vec![embed_dim, embed_dim], init_std)?,
            normal_tensor(&mut rng, vec![embed_dim], init_std)?,
        )?;
        let hidden_states = normal_tensor(&mut rng, vec![batch_size, seq_len, embed_dim], 1.0)?;
        let attention_mask = last_position_mask(batch_size, seq_len, mask_value)?;

        let state = AttentionModuleState::from_conv1d(&self.geometry, &c_attn, &c_proj)?;
        let attn = CausalSelfAttention::new(self.geometry, state);
        let output = attn.forward(&hidden_states, Some(&attention_mask))?;

        tracing::debug!(
            batch_size,
            seq_len,
            embed_dim,
            num_heads = self.geometry.num_heads(),
            seed,
            "Generated attention case"
        );

        Ok(AttentionTestCase {
            hidden_states,
            attention_mask,
            output,
            state: attn.state().clone(),
        })
    }

    /// Bundle for `case`, with this generator's configuration in the metadata
    ///
    /// # Errors
    ///
    /// Propagates [`AttentionTestCase::to_bundle`] errors
    pub fn bundle(&self, case: &AttentionTestCase) -> Result<TensorBundle> {
        let mut bundle = case.to_bundle()?;
        bundle.set_metadata("generator", GENERATOR_NAME);
        bundle.set_metadata("batch_size", self.case.batch_size.to_string());
        bundle.set_metadata("seq_len", self.case.seq_len.to_string());
        bundle.set_metadata("embed_dim", self.case.embed_dim.to_string());
        bundle.set_metadata("num_heads", self.case.num_heads.to_string());
        bundle.set_metadata("seed", self.case.seed.to_string());
        bundle.set_metadata("mask_value", format!("{:?}", self.case.mask_value));
        bundle.set_metadata("init_std", format!("{:?}", self.case.init_std));
        Ok(bundle)
    }

    /// Generate a case and write its bundle to `path`
    ///
    /// # Errors
    ///
    /// Returns error if generation or the atomic write fails
    pub fn run(&self, path: impl AsRef<Path>) -> Result<AttentionTestCase> {
        let case = self.generate()?;
        let bundle = self.bundle(&case)?;
        bundle.write(path.as_ref())?;
        tracing::info!(
            path = %path.as_ref().display(),
            tensors = bundle.len(),
            output_shape = ?case.output.shape(),
            "Attention golden bundle written"
        );
        Ok(case)
    }
}

fn normal_tensor(rng: &mut StdRng, shape: Vec<usize>, std: f32) -> Result<Tensor<f32>> {
    let n = shape.iter().product();
    let data = (0..n)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
        .collect();
    Tensor::from_vec(shape, data)
}

/// Outcome of replaying a bundle against this implementation
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    /// Elements compared
    pub total: usize,
    /// Elements whose difference exceeds the tolerance (NaN counts)
    pub mismatches: usize,
    /// Largest absolute difference seen
    pub max_abs_diff: f32,
    /// Absolute tolerance used
    pub tolerance: f32,
}

impl VerificationReport {
    /// Compare `actual` against `expected` element by element
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::ShapeMismatch`] if the shapes differ
    pub fn compare(expected: &Tensor<f32>, actual: &Tensor<f32>, tolerance: f32) -> Result<Self> {
        actual.expect_shape("verification", expected.shape())?;

        let mut mismatches = 0;
        let mut max_abs_diff = 0.0f32;
        for (&e, &a) in expected.data().iter().zip(actual.data()) {
            let diff = (e - a).abs();
            if diff.is_nan() || diff > tolerance {
                mismatches += 1;
            }
            if diff.is_nan() {
                max_abs_diff = f32::NAN;
            } else if !max_abs_diff.is_nan() {
                max_abs_diff = max_abs_diff.max(diff);
            }
        }

        Ok(Self {
            total: expected.size(),
            mismatches,
            max_abs_diff,
            tolerance,
        })
    }

    /// Whether every element is within tolerance
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} elements outside tolerance {:e} (max |diff| = {:e})",
            if self.passed() { "PASS" } else { "FAIL" },
            self.mismatches,
            self.total,
            self.tolerance,
            self.max_abs_diff
        )
    }
}

/// Replay a golden bundle and compare its `output` with a fresh forward pass
///
/// # Errors
///
/// Returns error if the bundle cannot be rebuilt into a case; a numeric
/// mismatch is reported in the returned [`VerificationReport`], not as an error
pub fn verify_bundle(
    bundle: &TensorBundle,
    num_heads: Option<usize>,
    tolerance: f32,
) -> Result<VerificationReport> {
    let (case, config) = AttentionTestCase::from_bundle(bundle, num_heads)?;
    let attn = CausalSelfAttention::new(config, case.state);
    let actual = attn.forward(&case.hidden_states, Some(&case.attention_mask))?;
    let report = VerificationReport::compare(&case.output, &actual, tolerance)?;

    if report.passed() {
        tracing::info!(%report, "Attention bundle verified");
    } else {
        tracing::warn!(%report, "Attention bundle diverges");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> AttentionCaseConfig {
        AttentionCaseConfig::default()
            .with_batch_size(1)
            .with_seq_len(3)
            .with_embed_dim(8)
            .with_num_heads(2)
    }

    #[test]
    fn test_last_position_mask() {
        let mask = last_position_mask(2, 3, -10000.0).unwrap();
        assert_eq!(mask.shape(), &[2, 1, 1, 3]);
        assert_eq!(mask.data(), &[0.0, 0.0, -10000.0, 0.0, 0.0, -10000.0]);
    }

    #[test]
    fn test_single_position_mask_masks_only_entry() {
        let mask = last_position_mask(1, 1, -10000.0).unwrap();
        assert_eq!(mask.data(), &[-10000.0]);
    }

    #[test]
    fn test_generator_rejects_bad_config() {
        let err = AttentionVectorGenerator::new(small().with_num_heads(3)).unwrap_err();
        assert!(matches!(err, ComprobarError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_generate_shapes() {
        let case = AttentionVectorGenerator::new(small()).unwrap().generate().unwrap();
        assert_eq!(case.hidden_states.shape(), &[1, 3, 8]);
        assert_eq!(case.attention_mask.shape(), &[1, 1, 1, 3]);
        assert_eq!(case.output.shape(), &[1, 3, 8]);
        assert_eq!(case.state.c_attn().weight().shape(), &[24, 8]);
        assert_eq!(case.state.c_proj().weight().shape(), &[8, 8]);
    }

    #[test]
    fn test_seed_changes_output() {
        let a = AttentionVectorGenerator::new(small()).unwrap().generate().unwrap();
        let b = AttentionVectorGenerator::new(small().with_seed(7))
            .unwrap()
            .generate()
            .unwrap();
        assert_ne!(a.hidden_states, b.hidden_states);
    }

    #[test]
    fn test_bundle_metadata() {
        let generator = AttentionVectorGenerator::new(small()).unwrap();
        let bundle = generator.bundle(&generator.generate().unwrap()).unwrap();
        assert_eq!(bundle.len(), 7);
        assert_eq!(bundle.metadata_value("weight_layout"), Some(WEIGHT_LAYOUT));
        assert_eq!(bundle.metadata_value("num_heads"), Some("2"));
        assert_eq!(bundle.metadata_value("mask_value"), Some("-10000.0"));
        assert_eq!(bundle.metadata_value("generator"), Some(GENERATOR_NAME));
    }

    #[test]
    fn test_from_bundle_restores_case() {
        let generator = AttentionVectorGenerator::new(small()).unwrap();
        let case = generator.generate().unwrap();
        let bundle = generator.bundle(&case).unwrap();
        let (restored, config) = AttentionTestCase::from_bundle(&bundle, None).unwrap();
        assert_eq!(config.num_heads(), 2);
        assert_eq!(restored.state, case.state);
        assert_eq!(restored.output, case.output);
    }

    #[test]
    fn test_from_bundle_needs_head_count() {
        let case = AttentionVectorGenerator::new(small()).unwrap().generate().unwrap();
        let bundle = case.to_bundle().unwrap();
        assert!(matches!(
            AttentionTestCase::from_bundle(&bundle, None).unwrap_err(),
            ComprobarError::FormatError { .. }
        ));
        assert!(AttentionTestCase::from_bundle(&bundle, Some(2)).is_ok());
    }

    #[test]
    fn test_from_bundle_rejects_other_layout() {
        let case = AttentionVectorGenerator::new(small()).unwrap().generate().unwrap();
        let mut bundle = case.to_bundle().unwrap();
        bundle.set_metadata("weight_layout", "in_features,out_features");
        assert!(AttentionTestCase::from_bundle(&bundle, Some(2)).is_err());
    }

    #[test]
    fn test_verify_passes_on_own_bundle() {
        let generator = AttentionVectorGenerator::new(small()).unwrap();
        let bundle = generator.bundle(&generator.generate().unwrap()).unwrap();
        let report = verify_bundle(&bundle, None, 1e-6).unwrap();
        assert!(report.passed(), "{report}");
        assert_eq!(report.total, 24);
        assert_eq!(report.max_abs_diff, 0.0);
    }

    #[test]
    fn test_compare_counts_mismatches() {
        let expected = Tensor::from_vec(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        let actual = Tensor::from_vec(vec![3], vec![1.0, 2.5, f32::NAN]).unwrap();
        let report = VerificationReport::compare(&expected, &actual, 1e-3).unwrap();
        assert_eq!(report.mismatches, 2);
        assert!(!report.passed());
        assert!(report.max_abs_diff.is_nan());
        assert!(report.to_string().starts_with("FAIL"));
    }

    #[test]
    fn test_compare_rejects_shape_mismatch() {
        let expected = Tensor::<f32>::zeros(vec![2, 3]).unwrap();
        let actual = Tensor::<f32>::zeros(vec![3, 2]).unwrap();
        assert!(VerificationReport::compare(&expected, &actual, 1e-5).is_err());
    }
}
