//! Neural network layers for the GPT-2 attention sublayer
//!
//! Implements the building blocks the conformance harness needs:
//! - Numerically stable softmax over the last dimension
//! - Linear projection in canonical `(out_features, in_features)` orientation
//! - Weight layout conversion from the Conv1D `(in_features, out_features)` form
//! - Causal multi-head self-attention with a fused QKV projection
//!
//! ## Weight orientation
//!
//! GPT-2 checkpoints store their projections as Conv1D parameters with weight
//! shape `[in_features, out_features]`. Everything in this crate, including the
//! golden bundles, uses `[out_features, in_features]`. The conversion lives in
//! [`layout`] and is the only place a transpose happens.
//!
//! ```rust,ignore
//! use comprobar::layers::{layout, AttentionConfig, AttentionModuleState, CausalSelfAttention};
//!
//! let c_attn = layout::export_conv1d(&source_c_attn)?;
//! let c_proj = layout::export_conv1d(&source_c_proj)?;
//! let config = AttentionConfig::new(64, 4)?;
//! let state = AttentionModuleState::new(&config, c_attn, c_proj)?;
//! let attn = CausalSelfAttention::new(config, state);
//! let output = attn.forward(&hidden_states, Some(&mask))?;
//! ```

use crate::{
    error::{ComprobarError, Result},
    tensor::Tensor,
};

mod attention;
pub use attention::{
    AttentionConfig, AttentionModuleState, AttentionOutput, CausalSelfAttention,
    CAUSAL_MASK_VALUE,
};
pub mod layout;

/// Apply softmax along the last dimension
///
/// Softmax: `y[i] = exp(x[i] - max) / sum(exp(x[j] - max))`
///
/// Subtracting the row maximum keeps at least one term at `exp(0) = 1`, so the
/// denominator cannot underflow while the maximum is finite. A row whose
/// maximum is `-inf` has no finite score and becomes all zeros.
///
/// # Errors
///
/// Returns error if input is empty
pub fn softmax(input: &Tensor<f32>) -> Result<Tensor<f32>> {
    let data = input.data();
    let shape = input.shape();

    if data.is_empty() {
        return Err(ComprobarError::InvalidShape {
            reason: "Cannot apply softmax to empty tensor".to_string(),
        });
    }

    let last_dim = shape[shape.len() - 1];
    let mut output = Vec::with_capacity(data.len());

    for group in data.chunks_exact(last_dim) {
        let max_val = group.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        if max_val == f32::NEG_INFINITY {
            output.extend(std::iter::repeat_n(0.0, last_dim));
            continue;
        }

        let exp_vals: Vec<f32> = group.iter().map(|&x| (x - max_val).exp()).collect();
        let sum_exp: f32 = exp_vals.iter().sum();

        for &exp_val in &exp_vals {
            output.push(exp_val / sum_exp);
        }
    }

    Tensor::from_vec(shape.to_vec(), output)
}

/// Linear transformation layer
///
/// Applies `y = x · Wᵀ + b` with `W` stored `[out_features, in_features]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// Input features
    in_features: usize,
    /// Output features
    out_features: usize,
    /// Weight matrix `[out_features, in_features]`
    weight: Tensor<f32>,
    /// Bias vector `[out_features]`
    bias: Tensor<f32>,
}

impl Linear {
    /// Build a linear layer from canonical-orientation parameters
    ///
    /// # Arguments
    ///
    /// * `weight` - `[out_features, in_features]`
    /// * `bias` - `[out_features]`
    ///
    /// # Errors
    ///
    /// Returns error if the weight is not rank 2 or the bias length differs from
    /// the weight's row count
    pub fn from_parts(weight: Tensor<f32>, bias: Tensor<f32>) -> Result<Self> {
        weight.expect_ndim("Linear weight", 2)?;
        let out_features = weight.shape()[0];
        let in_features = weight.shape()[1];
        bias.expect_shape("Linear bias", &[out_features])?;

        Ok(Self {
            in_features,
            out_features,
            weight,
            bias,
        })
    }

    /// Forward pass through the linear layer
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor with shape `[..., in_features]`
    ///
    /// # Returns
    ///
    /// Tensor with shape `[..., out_features]`
    ///
    /// # Errors
    ///
    /// Returns error if the input's last dimension doesn't match `in_features`
    pub fn forward(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let shape = input.shape();
        let last_dim = shape[shape.len() - 1];
        if last_dim != self.in_features {
            return Err(ComprobarError::InvalidShape {
                reason: format!(
                    "Last dimension {} of input {:?} doesn't match in_features {}",
                    last_dim, shape, self.in_features
                ),
            });
        }

        let weight = self.weight.data();
        let bias = self.bias.data();
        let data = input.data();
        let num_rows = data.len() / self.in_features;

        let mut output = Vec::with_capacity(num_rows * self.out_features);

        for input_row in data.chunks_exact(self.in_features) {
            for (o, &b) in bias.iter().enumerate() {
                let w_row = &weight[o * self.in_features..(o + 1) * self.in_features];
                let mut sum = b;
                for (&x, &w) in input_row.iter().zip(w_row) {
                    sum += x * w;
                }
                output.push(sum);
            }
        }

        let mut output_shape = shape[..shape.len() - 1].to_vec();
        output_shape.push(self.out_features);

        Tensor::from_vec(output_shape, output)
    }

    /// Get input features
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Get output features
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Weight `[out_features, in_features]`
    #[must_use]
    pub fn weight(&self) -> &Tensor<f32> {
        &self.weight
    }

    /// Bias `[out_features]`
    #[must_use]
    pub fn bias(&self) -> &Tensor<f32> {
        &self.bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let input = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]).unwrap();
        let output = softmax(&input).unwrap();
        for row in output.data().chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_large_negative_entries_vanish() {
        let input = Tensor::from_vec(vec![3], vec![0.5, f32::MIN, 0.5 - 10000.0]).unwrap();
        let output = softmax(&input).unwrap();
        assert!((output.data()[0] - 1.0).abs() < 1e-6);
        assert!(output.data()[1] < 1e-6);
        assert!(output.data()[2] < 1e-6);
    }

    #[test]
    fn test_softmax_all_masked_row_stays_finite() {
        // Every entry equally suppressed: max subtraction keeps a uniform row.
        let input = Tensor::from_vec(vec![4], vec![f32::MIN; 4]).unwrap();
        let output = softmax(&input).unwrap();
        for &p in output.data() {
            assert!(p.is_finite());
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_neg_infinity_row_is_zero() {
        let input = Tensor::from_vec(vec![2], vec![f32::NEG_INFINITY; 2]).unwrap();
        let output = softmax(&input).unwrap();
        assert_eq!(output.data(), &[0.0, 0.0]);
    }

    #[test]
    fn test_linear_forward_canonical_orientation() {
        // W = [[1, 2], [3, 4], [5, 6]] maps 2 -> 3
        let weight = Tensor::from_vec(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let bias = Tensor::from_vec(vec![3], vec![0.5, 0.0, -0.5]).unwrap();
        let linear = Linear::from_parts(weight, bias).unwrap();
        assert_eq!(linear.in_features(), 2);
        assert_eq!(linear.out_features(), 3);

        let input = Tensor::from_vec(vec![1, 2], vec![1.0, 1.0]).unwrap();
        let output = linear.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 3]);
        assert_eq!(output.data(), &[3.5, 7.0, 10.5]);
    }

    #[test]
    fn test_linear_rejects_wrong_input_width() {
        let linear = Linear::from_parts(
            Tensor::zeros(vec![4, 3]).unwrap(),
            Tensor::zeros(vec![4]).unwrap(),
        )
        .unwrap();
        let input = Tensor::zeros(vec![2, 4]).unwrap();
        assert!(linear.forward(&input).is_err());
    }

    #[test]
    fn test_linear_rejects_bias_length() {
        let result = Linear::from_parts(
            Tensor::zeros(vec![4, 3]).unwrap(),
            Tensor::zeros(vec![3]).unwrap(),
        );
        assert!(matches!(
            result.unwrap_err(),
            ComprobarError::ShapeMismatch { .. }
        ));
    }
}
