//! Weight layout conversion between Conv1D and canonical Linear orientation
//!
//! GPT-2 stores each projection as a Conv1D with weight `[in_features,
//! out_features]` and computes `y = x · W + b`. Golden bundles and [`Linear`]
//! use `[out_features, in_features]`. Dropping the transpose still "works"
//! whenever `in_features == out_features` (as for `c_proj`), so the conversion
//! checks shapes on both sides instead of trusting the caller.

use crate::{
    error::{ComprobarError, Result},
    tensor::Tensor,
};

use super::Linear;

/// Projection parameters in the source Conv1D orientation
#[derive(Debug, Clone, PartialEq)]
pub struct Conv1dParams {
    /// Weight `[in_features, out_features]`
    pub weight: Tensor<f32>,
    /// Bias `[out_features]`
    pub bias: Tensor<f32>,
}

impl Conv1dParams {
    /// Build from source-orientation parameters, validating shapes
    ///
    /// # Errors
    ///
    /// Returns error if the weight is not rank 2 or the bias length differs from
    /// the weight's column count
    pub fn new(weight: Tensor<f32>, bias: Tensor<f32>) -> Result<Self> {
        weight.expect_ndim("Conv1D weight", 2)?;
        bias.expect_shape("Conv1D bias", &[weight.shape()[1]])?;
        Ok(Self { weight, bias })
    }

    /// Number of input features (weight rows)
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Number of output features (weight columns)
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.weight.shape()[1]
    }

    /// Reference forward in source orientation: `y = x · W + b`
    ///
    /// Accumulates in the same order as [`Linear::forward`], so an exported
    /// layer reproduces this output bit for bit.
    ///
    /// # Errors
    ///
    /// Returns error if the input's last dimension doesn't match `in_features`
    pub fn forward(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let in_features = self.in_features();
        let out_features = self.out_features();
        let shape = input.shape();
        if shape[shape.len() - 1] != in_features {
            return Err(ComprobarError::InvalidShape {
                reason: format!(
                    "Last dimension of input {shape:?} doesn't match Conv1D in_features {in_features}"
                ),
            });
        }

        let weight = self.weight.data();
        let mut output = Vec::with_capacity(input.size() / in_features * out_features);
        for input_row in input.data().chunks_exact(in_features) {
            for (o, &b) in self.bias.data().iter().enumerate() {
                let mut sum = b;
                for (i, &x) in input_row.iter().enumerate() {
                    sum += x * weight[i * out_features + o];
                }
                output.push(sum);
            }
        }

        let mut output_shape = shape[..shape.len() - 1].to_vec();
        output_shape.push(out_features);
        Tensor::from_vec(output_shape, output)
    }
}

/// Transpose a rank-2 tensor into a new contiguous tensor
///
/// # Errors
///
/// Returns error if the tensor is not rank 2
pub fn transpose_2d(tensor: &Tensor<f32>) -> Result<Tensor<f32>> {
    tensor.expect_ndim("transpose_2d", 2)?;
    let rows = tensor.shape()[0];
    let cols = tensor.shape()[1];
    let data = tensor.data();

    let mut out = Vec::with_capacity(data.len());
    for c in 0..cols {
        for r in 0..rows {
            out.push(data[r * cols + c]);
        }
    }

    Tensor::from_vec(vec![cols, rows], out)
}

/// Convert Conv1D parameters into a canonical [`Linear`]
///
/// Weight `[in, out]` becomes `[out, in]`; the bias is copied unchanged.
///
/// # Errors
///
/// Returns error if the parameter shapes are inconsistent
pub fn export_conv1d(params: &Conv1dParams) -> Result<Linear> {
    let weight = transpose_2d(&params.weight)?;
    let linear = Linear::from_parts(weight, params.bias.clone())?;

    debug_assert_eq!(linear.in_features(), params.in_features());
    debug_assert_eq!(linear.out_features(), params.out_features());

    Ok(linear)
}

/// Convert a canonical [`Linear`] back to Conv1D orientation
///
/// Inverse of [`export_conv1d`]; a consumer holding a bundle uses this to get
/// back to the checkpoint layout.
///
/// # Errors
///
/// Returns error if the layer's weight is not rank 2
pub fn import_linear(linear: &Linear) -> Result<Conv1dParams> {
    let weight = transpose_2d(linear.weight())?;
    Conv1dParams::new(weight, linear.bias().clone())
}
