//! GPT-2 causal multi-head self-attention
//!
//! Computes, for `hidden_states [batch, seq_len, embed_dim]`:
//! ```text
//! Q, K, V = split(c_attn(x))
//! scores  = Q · Kᵀ / sqrt(head_dim)          (per head)
//! scores  = where(j <= i, scores, f32::MIN)  (causal, unconditional)
//! scores += attention_mask                   (additive, [batch, 1, 1, seq_len])
//! output  = c_proj(merge(softmax(scores) · V))
//! ```
//!
//! Dropout is identity; nothing here draws random numbers.

use crate::{
    error::{ComprobarError, Result},
    tensor::Tensor,
};

use super::{layout::Conv1dParams, softmax, Linear};

/// Score written to future key positions before normalization
///
/// The lowest finite `f32`, matching the reference framework's
/// `finfo(float32).min`. Adding a finite additive mask to it stays finite.
pub const CAUSAL_MASK_VALUE: f32 = f32::MIN;

/// Attention geometry, validated at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionConfig {
    embed_dim: usize,
    num_heads: usize,
    head_dim: usize,
}

impl AttentionConfig {
    /// Validate `embed_dim` / `num_heads`
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidConfiguration`] if either value is zero or
    /// `embed_dim` is not divisible by `num_heads`
    pub fn new(embed_dim: usize, num_heads: usize) -> Result<Self> {
        if embed_dim == 0 || num_heads == 0 {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!(
                    "embed_dim ({embed_dim}) and num_heads ({num_heads}) must be > 0"
                ),
            });
        }
        if !embed_dim.is_multiple_of(num_heads) {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!(
                    "embed_dim {embed_dim} must be divisible by num_heads {num_heads}"
                ),
            });
        }

        Ok(Self {
            embed_dim,
            num_heads,
            head_dim: embed_dim / num_heads,
        })
    }

    /// Model width
    #[must_use]
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Number of attention heads
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Width of one head (`embed_dim / num_heads`)
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

/// Learned parameters of one attention sublayer, canonical orientation
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionModuleState {
    /// Fused QKV projection: `[3 * embed_dim, embed_dim]`
    c_attn: Linear,
    /// Output projection: `[embed_dim, embed_dim]`
    c_proj: Linear,
}

impl AttentionModuleState {
    /// Assemble and validate the module state
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::ShapeMismatch`] if `c_attn` is not
    /// `[3 * embed_dim, embed_dim]` or `c_proj` is not `[embed_dim, embed_dim]`
    pub fn new(config: &AttentionConfig, c_attn: Linear, c_proj: Linear) -> Result<Self> {
        let e = config.embed_dim();
        c_attn.weight().expect_shape("c_attn.weight", &[3 * e, e])?;
        c_attn.bias().expect_shape("c_attn.bias", &[3 * e])?;
        c_proj.weight().expect_shape("c_proj.weight", &[e, e])?;
        c_proj.bias().expect_shape("c_proj.bias", &[e])?;
        Ok(Self { c_attn, c_proj })
    }

    /// Build from checkpoint-layout (Conv1D) parameters
    ///
    /// # Errors
    ///
    /// Returns error if either projection has the wrong shape after transposition
    pub fn from_conv1d(
        config: &AttentionConfig,
        c_attn: &Conv1dParams,
        c_proj: &Conv1dParams,
    ) -> Result<Self> {
        Self::new(
            config,
            super::layout::export_conv1d(c_attn)?,
            super::layout::export_conv1d(c_proj)?,
        )
    }

    /// Fused QKV projection
    #[must_use]
    pub fn c_attn(&self) -> &Linear {
        &self.c_attn
    }

    /// Output projection
    #[must_use]
    pub fn c_proj(&self) -> &Linear {
        &self.c_proj
    }
}

/// Output of a forward pass together with the normalized attention weights
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, seq_len, embed_dim]`
    pub output: Tensor<f32>,
    /// `[batch, num_heads, seq_len, seq_len]`, rows sum to 1
    pub probs: Tensor<f32>,
}

/// Causal self-attention sublayer
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    config: AttentionConfig,
    state: AttentionModuleState,
}

impl CausalSelfAttention {
    /// Create the sublayer from validated geometry and parameters
    #[must_use]
    pub fn new(config: AttentionConfig, state: AttentionModuleState) -> Self {
        Self { config, state }
    }

    /// Geometry
    #[must_use]
    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Parameters
    #[must_use]
    pub fn state(&self) -> &AttentionModuleState {
        &self.state
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - `[batch, seq_len, embed_dim]`
    /// * `attention_mask` - optional additive mask `[batch, 1, 1, seq_len]`
    ///
    /// # Errors
    ///
    /// Returns error if any input shape disagrees with the configuration
    pub fn forward(
        &self,
        hidden_states: &Tensor<f32>,
        attention_mask: Option<&Tensor<f32>>,
    ) -> Result<Tensor<f32>> {
        Ok(self.forward_with_probs(hidden_states, attention_mask)?.output)
    }

    /// Forward pass that also returns the attention weights
    ///
    /// # Errors
    ///
    /// Returns error if any input shape disagrees with the configuration
    pub fn forward_with_probs(
        &self,
        hidden_states: &Tensor<f32>,
        attention_mask: Option<&Tensor<f32>>,
    ) -> Result<AttentionOutput> {
        hidden_states.expect_ndim("attention hidden_states", 3)?;
        let batch = hidden_states.shape()[0];
        let seq_len = hidden_states.shape()[1];
        let e = self.config.embed_dim();
        let h = self.config.num_heads();
        let d = self.config.head_dim();
        hidden_states.expect_shape("attention hidden_states", &[batch, seq_len, e])?;

        if let Some(mask) = attention_mask {
            mask.expect_shape("attention_mask", &[batch, 1, 1, seq_len])?;
        }

        // [batch, seq_len, 3 * embed_dim]
        let qkv = self.state.c_attn.forward(hidden_states)?;
        qkv.expect_shape("c_attn output", &[batch, seq_len, 3 * e])?;

        let query = split_heads(qkv.data(), batch, seq_len, h, d, 0);
        let key = split_heads(qkv.data(), batch, seq_len, h, d, 1);
        let value = split_heads(qkv.data(), batch, seq_len, h, d, 2);

        #[allow(clippy::cast_precision_loss)]
        let scale_divisor = (d as f32).sqrt();

        let mask_data = attention_mask.map(|m| m.data());
        let mut scores = Vec::with_capacity(batch * h * seq_len * seq_len);
        for b in 0..batch {
            for head in 0..h {
                let base = (b * h + head) * seq_len * d;
                for i in 0..seq_len {
                    let q_row = &query[base + i * d..base + (i + 1) * d];
                    for j in 0..seq_len {
                        let mut score = if j > i {
                            CAUSAL_MASK_VALUE
                        } else {
                            let k_row = &key[base + j * d..base + (j + 1) * d];
                            let dot: f32 = q_row.iter().zip(k_row).map(|(q, k)| q * k).sum();
                            dot / scale_divisor
                        };
                        if let Some(mask) = mask_data {
                            score += mask[b * seq_len + j];
                        }
                        scores.push(score);
                    }
                }
            }
        }

        let scores = Tensor::from_vec(vec![batch, h, seq_len, seq_len], scores)?;
        let probs = softmax(&scores)?;
        let p = probs.data();

        // weights · V, written straight into merged [batch, seq_len, embed_dim] layout
        let mut merged = vec![0.0f32; batch * seq_len * e];
        for b in 0..batch {
            for head in 0..h {
                let v_base = (b * h + head) * seq_len * d;
                for i in 0..seq_len {
                    let p_row = &p[((b * h + head) * seq_len + i) * seq_len..][..seq_len];
                    let out = &mut merged[(b * seq_len + i) * e + head * d..][..d];
                    for (j, &w) in p_row.iter().enumerate() {
                        let v_row = &value[v_base + j * d..v_base + (j + 1) * d];
                        for (o, &v) in out.iter_mut().zip(v_row) {
                            *o += w * v;
                        }
                    }
                }
            }
        }
        let merged = Tensor::from_vec(vec![batch, seq_len, e], merged)?;

        let output = self.state.c_proj.forward(&merged)?;
        output.expect_shape("attention output", hidden_states.shape())?;

        debug_assert!(
            output.data().iter().all(|x| x.is_finite()),
            "Attention produced NaN or Inf values"
        );

        Ok(AttentionOutput { output, probs })
    }
}

/// Slice one of Q/K/V out of the fused projection into `[batch, heads, seq, head_dim]`
///
/// `part` selects the third of the feature axis: 0 = query, 1 = key, 2 = value.
/// Head `n` owns features `[n * head_dim, (n + 1) * head_dim)` of its third.
fn split_heads(
    qkv: &[f32],
    batch: usize,
    seq_len: usize,
    num_heads: usize,
    head_dim: usize,
    part: usize,
) -> Vec<f32> {
    let e = num_heads * head_dim;
    let mut out = Vec::with_capacity(batch * seq_len * e);
    for b in 0..batch {
        for head in 0..num_heads {
            for s in 0..seq_len {
                let start = (b * seq_len + s) * 3 * e + part * e + head * head_dim;
                out.extend_from_slice(&qkv[start..start + head_dim]);
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "attention_tests.rs"]
mod tests;
