//! Greedy autoregressive decoding
//!
//! The language model is a black box behind [`GenerativeModel`]: it maps a
//! token sequence to next-token logits. Decoding always takes the arg-max,
//! breaking ties toward the lowest token id, and stops at the budget or after
//! emitting the end-of-sequence token.
//!
//! ```rust,ignore
//! use comprobar::generate::{generate_greedy, GenerationConfig};
//!
//! let config = GenerationConfig::greedy()
//!     .with_max_new_tokens(20)
//!     .with_eos_token_id(50256);
//! let tokens = generate_greedy(&mut model, &prompt_ids, &config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ComprobarError, Result};

/// Model trait for generation
///
/// Implement this for whatever produces next-token logits.
pub trait GenerativeModel {
    /// Forward pass producing logits for the next token
    ///
    /// # Arguments
    ///
    /// * `tokens` - Current token sequence
    ///
    /// # Returns
    ///
    /// Logits for vocabulary (length `vocab_size`)
    ///
    /// # Errors
    ///
    /// Implementation-defined; surfaced unchanged by the decoder
    fn forward(&mut self, tokens: &[u32]) -> Result<Vec<f32>>;

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Reset any cached state (e.g., KV cache) before a new prompt
    fn reset(&mut self) {}
}

/// Greedy decoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens appended after the prompt
    pub max_new_tokens: usize,
    /// Stop after emitting this token
    ///
    /// Decoding runs one prompt at a time, so no pad token is needed.
    pub eos_token_id: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::greedy()
    }
}

impl GenerationConfig {
    /// Greedy decoding with a 20-token budget and no stop token
    #[must_use]
    pub fn greedy() -> Self {
        Self {
            max_new_tokens: 20,
            eos_token_id: None,
        }
    }

    /// Set the new-token budget
    #[must_use]
    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Set the stop token
    #[must_use]
    pub fn with_eos_token_id(mut self, eos_token_id: u32) -> Self {
        self.eos_token_id = Some(eos_token_id);
        self
    }
}

/// Index of the largest logit, lowest index on ties
///
/// # Errors
///
/// Returns [`ComprobarError::InferenceError`] if `logits` is empty or
/// contains NaN
pub fn sample_greedy(logits: &[f32]) -> Result<u32> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &logit) in logits.iter().enumerate() {
        if logit.is_nan() {
            return Err(ComprobarError::InferenceError {
                reason: format!("Logit {idx} is NaN"),
            });
        }
        match best {
            Some((_, best_logit)) if logit <= best_logit => {},
            _ => best = Some((idx, logit)),
        }
    }

    let (idx, _) = best.ok_or_else(|| ComprobarError::InferenceError {
        reason: "Logits cannot be empty".to_string(),
    })?;
    u32::try_from(idx).map_err(|_| ComprobarError::InferenceError {
        reason: format!("Token index {idx} exceeds u32 range"),
    })
}

/// Greedy decode from `prompt`
///
/// # Returns
///
/// The prompt followed by up to `max_new_tokens` generated ids; when EOS is
/// generated it is included and decoding stops
///
/// # Errors
///
/// Returns error if the prompt is empty, the model fails, or the model
/// returns logits of the wrong length
pub fn generate_greedy<M: GenerativeModel + ?Sized>(
    model: &mut M,
    prompt: &[u32],
    config: &GenerationConfig,
) -> Result<Vec<u32>> {
    if prompt.is_empty() {
        return Err(ComprobarError::InferenceError {
            reason: "Prompt must contain at least one token".to_string(),
        });
    }

    let vocab_size = model.vocab_size();
    let mut tokens = Vec::with_capacity(prompt.len() + config.max_new_tokens);
    tokens.extend_from_slice(prompt);

    for step in 0..config.max_new_tokens {
        let logits = model.forward(&tokens)?;
        if logits.len() != vocab_size {
            return Err(ComprobarError::InferenceError {
                reason: format!(
                    "Model returned {} logits at step {step}, vocab_size is {vocab_size}",
                    logits.len()
                ),
            });
        }

        let next = sample_greedy(&logits)?;
        tokens.push(next);
        tracing::trace!(step, token = next, "Greedy step");

        if config.eos_token_id == Some(next) {
            break;
        }
    }

    Ok(tokens)
}
