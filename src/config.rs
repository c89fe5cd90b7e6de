//! Harness configuration
//!
//! Every field has a default that reproduces the reference golden artifacts,
//! so an empty config file (or none at all) is a valid configuration. Values
//! from a JSON file can be overridden by CLI flags afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ComprobarError, Result},
    layers::AttentionConfig,
};

/// Bundle file name used when only an output directory is given
pub const DEFAULT_BUNDLE_FILE: &str = "gpt2_attention.safetensors";

/// Corpus file name used when only an output directory is given
pub const DEFAULT_CORPUS_FILE: &str = "gpt2_test_data.json";

/// Fixed prompt set of the generation corpus, version 1
pub const DEFAULT_PROMPTS: [&str; 5] = [
    "Hello, my name is",
    "The quick brown fox",
    "Artificial intelligence is",
    "Once upon a time in a",
    "To be or not to be",
];

/// Parameters of one synthetic attention test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionCaseConfig {
    /// Batch size
    pub batch_size: usize,
    /// Sequence length
    pub seq_len: usize,
    /// Model width
    pub embed_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// RNG seed for weights and inputs
    pub seed: u64,
    /// Additive mask value for suppressed positions
    pub mask_value: f32,
    /// Standard deviation of the normal weight initializer
    pub init_std: f32,
}

impl Default for AttentionCaseConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            seq_len: 10,
            embed_dim: 64,
            num_heads: 4,
            seed: 42,
            mask_value: -10000.0,
            init_std: 0.02,
        }
    }
}

impl AttentionCaseConfig {
    /// Set batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set sequence length
    #[must_use]
    pub fn with_seq_len(mut self, seq_len: usize) -> Self {
        self.seq_len = seq_len;
        self
    }

    /// Set model width
    #[must_use]
    pub fn with_embed_dim(mut self, embed_dim: usize) -> Self {
        self.embed_dim = embed_dim;
        self
    }

    /// Set head count
    #[must_use]
    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    /// Set RNG seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the additive mask value
    #[must_use]
    pub fn with_mask_value(mut self, mask_value: f32) -> Self {
        self.mask_value = mask_value;
        self
    }

    /// Check every field and derive the attention geometry
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidConfiguration`] if a size is zero,
    /// `embed_dim` is not divisible by `num_heads`, the mask value is not a
    /// finite non-positive number, or `init_std` is not finite and positive
    pub fn validate(&self) -> Result<AttentionConfig> {
        if self.batch_size == 0 || self.seq_len == 0 {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!(
                    "batch_size ({}) and seq_len ({}) must be > 0",
                    self.batch_size, self.seq_len
                ),
            });
        }
        if !self.mask_value.is_finite() || self.mask_value > 0.0 {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!(
                    "mask_value must be finite and <= 0, got {}",
                    self.mask_value
                ),
            });
        }
        if !self.init_std.is_finite() || self.init_std <= 0.0 {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!("init_std must be finite and > 0, got {}", self.init_std),
            });
        }
        AttentionConfig::new(self.embed_dim, self.num_heads)
    }
}

/// Parameters of the generation corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Prompts, in output order
    pub prompts: Vec<String>,
    /// New-token budget per prompt
    pub max_new_tokens: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            prompts: DEFAULT_PROMPTS.iter().map(ToString::to_string).collect(),
            max_new_tokens: 20,
        }
    }
}

impl CorpusConfig {
    /// Check the prompt list and token budget
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidConfiguration`] if there are no
    /// prompts, a prompt is empty, or the token budget is zero
    pub fn validate(&self) -> Result<()> {
        if self.prompts.is_empty() {
            return Err(ComprobarError::InvalidConfiguration {
                reason: "Corpus needs at least one prompt".to_string(),
            });
        }
        if let Some(idx) = self.prompts.iter().position(String::is_empty) {
            return Err(ComprobarError::InvalidConfiguration {
                reason: format!("Prompt {idx} is empty"),
            });
        }
        if self.max_new_tokens == 0 {
            return Err(ComprobarError::InvalidConfiguration {
                reason: "max_new_tokens must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Attention golden-vector parameters
    pub attention: AttentionCaseConfig,
    /// Generation corpus parameters
    pub corpus: CorpusConfig,
    /// Directory receiving the artifacts
    pub output_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            attention: AttentionCaseConfig::default(),
            corpus: CorpusConfig::default(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl HarnessConfig {
    /// Load a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::IoError`] if the file cannot be read and
    /// [`ComprobarError::InvalidConfiguration`] if it does not parse
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ComprobarError::IoError {
            message: format!("Failed to read config {}: {e}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|e| ComprobarError::InvalidConfiguration {
            reason: format!("Failed to parse config {}: {e}", path.display()),
        })
    }

    /// Path of the attention bundle inside `output_dir`
    #[must_use]
    pub fn bundle_path(&self) -> PathBuf {
        self.output_dir.join(DEFAULT_BUNDLE_FILE)
    }

    /// Path of the generation corpus inside `output_dir`
    #[must_use]
    pub fn corpus_path(&self) -> PathBuf {
        self.output_dir.join(DEFAULT_CORPUS_FILE)
    }
}
