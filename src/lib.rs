//! # Comprobar
//!
//! Golden-artifact harness for checking GPT-2 implementations against each
//! other, numerically.
//!
//! Comprobar (Spanish: "to verify, to check") produces two artifacts:
//!
//! - **Attention golden vectors**: a seeded causal self-attention forward
//!   pass with its parameters, inputs and output in a tensor bundle
//!   (`gpt2_attention.safetensors`), for sublayer-level comparison.
//! - **Generation corpus**: greedy completions for a fixed prompt set
//!   (`gpt2_test_data.json`), for end-to-end comparison.
//!
//! Both can be replayed: a bundle is re-run and compared element-wise, and a
//! candidate corpus is compared record by record.
//!
//! ## Example
//!
//! ```rust
//! use comprobar::{config::AttentionCaseConfig, golden::AttentionVectorGenerator};
//!
//! let case = AttentionCaseConfig::default()
//!     .with_seq_len(4)
//!     .with_embed_dim(8)
//!     .with_num_heads(2);
//! let generator = AttentionVectorGenerator::new(case).unwrap();
//! let golden = generator.generate().unwrap();
//! assert_eq!(golden.output.shape(), &[2, 4, 8]);
//!
//! let bundle = generator.bundle(&golden).unwrap();
//! let report = comprobar::golden::verify_bundle(&bundle, None, 1e-6).unwrap();
//! assert!(report.passed());
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 precision loss is acceptable
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Allow float comparisons in tests
#![allow(clippy::many_single_char_names)] // b, s, h, d index math

/// Safetensors-compatible tensor bundle with atomic writes
pub mod bundle;
/// CLI command implementations (extracted for testability)
pub mod cli;
/// Harness configuration (JSON file + defaults)
pub mod config;
pub mod error;
/// Greedy decoding over a black-box logit model
pub mod generate;
/// Golden attention vectors and generation corpus
pub mod golden;
/// Attention sublayer primitives
pub mod layers;
pub mod tensor;
/// Tokenizer seam and BPE implementation
pub mod tokenizer;

// Re-exports for convenience
pub use bundle::TensorBundle;
pub use error::{ComprobarError, Result};
pub use tensor::Tensor;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
