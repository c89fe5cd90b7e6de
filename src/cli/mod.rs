//! CLI command implementations
//!
//! Argument types and handlers live here rather than in `main.rs` so they can
//! be unit tested.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{
    bundle::TensorBundle,
    config::{AttentionCaseConfig, HarnessConfig},
    error::{ComprobarError, Result},
    golden::{verify_bundle, AttentionVectorGenerator, GenerationCorpus},
};

/// Default absolute tolerance for `verify-attention`
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// comprobar - GPT-2 numerical conformance harness
///
/// Produces and checks golden artifacts for causal self-attention and greedy
/// generation.
#[derive(Debug, Parser)]
#[command(name = "comprobar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate the attention golden bundle
    ///
    /// Examples:
    ///   comprobar attention
    ///   comprobar attention --config harness.json --seed 7
    Attention {
        /// JSON harness configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bundle path (default: <output_dir>/gpt2_attention.safetensors)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overrides applied on top of the configuration file
        #[command(flatten)]
        overrides: AttentionOverrides,
    },

    /// Replay a bundle and compare its output with a fresh forward pass
    VerifyAttention {
        /// Bundle to replay
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,

        /// Head count (default: read from bundle metadata)
        #[arg(long)]
        num_heads: Option<usize>,

        /// Absolute tolerance per element
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f32,
    },

    /// Compare a candidate generation corpus against a golden one
    VerifyCorpus {
        /// Golden corpus JSON
        #[arg(value_name = "GOLDEN")]
        golden: PathBuf,

        /// Candidate corpus JSON
        #[arg(value_name = "CANDIDATE")]
        candidate: PathBuf,
    },

    /// List tensors and metadata of a bundle
    Inspect {
        /// Bundle to inspect
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },

    /// Print the resolved configuration as JSON
    Config {
        /// JSON harness configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Per-field overrides for the attention case
#[derive(Debug, Clone, Default, Args)]
pub struct AttentionOverrides {
    /// RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Sequence length
    #[arg(long)]
    pub seq_len: Option<usize>,

    /// Model width
    #[arg(long)]
    pub embed_dim: Option<usize>,

    /// Number of heads
    #[arg(long)]
    pub num_heads: Option<usize>,

    /// Additive mask value for the last position
    #[arg(long, allow_hyphen_values = true)]
    pub mask_value: Option<f32>,
}

impl AttentionOverrides {
    /// Apply the set fields to `case`
    #[must_use]
    pub fn apply(&self, mut case: AttentionCaseConfig) -> AttentionCaseConfig {
        if let Some(seed) = self.seed {
            case = case.with_seed(seed);
        }
        if let Some(batch_size) = self.batch_size {
            case = case.with_batch_size(batch_size);
        }
        if let Some(seq_len) = self.seq_len {
            case = case.with_seq_len(seq_len);
        }
        if let Some(embed_dim) = self.embed_dim {
            case = case.with_embed_dim(embed_dim);
        }
        if let Some(num_heads) = self.num_heads {
            case = case.with_num_heads(num_heads);
        }
        if let Some(mask_value) = self.mask_value {
            case = case.with_mask_value(mask_value);
        }
        case
    }
}

/// Main CLI entrypoint - dispatches commands to handlers
///
/// # Errors
///
/// Returns the handler's error; failed verifications are
/// [`ComprobarError::VerificationFailed`]
pub fn entrypoint(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Attention {
            config,
            output,
            overrides,
        } => run_attention(config.as_deref(), output.as_deref(), &overrides),
        Commands::VerifyAttention {
            bundle,
            num_heads,
            tolerance,
        } => run_verify_attention(&bundle, num_heads, tolerance),
        Commands::VerifyCorpus { golden, candidate } => run_verify_corpus(&golden, &candidate),
        Commands::Inspect { bundle } => {
            let bundle = TensorBundle::read(&bundle)?;
            print!("{}", render_bundle(&bundle));
            Ok(())
        },
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

/// Configuration file, or defaults when none is given
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => {
            let config = HarnessConfig::from_file(path)?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        },
        None => Ok(HarnessConfig::default()),
    }
}

/// Generate and write the attention bundle
///
/// # Errors
///
/// Returns error if the configuration is invalid or the write fails
pub fn run_attention(
    config: Option<&Path>,
    output: Option<&Path>,
    overrides: &AttentionOverrides,
) -> Result<()> {
    let harness = load_config(config)?;
    let case = overrides.apply(harness.attention.clone());
    let path = output.map_or_else(|| harness.bundle_path(), Path::to_path_buf);
    tracing::info!(?case, path = %path.display(), "Resolved attention configuration");

    let generator = AttentionVectorGenerator::new(case)?;
    let result = generator.run(&path)?;
    println!(
        "Wrote {} (output shape {:?})",
        path.display(),
        result.output.shape()
    );
    Ok(())
}

/// Replay a bundle against this implementation
///
/// # Errors
///
/// Returns [`ComprobarError::VerificationFailed`] when any element is out of
/// tolerance, or the underlying error if the bundle is unusable
pub fn run_verify_attention(bundle: &Path, num_heads: Option<usize>, tolerance: f32) -> Result<()> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(ComprobarError::InvalidConfiguration {
            reason: format!("tolerance must be finite and >= 0, got {tolerance}"),
        });
    }
    let loaded = TensorBundle::read(bundle)?;
    let report = verify_bundle(&loaded, num_heads, tolerance)?;
    println!("{}: {report}", bundle.display());
    if report.passed() {
        Ok(())
    } else {
        Err(ComprobarError::VerificationFailed {
            reason: format!("{}: {report}", bundle.display()),
        })
    }
}

/// Compare two corpus files
///
/// # Errors
///
/// Returns [`ComprobarError::VerificationFailed`] on any difference, or the
/// underlying error if a file is unreadable
pub fn run_verify_corpus(golden: &Path, candidate: &Path) -> Result<()> {
    let golden_corpus = GenerationCorpus::read(golden)?;
    let candidate_corpus = GenerationCorpus::read(candidate)?;
    let comparison = candidate_corpus.compare(&golden_corpus);
    println!("{comparison}");

    if comparison.passed() {
        tracing::info!(records = comparison.expected_records, "Corpus matches");
        Ok(())
    } else {
        tracing::warn!(
            mismatches = comparison.mismatches.len(),
            "Corpus diverges"
        );
        Err(ComprobarError::VerificationFailed {
            reason: format!(
                "{} differs from {}: {} mismatched records",
                candidate.display(),
                golden.display(),
                comparison.mismatches.len()
            ),
        })
    }
}

/// Human-readable listing of a bundle's tensors and metadata
#[must_use]
pub fn render_bundle(bundle: &TensorBundle) -> String {
    let mut out = String::new();
    let total: usize = bundle
        .keys()
        .filter_map(|k| bundle.entry(k))
        .map(|e| e.bytes().len())
        .sum();
    let _ = writeln!(
        out,
        "{} tensors, {}",
        bundle.len(),
        format_size(total as u64)
    );

    let width = bundle.keys().map(str::len).max().unwrap_or(0);
    for key in bundle.keys() {
        if let Some(entry) = bundle.entry(key) {
            let _ = writeln!(
                out,
                "  {key:<width$}  {}  {:?}  {}",
                entry.dtype,
                entry.shape,
                format_size(entry.bytes().len() as u64)
            );
        }
    }

    if !bundle.metadata().is_empty() {
        let _ = writeln!(out, "metadata:");
        for (key, value) in bundle.metadata() {
            let _ = writeln!(out, "  {key} = {value}");
        }
    }
    out
}

/// Format byte size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
