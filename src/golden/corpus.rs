//! Greedy-generation golden corpus
//!
//! Each record pairs a prompt with the text greedily generated after it. The
//! file is a pretty-printed JSON array in prompt order:
//!
//! ```json
//! [
//!   {
//!     "prompt": "Hello, my name is",
//!     "response": "Hello, my name is ..."
//!   }
//! ]
//! ```
//!
//! `response` is the decoded prompt plus continuation with special tokens
//! stripped.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    bundle::write_atomic,
    config::CorpusConfig,
    error::{ComprobarError, Result},
    generate::{generate_greedy, GenerationConfig, GenerativeModel},
    tokenizer::TextTokenizer,
};

/// One prompt and its greedy completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Input text
    pub prompt: String,
    /// Decoded prompt and continuation
    pub response: String,
}

/// Ordered list of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationCorpus {
    records: Vec<GenerationRecord>,
}

impl GenerationCorpus {
    /// Corpus from records, order preserved
    #[must_use]
    pub fn new(records: Vec<GenerationRecord>) -> Self {
        Self { records }
    }

    /// Records in prompt order
    #[must_use]
    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the corpus has no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// JSON text, two-space indented
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::SerializationError`] if encoding fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON text
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::SerializationError`] if the text is not an
    /// array of `{prompt, response}` objects
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write the corpus atomically
    ///
    /// # Errors
    ///
    /// Returns error if encoding or any filesystem step fails
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        write_atomic(path.as_ref(), json.as_bytes())
    }

    /// Read a corpus file
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::IoError`] if the file cannot be read and
    /// [`ComprobarError::SerializationError`] if it does not parse
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ComprobarError::IoError {
            message: format!("Failed to read corpus {}: {e}", path.display()),
        })?;
        Self::from_json(&text)
    }

    /// Compare `self` (candidate) against `golden` record by record
    #[must_use]
    pub fn compare(&self, golden: &Self) -> CorpusComparison {
        let mut mismatches = Vec::new();
        for (index, (want, got)) in golden.records.iter().zip(&self.records).enumerate() {
            if want.prompt != got.prompt {
                mismatches.push(RecordMismatch {
                    index,
                    kind: MismatchKind::Prompt,
                    expected: want.prompt.clone(),
                    actual: got.prompt.clone(),
                });
            } else if want.response != got.response {
                mismatches.push(RecordMismatch {
                    index,
                    kind: MismatchKind::Response,
                    expected: want.response.clone(),
                    actual: got.response.clone(),
                });
            }
        }

        CorpusComparison {
            expected_records: golden.len(),
            actual_records: self.len(),
            mismatches,
        }
    }
}

/// Which field of a record differs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// Prompts differ (records out of order or a different prompt set)
    Prompt,
    /// Same prompt, different completion
    Response,
}

/// One differing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMismatch {
    /// Record position
    pub index: usize,
    /// Differing field
    pub kind: MismatchKind,
    /// Golden value
    pub expected: String,
    /// Candidate value
    pub actual: String,
}

/// Result of [`GenerationCorpus::compare`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusComparison {
    /// Records in the golden corpus
    pub expected_records: usize,
    /// Records in the candidate corpus
    pub actual_records: usize,
    /// Differing records among the overlapping prefix
    pub mismatches: Vec<RecordMismatch>,
}

impl CorpusComparison {
    /// Same length and no differing records
    #[must_use]
    pub fn passed(&self) -> bool {
        self.expected_records == self.actual_records && self.mismatches.is_empty()
    }
}

impl fmt::Display for CorpusComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} mismatched records ({} golden, {} candidate)",
            if self.passed() { "PASS" } else { "FAIL" },
            self.mismatches.len(),
            self.expected_records,
            self.actual_records
        )?;
        for m in &self.mismatches {
            write!(
                f,
                "\n  [{}] {:?}: expected {:?}, got {:?}",
                m.index, m.kind, m.expected, m.actual
            )?;
        }
        Ok(())
    }
}

/// Runs greedy decoding over a prompt list
///
/// The model and tokenizer are borrowed; nothing is loaded here.
pub struct CorpusGenerator<'a, M: GenerativeModel + ?Sized, T: TextTokenizer + ?Sized> {
    model: &'a mut M,
    tokenizer: &'a T,
    config: CorpusConfig,
}

impl<'a, M: GenerativeModel + ?Sized, T: TextTokenizer + ?Sized> CorpusGenerator<'a, M, T> {
    /// Validate `config` and bind the collaborators
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidConfiguration`] for an unusable config
    pub fn new(model: &'a mut M, tokenizer: &'a T, config: CorpusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            tokenizer,
            config,
        })
    }

    /// Generate one record per prompt, in prompt order
    ///
    /// # Errors
    ///
    /// Returns the first tokenizer or model failure; no partial corpus is
    /// returned
    pub fn run(&mut self) -> Result<GenerationCorpus> {
        let eos = self.tokenizer.eos_token_id();
        let generation = GenerationConfig::greedy()
            .with_max_new_tokens(self.config.max_new_tokens)
            .with_eos_token_id(eos);

        let mut records = Vec::with_capacity(self.config.prompts.len());
        for prompt in &self.config.prompts {
            self.model.reset();
            let prompt_ids = self.tokenizer.encode(prompt)?;
            let tokens = generate_greedy(&mut *self.model, &prompt_ids, &generation)?;
            let response = self.tokenizer.decode(&tokens, true)?;

            tracing::info!(
                prompt = %prompt,
                prompt_tokens = prompt_ids.len(),
                new_tokens = tokens.len() - prompt_ids.len(),
                "Generated completion"
            );
            records.push(GenerationRecord {
                prompt: prompt.clone(),
                response,
            });
        }

        Ok(GenerationCorpus::new(records))
    }

    /// Generate and write the corpus to `path`
    ///
    /// # Errors
    ///
    /// Returns error if generation or the atomic write fails
    pub fn run_to(&mut self, path: impl AsRef<Path>) -> Result<GenerationCorpus> {
        let corpus = self.run()?;
        corpus.write(path.as_ref())?;
        tracing::info!(
            path = %path.as_ref().display(),
            records = corpus.len(),
            "Generation corpus written"
        );
        Ok(corpus)
    }
}
