//! Tokenizer seam for the generation corpus
//!
//! The corpus harness talks to any tokenizer through [`TextTokenizer`]. A
//! pretrained GPT-2 tokenizer is an upstream collaborator; [`BpeTokenizer`]
//! is a small in-crate implementation for vocabularies supplied as lists.
//!
//! ## Example
//!
//! ```rust,ignore
//! use comprobar::tokenizer::{BpeTokenizer, TextTokenizer};
//!
//! let tokenizer = BpeTokenizer::new(vocab, merges, "<|endoftext|>")?;
//! let ids = tokenizer.encode("Hello world")?;
//! let text = tokenizer.decode(&ids, true)?;
//! ```

use std::collections::HashMap;

use crate::error::{ComprobarError, Result};

/// Text ↔ token-id mapping used by the corpus harness
pub trait TextTokenizer {
    /// Encode text to token ids
    ///
    /// # Errors
    ///
    /// Returns error if the text cannot be represented
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids to text, optionally dropping special tokens
    ///
    /// # Errors
    ///
    /// Returns error if an id is outside the vocabulary
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// End-of-sequence id; GPT-2 also pads with it
    fn eos_token_id(&self) -> u32;
}

/// BPE (Byte Pair Encoding) tokenizer
///
/// Words after the first carry their leading space (GPT-2 convention), and
/// encoding is lossless: `decode(encode(s), false) == s`. Each word starts as
/// characters and merges are applied in priority order. The
/// EOS token is special: its literal text in the input maps straight to its id
/// and `decode(.., true)` drops it.
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    /// Token to ID mapping
    token_to_id: HashMap<String, u32>,
    /// ID to token mapping
    id_to_token: HashMap<u32, String>,
    /// Merge rules: pairs to merge in order of priority
    merges: Vec<(String, String)>,
    /// End-of-sequence token text
    eos_token: String,
    /// End-of-sequence token id
    eos_token_id: u32,
}

impl BpeTokenizer {
    /// Create a new BPE tokenizer
    ///
    /// # Arguments
    ///
    /// * `vocab` - List of tokens (index = token ID)
    /// * `merges` - List of merge pairs in priority order
    /// * `eos_token` - End-of-sequence token string, must be in `vocab`
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::ModelLoadError`] if the vocabulary is empty,
    /// has duplicates, or lacks the EOS token
    pub fn new(vocab: Vec<String>, merges: Vec<(String, String)>, eos_token: &str) -> Result<Self> {
        if vocab.is_empty() {
            return Err(ComprobarError::ModelLoadError {
                reason: "Vocabulary cannot be empty".to_string(),
            });
        }

        let mut token_to_id = HashMap::with_capacity(vocab.len());
        let mut id_to_token = HashMap::with_capacity(vocab.len());

        for (id, token) in vocab.into_iter().enumerate() {
            let id = u32::try_from(id).map_err(|_| ComprobarError::ModelLoadError {
                reason: format!("Token ID {id} exceeds u32 limit"),
            })?;
            if token_to_id.contains_key(&token) {
                return Err(ComprobarError::ModelLoadError {
                    reason: format!("Duplicate token: {token:?}"),
                });
            }
            token_to_id.insert(token.clone(), id);
            id_to_token.insert(id, token);
        }

        let eos_token_id =
            *token_to_id
                .get(eos_token)
                .ok_or_else(|| ComprobarError::ModelLoadError {
                    reason: format!("EOS token '{eos_token}' not in vocabulary"),
                })?;

        Ok(Self {
            token_to_id,
            id_to_token,
            merges,
            eos_token: eos_token.to_string(),
            eos_token_id,
        })
    }

    /// Get vocabulary size
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.token_to_id.len()
    }

    /// Get token ID for a token
    #[must_use]
    pub fn get_token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Encode text that contains no special tokens
    ///
    /// Every space after the first word opens a new word, so runs of spaces
    /// and trailing spaces come out as lone `" "` tokens.
    fn encode_segment(&self, segment: &str, out: &mut Vec<u32>) -> Result<()> {
        for (i, part) in segment.split(' ').enumerate() {
            let word = if i == 0 {
                part.to_string()
            } else {
                format!(" {part}")
            };
            if word.is_empty() {
                continue;
            }

            let mut tokens: Vec<String> = word.chars().map(|c| c.to_string()).collect();
            for (first, second) in &self.merges {
                tokens = Self::apply_merge(&tokens, first, second);
            }

            for token in tokens {
                let id = self.token_to_id.get(&token).copied().ok_or_else(|| {
                    ComprobarError::InferenceError {
                        reason: format!("Symbol {token:?} is not in the vocabulary"),
                    }
                })?;
                out.push(id);
            }
        }
        Ok(())
    }

    /// Apply a single merge rule to token list
    fn apply_merge(tokens: &[String], first: &str, second: &str) -> Vec<String> {
        if tokens.len() < 2 {
            return tokens.to_vec();
        }

        let mut result = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            if i + 1 < tokens.len() && tokens[i] == first && tokens[i + 1] == second {
                result.push(format!("{first}{second}"));
                i += 2;
            } else {
                result.push(tokens[i].clone());
                i += 1;
            }
        }

        result
    }
}

impl TextTokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for (n, segment) in text.split(self.eos_token.as_str()).enumerate() {
            if n > 0 {
                ids.push(self.eos_token_id);
            }
            self.encode_segment(segment, &mut ids)?;
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut result = String::new();
        for &id in ids {
            if skip_special_tokens && id == self.eos_token_id {
                continue;
            }
            let token = self
                .id_to_token
                .get(&id)
                .ok_or_else(|| ComprobarError::InferenceError {
                    reason: format!("Invalid token ID: {id}"),
                })?;
            result.push_str(token);
        }
        Ok(result)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}
