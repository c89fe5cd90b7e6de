//! Golden artifact producers and checkers
//!
//! - [`attention`]: seeded causal self-attention vectors in a tensor bundle
//! - [`corpus`]: greedy-generation prompt/response corpus

pub mod attention;
pub mod corpus;

pub use attention::{
    last_position_mask, verify_bundle, AttentionTestCase, AttentionVectorGenerator,
    VerificationReport,
};
pub use corpus::{
    CorpusComparison, CorpusGenerator, GenerationCorpus, GenerationRecord, MismatchKind,
    RecordMismatch,
};
