use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::errors::{PipelineError, Result};

/// Context-window sizes per model. Unknown models get the conservative
/// default below plus the chars-per-token estimator instead of real BPE.
const MODEL_CTX: &[(&str, usize)] = &[
    ("o3", 32_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 25_000),
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 200_000),
    ("gemini-1.5-pro", 1_000_000),
];

const DEFAULT_CTX_LIMIT: usize = 32_000;
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

enum Encoder {
    Cl100k(CoreBPE),
    /// Byte-length estimate; used for unknown models and in tests where
    /// exact BPE counts would make fixtures brittle.
    Heuristic { chars_per_token: usize },
}

/// Token counting service shared by adapters, budget control and stats.
///
/// Cloning is cheap (the BPE table is behind an `Arc`), so rayon workers can
/// each hold their own handle.
#[derive(Clone)]
pub struct TokenService {
    encoder: Arc<Encoder>,
    pub model: String,
    pub encoder_name: String,
    pub ctx_limit: usize,
}

impl TokenService {
    /// Build the service for a model name.
    ///
    /// Known models count with cl100k_base; anything else estimates with
    /// `chars_per_token`. BPE construction failure degrades the same way and
    /// is reported through the returned warning.
    pub fn for_model(model: &str, chars_per_token: usize) -> (Self, Option<String>) {
        let ctx_limit = MODEL_CTX
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, ctx)| *ctx)
            .unwrap_or(DEFAULT_CTX_LIMIT);

        let known = MODEL_CTX.iter().any(|(name, _)| *name == model);
        if known {
            match tiktoken_rs::cl100k_base() {
                Ok(bpe) => {
                    return (
                        Self {
                            encoder: Arc::new(Encoder::Cl100k(bpe)),
                            model: model.to_string(),
                            encoder_name: "cl100k_base".to_string(),
                            ctx_limit,
                        },
                        None,
                    );
                }
                Err(e) => {
                    let warn = format!("tokenizer: cl100k_base unavailable ({e}); counting heuristically");
                    return (Self::heuristic(model, chars_per_token, ctx_limit), Some(warn));
                }
            }
        }

        (Self::heuristic(model, chars_per_token, ctx_limit), None)
    }

    pub fn heuristic(model: &str, chars_per_token: usize, ctx_limit: usize) -> Self {
        Self {
            encoder: Arc::new(Encoder::Heuristic {
                chars_per_token: chars_per_token.max(1),
            }),
            model: model.to_string(),
            encoder_name: format!("chars-{}", chars_per_token.max(1)),
            ctx_limit,
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self.encoder.as_ref() {
            Encoder::Cl100k(bpe) => bpe.encode_with_special_tokens(text).len(),
            Encoder::Heuristic { chars_per_token } => {
                let chars = text.chars().count();
                chars.div_ceil(*chars_per_token)
            }
        }
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        match self.encoder.as_ref() {
            Encoder::Cl100k(bpe) => bpe
                .encode_with_special_tokens(text)
                .into_iter()
                .map(|t| t as usize)
                .collect(),
            Encoder::Heuristic { chars_per_token } => {
                let chars: Vec<char> = text.chars().collect();
                (0..chars.len().div_ceil(*chars_per_token)).collect()
            }
        }
    }

    pub fn decode(&self, tokens: Vec<usize>) -> Result<String> {
        match self.encoder.as_ref() {
            Encoder::Cl100k(bpe) => bpe
                .decode(tokens.into_iter().map(|t| t as u32).collect())
                .map_err(|e| PipelineError::Tokenizer(e.to_string())),
            Encoder::Heuristic { .. } => Err(PipelineError::Tokenizer(
                "heuristic encoder cannot decode".to_string(),
            )),
        }
    }

    /// Longest prefix of `text` (on a char boundary) whose token count stays
    /// within `max_tokens`. Binary search keeps this O(log n) counts and
    /// encoder-agnostic, which also makes the result deterministic across
    /// backends.
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        if self.count(text) <= max_tokens {
            return text.to_string();
        }

        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut lo = 0usize; // always fits
        let mut hi = boundaries.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count(&text[..boundaries[mid]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        text[..boundaries[lo]].to_string()
    }
}
