use thiserror::Error;

/// Errors that abort the current render.
///
/// Per-file problems (parse failures, tokenizer hiccups) are *not* raised
/// through this type; they are recorded as [`Diagnostics`] warnings and the
/// affected file degrades to raw text. Cache failures never surface at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("path parse error in `{raw}`: {message}")]
    PathParse { raw: String, message: String },

    #[error("path resolution error for `{path}`: {message}")]
    PathResolution { path: String, message: String },

    #[error("scope not found: `{scope}`")]
    ScopeNotFound { scope: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("adapter error for `{path}`: {message}")]
    Adapter { path: String, message: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Collector for non-fatal issues; ends up in `RunResult.diagnostics.warnings`.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        crate::debug_log!("[warn] {message}");
        self.warnings.push(message);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }
}
