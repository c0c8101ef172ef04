//! Error types shared by every stage of the pipeline.

use thiserror::Error;

/// Everything that can go wrong while compiling or rendering a template.
///
/// None of these are recovered internally: a failing compile or render
/// aborts and hands the error back to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A `{{`, `{%` or `{#` was opened but never closed.
    #[error("line {line}: unterminated {delimiter} delimiter")]
    Tokenize { line: usize, delimiter: &'static str },

    /// Structural problem found while building the node tree.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A dotted path could not be resolved against the context.
    #[error("cannot resolve '{path}': {reason}")]
    Resolution { path: String, reason: String },

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// A `for` loop was asked to iterate something that is not a sequence.
    #[error("'{expr}' is not iterable (found {kind})")]
    NotIterable { expr: String, kind: &'static str },

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A template (transitively) extends itself.
    #[error("template inheritance cycle: {}", .0.join(" -> "))]
    ExtendsCycle(Vec<String>),

    /// Block overrides and `{% super %}` splices expand into each other,
    /// listed as `template:block`.
    #[error("block expansion cycle: {}", .0.join(" -> "))]
    BlockCycle(Vec<String>),

    /// A template (transitively) includes itself.
    #[error("template include cycle: {}", .0.join(" -> "))]
    IncludeCycle(Vec<String>),

    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parse<S: Into<String>>(line: usize, message: S) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn resolution<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::Resolution {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
