use crate::codes;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias for glob-import operations.
pub type Result<T> = std::result::Result<T, GlobError>;

/// Errors surfaced while compiling a glob directive.
///
/// Every variant names the declaring module so callers can render a precise diagnostic.
#[derive(Error, Debug)]
pub enum GlobError {
    #[error("Invalid glob pattern {pattern:?} in {}: {message}", file.display())]
    PatternSyntax {
        file: PathBuf,
        pattern: String,
        message: String,
    },

    #[error("Failed to transform {} (globbed from {}): {message}", path.display(), file.display())]
    Transform {
        file: PathBuf,
        path: PathBuf,
        message: String,
    },

    #[error(
        "Specifier {specifier:?} in {} resolves to both {} and {}",
        file.display(),
        first.display(),
        second.display()
    )]
    ResolutionConflict {
        file: PathBuf,
        specifier: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Circular eager glob import: {}", format_chain(chain))]
    Cycle { chain: Vec<PathBuf> },

    #[error("Invalid import.meta.glob call in {}: {message}", file.display())]
    InvalidDirective { file: PathBuf, message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GlobError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PatternSyntax { .. } => codes::GLOB_PATTERN_SYNTAX,
            Self::Transform { .. } => codes::GLOB_TRANSFORM,
            Self::ResolutionConflict { .. } => codes::GLOB_RESOLUTION_CONFLICT,
            Self::Cycle { .. } => codes::GLOB_CYCLE,
            Self::InvalidDirective { .. } => codes::GLOB_INVALID_DIRECTIVE,
            Self::Io { .. } => codes::GLOB_IO,
        }
    }

    /// The module the diagnostic should be attached to.
    #[must_use]
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            Self::PatternSyntax { file, .. }
            | Self::Transform { file, .. }
            | Self::ResolutionConflict { file, .. }
            | Self::InvalidDirective { file, .. } => Some(file),
            Self::Cycle { chain } => chain.first(),
            Self::Io { path, .. } => Some(path),
        }
    }

    /// Every file named by the error, the declaring module included.
    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::PatternSyntax { file, .. } | Self::InvalidDirective { file, .. } => {
                vec![file.as_path()]
            }
            Self::Transform { file, path, .. } => vec![file.as_path(), path.as_path()],
            Self::ResolutionConflict {
                file, first, second, ..
            } => vec![file.as_path(), first.as_path(), second.as_path()],
            Self::Cycle { chain } => chain.iter().map(PathBuf::as_path).collect(),
            Self::Io { path, .. } => vec![path.as_path()],
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
