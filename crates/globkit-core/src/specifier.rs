//! Specifier normalization: the key each matched file gets in the generated mapping.

use crate::config::GlobConfig;
use crate::directive::GlobDirective;
use globkit_util::path::{relative_slash, relative_specifier, to_slash};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a pattern is rooted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Anchor {
    /// `./` or `../`: the declaring file's directory.
    Relative,
    /// An alias token and its configured root.
    Alias { token: String, root: PathBuf },
    /// `/`: the project root.
    Root,
}

/// Compute the mapping key for `path`, matched through a pattern with `anchor`.
///
/// Relative anchors yield `./`/`../` paths from the declaring directory, alias
/// anchors keep the alias-rooted form, root anchors yield `/`-prefixed paths.
#[must_use]
pub fn normalize(path: &Path, anchor: &Anchor, directive: &GlobDirective, config: &GlobConfig) -> String {
    match anchor {
        Anchor::Relative => relative_specifier(directive.declaring_dir(), path)
            .unwrap_or_else(|| to_slash(path)),
        Anchor::Alias { token, root } => match relative_slash(root, path) {
            Some(rel) if rel.is_empty() => token.clone(),
            Some(rel) => format!("{token}/{rel}"),
            None => to_slash(path),
        },
        Anchor::Root => root_url(path, &config.root),
    }
}

/// `/`-prefixed path of `path` relative to the project root.
#[must_use]
pub fn root_url(path: &Path, root: &Path) -> String {
    match relative_slash(root, path) {
        Some(rel) if !rel.starts_with("..") => format!("/{rel}"),
        _ => to_slash(path),
    }
}
