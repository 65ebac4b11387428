//! Command implementations.

pub mod compile;
pub mod report;
pub mod version;
pub mod watch;

use globkit_core::{Config, GlobConfig};
use miette::{miette, Result};
use std::path::{Path, PathBuf};

/// Resolve `path` against the working directory and canonicalize it when it exists.
pub fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    dunce::canonicalize(&joined).unwrap_or(joined)
}

/// Build the compiler configuration from CLI flags.
pub fn glob_config(config: &Config, root: Option<PathBuf>, aliases: &[String]) -> Result<GlobConfig> {
    let root = absolute(&config.cwd, root.as_deref().unwrap_or(Path::new(".")));
    let mut glob = GlobConfig::new(root);
    for raw in aliases {
        let (token, dir) = parse_alias(raw)?;
        glob = glob.with_alias(token, dir);
    }
    Ok(glob)
}

fn parse_alias(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((token, dir)) if !token.is_empty() && !dir.is_empty() => Ok((token, dir)),
        _ => Err(miette!(
            code = "GLOB_INVALID_ALIAS",
            "invalid alias '{raw}' (expected TOKEN=DIR)"
        )),
    }
}
