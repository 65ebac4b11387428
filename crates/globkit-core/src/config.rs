use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Runtime configuration for the globkit CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// How a compile pass orders the hoisted import blocks of sibling directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// One-shot production compile: declaration order.
    #[default]
    Build,
    /// Incremental dev session: session registration order, newest first.
    Serve,
}

impl CompileMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Serve => "serve",
        }
    }
}

impl std::str::FromStr for CompileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "serve" => Ok(Self::Serve),
            other => Err(format!("unknown compile mode '{other}' (expected build or serve)")),
        }
    }
}

/// Alias table: token → filesystem root.
///
/// A token applies to a pattern when the pattern equals the token or starts
/// with the token followed by `/`. The longest matching token wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    entries: BTreeMap<String, PathBuf>,
}

impl AliasTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an alias. A trailing `/` on the token is ignored.
    pub fn insert(&mut self, token: impl Into<String>, root: impl Into<PathBuf>) {
        let token = token.into();
        let token = token.trim_end_matches('/').to_string();
        if token.is_empty() {
            return;
        }
        self.entries.insert(token, root.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Find the alias a pattern starts with.
    ///
    /// Returns `(token, root, rest)` where `rest` is the pattern after `token/`.
    #[must_use]
    pub fn lookup<'a>(&'a self, pattern: &'a str) -> Option<(&'a str, &'a Path, &'a str)> {
        self.entries
            .iter()
            .filter_map(|(token, root)| {
                if pattern == token {
                    Some((token.as_str(), root.as_path(), ""))
                } else {
                    pattern
                        .strip_prefix(token.as_str())
                        .and_then(|rest| rest.strip_prefix('/'))
                        .map(|rest| (token.as_str(), root.as_path(), rest))
                }
            })
            .max_by_key(|(token, _, _)| token.len())
    }
}

/// Configuration consumed by the glob compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobConfig {
    /// Project root: anchors `/`-prefixed patterns and `as: 'url'` bindings.
    pub root: PathBuf,

    /// Build-time alias substitutions.
    pub alias: AliasTable,

    /// Sibling ordering mode.
    pub mode: CompileMode,
}

impl GlobConfig {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: globkit_util::path::normalize(&root),
            alias: AliasTable::new(),
            mode: CompileMode::default(),
        }
    }

    /// Add an alias. Relative roots are taken relative to the project root.
    #[must_use]
    pub fn with_alias(mut self, token: impl Into<String>, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let abs = if root.is_absolute() {
            root.to_path_buf()
        } else {
            self.root.join(root)
        };
        self.alias
            .insert(token, globkit_util::path::normalize(&abs));
        self
    }

    /// Set the compile mode.
    #[must_use]
    pub fn with_mode(mut self, mode: CompileMode) -> Self {
        self.mode = mode;
        self
    }
}
