//! Pattern resolution: directive patterns → sorted, deduplicated match set.

use crate::config::GlobConfig;
use crate::directive::GlobDirective;
use crate::error::{GlobError, Result};
use crate::specifier::{self, Anchor};
use globkit_util::path::{normalize, to_slash};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Directory excluded from matches unless a pattern names it.
pub const DEPENDENCY_DIR: &str = "node_modules";

/// Directories never traversed.
const SKIPPED_DIRS: &[&str] = &[".git"];

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// One matched file and its mapping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedFile {
    pub absolute_path: PathBuf,
    pub specifier: String,
}

/// Files matched by one directive, sorted by specifier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchSet {
    pub files: Vec<MatchedFile>,
    /// Compiled patterns the set was produced from.
    #[serde(skip)]
    pub patterns: Vec<CompiledPattern>,
}

impl MatchSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.absolute_path == path)
    }
}

/// A single brace-free pattern, anchored and split into literal base + glob remainder.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// The pattern as written in the directive (before brace expansion).
    pub raw: String,
    /// `!`-prefixed exclusion.
    pub negated: bool,
    pub anchor: Anchor,
    /// Absolute directory (or file, when `matcher` is `None`) the pattern is rooted at.
    pub base: PathBuf,
    /// Glob for paths below `base`; `None` for a literal file pattern.
    pub matcher: Option<glob::Pattern>,
    /// The pattern names `node_modules` literally.
    pub allows_dependency_dir: bool,
}

impl CompiledPattern {
    /// Whether `path` (absolute, normalized) is matched by this pattern.
    ///
    /// Pure path test: does not check that the file exists.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Some(matcher) = &self.matcher else {
            return path == self.base;
        };
        let Ok(rel) = path.strip_prefix(&self.base) else {
            return false;
        };
        let rel = to_slash(rel);
        if rel.is_empty() {
            return false;
        }
        for segment in rel.split('/') {
            if SKIPPED_DIRS.contains(&segment) {
                return false;
            }
            if segment == DEPENDENCY_DIR && !self.allows_dependency_dir {
                return false;
            }
        }
        matcher.matches_with(&rel, MATCH_OPTIONS)
    }

    /// List existing files matched by this pattern.
    fn expand(&self) -> Vec<PathBuf> {
        if self.matcher.is_none() {
            return if self.base.is_file() {
                vec![self.base.clone()]
            } else {
                Vec::new()
            };
        }
        if !self.base.is_dir() {
            return Vec::new();
        }

        let allows_dependency_dir = self.allows_dependency_dir;
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(SKIPPED_DIRS.contains(&name.as_ref())
                    || (name == DEPENDENCY_DIR && !allows_dependency_dir))
            })
            .filter_map(std::result::Result::ok)
        {
            // Symlinked files are followed; symlinked directories are not walked.
            if !entry.path().is_file() {
                continue;
            }
            let path = normalize(entry.path());
            if self.matches(&path) {
                files.push(path);
            }
        }
        files
    }
}

/// Anchor, split and compile every pattern of a directive.
///
/// Brace alternatives (`{a,b}`) expand to one compiled pattern each.
pub fn compile_patterns(directive: &GlobDirective, config: &GlobConfig) -> Result<Vec<CompiledPattern>> {
    let mut compiled = Vec::new();
    for raw in &directive.patterns {
        let syntax_error = |message: String| GlobError::PatternSyntax {
            file: directive.declaring_file.clone(),
            pattern: raw.clone(),
            message,
        };

        let (negated, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        if body.is_empty() {
            return Err(syntax_error("empty pattern".to_string()));
        }

        for alternative in expand_braces(body).map_err(&syntax_error)? {
            let (anchor, anchor_dir, rest) = anchor_pattern(&alternative, directive, config)
                .ok_or_else(|| {
                    syntax_error(
                        "pattern must start with './', '../', '/' or an alias".to_string(),
                    )
                })?;

            let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
            let literal_len = segments
                .iter()
                .take_while(|s| !s.contains(['*', '?', '[']))
                .count();
            let base = normalize(&segments[..literal_len].iter().fold(anchor_dir, |acc, s| acc.join(s)));
            let remainder = segments[literal_len..].join("/");

            let matcher = if remainder.is_empty() {
                None
            } else {
                Some(glob::Pattern::new(&remainder).map_err(|e| syntax_error(e.to_string()))?)
            };

            compiled.push(CompiledPattern {
                raw: raw.clone(),
                negated,
                anchor,
                base,
                matcher,
                allows_dependency_dir: segments.contains(&DEPENDENCY_DIR),
            });
        }
    }
    Ok(compiled)
}

fn anchor_pattern(
    pattern: &str,
    directive: &GlobDirective,
    config: &GlobConfig,
) -> Option<(Anchor, PathBuf, String)> {
    if let Some((token, root, rest)) = config.alias.lookup(pattern) {
        let anchor = Anchor::Alias {
            token: token.to_string(),
            root: root.to_path_buf(),
        };
        return Some((anchor, root.to_path_buf(), rest.to_string()));
    }
    if pattern.starts_with("./") || pattern.starts_with("../") {
        return Some((
            Anchor::Relative,
            directive.declaring_dir().to_path_buf(),
            pattern.to_string(),
        ));
    }
    pattern
        .strip_prefix('/')
        .map(|rest| (Anchor::Root, config.root.clone(), rest.to_string()))
}

/// Expand `{a,b}` alternations, left to right, nesting allowed.
fn expand_braces(pattern: &str) -> std::result::Result<Vec<String>, String> {
    let Some(open) = pattern.find('{') else {
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, ch) in pattern[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(open + i),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| "unclosed '{' in pattern".to_string())?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut out: Vec<String> = Vec::new();
    for pair in bounds.windows(2) {
        let alternative = &pattern[pair[0] + 1..pair[1]];
        for expanded in expand_braces(&format!("{prefix}{alternative}{suffix}"))? {
            if !out.contains(&expanded) {
                out.push(expanded);
            }
        }
    }
    Ok(out)
}

/// Resolve a directive against the current filesystem.
///
/// Matches from all patterns are merged; the first pattern that produced a path
/// decides its specifier. Exclusion patterns, the dependency directory rule and
/// the declaring file itself are filtered out. The result is sorted by specifier.
pub fn resolve(directive: &GlobDirective, config: &GlobConfig) -> Result<MatchSet> {
    let patterns = compile_patterns(directive, config)?;
    let (exclusions, inclusions): (Vec<&CompiledPattern>, Vec<&CompiledPattern>) =
        patterns.iter().partition(|p| p.negated);

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut by_specifier: BTreeMap<String, PathBuf> = BTreeMap::new();

    for pattern in inclusions {
        for path in pattern.expand() {
            if path == directive.declaring_file || exclusions.iter().any(|e| e.matches(&path)) {
                continue;
            }
            if !seen.insert(path.clone()) {
                continue;
            }
            let specifier = specifier::normalize(&path, &pattern.anchor, directive, config);
            trace!(pattern = %pattern.raw, specifier = %specifier, "Glob match");
            if let Some(first) = by_specifier.get(&specifier) {
                return Err(GlobError::ResolutionConflict {
                    file: directive.declaring_file.clone(),
                    specifier,
                    first: first.clone(),
                    second: path,
                });
            }
            by_specifier.insert(specifier, path);
        }
    }

    let files: Vec<MatchedFile> = by_specifier
        .into_iter()
        .map(|(specifier, absolute_path)| MatchedFile {
            absolute_path,
            specifier,
        })
        .collect();

    debug!(
        file = %directive.declaring_file.display(),
        directive = %directive.id,
        count = files.len(),
        "Resolved glob directive"
    );

    Ok(MatchSet { files, patterns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse_directive;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export default 1;\n").unwrap();
    }

    fn resolve_in(root: &Path, call: &str, config: &GlobConfig) -> Result<MatchSet> {
        let file = root.join("src/main.js");
        let d = parse_directive(call, &file).unwrap().unwrap();
        resolve(&d, config)
    }

    fn specifiers(set: &MatchSet) -> Vec<&str> {
        set.files.iter().map(|f| f.specifier.as_str()).collect()
    }

    #[test]
    fn test_single_segment_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/main.js");
        touch(&root, "src/dir/b.js");
        touch(&root, "src/dir/a.js");
        touch(&root, "src/dir/nested/c.js");
        touch(&root, "src/dir/d.ts");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./dir/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/a.js", "./dir/b.js"]);
    }

    #[test]
    fn test_recursive_wildcard_keeps_nested_segments() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/dir/a.js");
        touch(&root, "src/dir/nested/deep/c.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./dir/**/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/a.js", "./dir/nested/deep/c.js"]);
    }

    #[test]
    fn test_declaring_file_never_matches_itself() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/main.js");
        touch(&root, "src/other.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./other.js"]);
    }

    #[test]
    fn test_dependency_dir_excluded_unless_named() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/lib/a.js");
        touch(&root, "src/lib/node_modules/pkg/index.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./lib/**/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./lib/a.js"]);

        let set =
            resolve_in(&root, "import.meta.glob('./lib/node_modules/**/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./lib/node_modules/pkg/index.js"]);
    }

    #[test]
    fn test_alias_and_relative_merge_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/foo.js");
        touch(&root, "src/dir/alias.js");

        let config = GlobConfig::new(root.clone()).with_alias("@dir", "src/dir");
        let set = resolve_in(
            &root,
            "import.meta.glob(['@dir/alias.js', './*.js'])",
            &config,
        )
        .unwrap();
        assert_eq!(specifiers(&set), vec!["./foo.js", "@dir/alias.js"]);
    }

    #[test]
    fn test_first_pattern_names_duplicate_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/dir/a.js");

        let config = GlobConfig::new(root.clone()).with_alias("@dir", "src/dir");
        let set = resolve_in(&root, "import.meta.glob(['@dir/*.js', './dir/*.js'])", &config)
            .unwrap();
        assert_eq!(specifiers(&set), vec!["@dir/a.js"]);

        let set = resolve_in(&root, "import.meta.glob(['./dir/*.js', '@dir/*.js'])", &config)
            .unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/a.js"]);
    }

    #[test]
    fn test_negated_pattern_and_braces() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/dir/a.js");
        touch(&root, "src/dir/b.ts");
        touch(&root, "src/dir/c.css");
        touch(&root, "src/dir/skip.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(
            &root,
            "import.meta.glob(['./dir/*.{js,ts}', '!./dir/skip.js'])",
            &config,
        )
        .unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/a.js", "./dir/b.ts"]);
    }

    #[test]
    fn test_root_anchored_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "assets/x.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('/assets/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["/assets/x.js"]);
    }

    #[test]
    fn test_empty_match_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./missing/*.js')", &config).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_malformed_pattern_names_file_and_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        let config = GlobConfig::new(root.clone());

        let err = resolve_in(&root, "import.meta.glob('./dir/[a.js')", &config).unwrap_err();
        match err {
            GlobError::PatternSyntax { file, pattern, .. } => {
                assert_eq!(file, root.join("src/main.js"));
                assert_eq!(pattern, "./dir/[a.js");
            }
            other => panic!("expected PatternSyntax, got {other:?}"),
        }

        let err = resolve_in(&root, "import.meta.glob('dir/*.js')", &config).unwrap_err();
        assert!(matches!(err, GlobError::PatternSyntax { .. }));

        let err = resolve_in(&root, "import.meta.glob('./dir/{a,b.js')", &config).unwrap_err();
        assert!(matches!(err, GlobError::PatternSyntax { .. }));
    }

    #[test]
    fn test_hidden_files_need_explicit_dot() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        touch(&root, "src/dir/.hidden.js");
        touch(&root, "src/dir/shown.js");

        let config = GlobConfig::new(root.clone());
        let set = resolve_in(&root, "import.meta.glob('./dir/*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/shown.js"]);
        let set = resolve_in(&root, "import.meta.glob('./dir/.*.js')", &config).unwrap();
        assert_eq!(specifiers(&set), vec!["./dir/.hidden.js"]);
    }

    #[test]
    fn test_compiled_pattern_matches_without_fs() {
        let d = parse_directive(
            "import.meta.glob('./dir/**/*.js')",
            Path::new("/project/src/main.js"),
        )
        .unwrap()
        .unwrap();
        let config = GlobConfig::new(PathBuf::from("/project"));
        let patterns = compile_patterns(&d, &config).unwrap();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.base, PathBuf::from("/project/src/dir"));
        assert!(p.matches(Path::new("/project/src/dir/new.js")));
        assert!(p.matches(Path::new("/project/src/dir/a/b/new.js")));
        assert!(!p.matches(Path::new("/project/src/dir/new.ts")));
        assert!(!p.matches(Path::new("/project/src/other/new.js")));
        assert!(!p.matches(Path::new("/project/src/dir/node_modules/x.js")));
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("./a/*.{js,ts}").unwrap(), vec!["./a/*.js", "./a/*.ts"]);
        assert_eq!(
            expand_braces("./{a,b/{c,d}}/x").unwrap(),
            vec!["./a/x", "./b/c/x", "./b/d/x"]
        );
        assert!(expand_braces("./{a").is_err());
    }
}
