//! Lexical path helpers.
//!
//! Nothing here touches the filesystem: paths that no longer exist (a removed
//! file reported by a watcher) normalize the same way as live ones.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path, folding `.` and `..` components.
///
/// `..` at the root is dropped, matching how the OS resolves `/..`.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path with forward slashes regardless of platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => out.push('/'),
            Component::CurDir => push_segment(&mut out, "."),
            Component::ParentDir => push_segment(&mut out, ".."),
            Component::Normal(name) => push_segment(&mut out, &name.to_string_lossy()),
        }
    }
    out
}

fn push_segment(out: &mut String, segment: &str) {
    if !out.is_empty() && !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(segment);
}

/// Express `to` relative to the directory `from_dir`, with forward slashes.
///
/// Both paths are normalized first. Returns `None` when they share no root
/// (different drives on Windows, or one relative and one absolute).
#[must_use]
pub fn relative_slash(from_dir: &Path, to: &Path) -> Option<String> {
    let from = normalize(from_dir);
    let to = normalize(to);
    if from.has_root() != to.has_root() {
        return None;
    }

    let from_parts: Vec<Component<'_>> = from.components().collect();
    let to_parts: Vec<Component<'_>> = to.components().collect();

    if let (Some(Component::Prefix(a)), Some(Component::Prefix(b))) =
        (from_parts.first(), to_parts.first())
    {
        if a != b {
            return None;
        }
    }

    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<String> = Vec::new();
    for _ in common..from_parts.len() {
        segments.push("..".to_string());
    }
    for part in &to_parts[common..] {
        segments.push(part.as_os_str().to_string_lossy().into_owned());
    }
    Some(segments.join("/"))
}

/// Like [`relative_slash`], but always prefixed with `./` or `../`.
#[must_use]
pub fn relative_specifier(from_dir: &Path, to: &Path) -> Option<String> {
    let rel = relative_slash(from_dir, to)?;
    if rel.starts_with("../") || rel == ".." {
        Some(rel)
    } else {
        Some(format!("./{rel}"))
    }
}
