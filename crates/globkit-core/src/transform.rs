//! Per-file-type transformer capabilities, looked up by extension.
//!
//! The compiler only needs a transformer's export surface: which names a
//! direct import of the file would expose. Producing executable output is the
//! job of the surrounding pipeline.

use crate::directive::{is_ident_byte, skip_string, skip_whitespace, CONTINUES_EXPRESSION};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Names a module exposes to a direct reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSurface {
    pub has_default: bool,
    pub named: BTreeSet<String>,
}

impl ExportSurface {
    /// Whether `name` (including `default`) is exported.
    #[must_use]
    pub fn exports(&self, name: &str) -> bool {
        if name == "default" {
            self.has_default
        } else {
            self.named.contains(name)
        }
    }
}

/// A type-specific content transformer.
pub trait Transformer: Send + Sync {
    /// Stable name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Compute the export surface of `source`, or a transform-specific diagnostic.
    fn transform(&self, path: &Path, source: &str) -> Result<ExportSurface, String>;

    /// Whether the transformed output is a script that may contain glob directives.
    fn is_script(&self) -> bool {
        false
    }
}

/// Extension → transformer lookup table.
#[derive(Clone)]
pub struct TransformerRegistry {
    by_ext: BTreeMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Registry with no transformers: every file falls back to raw.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_ext: BTreeMap::new(),
        }
    }

    /// Registry with the script, JSON and CSS transformers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let script: Arc<dyn Transformer> = Arc::new(ScriptTransformer);
        for ext in SCRIPT_EXTENSIONS {
            registry.register(ext, script.clone());
        }
        registry.register("json", Arc::new(JsonTransformer));
        registry.register("css", Arc::new(CssTransformer));
        registry
    }

    /// Add or replace the transformer for an extension (without the dot).
    pub fn register(&mut self, ext: &str, transformer: Arc<dyn Transformer>) {
        self.by_ext
            .insert(ext.trim_start_matches('.').to_ascii_lowercase(), transformer);
    }

    /// Transformer for a path's extension, if any.
    #[must_use]
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Transformer>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_ext.get(&ext).cloned()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_ext.iter().map(|(ext, t)| (ext, t.name())))
            .finish()
    }
}

const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "ts", "tsx", "mts", "cts"];

/// JavaScript/TypeScript modules: export surface from `export` statements.
pub struct ScriptTransformer;

impl Transformer for ScriptTransformer {
    fn name(&self) -> &'static str {
        "script"
    }

    fn transform(&self, _path: &Path, source: &str) -> Result<ExportSurface, String> {
        Ok(scan_exports(source))
    }

    fn is_script(&self) -> bool {
        true
    }
}

/// JSON modules: default export plus identifier-safe top-level keys.
pub struct JsonTransformer;

impl Transformer for JsonTransformer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn transform(&self, _path: &Path, source: &str) -> Result<ExportSurface, String> {
        let value: serde_json::Value =
            serde_json::from_str(source).map_err(|e| format!("invalid JSON: {e}"))?;
        let mut surface = ExportSurface {
            has_default: true,
            ..Default::default()
        };
        if let Some(obj) = value.as_object() {
            surface
                .named
                .extend(obj.keys().filter(|k| is_identifier(k)).cloned());
        }
        Ok(surface)
    }
}

/// Stylesheets: the CSS text as the default export.
pub struct CssTransformer;

impl Transformer for CssTransformer {
    fn name(&self) -> &'static str {
        "css"
    }

    fn transform(&self, _path: &Path, _source: &str) -> Result<ExportSurface, String> {
        Ok(ExportSurface {
            has_default: true,
            ..Default::default()
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$')
        && bytes.all(is_ident_byte)
}

/// Scan `export` statements for exported names, skipping comments and strings.
fn scan_exports(source: &str) -> ExportSurface {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut surface = ExportSurface::default();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'e' if source[i..].starts_with("export")
                && (i == 0 || !is_ident_byte(bytes[i - 1]))
                && bytes.get(i + 6).map_or(true, |b| !is_ident_byte(*b)) =>
            {
                i = scan_export_clause(source, i + 6, &mut surface);
            }
            _ => i += 1,
        }
    }

    surface
}

fn read_ident(source: &str, pos: usize) -> Option<(&str, usize)> {
    let bytes = source.as_bytes();
    let start = skip_whitespace(bytes, pos);
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    (end > start).then(|| (&source[start..end], end))
}

fn scan_export_clause(source: &str, pos: usize, surface: &mut ExportSurface) -> usize {
    let bytes = source.as_bytes();
    let start = skip_whitespace(bytes, pos);

    if bytes.get(start) == Some(&b'{') {
        let Some(close) = source[start..].find('}') else {
            return bytes.len();
        };
        for item in source[start + 1..start + close].split(',') {
            let words: Vec<&str> = item.split_whitespace().collect();
            let exported = match words.as_slice() {
                [] => continue,
                [_, "as", alias] => *alias,
                [name, ..] => *name,
            };
            let exported = exported.trim_matches(|c| c == '"' || c == '\'');
            if exported == "default" {
                surface.has_default = true;
            } else if words.first() != Some(&"type") {
                surface.named.insert(exported.to_string());
            }
        }
        return start + close + 1;
    }

    if bytes.get(start) == Some(&b'*') {
        if let Some((word, end)) = read_ident(source, start + 1) {
            if word == "as" {
                if let Some((name, end)) = read_ident(source, end) {
                    surface.named.insert(name.to_string());
                    return end;
                }
            }
            return end;
        }
        return start + 1;
    }

    let Some((mut word, mut end)) = read_ident(source, start) else {
        return start;
    };
    match word {
        "default" => {
            surface.has_default = true;
            return end;
        }
        "type" | "interface" | "declare" => return end,
        _ => {}
    }
    if word == "async" {
        match read_ident(source, end) {
            Some((next, next_end)) => (word, end) = (next, next_end),
            None => return end,
        }
    }
    if word == "const" {
        if let Some(("enum", enum_end)) = read_ident(source, end) {
            (word, end) = ("enum", enum_end);
        }
    }
    if matches!(word, "const" | "let" | "var") {
        return scan_declarators(source, end, surface);
    }
    if matches!(word, "function" | "class" | "enum") {
        let mut name_pos = end;
        if word == "function" {
            name_pos = skip_whitespace(bytes, name_pos);
            if bytes.get(name_pos) == Some(&b'*') {
                name_pos += 1;
            }
        }
        if let Some((name, name_end)) = read_ident(source, name_pos) {
            surface.named.insert(name.to_string());
            return name_end;
        }
    }
    end
}

/// Record every name bound by a `const`/`let`/`var` declarator list.
fn scan_declarators(source: &str, mut pos: usize, surface: &mut ExportSurface) -> usize {
    let bytes = source.as_bytes();
    loop {
        pos = skip_whitespace(bytes, pos);
        if matches!(bytes.get(pos), Some(b'{' | b'[')) {
            let end = skip_bracketed(bytes, pos);
            let inner = &source[pos + 1..end];
            let inner = inner.strip_suffix(['}', ']']).unwrap_or(inner);
            collect_pattern_names(inner, surface);
            pos = end;
        } else {
            let Some((name, end)) = read_ident(source, pos) else {
                return pos;
            };
            surface.named.insert(name.to_string());
            pos = end;
        }

        pos = skip_initializer(bytes, pos);
        if bytes.get(pos) != Some(&b',') {
            return pos;
        }
        pos += 1;
    }
}

/// Names bound by the inside of a destructuring pattern (`{ a, b: c, ...d }` or `[a, , b = 1]`).
fn collect_pattern_names(pattern: &str, surface: &mut ExportSurface) {
    for element in split_top_level(pattern, b',') {
        let element = element.trim().trim_start_matches("...");
        let target = match find_top_level(element, b':') {
            Some(colon) => &element[colon + 1..],
            None => element,
        };
        let target = match find_top_level(target, b'=') {
            Some(eq) => &target[..eq],
            None => target,
        }
        .trim();

        if let Some(inner) = target.strip_prefix(['{', '[']) {
            collect_pattern_names(inner.strip_suffix(['}', ']']).unwrap_or(inner), surface);
        } else if is_identifier(target) {
            surface.named.insert(target.to_string());
        }
    }
}

fn split_top_level(s: &str, sep: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(at) = find_top_level(rest, sep) {
        parts.push(&rest[..at]);
        rest = &rest[at + 1..];
    }
    parts.push(rest);
    parts
}

/// Offset of the first `sep` outside brackets and strings.
fn find_top_level(s: &str, sep: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b if b == sep && depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Offset just past the bracket closing the one at `open`.
fn skip_bracketed(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Skip an optional `= expression`; stops at the `,` or `;` ending the declarator.
fn skip_initializer(bytes: &[u8], pos: usize) -> usize {
    let mut i = skip_whitespace(bytes, pos);
    if bytes.get(i) != Some(&b'=') {
        return i;
    }
    i += 1;
    let mut depth = 0usize;
    let mut last = b'=';
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                last = b'"';
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth == 0 => return i,
            b')' | b']' | b'}' => depth -= 1,
            b',' | b';' if depth == 0 => return i,
            b'\n' if depth == 0 && !CONTINUES_EXPRESSION.contains(&last) => return i,
            _ => {}
        }
        if !bytes[i].is_ascii_whitespace() {
            last = bytes[i];
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_scan_exports_declarations() {
        let surface = scan_exports(
            "export const msg = 'foo';\nexport function setup() {}\nexport async function load() {}\nexport class Widget {}\nexport default 42;\n",
        );
        assert!(surface.has_default);
        assert_eq!(
            surface.named.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Widget", "load", "msg", "setup"]
        );
    }

    fn names(source: &str) -> Vec<String> {
        scan_exports(source).named.into_iter().collect()
    }

    #[test]
    fn test_scan_exports_every_declarator() {
        assert_eq!(
            names("export const a = 1, b = f(2, 3), c = { d: 4 };\nexport let e, g = [5, 6];\n"),
            vec!["a", "b", "c", "e", "g"]
        );
        assert_eq!(
            names("export const a = 1\nconst hidden = 2\nexport var b = a +\n  1, c = 3\n"),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_scan_exports_destructuring() {
        assert_eq!(
            names("export const { a, b: renamed, c = 1, ...rest } = obj, [first, , { deep }] = list;\n"),
            vec!["a", "c", "deep", "first", "renamed", "rest"]
        );
    }

    #[test]
    fn test_scan_exports_const_enum() {
        assert_eq!(names("export const enum Color { Red }\n"), vec!["Color"]);
    }

    #[test]
    fn test_scan_exports_clauses() {
        let surface = scan_exports(
            "const a = 1, b = 2;\nexport { a, b as c, a as default };\nexport * as ns from './x.js';\nexport * from './y.js';\n",
        );
        assert!(surface.has_default);
        assert!(surface.exports("a"));
        assert!(surface.exports("c"));
        assert!(surface.exports("ns"));
        assert!(!surface.exports("b"));
    }

    #[test]
    fn test_scan_exports_ignores_comments_and_strings() {
        let surface = scan_exports("// export const a = 1;\nconst s = 'export const b = 2';\n");
        assert_eq!(surface, ExportSurface::default());
    }

    #[test]
    fn test_scan_exports_glob_binding() {
        let surface =
            scan_exports("export const modules = import.meta.glob('./nested/*.js', { eager: true });");
        assert!(surface.exports("modules"));
    }

    #[test]
    fn test_json_transformer() {
        let t = JsonTransformer;
        let surface = t
            .transform(Path::new("data.json"), r#"{"name": "x", "not-ident": 1}"#)
            .unwrap();
        assert!(surface.has_default);
        assert!(surface.exports("name"));
        assert!(!surface.exports("not-ident"));

        let err = t.transform(Path::new("bad.json"), "{ nope").unwrap_err();
        assert!(err.contains("invalid JSON"));
    }

    #[test]
    fn test_registry_lookup_by_extension() {
        let registry = TransformerRegistry::with_builtins();
        assert_eq!(
            registry.for_path(&PathBuf::from("/p/a.TSX")).unwrap().name(),
            "script"
        );
        assert_eq!(registry.for_path(&PathBuf::from("/p/a.json")).unwrap().name(), "json");
        assert_eq!(registry.for_path(&PathBuf::from("/p/a.css")).unwrap().name(), "css");
        assert!(registry.for_path(&PathBuf::from("/p/a.md")).is_none());
        assert!(registry.for_path(&PathBuf::from("/p/Makefile")).is_none());
    }

    #[test]
    fn test_registry_transformers_are_swappable() {
        struct Markdown;
        impl Transformer for Markdown {
            fn name(&self) -> &'static str {
                "markdown"
            }
            fn transform(&self, _: &Path, _: &str) -> Result<ExportSurface, String> {
                Ok(ExportSurface::default())
            }
        }

        let mut registry = TransformerRegistry::with_builtins();
        registry.register(".md", Arc::new(Markdown));
        assert_eq!(registry.for_path(Path::new("a.md")).unwrap().name(), "markdown");
    }
}
