//! Load-mode classification: how each matched file is exposed in the mapping.

use crate::config::GlobConfig;
use crate::directive::{GlobDirective, ImportAs};
use crate::error::{GlobError, Result};
use crate::resolve::MatchedFile;
use crate::specifier::root_url;
use crate::transform::{ExportSurface, TransformerRegistry};
use globkit_util::fs::{read_source, read_to_string_lossy};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// How one matched file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    /// Static import hoisted into the declaring module.
    Eager,
    /// Deferred `import()` accessor.
    Lazy,
    /// File text as a string literal.
    Raw,
    /// Root-relative URL string literal.
    Url,
}

impl LoadKind {
    /// Whether the entry refers to a transformed module.
    #[must_use]
    pub fn is_module(self) -> bool {
        matches!(self, Self::Eager | Self::Lazy)
    }

    /// Whether the declaring module's output embeds a snapshot of the file.
    #[must_use]
    pub fn is_snapshot(self) -> bool {
        matches!(self, Self::Eager | Self::Raw)
    }
}

/// One entry of the generated mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadEntry {
    pub specifier: String,
    pub path: PathBuf,
    pub kind: LoadKind,
    /// JavaScript expression the mapping key is bound to.
    pub binding: String,
    /// Import declaration hoisted to the top of the declaring module.
    pub hoisted: Option<String>,
    /// Export surface computed by the transformer (eager entries only).
    pub exports: Option<ExportSurface>,
}

/// JSON-quote a string so it is also a valid JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_owned()).to_string()
}

/// Decide how `file` is loaded by `directive`.
///
/// `binding_name` is the identifier used for a hoisted eager import.
pub fn classify(
    file: &MatchedFile,
    directive: &GlobDirective,
    registry: &TransformerRegistry,
    config: &GlobConfig,
    binding_name: &str,
) -> Result<LoadEntry> {
    let path = &file.absolute_path;
    let spec = js_string(&file.specifier);

    let entry = |kind, binding, hoisted, exports| LoadEntry {
        specifier: file.specifier.clone(),
        path: path.clone(),
        kind,
        binding,
        hoisted,
        exports,
    };

    match directive.options.as_ {
        ImportAs::Raw => return raw_entry(file).map(|binding| entry(LoadKind::Raw, binding, None, None)),
        ImportAs::Url => {
            let url = js_string(&root_url(path, &config.root));
            return Ok(entry(LoadKind::Url, url, None, None));
        }
        ImportAs::Module => {}
    }

    let Some(transformer) = registry.for_path(path) else {
        debug!(path = %path.display(), "No transformer for extension, loading as raw");
        return raw_entry(file).map(|binding| entry(LoadKind::Raw, binding, None, None));
    };

    let import = directive.options.import.as_deref();

    if !directive.options.eager {
        let binding = match import {
            Some(name) => format!("() => import({spec}).then((m) => m[{}])", js_string(name)),
            None => format!("() => import({spec})"),
        };
        let hoisted = directive
            .side_effect_only
            .then(|| format!("import {spec};"));
        return Ok(entry(LoadKind::Lazy, binding, hoisted, None));
    }

    let source = read_source(path).map_err(|e| GlobError::io(path, e))?;
    let exports = transformer
        .transform(path, &source)
        .map_err(|message| GlobError::Transform {
            file: directive.declaring_file.clone(),
            path: path.clone(),
            message,
        })?;

    let hoisted = match import {
        None => format!("import * as {binding_name} from {spec};"),
        Some("default") => format!("import {binding_name} from {spec};"),
        Some(name) => {
            if !exports.exports(name) {
                warn!(
                    path = %path.display(),
                    export = name,
                    transformer = transformer.name(),
                    "Imported name not found in export surface"
                );
            }
            format!("import {{ {name} as {binding_name} }} from {spec};")
        }
    };

    Ok(entry(
        LoadKind::Eager,
        binding_name.to_string(),
        Some(hoisted),
        Some(exports),
    ))
}

fn raw_entry(file: &MatchedFile) -> Result<String> {
    let text = read_to_string_lossy(&file.absolute_path)
        .map_err(|e| GlobError::io(&file.absolute_path, e))?;
    Ok(js_string(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse_directive;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: GlobConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = globkit_util::path::normalize(dir.path());
        fs::create_dir_all(root.join("src/dir")).unwrap();
        fs::write(root.join("src/dir/a.js"), "export const msg = 'a';\nexport default 1;\n").unwrap();
        fs::write(root.join("src/dir/data.json"), "{\"name\": \"x\"}").unwrap();
        fs::write(root.join("src/dir/notes.md"), "# Notes\n\"quoted\"\n").unwrap();
        fs::write(root.join("src/dir/bad.json"), "{ nope").unwrap();
        let config = GlobConfig::new(root.clone());
        Fixture {
            _dir: dir,
            root,
            config,
        }
    }

    fn run(fx: &Fixture, call: &str, rel: &str) -> Result<LoadEntry> {
        let d = parse_directive(call, &fx.root.join("src/main.js")).unwrap().unwrap();
        let file = MatchedFile {
            absolute_path: fx.root.join(rel),
            specifier: format!("./{}", rel.trim_start_matches("src/")),
        };
        classify(
            &file,
            &d,
            &TransformerRegistry::with_builtins(),
            &fx.config,
            &d.binding_name(0),
        )
    }

    #[test]
    fn test_lazy_accessor() {
        let fx = fixture();
        let e = run(&fx, "const m = import.meta.glob('./dir/*.js')", "src/dir/a.js").unwrap();
        assert_eq!(e.kind, LoadKind::Lazy);
        assert_eq!(e.binding, r#"() => import("./dir/a.js")"#);
        assert!(e.hoisted.is_none());
        assert!(e.exports.is_none());
    }

    #[test]
    fn test_lazy_with_import_filter() {
        let fx = fixture();
        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.js', { import: 'msg' })",
            "src/dir/a.js",
        )
        .unwrap();
        assert_eq!(e.binding, r#"() => import("./dir/a.js").then((m) => m["msg"])"#);
    }

    #[test]
    fn test_eager_namespace_and_filters() {
        let fx = fixture();
        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.js', { eager: true })",
            "src/dir/a.js",
        )
        .unwrap();
        assert_eq!(e.kind, LoadKind::Eager);
        assert_eq!(e.binding, "__glob_0_0");
        assert_eq!(
            e.hoisted.as_deref(),
            Some(r#"import * as __glob_0_0 from "./dir/a.js";"#)
        );
        assert!(e.exports.as_ref().unwrap().exports("msg"));

        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.js', { eager: true, import: 'default' })",
            "src/dir/a.js",
        )
        .unwrap();
        assert_eq!(e.hoisted.as_deref(), Some(r#"import __glob_0_0 from "./dir/a.js";"#));

        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.js', { eager: true, import: 'msg' })",
            "src/dir/a.js",
        )
        .unwrap();
        assert_eq!(
            e.hoisted.as_deref(),
            Some(r#"import { msg as __glob_0_0 } from "./dir/a.js";"#)
        );
    }

    #[test]
    fn test_raw_is_verbatim_text() {
        let fx = fixture();
        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.json', { as: 'raw', eager: true })",
            "src/dir/data.json",
        )
        .unwrap();
        assert_eq!(e.kind, LoadKind::Raw);
        let decoded: String = serde_json::from_str(&e.binding).unwrap();
        assert_eq!(decoded, fs::read_to_string(fx.root.join("src/dir/data.json")).unwrap());
    }

    #[test]
    fn test_url_is_root_relative() {
        let fx = fixture();
        let e = run(
            &fx,
            "const m = import.meta.glob('./dir/*.md', { as: 'url' })",
            "src/dir/notes.md",
        )
        .unwrap();
        assert_eq!(e.kind, LoadKind::Url);
        assert_eq!(e.binding, r#""/src/dir/notes.md""#);
    }

    #[test]
    fn test_unknown_extension_falls_back_to_raw() {
        let fx = fixture();
        let e = run(&fx, "const m = import.meta.glob('./dir/*.md')", "src/dir/notes.md").unwrap();
        assert_eq!(e.kind, LoadKind::Raw);
        assert_eq!(e.binding, r##""# Notes\n\"quoted\"\n""##);
    }

    #[test]
    fn test_eager_transform_failure() {
        let fx = fixture();
        let err = run(
            &fx,
            "const m = import.meta.glob('./dir/*.json', { eager: true })",
            "src/dir/bad.json",
        )
        .unwrap_err();
        match err {
            GlobError::Transform { file, path, .. } => {
                assert_eq!(file, fx.root.join("src/main.js"));
                assert_eq!(path, fx.root.join("src/dir/bad.json"));
            }
            other => panic!("expected Transform, got {other:?}"),
        }
    }

    #[test]
    fn test_lazy_never_invokes_transformer() {
        let fx = fixture();
        let e = run(&fx, "const m = import.meta.glob('./dir/*.json')", "src/dir/bad.json").unwrap();
        assert_eq!(e.kind, LoadKind::Lazy);
    }

    #[test]
    fn test_side_effect_only_lazy_hoists_bare_import() {
        let fx = fixture();
        let e = run(&fx, "import.meta.glob('./dir/*.js')", "src/dir/a.js").unwrap();
        assert_eq!(e.hoisted.as_deref(), Some(r#"import "./dir/a.js";"#));
        assert_eq!(e.binding, r#"() => import("./dir/a.js")"#);
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b\\c\n"), r#""a\"b\\c\n""#);
    }
}
