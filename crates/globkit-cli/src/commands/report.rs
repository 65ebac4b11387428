//! Output shapes shared by `compile` and `watch`.

use globkit_core::{
    CompiledModule, Diagnostic, DiagnosticLevel, DiagnosticSink, GlobError, LoadKind, ModuleId,
    StaleSink, REPORT_SCHEMA_VERSION,
};
use serde::Serialize;
use std::sync::Mutex;

/// JSON report for `globkit compile --json`.
#[derive(Debug, Serialize)]
pub struct CompileReport {
    pub schema_version: u32,
    pub ok: bool,
    pub file: String,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub directives: Vec<DirectiveReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub notes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectiveReport {
    pub id: String,
    pub patterns: Vec<String>,
    pub entries: Vec<EntryReport>,
}

#[derive(Debug, Serialize)]
pub struct EntryReport {
    pub specifier: String,
    pub path: String,
    pub kind: LoadKind,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl CompileReport {
    pub fn success(module: &CompiledModule, mode: &'static str) -> Self {
        let mut notes = Vec::new();
        let mut directives = Vec::new();
        for compiled in &module.directives {
            if compiled.entries.is_empty() {
                notes.push(format!(
                    "directive {} matched no files",
                    compiled.directive.id
                ));
            }
            directives.push(DirectiveReport {
                id: compiled.directive.id.to_string(),
                patterns: compiled.directive.patterns.clone(),
                entries: compiled
                    .entries
                    .iter()
                    .map(|e| EntryReport {
                        specifier: e.specifier.clone(),
                        path: e.path.display().to_string(),
                        kind: e.kind,
                    })
                    .collect(),
            });
        }
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: true,
            file: module.file.display().to_string(),
            mode,
            code: Some(module.code.clone()),
            directives,
            error: None,
            notes,
        }
    }

    pub fn failure(file: &std::path::Path, mode: &'static str, err: &GlobError) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: false,
            file: file.display().to_string(),
            mode,
            code: None,
            directives: Vec::new(),
            error: Some(ErrorReport {
                code: err.code(),
                message: err.to_string(),
                file: err.file().map(|f| f.display().to_string()),
            }),
            notes: Vec::new(),
        }
    }
}

/// Prints coordinator output to stderr, or as JSON lines to stdout.
///
/// Identical consecutive lines collapse into one line with a repeat count.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    json: bool,
    last: Mutex<Option<(String, usize)>>,
}

impl ConsoleReporter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last: Mutex::new(None),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Print `line` unless it repeats the previous one. Returns what was printed.
    pub fn emit(&self, line: String) -> Option<String> {
        let Ok(mut last) = self.last.lock() else {
            return None;
        };
        let printed = match last.as_mut() {
            Some((prev, count)) if *prev == line => {
                *count += 1;
                if self.json {
                    return None;
                }
                format!("{line} (x{count})")
            }
            Some(_) | None => {
                *last = Some((line.clone(), 1));
                line
            }
        };
        if self.json {
            println!("{printed}");
        } else {
            eprintln!("{printed}");
        }
        Some(printed)
    }

    fn format_stale(&self, module: &ModuleId) -> String {
        if self.json {
            serde_json::json!({ "event": "stale", "module": module.as_str() }).to_string()
        } else {
            format!("  stale {module}")
        }
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        if self.json {
            serde_json::json!({ "event": "diagnostic", "diagnostic": diagnostic }).to_string()
        } else {
            let level = match diagnostic.level {
                DiagnosticLevel::Info => "info",
                DiagnosticLevel::Warn => "warning",
                DiagnosticLevel::Error => "error",
            };
            match diagnostic.code {
                Some(code) => format!("{level}[{code}]: {}", diagnostic.message),
                None => format!("{level}: {}", diagnostic.message),
            }
        }
    }
}

impl StaleSink for ConsoleReporter {
    fn module_stale(&self, module: &ModuleId) {
        self.emit(self.format_stale(module));
    }
}

impl DiagnosticSink for ConsoleReporter {
    fn report(&self, diagnostic: Diagnostic) {
        self.emit(self.format_diagnostic(&diagnostic));
    }
}
