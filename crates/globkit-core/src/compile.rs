//! Module compilation: every directive of a module resolved, classified and spliced.

use crate::classify::{classify, LoadEntry, LoadKind};
use crate::codegen::{generate, GeneratedDirective};
use crate::config::{CompileMode, GlobConfig};
use crate::coordinator::WatchBinding;
use crate::directive::{parse_directives, DirectiveId, GlobDirective};
use crate::error::{GlobError, Result};
use crate::resolve::{resolve, MatchSet};
use crate::transform::TransformerRegistry;
use globkit_util::fs::read_source;
use globkit_util::path::normalize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Session-scoped record of when each directive was first compiled.
///
/// Serve-mode compiles order hoisted blocks by this table, newest first.
#[derive(Debug, Clone, Default)]
pub struct RegistrationTable {
    seq: HashMap<DirectiveId, u64>,
    next: u64,
}

impl RegistrationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` if unseen; returns its sequence number.
    pub fn register(&mut self, id: &DirectiveId) -> u64 {
        if let Some(seq) = self.seq.get(id) {
            return *seq;
        }
        let seq = self.next;
        self.next += 1;
        self.seq.insert(id.clone(), seq);
        seq
    }

    #[must_use]
    pub fn sequence(&self, id: &DirectiveId) -> Option<u64> {
        self.seq.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Register every id `other` knows and `self` does not, keeping `other`'s relative order.
    pub fn absorb(&mut self, other: &Self) {
        let mut unseen: Vec<(&DirectiveId, u64)> = other
            .seq
            .iter()
            .filter(|(id, _)| !self.seq.contains_key(*id))
            .map(|(id, seq)| (id, *seq))
            .collect();
        unseen.sort_by_key(|(_, seq)| *seq);
        for (id, _) in unseen {
            self.register(id);
        }
    }
}

/// One directive's compile result.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledDirective {
    pub directive: GlobDirective,
    pub matches: MatchSet,
    pub entries: Vec<LoadEntry>,
    #[serde(skip)]
    pub bindings: Vec<WatchBinding>,
    pub generated: GeneratedDirective,
    /// Eager targets that contain directives of their own, compiled first.
    pub nested: Vec<CompiledModule>,
}

impl CompiledDirective {
    /// Files whose content the declaring module's output embeds.
    pub fn snapshot_paths(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| e.kind.is_snapshot())
            .map(|e| e.path.as_path())
    }
}

/// A module with every directive replaced.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledModule {
    pub file: PathBuf,
    pub code: String,
    pub directives: Vec<CompiledDirective>,
}

impl CompiledModule {
    /// Nested modules compiled for this module's eager directives.
    pub fn nested(&self) -> impl Iterator<Item = &CompiledModule> {
        self.directives.iter().flat_map(|d| d.nested.iter())
    }
}

/// Compiles glob directives against the filesystem.
///
/// Cheap to clone; transformers are shared.
#[derive(Debug, Clone)]
pub struct Compiler {
    config: GlobConfig,
    registry: Arc<TransformerRegistry>,
}

impl Compiler {
    /// Compiler with the built-in transformers.
    #[must_use]
    pub fn new(config: GlobConfig) -> Self {
        Self {
            config,
            registry: Arc::new(TransformerRegistry::with_builtins()),
        }
    }

    /// Replace the transformer registry.
    #[must_use]
    pub fn with_registry(mut self, registry: TransformerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    #[must_use]
    pub fn config(&self) -> &GlobConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    /// Resolve, classify and generate a single directive.
    pub fn compile_directive(&self, directive: &GlobDirective) -> Result<CompiledDirective> {
        let mut table = RegistrationTable::new();
        let mut stack = vec![directive.declaring_file.clone()];
        self.compile_one(directive, &mut table, &mut stack)
    }

    /// Read `file` and compile it.
    pub fn compile_file(&self, file: &Path, table: &mut RegistrationTable) -> Result<CompiledModule> {
        let file = normalize(file);
        let source = read_source(&file).map_err(|e| GlobError::io(&file, e))?;
        self.compile_module(&file, &source, table)
    }

    /// Compile every directive in `source` and splice the results in.
    ///
    /// Directives are registered in `table`; in serve mode hoisted blocks are
    /// ordered by that registration, most recent first.
    pub fn compile_module(
        &self,
        file: &Path,
        source: &str,
        table: &mut RegistrationTable,
    ) -> Result<CompiledModule> {
        let mut stack = Vec::new();
        self.compile_nested(&normalize(file), source, table, &mut stack)
    }

    fn compile_nested(
        &self,
        file: &Path,
        source: &str,
        table: &mut RegistrationTable,
        stack: &mut Vec<PathBuf>,
    ) -> Result<CompiledModule> {
        if let Some(pos) = stack.iter().position(|p| p == file) {
            let mut chain = stack[pos..].to_vec();
            chain.push(file.to_path_buf());
            return Err(GlobError::Cycle { chain });
        }

        stack.push(file.to_path_buf());
        let result = self.splice(file, source, table, stack);
        stack.pop();
        result
    }

    fn splice(
        &self,
        file: &Path,
        source: &str,
        table: &mut RegistrationTable,
        stack: &mut Vec<PathBuf>,
    ) -> Result<CompiledModule> {
        let parsed = parse_directives(source, file)?;
        for directive in &parsed {
            table.register(&directive.id);
        }

        let mut directives = Vec::with_capacity(parsed.len());
        for directive in &parsed {
            directives.push(self.compile_one(directive, table, stack)?);
        }

        let mut code = source.to_string();
        for compiled in directives.iter().rev() {
            code.replace_range(compiled.directive.span.clone(), &compiled.generated.expression);
        }

        let mut order: Vec<&CompiledDirective> = directives.iter().collect();
        match self.config.mode {
            CompileMode::Build => order.sort_by_key(|d| d.directive.index),
            CompileMode::Serve => order.sort_by_key(|d| {
                std::cmp::Reverse(table.sequence(&d.directive.id).unwrap_or(0))
            }),
        }
        let prelude: String = order
            .iter()
            .map(|d| d.generated.hoisted_line())
            .filter(|line| !line.is_empty())
            .map(|line| line + "\n")
            .collect();
        code.insert_str(prelude_offset(&code), &prelude);

        if !directives.is_empty() {
            debug!(
                file = %file.display(),
                directives = directives.len(),
                mode = self.config.mode.as_str(),
                "Compiled module"
            );
        }

        Ok(CompiledModule {
            file: file.to_path_buf(),
            code,
            directives,
        })
    }

    fn compile_one(
        &self,
        directive: &GlobDirective,
        table: &mut RegistrationTable,
        stack: &mut Vec<PathBuf>,
    ) -> Result<CompiledDirective> {
        let matches = resolve(directive, &self.config)?;
        let mut nested = Vec::new();
        let mut entries = Vec::with_capacity(matches.len());

        for (i, file) in matches.files.iter().enumerate() {
            let entry = classify(
                file,
                directive,
                &self.registry,
                &self.config,
                &directive.binding_name(i),
            )?;
            if entry.kind == LoadKind::Eager {
                if let Some(module) = self.compile_eager_target(&entry.path, table, stack)? {
                    nested.push(module);
                }
            }
            entries.push(entry);
        }

        let generated = generate(directive, &entries);
        let bindings = WatchBinding::for_patterns(directive, &matches.patterns);

        Ok(CompiledDirective {
            directive: directive.clone(),
            matches,
            entries,
            bindings,
            generated,
            nested,
        })
    }

    /// Compile an eager target first when it declares directives itself.
    fn compile_eager_target(
        &self,
        path: &Path,
        table: &mut RegistrationTable,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Option<CompiledModule>> {
        if !self.registry.for_path(path).is_some_and(|t| t.is_script()) {
            return Ok(None);
        }
        let source = read_source(path).map_err(|e| GlobError::io(path, e))?;
        if !source.contains("import.meta.glob") {
            return Ok(None);
        }
        let module = self.compile_nested(path, &source, table, stack)?;
        Ok((!module.directives.is_empty()).then_some(module))
    }
}

/// Where hoisted imports go: after a leading `#!` line, else at the start.
fn prelude_offset(code: &str) -> usize {
    if !code.starts_with("#!") {
        return 0;
    }
    code.find('\n').map_or(code.len(), |nl| nl + 1)
}
