//! Live invalidation of compiled glob directives.
//!
//! The coordinator owns the last-known-good compile of every tracked module
//! and the watch bindings derived from it. Filesystem events are tested
//! against the bindings (not the previous matches, since an event may be
//! exactly the arrival or departure of a match), and affected modules move
//! through `Fresh -> Stale -> Recompiling -> Fresh`.
//!
//! Compiling happens outside the coordinator: `begin_recompile` hands out a
//! [`RecompileTicket`] that can be compiled on any thread, and
//! `finish_recompile` installs (or discards) its result.

use crate::compile::{CompiledModule, Compiler, RegistrationTable};
use crate::config::{CompileMode, GlobConfig};
use crate::directive::{parse_directives, DirectiveId, GlobDirective};
use crate::error::{GlobError, Result};
use crate::resolve::{compile_patterns, CompiledPattern};
use crate::transform::TransformerRegistry;
use globkit_util::fs::read_source;
use globkit_util::path::{normalize, to_slash};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsEventKind {
    Add,
    Remove,
    Change,
}

/// One filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    #[must_use]
    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Add,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Remove,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Change,
            path: path.into(),
        }
    }
}

/// Forward-slash form of a module's absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(String);

impl ModuleId {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self(to_slash(&normalize(path)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the coordinator watches for one directive pattern.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub directive_id: DirectiveId,
    pub declaring_file: PathBuf,
    pub pattern: CompiledPattern,
}

impl WatchBinding {
    pub(crate) fn for_patterns(directive: &GlobDirective, patterns: &[CompiledPattern]) -> Vec<Self> {
        patterns
            .iter()
            .map(|pattern| Self {
                directive_id: directive.id.clone(),
                declaring_file: directive.declaring_file.clone(),
                pattern: pattern.clone(),
            })
            .collect()
    }

    /// Directory (or file) the pattern is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.pattern.base
    }

    #[must_use]
    pub fn is_exclusion(&self) -> bool {
        self.pattern.negated
    }

    /// Whether `path` falls under this binding's pattern.
    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        path != self.declaring_file && self.pattern.matches(path)
    }
}

/// Whether a directive's bindings would select `path`.
fn selects(bindings: &[WatchBinding], path: &Path) -> bool {
    let (exclusions, inclusions): (Vec<&WatchBinding>, Vec<&WatchBinding>) =
        bindings.iter().partition(|b| b.is_exclusion());
    inclusions.iter().any(|b| b.covers(path)) && !exclusions.iter().any(|b| b.covers(path))
}

/// Lifecycle state of one directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveState {
    Fresh,
    Stale,
    Recompiling,
}

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

/// A user-facing message from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub file: Option<PathBuf>,
    pub code: Option<&'static str>,
}

impl Diagnostic {
    fn from_error(err: &GlobError) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: err.to_string(),
            file: err.file().cloned(),
            code: Some(err.code()),
        }
    }
}

/// Receives modules that must be reprocessed by the running session.
pub trait StaleSink: Send + Sync {
    fn module_stale(&self, module: &ModuleId);
}

/// Receives diagnostics for the user.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Result of [`InvalidationCoordinator::finish_recompile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RecompileOutcome {
    /// New output installed. `follow_up` is set when events arrived meanwhile.
    Installed { module: ModuleId, follow_up: bool },
    /// Compile failed; the last-known-good output is kept.
    Failed {
        module: ModuleId,
        error: String,
        follow_up: bool,
    },
    /// The module was removed or re-registered while compiling.
    Discarded { module: ModuleId },
}

/// Handle for one in-flight recompilation.
#[derive(Debug)]
pub struct RecompileTicket {
    file: PathBuf,
    generation: u64,
    compiler: Compiler,
    registrations: RegistrationTable,
}

impl RecompileTicket {
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        ModuleId::from_path(&self.file)
    }

    /// Read and compile the module against the current filesystem.
    pub fn compile(&mut self) -> Result<CompiledModule> {
        self.compiler.compile_file(&self.file, &mut self.registrations)
    }
}

#[derive(Debug)]
struct DirectiveRecord {
    directive: GlobDirective,
    state: DirectiveState,
    bindings: Vec<WatchBinding>,
    /// Eager and raw targets embedded in the declaring module's output.
    snapshots: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Recompiling { pending: bool },
}

#[derive(Debug)]
struct ModuleRecord {
    /// Module whose eager directive pulled this one in; `None` when registered.
    owner: Option<PathBuf>,
    generation: u64,
    phase: Phase,
    stale: bool,
    compiled: Option<CompiledModule>,
    directives: Vec<DirectiveRecord>,
    /// Set while the newest compile of this module is failing.
    retry: Option<RetryTriggers>,
}

/// Paths that re-arm a module whose last compile failed.
///
/// The last good directives (if any) keep their bindings, but the failing
/// compile may have matched files they never saw, so the failure records its
/// own: the files the error names and the bindings of the directives as
/// currently written.
#[derive(Debug, Default)]
struct RetryTriggers {
    paths: BTreeSet<PathBuf>,
    bindings: Vec<Vec<WatchBinding>>,
}

impl RetryTriggers {
    fn fires_on(&self, path: &Path) -> bool {
        self.paths.contains(path) || self.bindings.iter().any(|b| selects(b, path))
    }
}

impl ModuleRecord {
    fn new(owner: Option<PathBuf>, generation: u64) -> Self {
        Self {
            owner,
            generation,
            phase: Phase::Idle,
            stale: false,
            compiled: None,
            directives: Vec::new(),
            retry: None,
        }
    }

    fn mark_stale(&mut self, only: Option<&DirectiveId>) {
        match &mut self.phase {
            Phase::Recompiling { pending } => *pending = true,
            Phase::Idle => self.stale = true,
        }
        for d in &mut self.directives {
            if only.map_or(true, |id| *id == d.directive.id) && d.state == DirectiveState::Fresh {
                d.state = DirectiveState::Stale;
            }
        }
    }
}

/// Tracks compiled modules and decides what a filesystem event invalidates.
pub struct InvalidationCoordinator {
    compiler: Compiler,
    registrations: RegistrationTable,
    modules: BTreeMap<PathBuf, ModuleRecord>,
    next_generation: u64,
    stale_sink: Option<Arc<dyn StaleSink>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl InvalidationCoordinator {
    /// Create a session. Compiles always run in serve mode.
    #[must_use]
    pub fn new(config: GlobConfig) -> Self {
        Self {
            compiler: Compiler::new(config.with_mode(CompileMode::Serve)),
            registrations: RegistrationTable::new(),
            modules: BTreeMap::new(),
            next_generation: 0,
            stale_sink: None,
            diagnostics: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: TransformerRegistry) -> Self {
        self.compiler = self.compiler.with_registry(registry);
        self
    }

    #[must_use]
    pub fn with_stale_sink(mut self, sink: Arc<dyn StaleSink>) -> Self {
        self.stale_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    #[must_use]
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Compile a declaring module and start tracking it.
    ///
    /// A module that fails to compile is still tracked, so a later edit retries it.
    pub fn register_module(&mut self, file: &Path, source: &str) -> Result<ModuleId> {
        let file = self.absolute(file);
        let generation = self.bump_generation();
        let id = ModuleId::from_path(&file);

        match self
            .compiler
            .compile_module(&file, source, &mut self.registrations)
        {
            Ok(module) => {
                info!(module = %id, directives = module.directives.len(), "Registered module");
                self.install(&file, None, generation, module);
                Ok(id)
            }
            Err(err) => {
                let retry = self.retry_triggers(&file, Some(source), &err);
                let record = self
                    .modules
                    .entry(file.clone())
                    .or_insert_with(|| ModuleRecord::new(None, generation));
                record.owner = None;
                record.generation = generation;
                record.phase = Phase::Idle;
                record.retry = Some(retry);
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Apply one filesystem event; returns every module reported stale.
    pub fn on_filesystem_event(&mut self, event: &FsEvent) -> BTreeSet<ModuleId> {
        let path = self.absolute(&event.path);
        let mut reported: BTreeSet<ModuleId> = BTreeSet::new();
        let mut changed: Vec<PathBuf> = Vec::new();

        match event.kind {
            FsEventKind::Add | FsEventKind::Remove => {
                if event.kind == FsEventKind::Remove && self.forget(&path) {
                    reported.insert(ModuleId::from_path(&path));
                }

                let target = path.as_path();
                let touched: Vec<(PathBuf, DirectiveId)> = self
                    .modules
                    .iter()
                    .flat_map(|(file, record)| {
                        record
                            .directives
                            .iter()
                            .filter(move |d| selects(&d.bindings, target))
                            .map(move |d| (file.clone(), d.directive.id.clone()))
                    })
                    .collect();

                for (file, id) in touched {
                    if let Some(record) = self.modules.get_mut(&file) {
                        record.mark_stale(Some(&id));
                    }
                    debug!(module = %file.display(), directive = %id, path = %path.display(), "Watch binding matched");
                    reported.insert(ModuleId::from_path(&file));
                    changed.push(file);
                }
            }
            FsEventKind::Change => {
                reported.insert(ModuleId::from_path(&path));
                if let Some(record) = self.modules.get_mut(&path) {
                    record.mark_stale(None);
                }
                changed.push(path.clone());
            }
        }

        let retrying: Vec<PathBuf> = self
            .modules
            .iter()
            .filter(|(_, r)| r.retry.as_ref().is_some_and(|t| t.fires_on(&path)))
            .map(|(file, _)| file.clone())
            .collect();
        for file in retrying {
            if let Some(record) = self.modules.get_mut(&file) {
                record.mark_stale(None);
            }
            debug!(module = %file.display(), path = %path.display(), "Retrying failed module");
            reported.insert(ModuleId::from_path(&file));
            changed.push(file);
        }

        self.propagate(changed, &mut reported);

        if let Some(sink) = &self.stale_sink {
            for module in &reported {
                sink.module_stale(module);
            }
        }
        reported
    }

    /// Start recompiling a tracked module.
    ///
    /// Returns `None` when the module is unknown or already recompiling.
    pub fn begin_recompile(&mut self, file: &Path) -> Option<RecompileTicket> {
        let file = self.absolute(file);
        let record = self.modules.get_mut(&file)?;
        if record.phase != Phase::Idle {
            return None;
        }
        record.phase = Phase::Recompiling { pending: false };
        record.stale = false;
        for d in &mut record.directives {
            d.state = DirectiveState::Recompiling;
        }

        Some(RecompileTicket {
            file,
            generation: record.generation,
            compiler: self.compiler.clone(),
            registrations: self.registrations.clone(),
        })
    }

    /// Install or discard the result of a ticket.
    pub fn finish_recompile(
        &mut self,
        ticket: RecompileTicket,
        result: Result<CompiledModule>,
    ) -> RecompileOutcome {
        let module = ticket.module_id();
        let retry = result.as_ref().err().map(|err| {
            let source = read_source(&ticket.file).ok();
            self.retry_triggers(&ticket.file, source.as_deref(), err)
        });
        let Some(record) = self.modules.get_mut(&ticket.file) else {
            debug!(module = %module, "Module removed while recompiling, result discarded");
            return RecompileOutcome::Discarded { module };
        };
        if record.generation != ticket.generation {
            debug!(module = %module, "Module re-registered while recompiling, result discarded");
            return RecompileOutcome::Discarded { module };
        }

        let follow_up = record.phase == Phase::Recompiling { pending: true };
        record.phase = Phase::Idle;
        let owner = record.owner.clone();
        let generation = record.generation;

        let outcome = match result {
            Ok(compiled) => {
                self.registrations.absorb(&ticket.registrations);
                self.install(&ticket.file, owner, generation, compiled);
                info!(module = %module, "Recompiled module");
                RecompileOutcome::Installed {
                    module,
                    follow_up,
                }
            }
            Err(err) => {
                for d in &mut record.directives {
                    d.state = DirectiveState::Fresh;
                }
                record.retry = retry;
                self.report(&err);
                RecompileOutcome::Failed {
                    module,
                    error: err.to_string(),
                    follow_up,
                }
            }
        };

        if follow_up {
            if let Some(record) = self.modules.get_mut(&ticket.file) {
                record.mark_stale(None);
            }
        }
        outcome
    }

    /// Recompile every stale module in place until none is left.
    pub fn recompile_stale(&mut self) -> Vec<RecompileOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let stale = self.stale_modules();
            if stale.is_empty() {
                return outcomes;
            }
            for file in stale {
                if let Some(mut ticket) = self.begin_recompile(&file) {
                    let result = ticket.compile();
                    outcomes.push(self.finish_recompile(ticket, result));
                }
            }
        }
    }

    /// Modules waiting for a recompile.
    #[must_use]
    pub fn stale_modules(&self) -> Vec<PathBuf> {
        self.modules
            .iter()
            .filter(|(_, r)| r.stale && r.phase == Phase::Idle)
            .map(|(file, _)| file.clone())
            .collect()
    }

    /// Last-known-good compile of a module.
    #[must_use]
    pub fn compiled(&self, file: &Path) -> Option<&CompiledModule> {
        self.modules.get(&self.absolute(file))?.compiled.as_ref()
    }

    #[must_use]
    pub fn is_tracked(&self, file: &Path) -> bool {
        self.modules.contains_key(&self.absolute(file))
    }

    #[must_use]
    pub fn directive_state(&self, id: &DirectiveId) -> Option<DirectiveState> {
        self.modules
            .values()
            .flat_map(|r| r.directives.iter())
            .find(|d| d.directive.id == *id)
            .map(|d| d.state)
    }

    /// Current watch bindings of a module's directives.
    pub fn bindings(&self, file: &Path) -> impl Iterator<Item = &WatchBinding> {
        self.modules
            .get(&self.absolute(file))
            .into_iter()
            .flat_map(|r| r.directives.iter())
            .flat_map(|d| d.bindings.iter())
    }

    /// Ids of every tracked module.
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().map(|p| ModuleId::from_path(p))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.compiler.config().root.join(path))
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Replace a module's state wholesale with a new compile.
    fn install(&mut self, file: &Path, owner: Option<PathBuf>, generation: u64, module: CompiledModule) {
        self.modules
            .retain(|_, r| r.owner.as_deref() != Some(file));

        let mut queue: Vec<&CompiledModule> = module.nested().collect();
        while let Some(nested) = queue.pop() {
            queue.extend(nested.nested());
            if self
                .modules
                .get(&nested.file)
                .is_some_and(|r| r.owner.is_none())
            {
                continue;
            }
            let mut record = ModuleRecord::new(Some(file.to_path_buf()), generation);
            record.directives = directive_records(nested);
            record.compiled = Some(nested.clone());
            self.modules.insert(nested.file.clone(), record);
        }

        let record = self
            .modules
            .entry(file.to_path_buf())
            .or_insert_with(|| ModuleRecord::new(owner.clone(), generation));
        record.owner = owner;
        record.generation = generation;
        record.directives = directive_records(&module);
        record.compiled = Some(module);
        record.retry = None;
    }

    /// Triggers for retrying `file` after `err`.
    ///
    /// `source` is the text that failed; directives that no longer parse or
    /// whose patterns are invalid contribute no bindings.
    fn retry_triggers(&self, file: &Path, source: Option<&str>, err: &GlobError) -> RetryTriggers {
        let config = self.compiler.config();
        let bindings = source
            .and_then(|source| parse_directives(source, file).ok())
            .unwrap_or_default()
            .iter()
            .filter_map(|d| {
                let patterns = compile_patterns(d, config).ok()?;
                Some(WatchBinding::for_patterns(d, &patterns))
            })
            .collect();
        RetryTriggers {
            paths: err.paths().into_iter().map(|p| self.absolute(p)).collect(),
            bindings,
        }
    }

    /// Stop tracking a module and everything it pulled in.
    fn forget(&mut self, file: &Path) -> bool {
        if self.modules.remove(file).is_none() {
            return false;
        }
        self.modules.retain(|_, r| r.owner.as_deref() != Some(file));
        info!(module = %file.display(), "Module removed, directives destroyed");
        true
    }

    /// Mark every module whose output embeds a changed file, transitively.
    fn propagate(&mut self, mut changed: Vec<PathBuf>, reported: &mut BTreeSet<ModuleId>) {
        let mut visited: BTreeSet<PathBuf> = changed.iter().cloned().collect();
        while let Some(path) = changed.pop() {
            let target = path.as_path();
            let holders: Vec<(PathBuf, DirectiveId)> = self
                .modules
                .iter()
                .flat_map(|(file, record)| {
                    record
                        .directives
                        .iter()
                        .filter(move |d| d.snapshots.contains(target))
                        .map(move |d| (file.clone(), d.directive.id.clone()))
                })
                .collect();

            for (file, id) in holders {
                if let Some(record) = self.modules.get_mut(&file) {
                    record.mark_stale(Some(&id));
                }
                reported.insert(ModuleId::from_path(&file));
                if visited.insert(file.clone()) {
                    changed.push(file);
                }
            }
        }
    }

    fn report(&self, err: &GlobError) {
        warn!(code = err.code(), error = %err, "Glob compile failed, keeping last good output");
        if let Some(sink) = &self.diagnostics {
            sink.report(Diagnostic::from_error(err));
        }
    }
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

fn directive_records(module: &CompiledModule) -> Vec<DirectiveRecord> {
    module
        .directives
        .iter()
        .map(|d| DirectiveRecord {
            directive: d.directive.clone(),
            state: DirectiveState::Fresh,
            bindings: d.bindings.clone(),
            snapshots: d.snapshot_paths().map(Path::to_path_buf).collect(),
        })
        .collect()
}
