//! Live invalidation: filesystem events, staleness propagation and recompiles.

use globkit_core::{
    codes, Compiler, Diagnostic, DiagnosticLevel, DiagnosticSink, DirectiveState, FsEvent,
    GlobConfig, InvalidationCoordinator, ModuleId, RecompileOutcome, RegistrationTable, StaleSink,
};
use globkit_util::path::normalize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize(dir.path());
        Self { _dir: dir, root }
    }

    fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn remove(&self, rel: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::remove_file(&path).unwrap();
        path
    }

    fn session(&self) -> InvalidationCoordinator {
        InvalidationCoordinator::new(GlobConfig::new(self.root.clone()))
    }

    fn register(&self, coordinator: &mut InvalidationCoordinator, rel: &str) -> PathBuf {
        let path = self.root.join(rel);
        let source = fs::read_to_string(&path).unwrap();
        coordinator.register_module(&path, &source).unwrap();
        path
    }
}

#[derive(Default)]
struct Recorder {
    stale: Mutex<Vec<ModuleId>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl StaleSink for Recorder {
    fn module_stale(&self, module: &ModuleId) {
        self.stale.lock().unwrap().push(module.clone());
    }
}

impl DiagnosticSink for Recorder {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }
}

fn ids(paths: &[&PathBuf]) -> BTreeSet<ModuleId> {
    paths.iter().map(|p| ModuleId::from_path(p)).collect()
}

fn code(coordinator: &InvalidationCoordinator, file: &Path) -> String {
    coordinator.compiled(file).unwrap().code.clone()
}

#[test]
fn test_add_then_remove_restores_mapping() {
    let p = Project::new();
    p.write("src/dir/a.js", "export default 'a';\n");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    let before = code(&session, &main);

    let added = p.write("src/dir/b.js", "export default 'b';\n");
    let stale = session.on_filesystem_event(&FsEvent::add(&added));
    assert_eq!(stale, ids(&[&main]));
    session.recompile_stale();
    let with_b = code(&session, &main);
    assert!(with_b.contains("\"./dir/b.js\": () => import(\"./dir/b.js\")"));

    let removed = p.remove("src/dir/b.js");
    let stale = session.on_filesystem_event(&FsEvent::remove(&removed));
    assert_eq!(stale, ids(&[&main]));
    session.recompile_stale();
    assert_eq!(code(&session, &main), before);
}

#[test]
fn test_unrelated_events_are_ignored() {
    let p = Project::new();
    p.write("src/dir/a.js", "export default 'a';\n");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let mut session = p.session();
    p.register(&mut session, "src/main.js");

    let other = p.write("src/other/x.js", "");
    assert!(session.on_filesystem_event(&FsEvent::add(&other)).is_empty());
    let css = p.write("src/dir/style.css", "");
    assert!(session.on_filesystem_event(&FsEvent::add(&css)).is_empty());
    let nested = p.write("src/dir/deep/x.js", "");
    assert!(session.on_filesystem_event(&FsEvent::add(&nested)).is_empty());
    assert!(session.stale_modules().is_empty());
}

#[test]
fn test_eager_edit_marks_declaring_module_stale() {
    let p = Project::new();
    let a = p.write("src/dir/a.js", "export const msg = 'a';\n");
    p.write("src/dir/b.js", "export const msg = 'b';\n");
    p.write(
        "src/main.js",
        "export const m = import.meta.glob('./dir/*.js', { eager: true });\n",
    );

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    let keys_before: Vec<String> = session.compiled(&main).unwrap().directives[0]
        .entries
        .iter()
        .map(|e| e.specifier.clone())
        .collect();

    fs::write(&a, "export const msg = 'a2';\nexport const extra = 1;\n").unwrap();
    let stale = session.on_filesystem_event(&FsEvent::change(&a));
    assert_eq!(stale, ids(&[&a, &main]));

    let outcomes = session.recompile_stale();
    assert_eq!(outcomes.len(), 1);

    let compiled = session.compiled(&main).unwrap();
    let keys_after: Vec<String> = compiled.directives[0]
        .entries
        .iter()
        .map(|e| e.specifier.clone())
        .collect();
    assert_eq!(keys_before, keys_after);
    assert!(compiled.directives[0].entries[0]
        .exports
        .as_ref()
        .unwrap()
        .exports("extra"));
}

#[test]
fn test_lazy_and_url_edits_leave_declaring_module_fresh() {
    let p = Project::new();
    let a = p.write("src/dir/a.js", "export default 1;\n");
    p.write(
        "src/main.js",
        "const lazy = import.meta.glob('./dir/*.js');\nconst urls = import.meta.glob('./dir/*.js', { as: 'url' });\n",
    );

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");

    let stale = session.on_filesystem_event(&FsEvent::change(&a));
    assert_eq!(stale, ids(&[&a]));
    assert!(session.stale_modules().is_empty());
    let directive = &session.compiled(&main).unwrap().directives[0].directive;
    assert_eq!(session.directive_state(&directive.id), Some(DirectiveState::Fresh));
}

#[test]
fn test_raw_edit_marks_declaring_module_stale() {
    let p = Project::new();
    let notes = p.write("src/docs/notes.md", "# one\n");
    p.write(
        "src/main.js",
        "export const docs = import.meta.glob('./docs/*.md', { as: 'raw' });\n",
    );

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    let directive_id = session.compiled(&main).unwrap().directives[0].directive.id.clone();

    fs::write(&notes, "# two\n").unwrap();
    let stale = session.on_filesystem_event(&FsEvent::change(&notes));
    assert_eq!(stale, ids(&[&notes, &main]));
    assert_eq!(session.directive_state(&directive_id), Some(DirectiveState::Stale));

    session.recompile_stale();
    assert!(code(&session, &main).contains(r##""./docs/notes.md": "# two\n""##));
    assert_eq!(session.directive_state(&directive_id), Some(DirectiveState::Fresh));
}

#[test]
fn test_staleness_propagates_through_eager_chain() {
    let p = Project::new();
    let leaf = p.write("src/modules/leaf.js", "export const msg = 'leaf';\n");
    let index = p.write(
        "src/modules/index.js",
        "export const modules = import.meta.glob('./*.js', { eager: true });\n",
    );
    p.write(
        "src/main.js",
        "export const all = import.meta.glob('./modules/index.js', { eager: true });\n",
    );

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    assert!(session.is_tracked(&index));

    let stale = session.on_filesystem_event(&FsEvent::change(&leaf));
    assert_eq!(stale, ids(&[&leaf, &index, &main]));

    session.recompile_stale();
    let added = p.write("src/modules/second.js", "export const msg = 'second';\n");
    let stale = session.on_filesystem_event(&FsEvent::add(&added));
    assert_eq!(stale, ids(&[&index, &main]));

    session.recompile_stale();
    let nested = session.compiled(&index).unwrap();
    assert!(nested.code.contains("\"./second.js\""));
}

#[test]
fn test_events_during_recompile_coalesce() {
    let p = Project::new();
    p.write("src/dir/a.js", "export default 'a';\n");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");

    let b = p.write("src/dir/b.js", "");
    session.on_filesystem_event(&FsEvent::add(&b));
    let mut ticket = session.begin_recompile(&main).unwrap();
    assert!(session.begin_recompile(&main).is_none());
    let directive_id = session.compiled(&main).unwrap().directives[0].directive.id.clone();
    assert_eq!(session.directive_state(&directive_id), Some(DirectiveState::Recompiling));

    let c = p.write("src/dir/c.js", "");
    let d = p.write("src/dir/d.js", "");
    session.on_filesystem_event(&FsEvent::add(&c));
    session.on_filesystem_event(&FsEvent::add(&d));
    assert!(session.stale_modules().is_empty());

    let result = ticket.compile();
    let outcome = session.finish_recompile(ticket, result);
    assert_eq!(
        outcome,
        RecompileOutcome::Installed {
            module: ModuleId::from_path(&main),
            follow_up: true,
        }
    );
    assert_eq!(session.stale_modules(), vec![main.clone()]);

    let outcomes = session.recompile_stale();
    assert_eq!(
        outcomes,
        vec![RecompileOutcome::Installed {
            module: ModuleId::from_path(&main),
            follow_up: false,
        }]
    );
    assert!(code(&session, &main).contains("\"./dir/d.js\""));
}

#[test]
fn test_result_discarded_when_module_removed() {
    let p = Project::new();
    p.write("src/dir/a.js", "");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");

    let mut ticket = session.begin_recompile(&main).unwrap();
    let result = ticket.compile();
    p.remove("src/main.js");
    let stale = session.on_filesystem_event(&FsEvent::remove(&main));
    assert!(stale.contains(&ModuleId::from_path(&main)));

    let outcome = session.finish_recompile(ticket, result);
    assert!(matches!(outcome, RecompileOutcome::Discarded { .. }));
    assert!(!session.is_tracked(&main));

    let b = p.write("src/dir/b.js", "");
    assert!(session.on_filesystem_event(&FsEvent::add(&b)).is_empty());
}

#[test]
fn test_result_discarded_when_module_reregistered() {
    let p = Project::new();
    p.write("src/dir/a.js", "");
    let source = "export const m = import.meta.glob('./dir/*.js');\n";
    p.write("src/main.js", source);

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");

    let mut ticket = session.begin_recompile(&main).unwrap();
    session.register_module(&main, source).unwrap();
    let result = ticket.compile();
    assert!(matches!(
        session.finish_recompile(ticket, result),
        RecompileOutcome::Discarded { .. }
    ));
    assert!(session.compiled(&main).is_some());
}

#[test]
fn test_failed_recompile_keeps_last_good_output() {
    let p = Project::new();
    p.write("src/dir/a.js", "");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let recorder = Arc::new(Recorder::default());
    let mut session = p
        .session()
        .with_stale_sink(recorder.clone())
        .with_diagnostic_sink(recorder.clone());
    let main = p.register(&mut session, "src/main.js");
    let good = code(&session, &main);
    let directive_id = session.compiled(&main).unwrap().directives[0].directive.id.clone();

    p.write("src/main.js", "export const m = import.meta.glob(dir + '/*.js');\n");
    session.on_filesystem_event(&FsEvent::change(&main));
    assert_eq!(session.directive_state(&directive_id), Some(DirectiveState::Stale));

    let outcomes = session.recompile_stale();
    assert!(matches!(outcomes.as_slice(), [RecompileOutcome::Failed { .. }]));
    assert_eq!(code(&session, &main), good);
    assert_eq!(session.directive_state(&directive_id), Some(DirectiveState::Fresh));

    let diagnostics = recorder.diagnostics.lock().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].level, DiagnosticLevel::Error);
    assert_eq!(diagnostics[0].code, Some(codes::GLOB_INVALID_DIRECTIVE));
    assert_eq!(diagnostics[0].file.as_deref(), Some(main.as_path()));

    let stale = recorder.stale.lock().unwrap();
    assert_eq!(stale.as_slice(), &[ModuleId::from_path(&main)]);
}

#[test]
fn test_removed_directive_stops_watching() {
    let p = Project::new();
    p.write("src/dir/a.js", "");
    p.write("src/main.js", "export const m = import.meta.glob('./dir/*.js');\n");

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    assert_eq!(session.bindings(&main).count(), 1);

    p.write("src/main.js", "export const m = {};\n");
    session.on_filesystem_event(&FsEvent::change(&main));
    session.recompile_stale();
    assert_eq!(session.bindings(&main).count(), 0);

    let b = p.write("src/dir/b.js", "");
    assert!(session.on_filesystem_event(&FsEvent::add(&b)).is_empty());
}

#[test]
fn test_serve_session_orders_new_directive_first() {
    let p = Project::new();
    p.write("src/a/x.js", "export default 'x';\n");
    p.write("src/b/y.js", "export default 'y';\n");
    let source = "const a = import.meta.glob('./a/*.js', { eager: true });\nconst b = import.meta.glob('./b/*.js', { eager: true });\n";
    p.write("src/main.js", source);

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    assert!(code(&session, &main).starts_with("import * as __glob_1_0 from \"./b/y.js\";\n"));

    let build = Compiler::new(GlobConfig::new(p.root.clone()));
    let built = build
        .compile_file(&main, &mut RegistrationTable::new())
        .unwrap();
    assert!(built.code.starts_with("import * as __glob_0_0 from \"./a/x.js\";\n"));
    assert_ne!(built.code, code(&session, &main));

    session.recompile_stale();
    let again = session.begin_recompile(&main).map(|mut t| {
        let r = t.compile();
        session.finish_recompile(t, r)
    });
    assert!(matches!(again, Some(RecompileOutcome::Installed { follow_up: false, .. })));
    assert!(code(&session, &main).starts_with("import * as __glob_1_0 from \"./b/y.js\";\n"));
}

#[test]
fn test_fixing_file_that_broke_recompile_retries() {
    let p = Project::new();
    p.write("src/data/a.json", r#"{"name": "a"}"#);
    p.write(
        "src/main.js",
        "export const m = import.meta.glob('./data/*.json', { eager: true });\n",
    );

    let mut session = p.session();
    let main = p.register(&mut session, "src/main.js");
    let good = code(&session, &main);

    let b = p.write("src/data/b.json", "{ broken");
    assert_eq!(session.on_filesystem_event(&FsEvent::add(&b)), ids(&[&main]));
    let outcomes = session.recompile_stale();
    assert!(matches!(outcomes.as_slice(), [RecompileOutcome::Failed { .. }]));
    assert_eq!(code(&session, &main), good);

    p.write("src/data/b.json", r#"{"name": "b"}"#);
    let stale = session.on_filesystem_event(&FsEvent::change(&b));
    assert!(stale.contains(&ModuleId::from_path(&main)));
    assert_eq!(session.stale_modules(), vec![main.clone()]);

    let outcomes = session.recompile_stale();
    assert!(matches!(outcomes.as_slice(), [RecompileOutcome::Installed { .. }]));
    assert!(code(&session, &main).contains("\"./data/b.json\""));
}

#[test]
fn test_failed_registration_retries_when_matched_file_is_fixed() {
    let p = Project::new();
    p.write("src/data/a.json", r#"{"name": "a"}"#);
    let b = p.write("src/data/b.json", "{ broken");
    let other = p.write("src/other.js", "export default 1;\n");
    let main = p.write(
        "src/main.js",
        "export const m = import.meta.glob('./data/*.json', { eager: true });\n",
    );

    let mut session = p.session();
    let source = fs::read_to_string(&main).unwrap();
    assert!(session.register_module(&main, &source).is_err());
    assert!(session.is_tracked(&main));
    assert!(session.compiled(&main).is_none());

    assert_eq!(session.on_filesystem_event(&FsEvent::change(&other)), ids(&[&other]));
    assert!(session.stale_modules().is_empty());

    p.write("src/data/b.json", r#"{"name": "b"}"#);
    let stale = session.on_filesystem_event(&FsEvent::change(&b));
    assert!(stale.contains(&ModuleId::from_path(&main)));

    let outcomes = session.recompile_stale();
    assert!(matches!(outcomes.as_slice(), [RecompileOutcome::Installed { .. }]));
    let compiled = code(&session, &main);
    assert!(compiled.contains("\"./data/a.json\""));
    assert!(compiled.contains("\"./data/b.json\""));
}
