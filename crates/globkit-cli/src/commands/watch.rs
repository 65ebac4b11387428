//! `globkit watch` command implementation.
//!
//! Registers modules with an [`InvalidationCoordinator`], feeds it coalesced
//! filesystem events and recompiles stale modules off the event loop.

use super::report::ConsoleReporter;
use globkit_core::{
    Config, FsEvent, GlobConfig, InvalidationCoordinator, RecompileOutcome, RecompileTicket,
};
use globkit_util::fs::read_source;
use miette::{IntoDiagnostic, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Coalescing window for filesystem events.
const COALESCE_WINDOW_MS: u64 = 50;

type Shared = Arc<Mutex<InvalidationCoordinator>>;

/// Run the watch loop until Ctrl-C.
pub fn run(config: &Config, glob: GlobConfig, files: &[PathBuf]) -> Result<()> {
    let reporter = Arc::new(ConsoleReporter::new(config.json_logs));
    let root = glob.root.clone();

    let mut coordinator = InvalidationCoordinator::new(glob)
        .with_stale_sink(reporter.clone())
        .with_diagnostic_sink(reporter.clone());

    let mut registered = 0usize;
    for file in files {
        let file = super::absolute(&config.cwd, file);
        let source = read_source(&file).into_diagnostic()?;
        // Failures are reported through the diagnostic sink and retried on edit.
        if coordinator.register_module(&file, &source).is_ok() {
            registered += 1;
        }
    }
    info!(registered, total = files.len(), root = %root.display(), "Registered modules");
    reporter.emit(if config.json_logs {
        serde_json::json!({ "event": "ready", "modules": registered }).to_string()
    } else {
        format!("Watching {} for {registered} module(s)", root.display())
    });

    let coordinator: Shared = Arc::new(Mutex::new(coordinator));
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async move {
        let (tx, rx) = mpsc::unbounded_channel::<FsEvent>();
        let _watcher = start_watcher(&root, tx)?;

        tokio::select! {
            () = process_events(rx, coordinator, reporter) => {}
            res = tokio::signal::ctrl_c() => {
                res.into_diagnostic()?;
                info!("Interrupted, stopping watcher");
            }
        }
        Ok::<(), miette::Report>(())
    })
}

fn start_watcher(root: &Path, tx: mpsc::UnboundedSender<FsEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                for fs_event in to_fs_events(&event) {
                    if let Err(e) = tx.send(fs_event) {
                        warn!(error = %e, "Failed to send watch event");
                    }
                }
            }
            Err(e) => error!(error = %e, "Watch error"),
        },
        notify::Config::default().with_poll_interval(Duration::from_secs(2)),
    )
    .into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;
    info!(root = %root.display(), "Watching directory");
    Ok(watcher)
}

/// Translate a notify event into coordinator events. Directory and metadata
/// events are dropped.
fn to_fs_events(event: &Event) -> Vec<FsEvent> {
    let paths = event.paths.iter();
    match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => paths
            .filter(|p| !p.is_dir())
            .map(FsEvent::add)
            .collect(),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => paths
            .filter(|p| !p.is_dir())
            .map(FsEvent::change)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(FsEvent::remove).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.map(FsEvent::add).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![FsEvent::remove(from), FsEvent::add(to)],
            _ => Vec::new(),
        },
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => {
            paths.map(FsEvent::remove).collect()
        }
        _ => Vec::new(),
    }
}

/// Append `event` unless it repeats the last pending event.
fn push_coalesced(pending: &mut Vec<FsEvent>, event: FsEvent) {
    if pending.last() != Some(&event) {
        pending.push(event);
    }
}

async fn process_events(
    mut rx: mpsc::UnboundedReceiver<FsEvent>,
    coordinator: Shared,
    reporter: Arc<ConsoleReporter>,
) {
    let mut pending: Vec<FsEvent> = Vec::new();
    let mut last_event_time = std::time::Instant::now();

    loop {
        let timeout =
            tokio::time::timeout(Duration::from_millis(COALESCE_WINDOW_MS), rx.recv()).await;

        match timeout {
            Ok(Some(event)) => {
                push_coalesced(&mut pending, event);
                last_event_time = std::time::Instant::now();
            }
            Ok(None) => {
                debug!("Watch event channel closed");
                break;
            }
            Err(_) => {
                if pending.is_empty()
                    || last_event_time.elapsed() < Duration::from_millis(COALESCE_WINDOW_MS)
                {
                    continue;
                }
                debug!(count = pending.len(), "Processing coalesced file events");
                let stale = match coordinator.lock() {
                    Ok(mut c) => pending
                        .drain(..)
                        .map(|event| c.on_filesystem_event(&event).len())
                        .sum::<usize>(),
                    Err(_) => {
                        error!("Coordinator lock poisoned");
                        break;
                    }
                };
                if stale > 0 {
                    tokio::spawn(recompile_stale(coordinator.clone(), reporter.clone()));
                }
            }
        }
    }
}

/// Recompile stale modules on the blocking pool until none is left.
async fn recompile_stale(coordinator: Shared, reporter: Arc<ConsoleReporter>) {
    loop {
        let tickets: Vec<RecompileTicket> = match coordinator.lock() {
            Ok(mut c) => c
                .stale_modules()
                .iter()
                .filter_map(|file| c.begin_recompile(file))
                .collect(),
            Err(_) => return,
        };
        if tickets.is_empty() {
            return;
        }

        let handles: Vec<_> = tickets
            .into_iter()
            .map(|mut ticket| {
                tokio::task::spawn_blocking(move || {
                    let result = ticket.compile();
                    (ticket, result)
                })
            })
            .collect();

        for handle in handles {
            let (ticket, result) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Recompile task failed");
                    continue;
                }
            };
            let outcome = match coordinator.lock() {
                Ok(mut c) => c.finish_recompile(ticket, result),
                Err(_) => return,
            };
            report_outcome(&reporter, &outcome);
        }
    }
}

fn report_outcome(reporter: &ConsoleReporter, outcome: &RecompileOutcome) {
    if reporter.is_json() {
        if let Ok(line) = serde_json::to_string(outcome) {
            reporter.emit(line);
        }
        return;
    }
    let line = match outcome {
        RecompileOutcome::Installed { module, .. } => format!("  rebuilt {module}"),
        RecompileOutcome::Failed { module, .. } => format!("  kept last good output for {module}"),
        RecompileOutcome::Discarded { module } => format!("  discarded stale result for {module}"),
    };
    reporter.emit(line);
}
