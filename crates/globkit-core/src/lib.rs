#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::return_self_not_must_use)]

//! Glob-import resolution, code generation and live invalidation.
//!
//! `import.meta.glob(...)` directives are parsed from module source, resolved
//! against the filesystem, classified per matched file and replaced with a
//! literal mapping. [`InvalidationCoordinator`] keeps compiled modules current
//! as files are added, removed and edited.

pub mod classify;
pub mod codegen;
pub mod codes;
pub mod compile;
pub mod config;
pub mod coordinator;
pub mod directive;
pub mod error;
pub mod resolve;
pub mod specifier;
pub mod transform;

pub use classify::{classify, LoadEntry, LoadKind};
pub use codegen::{generate, GeneratedDirective};
pub use compile::{CompiledDirective, CompiledModule, Compiler, RegistrationTable};
pub use config::{AliasTable, CompileMode, Config, GlobConfig};
pub use coordinator::{
    Diagnostic, DiagnosticLevel, DiagnosticSink, DirectiveState, FsEvent, FsEventKind,
    InvalidationCoordinator, ModuleId, RecompileOutcome, RecompileTicket, StaleSink, WatchBinding,
};
pub use directive::{parse_directive, parse_directives, DirectiveId, GlobDirective, GlobOptions, ImportAs};
pub use error::{GlobError, Result};
pub use resolve::{resolve, MatchSet, MatchedFile};
pub use transform::{ExportSurface, Transformer, TransformerRegistry};

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version of the CLI's JSON compile report.
pub const REPORT_SCHEMA_VERSION: u32 = 1;
