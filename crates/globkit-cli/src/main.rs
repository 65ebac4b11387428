#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use globkit_core::{CompileMode, Config};
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "globkit")]
#[command(author, version, about = "Compile and watch import.meta.glob directives", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that compiles.
#[derive(clap::Args, Debug, Clone)]
struct ProjectArgs {
    /// Project root for `/`-anchored patterns and url bindings (defaults to cwd)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Alias substitution, repeatable (e.g. --alias @=src)
    #[arg(long = "alias", value_name = "TOKEN=DIR")]
    aliases: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Compile a module and print the rewritten source
    Compile {
        /// Module to compile
        file: PathBuf,

        #[command(flatten)]
        project: ProjectArgs,

        /// Ordering mode for sibling directives
        #[arg(long, default_value = "build", value_parser = parse_mode)]
        mode: CompileMode,

        /// Write the compiled source here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        outfile: Option<PathBuf>,
    },

    /// Watch modules and recompile them as matched files change
    Watch {
        /// Modules to register
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        project: ProjectArgs,
    },
}

fn parse_mode(s: &str) -> std::result::Result<CompileMode, String> {
    s.parse()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Commands::Version => commands::version::run(cli.json),
        Commands::Compile {
            file,
            project,
            mode,
            outfile,
        } => {
            let glob = commands::glob_config(&config, project.root, &project.aliases)?
                .with_mode(mode);
            commands::compile::run(&config, glob, &file, outfile.as_deref())
        }
        Commands::Watch { files, project } => {
            let glob = commands::glob_config(&config, project.root, &project.aliases)?;
            commands::watch::run(&config, glob, &files)
        }
    }
}
