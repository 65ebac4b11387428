//! `globkit compile` command implementation.

use super::report::CompileReport;
use globkit_core::{Compiler, Config, GlobConfig, RegistrationTable};
use globkit_util::fs::atomic_write;
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use tracing::{info, info_span};

/// Compile one module and write the result to stdout or `outfile`.
pub fn run(config: &Config, glob: GlobConfig, file: &Path, outfile: Option<&Path>) -> Result<()> {
    let file = super::absolute(&config.cwd, file);
    let mode = glob.mode.as_str();
    let _span = info_span!("compile", file = %file.display(), mode).entered();

    let compiler = Compiler::new(glob);
    let compiled = compiler.compile_file(&file, &mut RegistrationTable::new());

    let module = match compiled {
        Ok(module) => module,
        Err(err) => {
            if config.json_logs {
                let report = CompileReport::failure(&file, mode, &err);
                println!("{}", serde_json::to_string(&report).into_diagnostic()?);
                std::process::exit(1);
            }
            return Err(miette!(code = err.code(), "{err}"));
        }
    };

    info!(
        directives = module.directives.len(),
        nested = module.nested().count(),
        "Compiled module"
    );

    if let Some(outfile) = outfile {
        let outfile = super::absolute(&config.cwd, outfile);
        atomic_write(&outfile, module.code.as_bytes()).into_diagnostic()?;
    }

    if config.json_logs {
        let report = CompileReport::success(&module, mode);
        println!("{}", serde_json::to_string(&report).into_diagnostic()?);
    } else if outfile.is_none() {
        print!("{}", module.code);
    }
    Ok(())
}
