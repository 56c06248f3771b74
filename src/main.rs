use anyhow::Result;
use clap::Parser;
use hookline::cli::{Cli, Command, OutputFormat};
use hookline::config::HookPlan;
use hookline::emitter::{ConsoleSink, Emitter};
use hookline::native::BoundaryTable;
use hookline::symbols::{DynamicSymbols, ElfExports};
use hookline::Monitor;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Validate a plan and print a summary
fn check_plan(path: &Path) -> Result<()> {
    let plan = HookPlan::from_file(path)?;

    println!(
        "plan: {} method(s), {} class(es), {} native probe(s)",
        plan.method.len(),
        plan.class.len(),
        plan.native.len()
    );
    for entry in &plan.method {
        println!("  method {}", entry.target);
    }
    for entry in &plan.class {
        println!("  class  {}", entry.name);
    }
    for entry in &plan.native {
        println!("  native {}!{}", entry.module, entry.symbol);
    }

    let problems = plan.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("error: {}", problem);
        }
        anyhow::bail!("{} invalid entr(y/ies) in {}", problems.len(), path.display());
    }

    Ok(())
}

/// Print the export table of a module file
fn list_exports(module: &Path, filter: Option<&str>) -> Result<()> {
    let filter = filter.map(Regex::new).transpose()?;
    let exports = ElfExports::load(module)?;

    for export in exports.exports() {
        if filter.as_ref().is_some_and(|re| !re.is_match(&export.name)) {
            continue;
        }
        println!("{:#018x} {}", export.address, export.name);
    }

    Ok(())
}

/// Resolve a live export and print its attach line
fn resolve_export(module: &str, symbol: &str, format: OutputFormat) -> Result<()> {
    let monitor = Monitor::new(Emitter::new(Arc::new(ConsoleSink), format))
        .with_native(Arc::new(DynamicSymbols), Arc::new(BoundaryTable::new()));

    if monitor.monitor_native_export(module, symbol).is_none() {
        // Diagnostic already printed; report failure through the exit code.
        std::process::exit(1);
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Check { plan } => check_plan(&plan),
        Command::Exports { module, filter } => list_exports(&module, filter.as_deref()),
        Command::Resolve { module, symbol } => resolve_export(&module, &symbol, args.format),
    }
}
