use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use walkdir::WalkDir;

use flowtrace_core::{export, scan_sources, ControlFlowEvent, DebugSession, StagedProgram, Trace};

/// Trace a Java program's control flow, line by line.
///
/// The program is staged into a temporary directory, launched suspended with
/// the JDWP agent, and stepped through under the debugger. The resulting
/// trace is printed to stdout and written as JSON.
#[derive(Debug, Parser)]
#[command(name = "flowtrace", version, about)]
struct Cli {
    /// Directory holding the program's `.java` sources and compiled
    /// `.class` files (searched recursively)
    program_dir: PathBuf,

    /// Name of the class whose `main` method starts the run
    main_class: String,

    /// Where to write the JSON trace (default: `trace/<MainClass>-trace.json`)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Suppress the human-readable trace on stdout
    #[arg(long)]
    quiet: bool,
}

const EXIT_SCAN_ERROR: i32 = 3;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    let sources = java_sources(&cli.program_dir)?;
    if sources.is_empty() {
        bail!("no .java files found under {}", cli.program_dir.display());
    }
    let scope = match scan_sources(&sources) {
        Ok(scope) => scope,
        Err(err) => {
            eprintln!("{err:#}");
            return Ok(EXIT_SCAN_ERROR);
        }
    };
    tracing::info!(
        types = scope.type_names().count(),
        files = sources.len(),
        "instrumentation scope built"
    );

    let staged = StagedProgram::stage(&cli.program_dir)
        .with_context(|| format!("failed to stage {}", cli.program_dir.display()))?;
    let session = DebugSession::launch(&staged.classes_dir(), &cli.main_class, scope).await?;
    let trace = session.run().await?;

    if !cli.quiet {
        print_trace(&trace);
    }

    let out = cli
        .out
        .unwrap_or_else(|| PathBuf::from("trace").join(format!("{}-trace.json", cli.main_class)));
    export::write_json(&out, &trace)
        .with_context(|| format!("failed to write {}", out.display()))?;
    eprintln!("trace written to {}", out.display());
    Ok(0)
}

fn java_sources(dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("java") {
            sources.push(path.to_path_buf());
        }
    }
    sources.sort();
    Ok(sources)
}

/// Prints the trace with call nesting shown as indentation: exits dedent
/// before printing, calls indent everything after them.
fn print_trace(trace: &Trace) {
    let mut depth: usize = 0;
    for event in trace.events() {
        if matches!(event, ControlFlowEvent::FunExit { .. }) {
            depth = depth.saturating_sub(1);
        }
        println!("{:indent$}{event}", "", indent = depth * 2);
        if matches!(event, ControlFlowEvent::FunCall { .. }) {
            depth += 1;
        }
    }
}
