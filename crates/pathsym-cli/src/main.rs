//! Command-line interface for the pathsym symbolic execution layer.

mod explore;

use clap::{Parser, Subcommand};
use explore::{ExploreConfig, Explorer};
use miette::{Diagnostic, NamedSource, SourceSpan};
use pathsym_guidance::{compute_distances, GuidanceError};
use pathsym_ir::{load_program, LocRef, Program, ProgramError};
use pathsym_solver::EnumeratorConfig;
use pathsym_symex::SymexError;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to read file: {message}")]
    IoError { message: String },

    #[error("invalid program JSON: {message}")]
    #[diagnostic(code(pathsym::json_error))]
    JsonError {
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error(transparent)]
    #[diagnostic(code(pathsym::program_error))]
    Program(#[from] ProgramError),

    #[error(transparent)]
    #[diagnostic(code(pathsym::guidance_error))]
    Guidance(#[from] GuidanceError),

    #[error("symbolic execution failed: {0}")]
    #[diagnostic(code(pathsym::symex_error))]
    Symex(#[from] SymexError),

    #[error("decision procedure failed during {context}: {message}")]
    #[diagnostic(code(pathsym::solver_error))]
    Solver {
        context: &'static str,
        message: String,
    },

    #[error("unsupported instruction at L{loc}: {instruction}")]
    #[diagnostic(help("threads are not scheduled by the explorer"))]
    Unsupported { loc: LocRef, instruction: String },
}

impl CliError {
    fn from_program_error(e: ProgramError, source: Arc<String>, filename: &str) -> Self {
        match e {
            ProgramError::Json(json) if json.line() > 0 => {
                let offset = byte_offset(&source, json.line(), json.column());
                CliError::JsonError {
                    message: json.to_string(),
                    src: NamedSource::new(filename, source),
                    span: (offset, 0).into(),
                }
            }
            other => CliError::Program(other),
        }
    }
}

/// Byte offset of a 1-based line and column.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

pub(crate) type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pathsym", version)]
#[command(about = "Path-based symbolic execution of flattened programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a program and show its location table
    Locs {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Annotate every location with its distance to the assertion
    Distances {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Explore every path and check each assertion
    Check {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum traversals of each backward jump and nesting of each function
        #[arg(long, default_value = "8")]
        unwind: u32,

        /// Expand the state closest to the assertion first
        #[arg(long)]
        guided: bool,

        /// Smallest value of an integer symbol
        #[arg(long, default_value = "-8", allow_hyphen_values = true)]
        int_min: i64,

        /// Largest value of an integer symbol
        #[arg(long, default_value = "8", allow_hyphen_values = true)]
        int_max: i64,

        /// Give up on a query above this many candidate assignments
        #[arg(long, default_value = "1000000")]
        max_assignments: u64,
    },
}

fn main() {
    // Install miette's fancy error handler
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Locs { file } => cmd_locs(&file),
        Commands::Distances { file } => cmd_distances(&file),
        Commands::Check {
            file,
            unwind,
            guided,
            int_min,
            int_max,
            max_assignments,
        } => cmd_check(
            &file,
            ExploreConfig {
                unwind,
                guided,
                enumerator: EnumeratorConfig {
                    int_lo: int_min,
                    int_hi: int_max,
                    max_assignments,
                },
            },
        ),
    };

    if let Err(e) = result {
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}

fn load(file: &PathBuf) -> CliResult<Program> {
    let filename = file.display().to_string();
    let source = Arc::new(fs::read_to_string(file).map_err(|e| CliError::IoError {
        message: e.to_string(),
    })?);

    load_program(&source).map_err(|e| CliError::from_program_error(e, source.clone(), &filename))
}

fn cmd_locs(file: &PathBuf) -> CliResult<()> {
    let program = load(file)?;
    print!("{}", program.locs);
    println!(
        "locations: {}, functions: {}",
        program.locs.len(),
        program.locs.function_map.len()
    );
    Ok(())
}

fn cmd_distances(file: &PathBuf) -> CliResult<()> {
    let mut program = load(file)?;
    compute_distances(&mut program.locs)?;
    print!("{}", program.locs);
    Ok(())
}

fn cmd_check(file: &PathBuf, config: ExploreConfig) -> CliResult<()> {
    let mut program = load(file)?;

    if config.guided {
        info!("computing distances...");
        compute_distances(&mut program.locs)?;
    }

    info!(unwind = config.unwind, "exploring...");
    let start = Instant::now();
    let mut explorer = Explorer::new(program, config);
    explorer.run()?;
    let elapsed = start.elapsed();
    let stats = explorer.stats();

    println!();
    if explorer.any_violated() {
        println!("Result: ASSERTION VIOLATED");
    } else {
        println!("Result: OK");
    }
    for report in explorer.reports() {
        let verdict = if report.violated { "VIOLATED" } else { "SAFE" };
        println!("  L{}: {}: {}", report.loc, report.instruction, verdict);
        for (symbol, value) in &report.counterexample {
            println!("    {} = {}", symbol, value);
        }
    }
    println!("  Paths completed: {}", stats.paths);
    println!("  Paths infeasible: {}", stats.infeasible);
    println!("  Paths bounded: {}", stats.bounded);
    println!("  Steps: {}", stats.steps);
    println!("  Time: {:.2}s", elapsed.as_secs_f64());

    if explorer.any_violated() {
        std::process::exit(1);
    }
    Ok(())
}
