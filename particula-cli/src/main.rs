use clap::{Parser, Subcommand};
use particula_core::diagnostics::{format_diagnostic, format_parse_error};
use particula_core::{analyze_program, parse_program, Simulation, SimulationSettings};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod watch;

#[derive(Parser)]
#[command(name = "particula")]
#[command(about = "Particula - particle simulations from equation descriptions", long_about = None)]
struct Cli {
    /// Log setup and per-step details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation description to its end time
    Run {
        /// Path to the simulation source file
        file: PathBuf,
        /// Worker threads, overriding the `simulate` line
        #[arg(short, long)]
        threads: Option<usize>,
        /// Symbols whose final values are printed
        #[arg(short, long, num_args = 1..)]
        print: Vec<String>,
    },
    /// Parse and analyze without running
    Check {
        file: PathBuf,
    },
    /// Re-run the simulation whenever the file changes
    Watch {
        file: PathBuf,
        #[arg(short, long, num_args = 1..)]
        print: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Run {
            file,
            threads,
            print,
        } => run_file(&file, threads, &print),
        Commands::Check { file } => check_file(&file),
        Commands::Watch { file, print } => watch::watch_file(&file, &print),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_file(
    file: &Path,
    threads: Option<usize>,
    print: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(file)?;
    run_source(&source, threads, print)
}

/// Parse, build and run one source text, printing the requested symbols
pub(crate) fn run_source(
    source: &str,
    threads: Option<usize>,
    print: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(e) => return Err(format_parse_error(&e, source, None).into()),
    };
    let mut settings = SimulationSettings::from_decl(&program.simulate);
    if let Some(threads) = threads {
        settings.threads = threads;
    }
    let mut simulation = Simulation::build(&program, settings)?;
    let report = simulation.run()?;
    info!(
        steps = report.steps,
        abandoned = report.abandoned,
        particles = report.particles,
        "t = {}",
        report.time
    );

    for name in print {
        match simulation.values(name) {
            Some(values) => {
                for (i, v) in values.iter().enumerate() {
                    println!("{}[{}] = {}", name, i, v);
                }
            }
            None => error!(name = %name, "no such symbol"),
        }
    }
    Ok(())
}

fn check_file(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(file)?;
    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(e) => return Err(format_parse_error(&e, &source, None).into()),
    };
    let diagnostics = analyze_program(&program);
    for d in diagnostics.iter() {
        println!("{}", format_diagnostic(d, &source));
    }
    if diagnostics.has_errors() {
        return Err(format!("{} has errors", file.display()).into());
    }
    println!(
        "{}: ok ({} equation(s))",
        file.display(),
        program.equations().count()
    );
    Ok(())
}
