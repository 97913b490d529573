//! Frameworker - run host scripts that spawn dedicated workers
//!
//! Worker scripts are resolved relative to the host script's directory, or
//! against `--base-uri` when given.

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use frameworker::runtime::{HostRuntime, RuntimeConfig};
use frameworker::transpiler::{Transpiler, TranspilerConfig};

#[derive(Parser)]
#[command(name = "frameworker")]
#[command(author, version, about = "Dedicated Worker emulation on the Boa engine")]
struct Cli {
    /// Host script to execute
    file: Option<PathBuf>,

    /// Evaluate host code from the command line
    #[arg(short, long)]
    eval: Option<String>,

    /// Print the transpiled JavaScript without executing
    #[arg(long)]
    print: bool,

    /// Minify the output when using --print
    #[arg(long)]
    minify: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a host script until it and all of its workers are idle
    Run {
        /// Host script to run
        file: PathBuf,
        /// Document base URI that worker script references resolve against
        #[arg(long)]
        base_uri: Option<String>,
        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        max_runtime: u64,
    },
    /// Evaluate host code and run until its workers are idle
    Eval {
        /// Code to evaluate
        code: String,
    },
    /// Transpile TypeScript to JavaScript without executing
    Transpile {
        /// Input TypeScript file
        input: PathBuf,
        /// Output JavaScript file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Minify the output
        #[arg(long)]
        minify: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            file,
            base_uri,
            max_runtime,
        }) => {
            run_file(&file, base_uri, Duration::from_secs(max_runtime))?;
        }
        Some(Commands::Eval { code }) => {
            eval_code(&code)?;
        }
        Some(Commands::Transpile {
            input,
            output,
            minify,
        }) => {
            transpile_file(&input, output.as_deref(), minify)?;
        }
        None => {
            if let Some(code) = cli.eval {
                if cli.print {
                    print_transpiled(&code, "eval.ts", cli.minify)?;
                } else {
                    eval_code(&code)?;
                }
            } else if let Some(file) = cli.file {
                if cli.print {
                    let source = std::fs::read_to_string(&file).into_diagnostic()?;
                    let filename = file
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("input.ts");
                    print_transpiled(&source, filename, cli.minify)?;
                } else {
                    run_file(&file, None, RuntimeConfig::default().max_runtime)?;
                }
            } else {
                eprintln!("{}: nothing to run, pass a file or --eval", "Error".red());
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

/// Run a host script and every worker it spawns to completion
fn run_file(path: &Path, base_uri: Option<String>, max_runtime: Duration) -> Result<()> {
    let config = RuntimeConfig {
        base_path: path.parent().map(|p| p.to_path_buf()).unwrap_or_default(),
        base_uri,
        max_runtime,
        ..Default::default()
    };

    let mut runtime = HostRuntime::with_config(config).into_diagnostic()?;

    match runtime.run_file(path) {
        Ok(value) => {
            if !value.is_undefined() {
                let result = runtime.value_to_string(&value);
                println!("{}", result);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    report_diagnostics(&runtime);
    Ok(())
}

/// Evaluate host code from the command line
fn eval_code(code: &str) -> Result<()> {
    let mut runtime = HostRuntime::new().into_diagnostic()?;

    match runtime.run(code, "eval.ts") {
        Ok(value) => {
            if !value.is_undefined() {
                let result = runtime.value_to_string(&value);
                println!("{}", result);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    report_diagnostics(&runtime);
    Ok(())
}

fn report_diagnostics(runtime: &HostRuntime) {
    let count = runtime.diagnostics().len();
    if count > 0 {
        eprintln!(
            "{}: {} worker problem(s) reported, rerun with RUST_LOG=frameworker=debug for details",
            "Warning".yellow(),
            count
        );
    }
}

/// Transpile and print without executing
fn print_transpiled(code: &str, filename: &str, minify: bool) -> Result<()> {
    let config = TranspilerConfig { minify };
    let transpiler = Transpiler::with_config(config);

    match transpiler.transpile(code, filename) {
        Ok(js) => {
            println!("{}", js);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Transpile a file to JavaScript
fn transpile_file(input: &Path, output: Option<&Path>, minify: bool) -> Result<()> {
    let config = TranspilerConfig { minify };
    let transpiler = Transpiler::with_config(config);

    match transpiler.transpile_file(input) {
        Ok(js) => {
            if let Some(output_path) = output {
                std::fs::write(output_path, &js).into_diagnostic()?;
                println!(
                    "{}: Transpiled {} -> {}",
                    "Success".green(),
                    input.display(),
                    output_path.display()
                );
            } else {
                println!("{}", js);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
