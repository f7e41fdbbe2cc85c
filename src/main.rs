//! DepoKit CLI
//!
//! - `check`: import and build a drawing, report warnings and jumps
//! - `build`: write the recipe as JSON for offline review
//! - `run`: connect, home, position, confirm and execute a drawing
//! - `home` / `stop`: manual machine commands

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use depokit::runtime::{self, Runtime, Transport};
use depokit::{init_logging, Config, ExecutionStatus, LogOptions};
use depokit_recipe::{BuildOutput, ImportedGeometry};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// DepoKit command line
#[derive(Parser)]
#[command(name = "depokit")]
#[command(about = "Deposition manipulator pattern runner", long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"))]
struct Cli {
    /// Configuration file path (.toml or .json)
    #[arg(short, long, global = true, env = "DEPOKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Import a drawing and validate the resulting recipe
    Check {
        /// DXF drawing
        file: PathBuf,
    },

    /// Build a recipe and write it as JSON
    Build {
        /// DXF drawing
        file: PathBuf,
        /// Output path
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Execute a drawing on the manipulator
    Run {
        /// DXF drawing
        file: PathBuf,
        /// Use simulated controllers
        #[arg(long)]
        simulate: bool,
        /// Skip operator confirmations
        #[arg(short, long)]
        yes: bool,
    },

    /// Home all axes
    Home {
        /// Use simulated controllers
        #[arg(long)]
        simulate: bool,
    },

    /// Stop all axes immediately
    Stop {
        /// Use simulated controllers
        #[arg(long)]
        simulate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(LogOptions {
        verbose: cli.verbose,
        json: cli.json,
    })?;

    let config = Config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Check { file } => check(&config, &file),
        Commands::Build { file, out } => build(&config, &file, &out),
        Commands::Run {
            file,
            simulate,
            yes,
        } => run(config, &file, transport(simulate), yes).await,
        Commands::Home { simulate } => home(config, transport(simulate)).await,
        Commands::Stop { simulate } => stop(config, transport(simulate)).await,
    }
}

fn transport(simulate: bool) -> Transport {
    if simulate {
        Transport::Simulated
    } else {
        Transport::Modbus
    }
}

fn prepare(config: &Config, file: &Path) -> anyhow::Result<(ImportedGeometry, BuildOutput)> {
    runtime::prepare(config, file).with_context(|| format!("Failed to prepare {}", file.display()))
}

fn print_summary(geometry: &ImportedGeometry, output: &BuildOutput, travel_speed: f64) {
    let recipe = &output.recipe;
    let metadata = recipe.metadata();
    println!(
        "Drawing: {} paths, {} vertices, unit {} (x{}), length {:.3} mm",
        geometry.path_count,
        geometry.vertex_count,
        geometry.unit,
        geometry.scale_to_mm,
        geometry.total_length
    );
    if let Some(bbox) = &metadata.bounding_box {
        println!(
            "Bounds:  x {:.3}..{:.3}  y {:.3}..{:.3} mm",
            bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y
        );
    }
    println!(
        "Recipe:  {} commands over {} paths, print {} mm/s, travel {} mm/s{}",
        recipe.len(),
        metadata.path_count,
        metadata.print_speed,
        metadata.travel_speed,
        if metadata.stop_and_go {
            ", stop-and-go"
        } else {
            ""
        }
    );
    println!(
        "Estimated duration: {:.0} s",
        runtime::estimate_duration(recipe, travel_speed).as_secs_f64()
    );

    for warning in &geometry.warnings {
        println!("warning: {}", warning);
    }
    for warning in &output.warnings {
        println!("warning: {}", warning);
    }
    for jump in &output.jumps {
        println!("jump:    {}", jump);
    }
}

fn check(config: &Config, file: &Path) -> anyhow::Result<ExitCode> {
    let (geometry, output) = prepare(config, file)?;
    print_summary(&geometry, &output, config.recipe.travel_speed);
    Ok(ExitCode::SUCCESS)
}

fn build(config: &Config, file: &Path, out: &Path) -> anyhow::Result<ExitCode> {
    let (geometry, output) = prepare(config, file)?;
    print_summary(&geometry, &output, config.recipe.travel_speed);

    let json = serde_json::to_string_pretty(&output.recipe)?;
    std::fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {}", out.display());
    Ok(ExitCode::SUCCESS)
}

async fn connect(config: Config, transport: Transport) -> anyhow::Result<Runtime> {
    let runtime = Runtime::new(config, transport);
    if let Err(err) = runtime.connect().await {
        runtime.shutdown().await;
        return Err(err).context("Failed to connect to the controllers");
    }
    Ok(runtime)
}

/// Ask a yes/no question on stdin; Ctrl-C answers no
async fn confirm(question: String) -> anyhow::Result<bool> {
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        print!("{} [y/N] ", question);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    });
    tokio::select! {
        answer = answer => {
            let line = answer?.context("Failed to read from stdin")?;
            Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
        }
        _ = tokio::signal::ctrl_c() => Ok(false),
    }
}

async fn run(
    config: Config,
    file: &Path,
    transport: Transport,
    yes: bool,
) -> anyhow::Result<ExitCode> {
    let (geometry, output) = prepare(&config, file)?;
    print_summary(&geometry, &output, config.recipe.travel_speed);

    if !output.jumps.is_empty()
        && !yes
        && !confirm(format!(
            "{} suspicious jumps found. Continue?",
            output.jumps.len()
        ))
        .await?
    {
        println!("Cancelled");
        return Ok(ExitCode::FAILURE);
    }

    let runtime = connect(config, transport).await?;
    let status = execute(&runtime, output, yes).await;
    runtime.shutdown().await;

    let status = status?;
    println!("Run finished: {}", status);
    Ok(if status == ExecutionStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn execute(
    runtime: &Runtime,
    output: BuildOutput,
    yes: bool,
) -> anyhow::Result<ExecutionStatus> {
    let executor = runtime.executor();

    runtime
        .manipulator()
        .home_all()
        .await
        .context("Homing failed")?;
    runtime.load(output.recipe)?;
    executor.begin().await.context("Positioning failed")?;

    let position = runtime.manipulator().current_position();
    if !yes && !confirm(format!("Nozzle at {}. Start deposition?", position)).await? {
        executor.abort().await?;
        return Ok(executor.status());
    }
    executor.confirm()?;

    loop {
        let status = tokio::select! {
            status = executor.wait_until_settled() => status,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, aborting run");
                executor.abort().await?;
                executor.status()
            }
        };

        match status {
            ExecutionStatus::Paused => {
                if let Some(failure) = executor.last_failure() {
                    println!("Paused at command {}: {}", executor.current_index(), failure);
                }
                if !yes && confirm("Resume?".to_string()).await? {
                    executor.resume().await?;
                } else {
                    executor.abort().await?;
                    return Ok(executor.status());
                }
            }
            ExecutionStatus::Completed | ExecutionStatus::Aborted => return Ok(status),
            other => bail!("Executor settled in unexpected state {}", other),
        }
    }
}

async fn home(config: Config, transport: Transport) -> anyhow::Result<ExitCode> {
    let runtime = connect(config, transport).await?;
    let result = runtime.manipulator().home_all().await;
    if result.is_ok() {
        println!("Homed at {}", runtime.manipulator().current_position());
    }
    runtime.shutdown().await;
    result.context("Homing failed")?;
    Ok(ExitCode::SUCCESS)
}

async fn stop(config: Config, transport: Transport) -> anyhow::Result<ExitCode> {
    let runtime = connect(config, transport).await?;
    let result = runtime.manipulator().emergency_stop().await;
    runtime.shutdown().await;
    result.context("Stop could not be confirmed on every axis")?;
    println!("All axes stopped");
    Ok(ExitCode::SUCCESS)
}
