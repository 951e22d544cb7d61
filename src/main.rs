use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use powerline::cli::{Cli, Commands, ConfigAction};
use powerline::config::Config;
use powerline::monitor::{BufferSummary, ReplaySource};
use powerline::pipeline::{AssemblyLine, MapStage, Rechunker, SampleBuffer};
use std::path::{Path, PathBuf};

fn main() {
    let cli = Cli::parse();
    powerline::logging::init(cli.quiet, cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Replay { file, no_headers } => {
            config.validate()?;
            run_replay(config, &file, no_headers, cli.quiet)?;
        }
        Commands::Config { action } => handle_config_command(action, &config)?,
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Command-line flags (--workers, --chunk-size, --poll-interval)
/// 2. Environment variables (POWERLINE_*)
/// 3. Custom config path from CLI (--config), or ~/.config/powerline/config.toml
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match (cli.config.as_deref(), Config::default_path()) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(default_path)) => Config::load_or_default(&default_path)?,
        (None, None) => Config::default(),
    };

    let mut config = config.with_env_overrides();
    if let Some(workers) = cli.workers {
        config.line.workers = workers;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.replay.chunk_size = chunk_size;
    }
    if let Some(interval) = cli.poll_interval {
        config.line.poll_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
    }
    Ok(config)
}

/// Replay a capture: source → rechunk → summarize, one line per buffer.
fn run_replay(config: Config, file: &Path, no_headers: bool, quiet: bool) -> Result<()> {
    let mut replay = config.replay.clone();
    if no_headers {
        replay.has_headers = false;
    }

    let line = AssemblyLine::new(config.line.clone())
        .source(ReplaySource::open(file, &replay))
        .sequential(Rechunker::new(replay.chunk_size))
        .parallel(MapStage::new("summarize", |buffer: SampleBuffer| {
            Ok(BufferSummary::of(&buffer))
        }))
        .start()?;

    let mut buffers = 0u64;
    let mut samples = 0usize;
    line.for_each(|item| {
        buffers += 1;
        samples += item.buffer.samples;
        if !quiet {
            println!("{:>6}  {}", item.index, item.buffer);
        }
        Ok(())
    })
    .with_context(|| format!("Failed to replay {}", file.display()))?;

    if !quiet {
        eprintln!(
            "{}",
            format!("Replayed {} samples in {} buffers", samples, buffers).green()
        );
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Path => {
            let path: PathBuf =
                Config::default_path().context("Could not determine config directory")?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
