mod cli;
mod commands;
mod format;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use devcert_common::error::ErrorCode;
use devcert_lifecycle::{CertLifecycle, ConfigLayer, DevcertConfig, DevcertError};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = match init_logging(env_filter, cli.log_file.as_deref(), cli.json) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            tracing::debug!(error = ?e, code, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;
    tracing::debug!(?config, "Configuration resolved");
    let lifecycle = CertLifecycle::from_config(config)?;
    commands::dispatch(cli, &lifecycle)
}

/// CLI flags over environment over config file over defaults.
fn resolve_config(cli: &Cli) -> anyhow::Result<DevcertConfig> {
    let file = cli
        .config
        .clone()
        .unwrap_or_else(devcert_common::paths::default_config_file);
    let layers = [
        cli.config_layer(),
        ConfigLayer::from_env()?,
        ConfigLayer::load_file(&file)
            .with_context(|| format!("loading {}", file.display()))?,
    ];
    Ok(DevcertConfig::resolve(&layers)?)
}

/// Exit status for a failed command; domain errors map through `ErrorCode`.
fn exit_code(e: &anyhow::Error) -> u8 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<DevcertError>())
        .map(|err| ErrorCode::from(err).exit_code())
        .unwrap_or(1)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber: stderr always, plus `log_file` when
/// given. With `json` every sink emits one JSON object per event.
///
/// The returned guards flush the non-blocking writers when dropped.
fn init_logging(
    env_filter: EnvFilter,
    log_file: Option<&Path>,
    json: bool,
) -> anyhow::Result<Vec<WorkerGuard>> {
    let (stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let mut guards = vec![stderr_guard];
    let mut sinks = vec![event_layer(stderr, json, true)];

    if let Some(path) = log_file {
        let (file, file_guard) = tracing_appender::non_blocking(open_log_file(path)?);
        guards.push(file_guard);
        sinks.push(event_layer(file, json, false));
    }

    tracing_subscriber::registry()
        .with(sinks)
        .with(env_filter)
        .try_init()
        .context("installing the log subscriber")?;
    Ok(guards)
}

fn event_layer<W>(writer: W, json: bool, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Open `path` for appending, creating missing parent directories.
fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
