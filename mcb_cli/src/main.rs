#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `mcb`: list, monitor, calibrate and move spectra between files and detectors.

mod cli;
mod commands;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use mcb_config::Config;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::commands::MonitorArgs;

fn main() {
    let cli = Cli::parse();
    let _ = color_eyre::install();
    let _ = JSON_MODE.set(cli.json);

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", error_fmt::format_error_json(&e));
            } else {
                eprintln!("{}", error_fmt::humanize(&e));
            }
            tracing::error!(error = %e, "command failed");
            error_fmt::exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let cfg = match path {
        None => Config::default(),
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("read config {}", p.display()))?;
            mcb_config::load_toml(&text)
                .map_err(|e| eyre::eyre!("invalid configuration in {}: {e}", p.display()))?
        }
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_tracing(cfg: &Config, cli_level: Option<&str>, json: bool) -> eyre::Result<()> {
    let level = cli_level
        .or(cfg.logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre::eyre!("bad log level {level:?}: {e}"))?;

    let console_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_text = (!json).then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let file_layer = match cfg.logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = match cfg.logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cfg, cli.log_level.as_deref(), cli.json)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("install Ctrl-C handler")?;
    }

    let json = cli.json;
    match cli.cmd {
        Commands::List => commands::list(&cfg, json),
        Commands::Status { detector } => commands::status(&cfg, detector, json),
        Commands::Monitor {
            detector,
            ticks,
            clear,
            live_preset_s,
            real_preset_s,
            rois,
            save,
        } => commands::monitor(
            &cfg,
            MonitorArgs {
                detector,
                ticks,
                clear,
                live_preset_s,
                real_preset_s,
                rois,
                save,
            },
            &shutdown,
            json,
        ),
        Commands::Calibrate {
            detector,
            points,
            csv,
            units,
        } => commands::calibrate(&cfg, detector, &points, csv.as_deref(), units, json),
        Commands::Inspect {
            file,
            display_channels,
        } => commands::inspect(&cfg, &file, display_channels, json),
        Commands::Load { file, detector } => commands::load(&cfg, &file, detector, json),
        Commands::SelfCheck => commands::self_check(&cfg, json),
    }
}
