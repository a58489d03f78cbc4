// src/main.rs

//! The main entry point for the Titan server application.

use anyhow::{Context, Result, bail};
use std::env;
use titan::config::Config;
use titan::server;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

// Version information, stamped by build.rs.
const VERSION: &str = env!("TITAN_BUILD_VERSION");
const PROFILE: &str = env!("TITAN_BUILD_PROFILE");

/// What the process was asked to do.
#[derive(Debug)]
enum Mode {
    Version,
    /// Load and validate the configuration, then exit.
    CheckConfig(Options),
    Serve(Options),
}

#[derive(Debug)]
struct Options {
    config_path: String,
    port: Option<u16>,
}

fn parse_args(args: &[String]) -> Result<Mode> {
    let mut options = Options {
        config_path: "config.toml".to_string(),
        port: None,
    };
    let mut check_only = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Mode::Version),
            "--check-config" => check_only = true,
            "--config" => {
                options.config_path = iter
                    .next()
                    .context("--config flag requires a path")?
                    .clone();
            }
            "--port" => {
                let value = iter.next().context("--port flag requires a value")?;
                match value.parse::<u16>() {
                    Ok(port) if port != 0 => options.port = Some(port),
                    _ => bail!("Invalid port number: {value}"),
                }
            }
            other => bail!("Unknown argument: {other}"),
        }
    }

    Ok(if check_only {
        Mode::CheckConfig(options)
    } else {
        Mode::Serve(options)
    })
}

/// Loads the configuration and applies command-line overrides.
fn load_config(options: &Options) -> Result<Config> {
    let mut config = Config::from_file(&options.config_path)
        .with_context(|| format!("Failed to load configuration from \"{}\"", options.config_path))?;
    if let Some(port) = options.port {
        config.port = port;
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Usage: titan [--config <path>] [--port <port>] [--check-config] [--version]");
            std::process::exit(2);
        }
    };

    let options = match mode {
        Mode::Version => {
            println!("Titan version {VERSION} ({PROFILE} build)");
            return Ok(());
        }
        Mode::CheckConfig(options) => {
            return match load_config(&options) {
                Ok(config) => {
                    println!("Configuration OK: listening on {}", config.bind_addr());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{e:#}");
                    std::process::exit(1);
                }
            };
        }
        Mode::Serve(options) => options,
    };

    // The server cannot run without a valid configuration.
    let config = match load_config(&options) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    // RUST_LOG takes precedence over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    info!("Starting Titan {VERSION}...");
    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
