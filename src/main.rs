mod debug_report;

use entity_resolver::{EngineError, EngineOptions, JsonFileSource, MemoryDirectory, Resolver, SystemConfiguration};
use serde_json::Value;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    init_tracing(config.verbose);

    let mut resolver = match build_resolver(&config) {
        Ok(resolver) => resolver,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let report = match resolver.resolve().await {
        Ok(report) => report,
        Err(err @ EngineError::Source(_)) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&report.configuration) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("error: failed to serialize configuration: {err}");
                std::process::exit(1);
            }
        }
    } else {
        debug_report::print_report(&report, config.color);
    }
}

struct CliConfig {
    templates: PathBuf,
    bus: Option<PathBuf>,
    previous: Option<PathBuf>,
    options: Option<PathBuf>,
    json: bool,
    color: bool,
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn build_resolver(config: &CliConfig) -> Result<Resolver, String> {
    let options = match &config.options {
        Some(path) => EngineOptions::from_json_file(path).map_err(|err| format!("error: {err}"))?,
        None => EngineOptions::default(),
    };

    let directory = match &config.bus {
        Some(path) => {
            let fixture = read_json(path)?;
            MemoryDirectory::from_json(&fixture).map_err(|err| format!("error: {}: {err}", path.display()))?
        }
        None => MemoryDirectory::new(),
    };

    let previous = match &config.previous {
        Some(path) => SystemConfiguration::from_json(read_json(path)?)
            .ok_or_else(|| format!("error: {}: expected an object of records", path.display()))?,
        None => SystemConfiguration::new(),
    };

    let source = JsonFileSource::new(config.templates.clone());
    Ok(Resolver::new(Arc::new(directory), Arc::new(source), options).with_previous(previous))
}

fn read_json(path: &Path) -> Result<Value, String> {
    let text =
        std::fs::read_to_string(path).map_err(|err| format!("error: failed to read {}: {err}", path.display()))?;
    serde_json::from_str(&text).map_err(|err| format!("error: failed to parse {}: {err}", path.display()))
}

fn parse_args() -> Result<CliConfig, String> {
    let mut templates: Option<PathBuf> = None;
    let mut bus = None;
    let mut previous = None;
    let mut options = None;
    let mut json = false;
    let mut color = io::stdout().is_terminal();
    let mut verbose = false;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<PathBuf, String> {
            inline
                .clone()
                .or_else(|| args.next())
                .map(PathBuf::from)
                .ok_or_else(|| format!("error: {name} expects a value"))
        };

        match flag.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("entity-resolver {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--json" => json = true,
            "-v" | "--verbose" => verbose = true,
            "--templates" | "-t" => {
                if templates.is_some() {
                    return Err("error: templates provided multiple times".to_string());
                }
                templates = Some(value("--templates")?);
            }
            "--bus" => bus = Some(value("--bus")?),
            "--previous" => previous = Some(value("--previous")?),
            "--options" => options = Some(value("--options")?),
            _ if flag.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                if templates.is_some() {
                    return Err("error: templates provided multiple times".to_string());
                }
                templates = Some(PathBuf::from(arg));
            }
        }
    }

    let Some(templates) = templates else {
        return Err(format!("error: no templates provided\n\n{}", help_text()));
    };

    Ok(CliConfig { templates, bus, previous, options, json, color, verbose })
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "entity-resolver {version}

Resolve device templates against an inventory bus fixture.

Usage:
  entity-resolver [OPTIONS] --templates <file|dir>
  entity-resolver [OPTIONS] <file|dir>

Options:
  -t, --templates <path>     Template file, or a directory of .json template files.
  --bus <file>               Bus fixture: {{ path: {{ interface: {{ property: value }} }} }}.
                             Default: an empty bus.
  --previous <file>          Previously persisted configuration to adopt records from.
  --options <file>           Engine options as JSON (missing fields take defaults).
  --json                     Print the resolved configuration as JSON.
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -v, --verbose              Log at debug level unless RUST_LOG is set.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Exit codes:
  0  Success.
  1  Fatal engine error (directory unavailable).
  2  Invalid arguments or unreadable input.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
