use clap::{Arg, Command};
use log::LevelFilter;
use mailrisk::pipeline::ScoringPipeline;
use mailrisk::record::EmailInput;
use mailrisk::ScoringConfig;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("mailrisk")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-signal email threat scoring pipeline")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mailrisk.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("analyze")
                .short('a')
                .long("analyze")
                .value_name("FILE")
                .help("Score a normalized email (JSON) and print the record")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .help("Use deterministic mock data instead of external services")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        let config = ScoringConfig::default();
        match config.to_file(path) {
            Ok(()) => {
                println!("Default configuration written to {path}");
                return;
            }
            Err(e) => {
                eprintln!("Failed to write configuration: {e}");
                process::exit(1);
            }
        }
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/mailrisk.yaml");

    let config = if std::path::Path::new(config_path).exists() {
        match ScoringConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from {config_path}: {e}");
                process::exit(1);
            }
        }
    } else {
        log::warn!("config file {config_path} not found, using defaults");
        ScoringConfig::default()
    };

    let use_mock = matches.get_flag("mock");

    if matches.get_flag("test-config") {
        match config.validate(use_mock) {
            Ok(()) => {
                println!("Configuration is valid");
                return;
            }
            Err(e) => {
                eprintln!("Configuration is invalid: {e}");
                process::exit(1);
            }
        }
    }

    let Some(email_path) = matches.get_one::<String>("analyze") else {
        eprintln!("Nothing to do; pass --analyze <FILE> or --test-config");
        process::exit(2);
    };

    let input: EmailInput = match std::fs::read_to_string(email_path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
    {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Failed to read email input {email_path}: {e}");
            process::exit(1);
        }
    };

    let pipeline = match ScoringPipeline::new(&config, use_mock) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let record = pipeline.analyze(input).await;

    match serde_json::to_string_pretty(&record) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize record: {e}");
            process::exit(1);
        }
    }
}
