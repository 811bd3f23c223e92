//! Config validation CLI tool
//!
//! Validates a proctord configuration file and prints the effective settings.

use proctor_config::{ConfigError, CURRENT_CONFIG_VERSION};
use proctor_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a proctord configuration file.");
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match proctor_config::load_config(&config_path) {
        Ok(config) => {
            let t = &config.tracking;
            println!("✓ Configuration is valid");
            println!();
            println!("Service:");
            println!("  socket:        {}", config.service.socket_path.display());
            println!("  data dir:      {}", config.service.data_dir.display());
            println!("  store timeout: {:?}", config.service.store_timeout);
            println!();
            println!("Tracking:");
            println!("  tick:          {:?}", t.tick);
            println!(
                "  windows:       preshow {}m, countdown {}m, grace {}m",
                t.rules.preshow_minutes, t.rules.countdown_minutes, t.rules.grace_minutes
            );
            println!(
                "  days:          {} ahead, {} back for missed exams",
                t.lookahead_days, t.missed_lookback_days
            );
            println!(
                "  makeup:        default {}m, virtual session {}m",
                t.default_makeup_minutes, t.virtual_session_minutes
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
