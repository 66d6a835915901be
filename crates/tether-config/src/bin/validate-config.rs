//! Config validation CLI tool
//!
//! Validates a tetherd configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use tether_api::ShieldDomainKind;
use tether_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a tetherd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match tether_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", tether_config::CURRENT_CONFIG_VERSION);
            println!(
                "  Thresholds (minutes): {:?}",
                policy.escalation.thresholds
            );
            let night = policy.escalation.night;
            if night.is_empty() {
                println!("  Night mode: off");
            } else {
                println!(
                    "  Night mode: {:02}:00 - {:02}:00 (thresholds halved)",
                    night.start_hour, night.end_hour
                );
            }
            println!(
                "  Prosocial challenges: {}",
                if policy.escalation.prosocial_enabled { "on" } else { "off" }
            );
            println!(
                "  Classifier: {}",
                policy.classifier.endpoint.as_deref().unwrap_or("not configured (lenient)")
            );
            println!("  Contacts: {}", policy.contacts.len());

            println!();
            println!("Shields:");
            for kind in ShieldDomainKind::ALL {
                let domain = policy.shields.domain(kind);
                println!(
                    "  - {} [{}]: {} app(s)",
                    kind,
                    if domain.enabled { "enabled" } else { "disabled" },
                    domain.apps.len()
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                tether_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                tether_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                tether_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                tether_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        tether_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
