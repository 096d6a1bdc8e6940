//! Bootstrap entry point.
//!
//! # Responsibility
//! - Load configuration from `STOREGATE_*` environment variables.
//! - Apply the DDL scripts named on the command line, in order.
//! - Keep output deterministic for quick local sanity checks.

use log::info;
use std::process::ExitCode;
use storegate_core::{init_logging, open_provider, StoregateConfig};

fn main() -> ExitCode {
    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("storegate error={message}");
            ExitCode::FAILURE
        }
    }
}

fn run(scripts: Vec<String>) -> Result<(), String> {
    let config = StoregateConfig::from_env().map_err(|err| err.to_string())?;
    init_logging(&config.logging)?;

    println!("storegate_core version={}", storegate_core::core_version());

    let provider = open_provider(&config.provider).map_err(|err| err.to_string())?;
    println!(
        "storegate pool_size={} isolation={}",
        provider.pool_size(),
        config.provider.isolation.as_str()
    );

    for script in &scripts {
        let ddl = std::fs::read_to_string(script)
            .map_err(|err| format!("failed to read `{script}`: {err}"))?;
        provider
            .apply_schema(&ddl)
            .map_err(|err| format!("failed to apply `{script}`: {err}"))?;
        info!("event=cli_apply module=cli status=ok script={script}");
        println!("storegate applied={script}");
    }
    Ok(())
}
