//! zcap CLI entry point

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zcap_cli::{CliConfig, Cli, ExitCode, OutputFormatter};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let formatter = OutputFormatter::new(cli.output, cli.verbose);

    if cli.config.is_none() {
        if let Err(e) = CliConfig::create_default_if_missing() {
            formatter.warning(&format!("Could not create default config: {e}"));
        }
    }

    let config = match CliConfig::load_from(cli.config.as_deref())
        .and_then(|config| CliConfig::resolve(config, &cli.overrides()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", formatter.format_error_with_code(&e.to_string(), ExitCode::InvalidInput));
            return ExitCode::InvalidInput.to_exit_code();
        }
    };

    // RUST_LOG wins; otherwise the configured level applies to our own crates.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        EnvFilter::try_new(format!("warn,zcap_core={level},zcap_cli={level}"))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    });
    let json = cli.log_json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();

    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            eprintln!("{}", formatter.format_error_with_code(&format!("{e:#}"), ExitCode::GeneralError));
            ExitCode::GeneralError.to_exit_code()
        }
    }
}
