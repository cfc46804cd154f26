use clap::Parser;
use rods::builder::Builder;
use rods::config::Config;
use rods::registry::Registry;
use std::path::PathBuf;
use std::process::ExitCode;

/// Serves CSV, XML and JSON files as JSON endpoints via HTTP.
#[derive(Parser, Debug)]
#[command(name = "rods", version, about)]
struct Arguments {
    /// Specifies the config file to load.
    #[arg(short, long, default_value = "rods.yaml")]
    config: PathBuf,

    /// Logs debug messages, including every request.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let arguments = Arguments::parse();
    rods::init_logging(arguments.verbose);

    match run(arguments).await {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(reason)) => {
            log::error!("The system has been aborted: {}", reason);
            ExitCode::FAILURE
        }
        Err(error) => {
            log::error!("{:#}", error);
            ExitCode::FAILURE
        }
    }
}

/// Runs the system until it is terminated and returns the abort reason, if any.
async fn run(arguments: Arguments) -> anyhow::Result<Option<String>> {
    let config = Config::load(&arguments.config).await?;
    let platform = Builder::new()
        .enable_all()
        .verbose(arguments.verbose)
        .build(&config)
        .await?;

    // The platform releases all services once terminated, so keep the registry around...
    let registry = platform.require::<Registry>();
    platform.terminated().await;
    registry.close();

    Ok(platform.abort_reason())
}
