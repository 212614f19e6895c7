use clap::Parser;
use sales_sync::args::{Args, Command};
use sales_sync::{commands, Config, Mode, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().sales_sync_home().path();

    // When SALES_SYNC_IN_TEST_MODE is set the in-memory drive is used instead of Google Drive.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.anchor(),
            init_args.client_secret(),
            init_args.token(),
            init_args.service_account(),
        )
        .await?
        .print(),

        Command::Auth => commands::auth(&Config::load(home).await?).await?.print(),

        Command::Check => commands::check(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Drives => commands::drives(&Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Split(split_args) => commands::split(&Config::load(home).await?, split_args)
            .await?
            .print(),

        Command::Upload(upload_args) => {
            commands::upload(&Config::load(home).await?, mode, upload_args)
                .await?
                .print()
        }
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
