//! Главный исполняемый файл rustdb-txn

use anyhow::Context;
use rustdb_txn::cli::Cli;
use rustdb_txn::common::LoggingConfig;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    // записи крейта log попадают в tracing
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log level")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::init();
    let config = cli.load_config().context("failed to load configuration")?;
    init_logging(&config.logging)?;

    cli.execute(&config)?;
    Ok(())
}
