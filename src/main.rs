use brrtcontract::cli::{run_cli, Cli};
use brrtcontract::logging::{init_logging, LogConfig};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(&LogConfig::from_env())?;
    run_cli(Cli::parse()).await
}
