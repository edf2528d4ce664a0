use clap::Parser;
use demos::cli::{self, Args};
use demos::stress;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    cli::init_tracing();
    let args = Args::parse();

    let target = Arc::new(args.target(&stress::DEFAULTS));
    tracing::info!("Targeting {}", target.base_url);
    let scenario = args.configure(stress::scenario(target), &stress::DEFAULTS)?;
    cli::finish(scenario.await, args.json.as_deref())
}
