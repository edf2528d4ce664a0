use clap::Parser;
use demos::cli::{self, Args};
use demos::user;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    cli::init_tracing();
    let args = Args::parse();

    let target = Arc::new(args.target(&user::DEFAULTS));
    tracing::info!("Targeting {}", target.base_url);
    let scenario = args.configure(user::scenario(target), &user::DEFAULTS)?;
    cli::finish(scenario.await, args.json.as_deref())
}
