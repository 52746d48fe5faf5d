use crate::cli::Cli;
use clap::Parser;
use tevm_indexer_core::pipeline::Pipeline;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // The subscriber may not be installed yet when this fires.
        eprintln!("tevm-indexer: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    let config = cli.into_config()?;
    tracing::info!(
        chain = %config.chain_name,
        ws_endpoint = %config.ws_endpoint,
        start_block = config.start_block,
        "starting tevm-indexer"
    );

    let mut pipeline = Pipeline::bootstrap(config).await?;
    let outcome = tokio::select! {
        result = pipeline.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(result) => {
            result?;
            tracing::info!("indexing complete");
            Ok(())
        }
        None => {
            tracing::info!("interrupt received, shutting down");
            pipeline.shutdown().await
        }
    }
}
