use anyhow::Result;
use clap::Parser;
use storefront_ledger::Ledger;
use storefront_ledger::capabilities::Capabilities;
use storefront_ledger::cli::{self, Cli};
use storefront_ledger::config::LedgerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_ledger=info,storefront_db=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = LedgerConfig::from_env()?;
    let caps = Capabilities::with_defaults(config.admin_ids.clone());
    let ledger = Ledger::connect(config, caps).await?;
    tracing::info!("Ledger connected");

    cli::run(&ledger, cli.command).await
}
