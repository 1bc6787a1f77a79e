use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use storefront_db::models::fraud::DetectionStatus;
use storefront_db::models::reseller::{PayoutMethod, ResellerStatus};
use tracing::{error, info};

use crate::Ledger;
use crate::services::purchase_service::CreateIntent;

const RETRY_BATCH: i64 = 50;

#[derive(Parser)]
#[command(name = "storefront-ledger")]
#[command(about = "Billing and trust ledger for the VPN storefront", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations and exit
    Migrate,
    /// Run the background sweeper (intent expiry, provisioning retries)
    Worker,
    /// List transactions waiting for review
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Approve a pending transaction
    Approve {
        transaction_id: i64,
        #[arg(long)]
        actor: i64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Reject a pending transaction
    Reject {
        transaction_id: i64,
        #[arg(long)]
        actor: i64,
        #[arg(long)]
        reason: String,
    },
    /// Request a wallet top-up backed by a payment receipt
    Topup {
        account_id: i64,
        amount: Decimal,
        #[arg(long)]
        receipt: String,
    },
    /// Start a purchase, paying from the wallet first
    Buy {
        account_id: i64,
        plan_id: i64,
        server_id: i64,
        #[arg(long)]
        alias: Option<String>,
    },
    /// Attach a receipt for the unpaid part of a purchase
    AttachReceipt {
        intent_id: i64,
        #[arg(long)]
        receipt: String,
    },
    /// Cancel a pending purchase
    CancelIntent { intent_id: i64 },
    /// Expire pending purchases older than the configured TTL
    SweepIntents,
    /// Provision a paid purchase whose service is missing
    RetryProvisioning { intent_id: i64 },
    /// Pay out a reseller's unpaid commissions
    Payout {
        reseller_id: i64,
        #[arg(long)]
        actor: i64,
        #[arg(long, value_enum, default_value_t = MethodArg::Wallet)]
        method: MethodArg,
    },
    /// Promote a reseller if they qualify for the next level
    Promote { reseller_id: i64 },
    /// Register an account as a reseller, optionally under a parent
    AddReseller {
        account_id: i64,
        #[arg(long)]
        parent: Option<i64>,
    },
    /// Change a reseller's status
    ResellerStatus {
        reseller_id: i64,
        #[arg(long)]
        actor: i64,
        #[arg(long, value_enum)]
        status: StatusArg,
    },
    /// Move a reseller under another parent, or to the top without --parent
    Reparent {
        reseller_id: i64,
        #[arg(long)]
        parent: Option<i64>,
        #[arg(long)]
        actor: i64,
    },
    /// List open fraud detections, or all detections of one account
    Detections {
        #[arg(long)]
        account: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Close or escalate a fraud detection
    Review {
        detection_id: i64,
        #[arg(long)]
        actor: i64,
        #[arg(long, value_enum)]
        status: ReviewArg,
    },
    /// Lift a fraud block from an account
    Unblock {
        account_id: i64,
        #[arg(long)]
        actor: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Wallet,
    BankTransfer,
}

impl From<MethodArg> for PayoutMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Wallet => PayoutMethod::Wallet,
            MethodArg::BankTransfer => PayoutMethod::BankTransfer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Active,
    Suspended,
    Terminated,
    Blacklisted,
}

impl From<StatusArg> for ResellerStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Active => ResellerStatus::Active,
            StatusArg::Suspended => ResellerStatus::Suspended,
            StatusArg::Terminated => ResellerStatus::Terminated,
            StatusArg::Blacklisted => ResellerStatus::Blacklisted,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ReviewArg {
    Investigating,
    Resolved,
    FalsePositive,
}

impl From<ReviewArg> for DetectionStatus {
    fn from(arg: ReviewArg) -> Self {
        match arg {
            ReviewArg::Investigating => DetectionStatus::Investigating,
            ReviewArg::Resolved => DetectionStatus::Resolved,
            ReviewArg::FalsePositive => DetectionStatus::FalsePositive,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to render output")?);
    Ok(())
}

/// Prints a review result. Reviewing a transaction that is already final is
/// reported and treated as success.
fn report_review<T: Serialize>(result: crate::error::Result<T>) -> Result<()> {
    match result {
        Ok(outcome) => print_json(&outcome),
        Err(e) if e.is_already_final() => {
            info!("{}", e);
            println!("Already reviewed: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run(ledger: &Ledger, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => {
            println!("Migrations applied.");
        }
        Commands::Worker => run_worker(ledger).await?,
        Commands::Pending { limit } => print_json(&ledger.approvals.pending(limit).await?)?,
        Commands::Approve {
            transaction_id,
            actor,
            note,
        } => report_review(ledger.approvals.approve(transaction_id, actor, note.as_deref()).await)?,
        Commands::Reject {
            transaction_id,
            actor,
            reason,
        } => report_review(ledger.approvals.reject(transaction_id, actor, &reason).await)?,
        Commands::Topup {
            account_id,
            amount,
            receipt,
        } => print_json(&ledger.wallet.request_topup(account_id, amount, &receipt).await?)?,
        Commands::Buy {
            account_id,
            plan_id,
            server_id,
            alias,
        } => {
            let outcome = ledger
                .purchases
                .create(CreateIntent {
                    account_id,
                    plan_id,
                    server_id,
                    alias,
                })
                .await?;
            print_json(&outcome)?;
        }
        Commands::AttachReceipt { intent_id, receipt } => {
            print_json(&ledger.purchases.attach_receipt(intent_id, &receipt).await?)?
        }
        Commands::CancelIntent { intent_id } => print_json(&ledger.purchases.cancel(intent_id).await?)?,
        Commands::SweepIntents => {
            let expired = ledger
                .purchases
                .expire_stale(Duration::hours(ledger.config.intent_ttl_hours))
                .await?;
            println!("Expired {} purchase intents.", expired.len());
        }
        Commands::RetryProvisioning { intent_id } => {
            print_json(&ledger.purchases.retry_provisioning(intent_id).await?)?
        }
        Commands::Payout {
            reseller_id,
            actor,
            method,
        } => print_json(&ledger.commissions.payout(reseller_id, actor, method.into()).await?)?,
        Commands::Promote { reseller_id } => {
            if ledger.commissions.check_promotion(reseller_id).await? {
                println!("Reseller {} promoted.", reseller_id);
            } else {
                println!("Reseller {} does not qualify for the next level.", reseller_id);
            }
        }
        Commands::AddReseller { account_id, parent } => {
            print_json(&ledger.resellers.create_reseller(account_id, parent).await?)?
        }
        Commands::ResellerStatus {
            reseller_id,
            actor,
            status,
        } => print_json(&ledger.resellers.set_status(reseller_id, status.into(), actor).await?)?,
        Commands::Reparent {
            reseller_id,
            parent,
            actor,
        } => print_json(&ledger.resellers.reparent(reseller_id, parent, actor).await?)?,
        Commands::Detections { account, limit } => {
            let detections = match account {
                Some(account_id) => ledger.fraud.detections_for_account(account_id).await?,
                None => ledger.fraud.open_detections(limit).await?,
            };
            print_json(&detections)?;
        }
        Commands::Review {
            detection_id,
            actor,
            status,
        } => print_json(&ledger.fraud.review_detection(detection_id, actor, status.into()).await?)?,
        Commands::Unblock { account_id, actor } => {
            ledger.fraud.unblock_account(account_id, actor).await?;
            println!("Account {} unblocked.", account_id);
        }
    }
    Ok(())
}

/// Expires stale intents and retries failed provisioning until Ctrl-C.
async fn run_worker(ledger: &Ledger) -> Result<()> {
    let period = std::time::Duration::from_secs(ledger.config.sweep_interval_secs.max(1));
    let ttl = Duration::hours(ledger.config.intent_ttl_hours);
    let mut ticker = tokio::time::interval(period);
    info!("Ledger worker started (every {:?}, intent TTL {}h)", period, ledger.config.intent_ttl_hours);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = ledger.purchases.expire_stale(ttl).await {
                    error!("Intent sweep failed: {}", e);
                }
                match ledger.purchases.retry_all_pending(RETRY_BATCH).await {
                    Ok(0) => {}
                    Ok(n) => info!("Recovered provisioning for {} intents", n),
                    Err(e) => error!("Provisioning retry sweep failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ledger worker stopping");
                return Ok(());
            }
        }
    }
}
