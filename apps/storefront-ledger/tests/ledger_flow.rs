//! End-to-end flows against a real PostgreSQL database. Skipped unless
//! `LEDGER_TEST_DATABASE_URL` points at a scratch database.

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use storefront_db::models::account::Account;
use storefront_db::models::catalog::{Plan, Server};
use storefront_db::models::fraud::{FraudAction, FraudSeverity, FraudType};
use storefront_db::models::ledger::{TransactionKind, TransactionStatus};
use storefront_db::models::purchase::IntentStatus;
use storefront_db::models::reseller::{PayoutMethod, ResellerStatus};
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::catalog_repo::CatalogRepository;
use storefront_db::repositories::transaction_repo::TransactionRepository;
use storefront_ledger::Ledger;
use storefront_ledger::capabilities::{
    Capabilities, MockProvisioner, ProvisionRequest, ServiceProvisioner, ServiceRef, StaticAdminSet,
    TracingNotifier,
};
use storefront_ledger::config::LedgerConfig;
use storefront_ledger::error::LedgerError;
use storefront_ledger::services::purchase_service::CreateIntent;

const ADMIN: i64 = 1;

async fn ledger() -> Option<Ledger> {
    ledger_with(&[], None).await
}

async fn ledger_with(overrides: &[(&str, &str)], caps: Option<Capabilities>) -> Option<Ledger> {
    let Ok(url) = std::env::var("LEDGER_TEST_DATABASE_URL") else {
        eprintln!("LEDGER_TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let mut vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", url),
        ("ADMIN_IDS", ADMIN.to_string()),
        ("DB_MAX_CONNECTIONS", "5".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(*key, value.to_string());
    }
    let config = LedgerConfig::from_lookup(|k| vars.get(k).cloned()).expect("config");
    let caps = caps.unwrap_or_else(|| Capabilities::with_defaults(config.admin_ids.clone()));
    Some(Ledger::connect(config, caps).await.expect("connect"))
}

/// Mock panel that counts how many services it was asked to create.
#[derive(Default)]
struct CountingProvisioner {
    calls: AtomicUsize,
}

#[async_trait]
impl ServiceProvisioner for CountingProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<ServiceRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        MockProvisioner.provision(request).await
    }

    async fn deactivate(&self, service_ref: &str) -> anyhow::Result<()> {
        MockProvisioner.deactivate(service_ref).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

async fn active_reseller(ledger: &Ledger, account: &Account, parent_id: Option<i64>) -> i64 {
    let reseller = ledger.resellers.create_reseller(account.id, parent_id).await.unwrap();
    ledger.resellers.approve_reseller(reseller.id, ADMIN).await.unwrap();
    reseller.id
}

fn tg_id() -> i64 {
    rand::random_range(1_000_000..i64::MAX)
}

fn receipt() -> String {
    format!("RC-{}", uuid::Uuid::new_v4())
}

async fn account_with_balance(ledger: &Ledger, amount: Decimal, referrer: Option<i64>) -> Account {
    let account = ledger.wallet.open_account(tg_id(), None, referrer).await.expect("open account");
    if amount > Decimal::ZERO {
        let topup = ledger
            .wallet
            .request_topup(account.id, amount, &receipt())
            .await
            .expect("top-up");
        ledger
            .approvals
            .approve(topup.transaction.id, ADMIN, None)
            .await
            .expect("approve top-up");
    }
    ledger.wallet.account(account.id).await.expect("reload account")
}

async fn catalog(ledger: &Ledger, title: &str, price: Decimal) -> (Plan, Server) {
    let mut conn = ledger.pool.acquire().await.expect("conn");
    let plan = CatalogRepository::create_plan(&mut conn, title, price, Some(30), Some(100))
        .await
        .expect("plan");
    let server = CatalogRepository::create_server(&mut conn, "de-1", "de1.vpn.test")
        .await
        .expect("server");
    (plan, server)
}

fn buy(account: &Account, plan: &Plan, server: &Server) -> CreateIntent {
    CreateIntent {
        account_id: account.id,
        plan_id: plan.id,
        server_id: server.id,
        alias: None,
    }
}

#[tokio::test]
async fn partial_wallet_purchase_settles_after_receipt() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, dec!(50000), None).await;
    let (plan, server) = catalog(&ledger, "Split 120k", dec!(120000)).await;

    let created = ledger.purchases.create(buy(&account, &plan, &server)).await.unwrap();
    assert_eq!(created.intent.status, IntentStatus::Pending);
    assert_eq!(created.intent.paid_from_wallet, dec!(50000));
    assert_eq!(created.intent.due_from_receipt, dec!(70000));
    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, Decimal::ZERO);

    let submitted = ledger.purchases.attach_receipt(created.intent.id, &receipt()).await.unwrap();
    assert_eq!(submitted.transaction.kind, TransactionKind::Purchase);
    assert_eq!(submitted.transaction.amount, dec!(70000));
    assert_eq!(submitted.transaction.status, TransactionStatus::Pending);

    let approved = ledger.approvals.approve(submitted.transaction.id, ADMIN, None).await.unwrap();
    let intent = approved.intent.expect("settled intent");
    assert_eq!(intent.status, IntentStatus::Paid);
    assert!(intent.service_ref.is_some());
    assert!(approved.provisioning_errors.is_empty());

    let after = ledger.wallet.account(account.id).await.unwrap();
    assert_eq!(after.balance, Decimal::ZERO);
    assert_eq!(after.total_spent, dec!(120000));
}

#[tokio::test]
async fn concurrent_approvals_credit_once() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let topup = ledger.wallet.request_topup(account.id, dec!(75000), &receipt()).await.unwrap();
    let id = topup.transaction.id;

    let (first, second) = tokio::join!(
        ledger.approvals.approve(id, ADMIN, None),
        ledger.approvals.approve(id, ADMIN, None)
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(LedgerError::is_already_final)
    );

    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, dec!(75000));
}

#[tokio::test]
async fn rejected_topup_leaves_balance_untouched() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let topup = ledger.wallet.request_topup(account.id, dec!(80000), &receipt()).await.unwrap();

    let rejected = ledger
        .approvals
        .reject(topup.transaction.id, ADMIN, "receipt unreadable")
        .await
        .unwrap();
    assert_eq!(rejected.status, TransactionStatus::Rejected);
    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, Decimal::ZERO);

    let again = ledger.approvals.approve(topup.transaction.id, ADMIN, None).await;
    assert!(matches!(again, Err(LedgerError::AlreadyFinal { .. })));
}

#[tokio::test]
async fn non_admin_cannot_approve() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let topup = ledger.wallet.request_topup(account.id, dec!(60000), &receipt()).await.unwrap();

    let result = ledger.approvals.approve(topup.transaction.id, 999_999, None).await;
    assert!(matches!(result, Err(LedgerError::Unauthorized { actor_id: 999_999 })));
}

#[tokio::test]
async fn sale_pays_three_reseller_levels() {
    let Some(ledger) = ledger().await else { return };
    let top = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let middle = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let direct = account_with_balance(&ledger, Decimal::ZERO, None).await;

    let r1 = ledger.resellers.create_reseller(top.id, None).await.unwrap();
    ledger.resellers.approve_reseller(r1.id, ADMIN).await.unwrap();
    let r2 = ledger.resellers.create_reseller(middle.id, Some(r1.id)).await.unwrap();
    ledger.resellers.approve_reseller(r2.id, ADMIN).await.unwrap();
    let r3 = ledger.resellers.create_reseller(direct.id, Some(r2.id)).await.unwrap();
    ledger.resellers.approve_reseller(r3.id, ADMIN).await.unwrap();

    let customer = account_with_balance(&ledger, dec!(1000000), Some(direct.id)).await;
    let (plan, server) = catalog(&ledger, "Reseller 1M", dec!(1000000)).await;

    let outcome = ledger.purchases.create(buy(&customer, &plan, &server)).await.unwrap();
    assert_eq!(outcome.intent.status, IntentStatus::Paid);

    let mut paid: Vec<(i64, Decimal)> = outcome
        .commissions
        .iter()
        .map(|c| (c.reseller_id, c.commission_amount))
        .collect();
    paid.sort();
    let mut expected = vec![(r3.id, dec!(100000)), (r2.id, dec!(50000)), (r1.id, dec!(25000))];
    expected.sort();
    assert_eq!(paid, expected);

    let direct_reseller = ledger.resellers.get(r3.id).await.unwrap();
    assert_eq!(direct_reseller.pending_commission, dec!(100000));
    assert_eq!(direct_reseller.total_customers, 1);

    assert!(outcome.commissions.iter().all(|c| c.base_amount == dec!(1000000)));

    let payment = ledger.commissions.payout(r3.id, ADMIN, PayoutMethod::Wallet).await.unwrap();
    assert_eq!(payment.amount, dec!(100000));
    assert_eq!(ledger.wallet.account(direct.id).await.unwrap().balance, dec!(100000));
    let earned = outcome
        .commissions
        .iter()
        .find(|c| c.reseller_id == r3.id)
        .expect("direct commission");
    assert_eq!(payment.period_start, earned.created_at);
    assert_eq!(payment.period_end, earned.created_at);

    let second = ledger.commissions.payout(r3.id, ADMIN, PayoutMethod::Wallet).await;
    assert!(matches!(second, Err(LedgerError::NoPendingCommission { .. })));
}

#[tokio::test]
async fn repeated_topup_is_flagged_as_duplicate() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;

    let first = ledger.wallet.request_topup(account.id, dec!(60000), &receipt()).await.unwrap();
    assert!(first.detections.is_empty());

    let second = ledger.wallet.request_topup(account.id, dec!(60000), &receipt()).await.unwrap();
    assert!(
        second
            .detections
            .iter()
            .any(|d| d.fraud_type == FraudType::DuplicatePayment)
    );
    assert!(second.transaction.fraud_score >= 0.3);
    assert!(!second.auto_approved);
}

#[tokio::test]
async fn reused_receipt_blocks_nothing_until_reviewed() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let shared = receipt();

    ledger.wallet.request_topup(account.id, dec!(55000), &shared).await.unwrap();
    let reused = ledger.wallet.request_topup(account.id, dec!(90000), &shared).await.unwrap();

    let flagged = reused
        .detections
        .iter()
        .find(|d| d.fraud_type == FraudType::FakeReceipt)
        .expect("fake receipt detection");
    assert!(flagged.confidence >= 0.7);
    let reloaded = ledger.fraud.detections_for_transaction(reused.transaction.id).await.unwrap();
    assert!(reloaded.iter().any(|d| d.id == flagged.id));
    assert!(!ledger.wallet.account(account.id).await.unwrap().is_blocked);
}

#[tokio::test]
async fn aliases_stay_unique_per_account() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let (plan, server) = catalog(&ledger, "Gold 30", dec!(90000)).await;

    let first = ledger.purchases.create(buy(&account, &plan, &server)).await.unwrap();
    let second = ledger.purchases.create(buy(&account, &plan, &server)).await.unwrap();

    assert_eq!(first.intent.alias, "gold-30");
    assert_ne!(first.intent.alias, second.intent.alias);
    assert!(second.intent.alias.starts_with("gold-30-"));
}

#[tokio::test]
async fn expired_intent_refunds_wallet_portion() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, dec!(50000), None).await;
    let (plan, server) = catalog(&ledger, "Expiring", dec!(120000)).await;

    let created = ledger.purchases.create(buy(&account, &plan, &server)).await.unwrap();
    sqlx::query("UPDATE purchase_intents SET created_at = created_at - INTERVAL '2 days' WHERE id = $1")
        .bind(created.intent.id)
        .execute(&ledger.pool)
        .await
        .unwrap();

    let expired = ledger.purchases.expire_stale(Duration::hours(24)).await.unwrap();
    let intent = expired
        .iter()
        .find(|i| i.id == created.intent.id)
        .expect("intent expired");
    assert_eq!(intent.status, IntentStatus::Cancelled);

    let mut conn = ledger.pool.acquire().await.unwrap();
    let after = AccountRepository::get(&mut conn, account.id).await.unwrap().unwrap();
    assert_eq!(after.balance, dec!(50000));
    assert_eq!(after.total_spent, Decimal::ZERO);
}

#[tokio::test]
async fn insufficient_funds_transfer_is_refused() {
    let Some(ledger) = ledger().await else { return };
    let sender = account_with_balance(&ledger, dec!(50000), None).await;
    let receiver = account_with_balance(&ledger, Decimal::ZERO, None).await;

    let result = ledger.wallet.transfer(sender.id, receiver.id, dec!(50000.01)).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    ledger.wallet.transfer(sender.id, receiver.id, dec!(20000)).await.unwrap();
    assert_eq!(ledger.wallet.account(sender.id).await.unwrap().balance, dec!(30000));
    assert_eq!(ledger.wallet.account(receiver.id).await.unwrap().balance, dec!(20000));
}

#[tokio::test]
async fn suspended_direct_reseller_stops_the_whole_chain() {
    let Some(ledger) = ledger().await else { return };
    let top = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let middle = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let direct = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let r1 = active_reseller(&ledger, &top, None).await;
    let r2 = active_reseller(&ledger, &middle, Some(r1)).await;
    let r3 = active_reseller(&ledger, &direct, Some(r2)).await;
    ledger.resellers.set_status(r3, ResellerStatus::Suspended, ADMIN).await.unwrap();

    let customer = account_with_balance(&ledger, dec!(1000000), Some(direct.id)).await;
    let (plan, server) = catalog(&ledger, "Suspended chain", dec!(1000000)).await;
    let outcome = ledger.purchases.create(buy(&customer, &plan, &server)).await.unwrap();

    assert_eq!(outcome.intent.status, IntentStatus::Paid);
    assert!(outcome.commissions.is_empty());
    for id in [r1, r2, r3] {
        assert_eq!(ledger.resellers.get(id).await.unwrap().pending_commission, Decimal::ZERO);
    }
}

#[tokio::test]
async fn concurrent_receipt_approvals_settle_once() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let caps = Capabilities::new(
        Arc::new(StaticAdminSet::new([ADMIN])),
        provisioner.clone(),
        Arc::new(TracingNotifier),
    );
    let Some(ledger) = ledger_with(&[], Some(caps)).await else { return };

    let owner = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let reseller_id = active_reseller(&ledger, &owner, None).await;
    let customer = account_with_balance(&ledger, dec!(400000), Some(owner.id)).await;
    let (plan, server) = catalog(&ledger, "Race 1M", dec!(1000000)).await;

    let created = ledger.purchases.create(buy(&customer, &plan, &server)).await.unwrap();
    assert_eq!(created.intent.due_from_receipt, dec!(600000));
    let submitted = ledger.purchases.attach_receipt(created.intent.id, &receipt()).await.unwrap();
    let id = submitted.transaction.id;

    let (first, second) = tokio::join!(
        ledger.approvals.approve(id, ADMIN, None),
        ledger.approvals.approve(id, ADMIN, None)
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(LedgerError::is_already_final)
    );
    let settled = outcomes
        .iter()
        .find_map(|r| r.as_ref().ok())
        .and_then(|o| o.intent.clone())
        .expect("settled intent");
    assert!(settled.service_ref.is_some());
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);

    let commissions = ledger.commissions.commissions_for_transaction(id).await.unwrap();
    assert_eq!(commissions.len(), 1);
    assert_eq!(commissions[0].reseller_id, reseller_id);
    assert_eq!(commissions[0].base_amount, dec!(1000000));
    assert_eq!(commissions[0].commission_amount, dec!(100000));
    assert_eq!(ledger.resellers.get(reseller_id).await.unwrap().pending_commission, dec!(100000));
}

#[tokio::test]
async fn referrer_and_referee_settle_concurrently() {
    let Some(ledger) = ledger_with(&[("REFERRAL_PERCENT", "10")], None).await else { return };
    let referrer = account_with_balance(&ledger, dec!(50000), None).await;
    let reseller_id = active_reseller(&ledger, &referrer, None).await;
    let referee = account_with_balance(&ledger, dec!(50000), Some(referrer.id)).await;
    let (plan, server) = catalog(&ledger, "Pair 120k", dec!(120000)).await;

    let mut receipts = Vec::new();
    for account in [&referrer, &referee] {
        let created = ledger.purchases.create(buy(account, &plan, &server)).await.unwrap();
        let submitted = ledger.purchases.attach_receipt(created.intent.id, &receipt()).await.unwrap();
        receipts.push(submitted.transaction.id);
    }

    let (own, referred) = tokio::join!(
        ledger.approvals.approve(receipts[0], ADMIN, None),
        ledger.approvals.approve(receipts[1], ADMIN, None)
    );
    own.unwrap();
    let referred = referred.unwrap();
    assert_eq!(referred.referral_bonus, Some((referrer.id, dec!(12000))));

    assert_eq!(ledger.wallet.account(referrer.id).await.unwrap().balance, dec!(12000));
    assert_eq!(ledger.resellers.get(reseller_id).await.unwrap().pending_commission, dec!(12000));
}

#[tokio::test]
async fn round_topup_from_quiet_account_is_auto_approved() {
    let Some(ledger) = ledger_with(&[("AUTO_APPROVE_RECEIPTS", "true")], None).await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;

    let topup = ledger.wallet.request_topup(account.id, dec!(500000), &receipt()).await.unwrap();
    assert!(topup.detections.is_empty());
    assert_eq!(topup.transaction.fraud_score, 0.0);
    assert!(topup.auto_approved);
    assert_eq!(topup.transaction.status, TransactionStatus::Approved);
    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, dec!(500000));
}

#[tokio::test]
async fn daily_amount_limit_holds_back_auto_approval() {
    let overrides = [("AUTO_APPROVE_RECEIPTS", "true"), ("MAX_DAILY_AMOUNT", "100000")];
    let Some(ledger) = ledger_with(&overrides, None).await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;

    let first = ledger.wallet.request_topup(account.id, dec!(80000), &receipt()).await.unwrap();
    assert!(first.auto_approved);

    let second = ledger.wallet.request_topup(account.id, dec!(60000), &receipt()).await.unwrap();
    assert!(second.transaction.fraud_score >= 0.4);
    assert!(!second.auto_approved);
    assert_eq!(second.transaction.status, TransactionStatus::Pending);
    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, dec!(80000));
}

#[tokio::test]
async fn manual_action_runs_once_per_detection() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    ledger.wallet.request_topup(account.id, dec!(65000), &receipt()).await.unwrap();
    let second = ledger.wallet.request_topup(account.id, dec!(65000), &receipt()).await.unwrap();

    let detection = second
        .detections
        .iter()
        .find(|d| d.fraud_type == FraudType::DuplicatePayment)
        .expect("duplicate detection");
    assert!(detection.action_taken.is_none());

    assert!(ledger.fraud.execute_action(detection.id, FraudAction::Warn, ADMIN).await.unwrap());
    assert!(!ledger.fraud.execute_action(detection.id, FraudAction::Warn, ADMIN).await.unwrap());
    assert!(!ledger.fraud.execute_action(detection.id, FraudAction::Block, ADMIN).await.unwrap());
    assert!(!ledger.wallet.account(account.id).await.unwrap().is_blocked);

    let stored = ledger.fraud.detections_for_transaction(second.transaction.id).await.unwrap();
    let stored = stored.iter().find(|d| d.id == detection.id).expect("stored detection");
    assert_eq!(stored.action_taken, Some(FraudAction::Warn));
}

#[tokio::test]
async fn reparenting_under_a_descendant_is_refused() {
    let Some(ledger) = ledger().await else { return };
    let parent = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let child = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let parent_id = active_reseller(&ledger, &parent, None).await;
    let child_id = active_reseller(&ledger, &child, Some(parent_id)).await;

    let result = ledger.resellers.reparent(parent_id, Some(child_id), ADMIN).await;
    assert!(matches!(
        result,
        Err(LedgerError::HierarchyCycle { reseller_id, parent_id: p }) if reseller_id == parent_id && p == child_id
    ));
    assert_eq!(ledger.resellers.get(parent_id).await.unwrap().parent_id, None);
}

#[tokio::test]
async fn blocked_account_cannot_be_approved() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    let topup = ledger.wallet.request_topup(account.id, dec!(70000), &receipt()).await.unwrap();

    ledger
        .fraud
        .blacklist(account.id, "chargeback", FraudType::FakeReceipt, FraudSeverity::High, true, ADMIN)
        .await
        .unwrap();

    let result = ledger.approvals.approve(topup.transaction.id, ADMIN, None).await;
    assert!(matches!(result, Err(LedgerError::FraudBlocked { account_id }) if account_id == account.id));

    let mut conn = ledger.pool.acquire().await.unwrap();
    let stored = TransactionRepository::get(&mut conn, topup.transaction.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(ledger.wallet.account(account.id).await.unwrap().balance, Decimal::ZERO);
}

#[tokio::test]
async fn whitelisted_account_is_never_scored() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    ledger.fraud.whitelist(account.id, "long-time customer", None, ADMIN).await.unwrap();

    ledger.wallet.request_topup(account.id, dec!(65000), &receipt()).await.unwrap();
    let second = ledger.wallet.request_topup(account.id, dec!(65000), &receipt()).await.unwrap();

    assert!(second.detections.is_empty());
    assert_eq!(second.transaction.fraud_score, 0.0);
    assert!(ledger.fraud.detections_for_account(account.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn blacklist_without_auto_block_only_flags() {
    let Some(ledger) = ledger().await else { return };
    let account = account_with_balance(&ledger, Decimal::ZERO, None).await;
    ledger
        .fraud
        .blacklist(account.id, "shared card", FraudType::SuspiciousPattern, FraudSeverity::Medium, false, ADMIN)
        .await
        .unwrap();

    let topup = ledger.wallet.request_topup(account.id, dec!(70000), &receipt()).await.unwrap();
    assert_eq!(topup.detections.len(), 1);
    let detection = &topup.detections[0];
    assert_eq!(detection.severity, FraudSeverity::Critical);
    assert!(detection.rule_id.is_none());
    assert!(detection.action_taken.is_none());
    assert_eq!(topup.transaction.fraud_score, 1.0);
    assert!(!topup.auto_approved);
    assert!(!ledger.wallet.account(account.id).await.unwrap().is_blocked);
}
