#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::*;
use ledger_bot::database::models::*;
use ledger_bot::services::ledger::LedgerError;
use rust_decimal::Decimal;

#[tokio::test]
async fn test_register_user_grants_welcome_bonus() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let ledger = ledger(&db);
    let supply_before = total_supply(&db).await;

    let registration = ledger.register_user(1001, Some("@Alice")).await?;
    assert!(registration.created);
    assert_eq!(registration.welcome_bonus, dec("1000"));
    assert_eq!(registration.user.balance, dec("1000"));
    assert_eq!(registration.user.username.as_deref(), Some("alice"));
    assert_eq!(registration.user.transaction_count, 1);

    // Issued money is new supply; the fund is only the nominal sender.
    let fund = User::fund(&db.pool).await?;
    assert_eq!(fund.balance, Decimal::ZERO);
    assert_eq!(fund.transaction_count, 0);
    assert_eq!(total_supply(&db).await, supply_before + dec("1000"));

    let bonuses = Transaction::list_by_type(&db.pool, TransactionType::WelcomeBonus).await?;
    assert_eq!(bonuses.len(), 1);
    assert_eq!(bonuses[0].from_user_id, FUND_USER_ID);
    assert_eq!(bonuses[0].to_user_id, registration.user.id);

    let subscriptions = Activity::subscribed_ids(&db.pool, registration.user.id).await?;
    assert_eq!(subscriptions, vec![GENERAL_ACTIVITY_ID]);

    Ok(())
}

#[tokio::test]
async fn test_register_existing_user_refreshes_username_only() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let ledger = ledger(&db);

    let first = ledger.register_user(1001, Some("alice")).await?;
    let second = ledger.register_user(1001, Some("alice_new")).await?;

    assert!(!second.created);
    assert_eq!(second.welcome_bonus, Decimal::ZERO);
    assert_eq!(second.user.id, first.user.id);
    assert_eq!(second.user.username.as_deref(), Some("alice_new"));
    assert_eq!(second.user.balance, dec("1000"));
    assert_eq!(transaction_count(&db).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_released_handle_can_be_claimed_by_someone_else() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let ledger = ledger(&db);

    let first = ledger.register_user(1001, Some("bob_smith")).await?;
    // The first owner drops the handle; Telegram stops sending it.
    ledger.register_user(1001, None).await?;
    assert_eq!(reload(&db, first.user.id).await.username, None);

    let second = ledger.register_user(1002, Some("Bob_Smith")).await?;
    assert!(second.created);
    assert_eq!(second.user.username.as_deref(), Some("bob_smith"));

    let owner = User::find_by_username(&db.pool, "bob_smith").await?.unwrap();
    assert_eq!(owner.telegram_id, 1002);

    Ok(())
}

#[tokio::test]
async fn test_stale_handle_is_taken_over() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let ledger = ledger(&db);

    // The old owner has not been seen since giving the handle up.
    let old = ledger.register_user(1001, Some("carol_x")).await?;
    let new = ledger.register_user(1002, Some("dave_y")).await?;
    let renamed = ledger.register_user(1002, Some("carol_x")).await?;

    assert_eq!(renamed.user.id, new.user.id);
    assert_eq!(renamed.user.username.as_deref(), Some("carol_x"));
    assert_eq!(reload(&db, old.user.id).await.username, None);
    assert_eq!(reload(&db, old.user.id).await.balance, dec("1000"));

    Ok(())
}

#[tokio::test]
async fn test_register_without_bonus() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    Setting::set(&db.pool, WELCOME_BONUS_AMOUNT, "0").await?;

    let registration = ledger(&db).register_user(1001, None).await?;
    assert!(registration.created);
    assert_eq!(registration.user.balance, Decimal::ZERO);
    assert_eq!(transaction_count(&db).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_transfer_moves_money_and_counts() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "100").await;
    let bob = member(&db, 1002, "bob", "0").await;
    let supply_before = total_supply(&db).await;

    let receipt = ledger(&db)
        .transfer(alice.telegram_id, "@Bob", dec("30.5"), Some("lunch"))
        .await?;

    assert_eq!(receipt.sender.balance, dec("69.5"));
    assert_eq!(receipt.recipient.balance, dec("30.5"));
    assert!(!receipt.used_grace_credit);
    assert_eq!(receipt.sender.transaction_count, 1);
    assert_eq!(receipt.recipient.transaction_count, 1);
    assert_eq!(total_supply(&db).await, supply_before);

    let transfers = Transaction::list_by_type(&db.pool, TransactionType::Transfer).await?;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, receipt.transaction_id);
    assert_eq!(transfers[0].from_user_id, alice.id);
    assert_eq!(transfers[0].to_user_id, bob.id);
    assert_eq!(transfers[0].comment.as_deref(), Some("lunch"));

    Ok(())
}

#[tokio::test]
async fn test_transfer_rejections_leave_no_trace() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "10").await;
    member(&db, 1002, "bob", "0").await;
    let ledger = ledger(&db);

    let result = ledger.transfer(alice.telegram_id, "bob", dec("10.01"), None).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds { balance, requested })
            if balance == dec("10") && requested == dec("10.01")
    ));

    let result = ledger.transfer(alice.telegram_id, "alice", dec("1"), None).await;
    assert!(matches!(result, Err(LedgerError::SelfTransfer)));

    let result = ledger.transfer(alice.telegram_id, "nobody", dec("1"), None).await;
    assert!(matches!(result, Err(LedgerError::UserNotFound(_))));

    let result = ledger.transfer(alice.telegram_id, "bob", Decimal::ZERO, None).await;
    assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));

    let result = ledger.transfer(9999, "bob", dec("1"), None).await;
    assert!(matches!(result, Err(LedgerError::UserNotFound(_))));

    assert_eq!(reload(&db, alice.id).await.balance, dec("10"));
    assert_eq!(transaction_count(&db).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_fund() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "50").await;

    let receipt = ledger(&db).transfer(alice.telegram_id, "fund", dec("20"), None).await?;
    assert!(receipt.recipient.is_fund());
    assert_eq!(receipt.recipient.balance, dec("20"));
    assert_eq!(receipt.sender.balance, dec("30"));

    Ok(())
}

#[tokio::test]
async fn test_grace_credit_is_one_time() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    Setting::set(&db.pool, GRACE_CREDIT_LIMIT, "50").await?;
    let alice = member(&db, 1001, "alice", "10").await;
    member(&db, 1002, "bob", "0").await;
    let ledger = ledger(&db);

    // Beyond the limit: refused.
    let result = ledger.transfer(alice.telegram_id, "bob", dec("60.01"), None).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    let receipt = ledger.transfer(alice.telegram_id, "bob", dec("40"), None).await?;
    assert!(receipt.used_grace_credit);
    assert_eq!(receipt.sender.balance, dec("-30"));
    assert!(receipt.sender.grace_credit_used);

    // The allowance is spent until the balance recovers.
    let result = ledger.transfer(alice.telegram_id, "bob", dec("1"), None).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    // A credit that leaves the balance negative keeps the flag.
    ledger.credit(alice.id, dec("10"), None).await?;
    assert!(reload(&db, alice.id).await.grace_credit_used);

    ledger.credit(alice.id, dec("20"), None).await?;
    let alice = reload(&db, alice.id).await;
    assert_eq!(alice.balance, Decimal::ZERO);
    assert!(!alice.grace_credit_used);

    Ok(())
}

#[tokio::test]
async fn test_grace_credit_disabled_by_default() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "5").await;
    member(&db, 1002, "bob", "0").await;

    let result = ledger(&db).transfer(alice.telegram_id, "bob", dec("6"), None).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    Ok(())
}

#[tokio::test]
async fn test_credit_and_debit_change_supply() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "0").await;
    let ledger = ledger(&db);
    let supply_before = total_supply(&db).await;

    assert_eq!(ledger.credit(alice.id, dec("25"), Some("prize")).await?, dec("25"));
    // Admin removals may push a balance below zero.
    assert_eq!(ledger.debit(alice.id, dec("40"), None).await?, dec("-15"));

    assert_eq!(total_supply(&db).await, supply_before - dec("15"));
    assert_eq!(User::fund(&db.pool).await?.balance, Decimal::ZERO);

    let removals = Transaction::list_by_type(&db.pool, TransactionType::ManualRem).await?;
    assert_eq!(removals.len(), 1);
    assert_eq!(removals[0].from_user_id, alice.id);
    assert_eq!(removals[0].to_user_id, FUND_USER_ID);

    let result = ledger.credit(424242, dec("1"), None).await;
    assert!(matches!(result, Err(LedgerError::UserNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_pay_from_fund_requires_cover() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "100").await;
    let bob = member(&db, 1002, "bob", "0").await;
    let ledger = ledger(&db);

    let result = ledger.pay_from_fund(bob.id, dec("10"), None).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds { balance, .. }) if balance == Decimal::ZERO
    ));
    assert_eq!(transaction_count(&db).await, 0);

    ledger.transfer(alice.telegram_id, "fund", dec("30"), None).await?;
    let balance = ledger.pay_from_fund(bob.id, dec("10"), Some("volunteering")).await?;
    assert_eq!(balance, dec("10"));
    assert_eq!(User::fund(&db.pool).await?.balance, dec("20"));

    Ok(())
}

#[tokio::test]
async fn test_top_up_uses_exchange_rate() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    Setting::set(&db.pool, EXCHANGE_RATE, "2.5").await?;
    let alice = member(&db, 1001, "alice", "0").await;

    let credited = ledger(&db).top_up(alice.id, dec("10.3"), None).await?;
    assert_eq!(credited, dec("25.75"));
    assert_eq!(reload(&db, alice.id).await.balance, dec("25.75"));

    let top_ups = Transaction::list_by_type(&db.pool, TransactionType::TopUp).await?;
    assert_eq!(top_ups.len(), 1);
    assert_eq!(top_ups[0].amount, dec("25.75"));

    Ok(())
}

#[tokio::test]
async fn test_malformed_setting_is_reported() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    Setting::set(&db.pool, EXCHANGE_RATE, "lots").await?;
    let alice = member(&db, 1001, "alice", "0").await;

    let result = ledger(&db).top_up(alice.id, dec("10"), None).await;
    assert!(matches!(result, Err(LedgerError::InvalidSetting(_))));
    assert_eq!(transaction_count(&db).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_failed_transfer_rolls_back() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "100").await;
    let bob = member(&db, 1002, "bob", "0").await;
    break_user(&db, bob.id).await;

    // The sender is debited before the recipient update fails.
    let result = ledger(&db).transfer(alice.telegram_id, "bob", dec("10"), None).await;
    assert!(matches!(result, Err(LedgerError::Database(_))));

    let alice = reload(&db, alice.id).await;
    assert_eq!(alice.balance, dec("100"));
    assert_eq!(alice.transaction_count, 0);
    assert_eq!(transaction_count(&db).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_history_and_economy_summary() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let alice = member(&db, 1001, "alice", "100").await;
    let bob = member(&db, 1002, "bob", "0").await;
    member(&db, 1003, "carol", "5").await;
    let ledger = ledger(&db);

    ledger.transfer(alice.telegram_id, "bob", dec("10"), Some("first")).await?;
    ledger.transfer(alice.telegram_id, "bob", dec("2.5"), Some("second")).await?;
    ledger.transfer(bob.telegram_id, "fund", dec("1"), None).await?;

    let history = ledger.history(alice.id, Utc::now() - Duration::days(1), 50).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].transaction.comment.as_deref(), Some("second"));
    assert_eq!(history[0].from_username.as_deref(), Some("alice"));
    assert_eq!(history[0].to_username.as_deref(), Some("bob"));

    let future = ledger.history(alice.id, Utc::now() + Duration::days(1), 50).await?;
    assert!(future.is_empty());

    let summary = ledger.economy_summary(Utc::now()).await?;
    assert_eq!(summary.turnover_7d, dec("13.5"));
    assert_eq!(summary.turnover_30d, dec("13.5"));
    assert_eq!(summary.turnover_all, dec("13.5"));
    assert_eq!(summary.fund_balance, dec("1"));
    assert_eq!(summary.total_supply, dec("105"));
    assert_eq!(summary.member_count, 3);

    let later = ledger.economy_summary(Utc::now() + Duration::days(10)).await?;
    assert_eq!(later.turnover_7d, Decimal::ZERO);
    assert_eq!(later.turnover_30d, dec("13.5"));

    Ok(())
}

#[tokio::test]
async fn test_oversized_amounts_are_rejected_without_panicking() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;
    let ledger = ledger(&db);
    let alice = member(&db, 1001, "alice", "0").await;

    let result = ledger.credit(alice.id, dec("1000000000001"), None).await;
    assert!(matches!(result, Err(LedgerError::AmountTooLarge(_))));

    Setting::set(&db.pool, EXCHANGE_RATE, "79228162514264337593543950335").await?;
    let result = ledger.top_up(alice.id, dec("10"), None).await;
    assert!(matches!(result, Err(LedgerError::AmountTooLarge(_))));

    // A balance already at the top of the decimal range cannot grow further.
    sqlx::query("UPDATE users SET balance = '79228162514264337593543950335' WHERE id = ?")
        .bind(alice.id)
        .execute(&db.pool)
        .await?;
    let result = ledger.credit(alice.id, dec("1"), Some("one more")).await;
    assert!(matches!(result, Err(LedgerError::AmountTooLarge(_))));
    assert_eq!(reload(&db, alice.id).await.balance, Decimal::MAX);
    assert_eq!(transaction_count(&db).await, 0);

    Ok(())
}
