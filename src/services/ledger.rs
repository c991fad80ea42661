//! Balance movements.
//!
//! [`post`] is the only code that changes a balance. Every public operation
//! runs its postings inside one database transaction, so a failure at any
//! step leaves no partial effect behind.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::database::models::{
    normalize_username, parse_decimal, BalanceError, HistoryEntry, MalformedSetting, Setting,
    SpendDecision, Transaction, TransactionType, User, EXCHANGE_RATE, FUND_USER_ID,
    GRACE_CREDIT_LIMIT, WELCOME_BONUS_AMOUNT,
};
use crate::utils::logging::log_ledger_posting;
use crate::utils::validation::MAX_AMOUNT;

pub const AMOUNT_SCALE: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("cannot transfer to yourself")]
    SelfTransfer,
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("amount {0} is too large")]
    AmountTooLarge(Decimal),
    #[error(transparent)]
    InvalidSetting(#[from] MalformedSetting),
}

impl From<BalanceError> for LedgerError {
    fn from(error: BalanceError) -> Self {
        match error {
            BalanceError::Database(e) => LedgerError::Database(e),
            BalanceError::Overflow { delta, .. } => LedgerError::AmountTooLarge(delta.abs()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Posting<'a> {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub amount: Decimal,
    pub kind: TransactionType,
    pub comment: Option<&'a str>,
}

/// Applies a posting on `conn` and returns the new transaction id.
///
/// Issued money has the fund as its nominal sender and burned money the fund
/// as its nominal receiver; in both cases the fund's balance is untouched.
/// Counters are bumped for every party whose balance moved, except for
/// demurrage.
pub async fn post(
    conn: &mut SqliteConnection,
    posting: &Posting<'_>,
    at: DateTime<Utc>,
) -> Result<i64, LedgerError> {
    if posting.amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(posting.amount));
    }

    let mut moved = Vec::with_capacity(2);
    if posting.kind.debits_sender() {
        User::adjust_balance(&mut *conn, posting.from_user_id, -posting.amount).await?;
        moved.push(posting.from_user_id);
    }
    if posting.kind.credits_receiver() {
        let balance = User::adjust_balance(&mut *conn, posting.to_user_id, posting.amount).await?;
        if balance >= Decimal::ZERO && posting.to_user_id != FUND_USER_ID {
            User::set_grace_credit_used(&mut *conn, posting.to_user_id, false).await?;
        }
        moved.push(posting.to_user_id);
    }

    let transaction_id = Transaction::insert(
        &mut *conn,
        posting.from_user_id,
        posting.to_user_id,
        posting.amount,
        posting.kind,
        posting.comment,
        at,
    )
    .await?;

    if posting.kind.counts_toward_activity() {
        moved.dedup();
        User::increment_tx_count(&mut *conn, &moved).await?;
    }

    log_ledger_posting(
        posting.kind.as_str(),
        posting.from_user_id,
        posting.to_user_id,
        posting.amount,
    );
    Ok(transaction_id)
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transaction_id: i64,
    pub sender: User,
    pub recipient: User,
    pub used_grace_credit: bool,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub created: bool,
    pub welcome_bonus: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EconomySummary {
    pub turnover_7d: Decimal,
    pub turnover_30d: Decimal,
    pub turnover_all: Decimal,
    pub total_supply: Decimal,
    pub fund_balance: Decimal,
    pub member_count: usize,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Moves `amount` from the sender to `recipient` (a handle or `fund`).
    ///
    /// A sender who cannot cover the amount may draw on the one-time grace
    /// credit, see [`User::spend_decision`].
    pub async fn transfer(
        &self,
        sender_telegram_id: i64,
        recipient: &str,
        amount: Decimal,
        comment: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        check_amount(amount)?;
        let mut tx = self.pool.begin().await?;

        let sender = User::find_by_telegram_id(&mut *tx, sender_telegram_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(sender_telegram_id.to_string()))?;
        let receiver = User::find_by_username(&mut *tx, recipient)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(recipient.to_string()))?;
        if sender.id == receiver.id {
            return Err(LedgerError::SelfTransfer);
        }

        let grace_limit = parse_decimal(
            GRACE_CREDIT_LIMIT,
            Setting::get(&mut *tx, GRACE_CREDIT_LIMIT).await?,
        )?;
        let decision = sender.spend_decision(amount, grace_limit);
        if decision == SpendDecision::Refused {
            return Err(LedgerError::InsufficientFunds {
                balance: sender.balance,
                requested: amount,
            });
        }

        let transaction_id = post(
            &mut tx,
            &Posting {
                from_user_id: sender.id,
                to_user_id: receiver.id,
                amount,
                kind: TransactionType::Transfer,
                comment,
            },
            Utc::now(),
        )
        .await?;

        let used_grace_credit = decision == SpendDecision::GraceCredit;
        if used_grace_credit {
            User::set_grace_credit_used(&mut *tx, sender.id, true).await?;
        }

        let sender = require_user(&mut tx, sender.id).await?;
        let recipient = require_user(&mut tx, receiver.id).await?;
        tx.commit().await?;

        Ok(TransferReceipt {
            transaction_id,
            sender,
            recipient,
            used_grace_credit,
        })
    }

    pub async fn credit(
        &self,
        user_id: i64,
        amount: Decimal,
        comment: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        let kind = TransactionType::ManualAdd;
        self.single_posting(FUND_USER_ID, user_id, amount, kind, comment, user_id)
            .await
    }

    pub async fn debit(
        &self,
        user_id: i64,
        amount: Decimal,
        comment: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        let kind = TransactionType::ManualRem;
        self.single_posting(user_id, FUND_USER_ID, amount, kind, comment, user_id)
            .await
    }

    pub async fn pay_from_fund(
        &self,
        user_id: i64,
        amount: Decimal,
        comment: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        check_amount(amount)?;
        let mut tx = self.pool.begin().await?;

        let fund = User::fund(&mut *tx).await?;
        if fund.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: fund.balance,
                requested: amount,
            });
        }
        require_user(&mut tx, user_id).await?;

        post(
            &mut tx,
            &Posting {
                from_user_id: FUND_USER_ID,
                to_user_id: user_id,
                amount,
                kind: TransactionType::FundPayment,
                comment,
            },
            Utc::now(),
        )
        .await?;

        let balance = require_user(&mut tx, user_id).await?.balance;
        tx.commit().await?;
        Ok(balance)
    }

    pub async fn top_up(
        &self,
        user_id: i64,
        external_amount: Decimal,
        comment: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        check_amount(external_amount)?;
        let mut tx = self.pool.begin().await?;

        let rate = parse_decimal(EXCHANGE_RATE, Setting::get(&mut *tx, EXCHANGE_RATE).await?)?;
        let credited = external_amount
            .checked_mul(rate)
            .ok_or(LedgerError::AmountTooLarge(external_amount))?
            .round_dp(AMOUNT_SCALE);
        check_amount(credited)?;
        require_user(&mut tx, user_id).await?;

        post(
            &mut tx,
            &Posting {
                from_user_id: FUND_USER_ID,
                to_user_id: user_id,
                amount: credited,
                kind: TransactionType::TopUp,
                comment,
            },
            Utc::now(),
        )
        .await?;

        tx.commit().await?;
        Ok(credited)
    }

    /// Creates the account on first contact, with the general subscription
    /// and the welcome bonus. Known users only get their handle refreshed.
    pub async fn register_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> Result<Registration, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if let Some(handle) = username {
            let released = User::release_username(&mut *tx, handle, telegram_id).await?;
            if released > 0 {
                let handle = normalize_username(handle);
                info!("Handle @{} moved to Telegram user {}", handle, telegram_id);
            }
        }

        if let Some(existing) = User::find_by_telegram_id(&mut *tx, telegram_id).await? {
            let wanted = username.map(normalize_username);
            let user = if existing.username != wanted {
                User::set_username(&mut *tx, existing.id, wanted.as_deref()).await?;
                require_user(&mut tx, existing.id).await?
            } else {
                existing
            };
            tx.commit().await?;
            return Ok(Registration {
                user,
                created: false,
                welcome_bonus: Decimal::ZERO,
            });
        }

        let user = User::create(&mut tx, telegram_id, username, false).await?;
        let bonus = parse_decimal(
            WELCOME_BONUS_AMOUNT,
            Setting::get(&mut *tx, WELCOME_BONUS_AMOUNT).await?,
        )?;
        let welcome_bonus = if bonus > Decimal::ZERO {
            post(
                &mut tx,
                &Posting {
                    from_user_id: FUND_USER_ID,
                    to_user_id: user.id,
                    amount: bonus,
                    kind: TransactionType::WelcomeBonus,
                    comment: Some("Welcome bonus"),
                },
                Utc::now(),
            )
            .await?;
            bonus
        } else {
            Decimal::ZERO
        };

        let user = require_user(&mut tx, user.id).await?;
        tx.commit().await?;

        Ok(Registration {
            user,
            created: true,
            welcome_bonus,
        })
    }

    pub async fn history(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        Ok(Transaction::history_for(&self.pool, user_id, since, limit).await?)
    }

    pub async fn economy_summary(&self, now: DateTime<Utc>) -> Result<EconomySummary, LedgerError> {
        let transfer = TransactionType::Transfer;
        let turnover_7d =
            Transaction::turnover(&self.pool, transfer, Some(now - Duration::days(7))).await?;
        let turnover_30d =
            Transaction::turnover(&self.pool, transfer, Some(now - Duration::days(30))).await?;
        let turnover_all = Transaction::turnover(&self.pool, transfer, None).await?;

        let members = User::list_members(&self.pool).await?;
        let fund = User::fund(&self.pool).await?;
        let total_supply = members
            .iter()
            .fold(fund.balance, |total, user| total + user.balance);

        Ok(EconomySummary {
            turnover_7d,
            turnover_30d,
            turnover_all,
            total_supply,
            fund_balance: fund.balance,
            member_count: members.len(),
        })
    }

    async fn single_posting(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        amount: Decimal,
        kind: TransactionType,
        comment: Option<&str>,
        report_user_id: i64,
    ) -> Result<Decimal, LedgerError> {
        check_amount(amount)?;
        let mut tx = self.pool.begin().await?;
        require_user(&mut tx, report_user_id).await?;

        post(
            &mut tx,
            &Posting {
                from_user_id,
                to_user_id,
                amount,
                kind,
                comment,
            },
            Utc::now(),
        )
        .await?;

        let balance = require_user(&mut tx, report_user_id).await?.balance;
        tx.commit().await?;
        Ok(balance)
    }
}

fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    if amount > MAX_AMOUNT {
        return Err(LedgerError::AmountTooLarge(amount));
    }
    Ok(())
}

async fn require_user(conn: &mut SqliteConnection, user_id: i64) -> Result<User, LedgerError> {
    User::find_by_id(&mut *conn, user_id)
        .await?
        .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}
