use chrono::{NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::SqlitePool;
use tracing::info;

use crate::database::models::{
    parse_date, parse_decimal, parse_flag, parse_int, MalformedSetting, Setting, TransactionType,
    User,
    DEMURRAGE_ENABLED, DEMURRAGE_INTERVAL_DAYS, DEMURRAGE_LAST_RUN, DEMURRAGE_RATE,
    FUND_USER_ID, SETTING_DATE_FORMAT,
};
use crate::services::ledger::{post, LedgerError, Posting, AMOUNT_SCALE};

#[derive(Debug, Clone, PartialEq)]
pub enum DemurrageOutcome {
    Disabled,
    NotDue { days_since: i64, interval: i64 },
    ZeroRate,
    Applied { charged_users: usize, total: Decimal },
}

/// Amount taken from `balance` at `rate`, rounded half-to-even.
pub fn demurrage_amount(balance: Decimal, rate: Decimal) -> Option<Decimal> {
    balance.checked_mul(rate).map(|amount| {
        amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointNearestEven)
    })
}

/// Periodic tax on positive balances, paid into the fund.
pub struct DemurrageProcessor {
    pool: SqlitePool,
    timezone: chrono::FixedOffset,
}

impl DemurrageProcessor {
    pub fn new(pool: SqlitePool, timezone: chrono::FixedOffset) -> Self {
        Self { pool, timezone }
    }

    pub async fn run(&self) -> Result<DemurrageOutcome, LedgerError> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        self.run_on(today).await
    }

    /// Applies demurrage for `today` if it is enabled and due.
    ///
    /// Settings are read and every charge is written in one transaction;
    /// malformed settings abort the run before any write.
    pub async fn run_on(&self, today: NaiveDate) -> Result<DemurrageOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let enabled = parse_flag(
            DEMURRAGE_ENABLED,
            Setting::get(&mut *tx, DEMURRAGE_ENABLED).await?,
        )?;
        if !enabled {
            info!("Demurrage is disabled, skipping");
            return Ok(DemurrageOutcome::Disabled);
        }

        let interval = parse_int(
            DEMURRAGE_INTERVAL_DAYS,
            Setting::get(&mut *tx, DEMURRAGE_INTERVAL_DAYS).await?,
        )?;
        let last_run = parse_date(
            DEMURRAGE_LAST_RUN,
            Setting::get(&mut *tx, DEMURRAGE_LAST_RUN).await?,
        )?;
        let days_since = (today - last_run).num_days();
        if days_since < interval {
            info!("Demurrage not due: {}/{} days", days_since, interval);
            return Ok(DemurrageOutcome::NotDue { days_since, interval });
        }

        let raw_rate = Setting::get(&mut *tx, DEMURRAGE_RATE).await?;
        let rate = parse_decimal(DEMURRAGE_RATE, raw_rate.clone())?;
        if rate > Decimal::ONE {
            return Err(MalformedSetting {
                key: DEMURRAGE_RATE.to_string(),
                value: raw_rate.unwrap_or_default(),
            }
            .into());
        }
        if rate <= Decimal::ZERO {
            info!("Demurrage rate is {}, skipping", rate);
            return Ok(DemurrageOutcome::ZeroRate);
        }

        let now = Utc::now();
        let comment = format!("Demurrage {}%", (rate * Decimal::ONE_HUNDRED).normalize());
        let mut charged_users = 0;
        let mut total = Decimal::ZERO;

        for user in User::list_positive_balances(&mut *tx).await? {
            let amount = demurrage_amount(user.balance, rate)
                .ok_or(LedgerError::AmountTooLarge(user.balance))?;
            if amount <= Decimal::ZERO {
                continue;
            }

            post(
                &mut tx,
                &Posting {
                    from_user_id: user.id,
                    to_user_id: FUND_USER_ID,
                    amount,
                    kind: TransactionType::Demurrage,
                    comment: Some(&comment),
                },
                now,
            )
            .await?;

            charged_users += 1;
            total += amount;
        }

        Setting::set(
            &mut *tx,
            DEMURRAGE_LAST_RUN,
            &today.format(SETTING_DATE_FORMAT).to_string(),
        )
        .await?;
        tx.commit().await?;

        info!(
            "Demurrage applied to {} users, {} collected",
            charged_users, total
        );
        Ok(DemurrageOutcome::Applied { charged_users, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demurrage_amount_rounding() {
        let rate = Decimal::new(1, 2);
        assert_eq!(demurrage_amount(Decimal::from(1000), rate), Some(Decimal::from(10)));
        assert_eq!(demurrage_amount(Decimal::new(12345, 2), rate), Some(Decimal::new(12345, 4)));
        // 0.00125 rounds to even
        assert_eq!(demurrage_amount(Decimal::new(125, 3), rate), Some(Decimal::new(12, 4)));
        assert_eq!(demurrage_amount(Decimal::new(1, 3), rate), Some(Decimal::ZERO));
    }

    #[test]
    fn test_demurrage_amount_overflow() {
        assert_eq!(demurrage_amount(Decimal::MAX, Decimal::ONE), Some(Decimal::MAX));
        assert_eq!(demurrage_amount(Decimal::MAX, Decimal::TWO), None);
    }
}
