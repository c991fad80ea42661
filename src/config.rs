use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use std::env;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/ledger.db";
const DEFAULT_CURRENCY_SYMBOL: &str = "Ӫ";
/// 00:01 at UTC+3, expressed in UTC for the cron runner.
const DEFAULT_DEMURRAGE_CRON: &str = "0 1 21 * * *";

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub database_url: String,
    pub http_port: u16,
    pub super_admin_id: Option<i64>,
    pub utc_offset_hours: i32,
    pub currency_symbol: String,
    pub demurrage_cron: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?;

        if token.trim().is_empty() {
            return Err(anyhow!("TELEGRAM_BOT_TOKEN must be set"));
        }

        let database_url = non_empty_var("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let http_port = non_empty_var("HTTP_PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| anyhow!("Invalid HTTP_PORT"))?;

        let super_admin_id = match non_empty_var("SUPER_ADMIN_ID") {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| anyhow!("Invalid SUPER_ADMIN_ID"))?,
            ),
            None => None,
        };

        let utc_offset_hours: i32 = non_empty_var("UTC_OFFSET_HOURS")
            .unwrap_or_else(|| "3".to_string())
            .parse()
            .map_err(|_| anyhow!("Invalid UTC_OFFSET_HOURS"))?;
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(anyhow!("UTC_OFFSET_HOURS must be between -12 and 14"));
        }

        let currency_symbol = non_empty_var("CURRENCY_SYMBOL")
            .unwrap_or_else(|| DEFAULT_CURRENCY_SYMBOL.to_string());
        let demurrage_cron = non_empty_var("DEMURRAGE_CRON")
            .unwrap_or_else(|| DEFAULT_DEMURRAGE_CRON.to_string());

        Ok(Config {
            telegram_bot_token: token,
            database_url,
            http_port,
            super_admin_id,
            utc_offset_hours,
            currency_symbol,
            demurrage_cron,
        })
    }

    /// The civil offset every schedule field is interpreted in.
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| anyhow!("Invalid UTC offset: {} hours", self.utc_offset_hours))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
