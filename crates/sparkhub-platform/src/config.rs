use anyhow::{Context, Result};
use rust_decimal::Decimal;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
        })
    }
}

/// Ledger tuning knobs and file store roots, all optional in the
/// environment. Defaults match the production values.
#[derive(Clone, Debug)]
pub struct LedgerSettings {
    pub expedite_fee_per_day: i64,
    pub base_upload_fee: i64,
    pub max_admin_adjustment: i64,
    pub max_topup_amount: Decimal,
    pub file_staging_dir: String,
    pub file_live_dir: String,
}

impl LedgerSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            expedite_fee_per_day: env_parsed("EXPEDITE_FEE_PER_DAY", 5)?,
            base_upload_fee: env_parsed("UPLOAD_BASE_FEE", 10)?,
            max_admin_adjustment: env_parsed("MAX_ADMIN_ADJUSTMENT", 10_000)?,
            max_topup_amount: env_parsed("MAX_TOPUP_AMOUNT", Decimal::from(1_000_000))?,
            file_staging_dir: std::env::var("FILE_STAGING_DIR")
                .unwrap_or_else(|_| "data/staging".to_string()),
            file_live_dir: std::env::var("FILE_LIVE_DIR")
                .unwrap_or_else(|_| "data/live".to_string()),
        })
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} could not be parsed")),
        Err(_) => Ok(default),
    }
}
