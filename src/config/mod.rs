use rust_decimal::Decimal;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,

    // Bybit API credentials
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub testnet: bool,

    // Trading
    pub symbol: String,
    pub leverage: Decimal,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,

            bybit_api_key: env::var("BYBIT_API_KEY")
                .map_err(|_| anyhow::anyhow!("BYBIT_API_KEY must be set"))?,
            bybit_api_secret: env::var("BYBIT_API_SECRET")
                .map_err(|_| anyhow::anyhow!("BYBIT_API_SECRET must be set"))?,
            testnet: env::var("BYBIT_TESTNET")
                .unwrap_or_else(|_| "false".into())
                .parse()
                .unwrap_or(false),

            symbol: env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".into()),
            leverage: env::var("LEVERAGE")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            poll_interval: Duration::from_millis(
                env::var("POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".into())
                    .parse()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // one test so the shared process environment is touched sequentially
    #[test]
    fn numeric_vars_must_parse() {
        env::set_var("DATABASE_URL", "postgres://localhost/perpbot_test");
        env::set_var("BYBIT_API_KEY", "key");
        env::set_var("BYBIT_API_SECRET", "secret");

        env::set_var("LEVERAGE", "ten");
        assert!(AppConfig::from_env().is_err());

        env::set_var("LEVERAGE", "25");
        env::set_var("POLL_INTERVAL_MS", "fast");
        assert!(AppConfig::from_env().is_err());

        env::set_var("POLL_INTERVAL_MS", "250");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.leverage, Decimal::from(25));
        assert_eq!(config.poll_interval, Duration::from_millis(250));

        env::remove_var("LEVERAGE");
        env::remove_var("POLL_INTERVAL_MS");
    }
}
