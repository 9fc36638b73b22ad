use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// How long a cart reservation holds stock before it lapses.
    pub reservation_hold_minutes: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: u64,
    pub shipping_fee: i64,
    /// Orders with a subtotal at or above this ship for free. Zero disables the rule.
    pub free_shipping_threshold: i64,
    /// Tax rate in basis points (1/100 of a percent).
    pub tax_rate_bps: i64,
}

impl AppConfig {
    pub fn new(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            jwt_secret: jwt_secret.into(),
            reservation_hold_minutes: 30,
            sweep_interval_secs: 60,
            sweep_batch_size: 500,
            shipping_fee: 0,
            free_shipping_threshold: 0,
            tax_rate_bps: 0,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;

        let mut config = Self::new(database_url, jwt_secret);
        if let Ok(host) = env::var("APP_HOST") {
            config.host = host;
        }
        config.port = parse_var("APP_PORT").unwrap_or(config.port);
        config.reservation_hold_minutes =
            parse_var("RESERVATION_HOLD_MINUTES").unwrap_or(config.reservation_hold_minutes);
        config.sweep_interval_secs =
            parse_var("SWEEP_INTERVAL_SECS").unwrap_or(config.sweep_interval_secs);
        config.sweep_batch_size = parse_var("SWEEP_BATCH_SIZE").unwrap_or(config.sweep_batch_size);
        config.shipping_fee = parse_var("SHIPPING_FEE").unwrap_or(config.shipping_fee);
        config.free_shipping_threshold =
            parse_var("FREE_SHIPPING_THRESHOLD").unwrap_or(config.free_shipping_threshold);
        config.tax_rate_bps = parse_var("TAX_RATE_BPS").unwrap_or(config.tax_rate_bps);

        if config.reservation_hold_minutes <= 0 {
            anyhow::bail!("RESERVATION_HOLD_MINUTES must be positive");
        }
        if config.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be positive");
        }

        Ok(config)
    }

    pub fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reservation_hold_minutes)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
