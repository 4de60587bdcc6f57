use std::env;
use std::str::FromStr;

use bigdecimal::BigDecimal;

/// Runtime settings, read once at startup. `DATABASE_URL` and `BIND_ADDRESS`
/// are read where they are used; everything here is settlement policy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform commission in percent, applied to every order line.
    pub platform_fee_percent: BigDecimal,
    /// Smallest withdrawal a photographer may request.
    pub min_withdrawal: BigDecimal,
    pub stripe_webhook_secret: String,
    pub mercadopago_webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            platform_fee_percent: decimal_var("PLATFORM_FEE_PERCENT", "15"),
            min_withdrawal: decimal_var("MIN_WITHDRAWAL", "20.00"),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            mercadopago_webhook_secret: env::var("MERCADOPAGO_WEBHOOK_SECRET").unwrap_or_default(),
        }
    }
}

fn decimal_var(name: &str, default: &str) -> BigDecimal {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    BigDecimal::from_str(&raw).unwrap_or_else(|_| panic!("{name} is not a valid decimal: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_env();
        assert!(config.platform_fee_percent >= BigDecimal::from(0));
        assert!(config.min_withdrawal >= BigDecimal::from(0));
    }
}
