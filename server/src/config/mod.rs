use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::purchases::PurchaseSettings;

pub mod cors;
pub mod security;

pub use cors::{create_cors_layer, DEFAULT_ALLOWED_ORIGINS};
pub use security::SecurityHeadersLayer;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_connections: u32,
    /// How long a purchase waits for a ticket type's row lock.
    pub lock_timeout: Duration,
    pub purchase: PurchaseSettings,
    pub cors_allowed_origins: String,
    pub is_production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/eventify".to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            max_connections: 5,
            lock_timeout: Duration::from_millis(2000),
            purchase: PurchaseSettings::default(),
            cors_allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
            is_production: false,
        }
    }
}

impl Config {
    /// Read configuration from the process environment. Unset variables use
    /// the defaults; unparsable ones are logged and also fall back.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let purchase = PurchaseSettings {
            attempt_timeout: Duration::from_millis(parse_or(
                &lookup,
                "PURCHASE_TIMEOUT_MS",
                duration_ms(defaults.purchase.attempt_timeout),
            )),
            max_attempts: parse_or(
                &lookup,
                "PURCHASE_MAX_ATTEMPTS",
                defaults.purchase.max_attempts,
            )
            .max(1),
            retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "PURCHASE_RETRY_BACKOFF_MS",
                duration_ms(defaults.purchase.retry_backoff),
            )),
        };

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            host: parse_or(&lookup, "SERVER_HOST", defaults.host),
            port: parse_or(&lookup, "SERVER_PORT", defaults.port),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            // Postgres reads a lock_timeout of 0 as "wait forever".
            lock_timeout: Duration::from_millis(
                parse_or(&lookup, "LOCK_TIMEOUT_MS", duration_ms(defaults.lock_timeout)).max(1),
            ),
            purchase,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),
            is_production: lookup("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(defaults.is_production),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Config: invalid {}='{}' ({}), using {}", key, raw, e, default);
                default
            }
        },
    }
}
