//! Startup configuration.
//!
//! Everything required is read from the environment once at boot; a missing
//! or weak value refuses startup. There is no fallback to insecure defaults
//! in production.

use crate::constants::SNIPER_WINDOW_DEFAULT_SECS;
use crate::error::GavelError;

/// Minimum HS256 signing secret length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub kv_url: String,
    pub auth_secret: String,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub sniper_window_secs: u64,
    pub cors_origin: String,
    pub pos_chaos: bool,
    pub port: u16,
    pub production: bool,
}

impl Config {
    /// Read and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, GavelError> {
        let cfg = Self {
            database_url: require("DATABASE_URL")?,
            kv_url: require("KV_URL")?,
            auth_secret: require("AUTH_SECRET")?,
            auth_issuer: require("AUTH_ISSUER")?,
            auth_audience: require("AUTH_AUDIENCE")?,
            sniper_window_secs: optional("SNIPER_WINDOW_SECS")
                .map(|v| parse_num(&v, "SNIPER_WINDOW_SECS"))
                .transpose()?
                .unwrap_or(SNIPER_WINDOW_DEFAULT_SECS),
            cors_origin: require("CORS_ORIGIN")?,
            pos_chaos: optional("POS_CHAOS").map(|v| v == "1" || v == "true").unwrap_or(false),
            port: parse_num(&require("PORT")?, "PORT")?,
            production: optional("GAVEL_ENV").as_deref() == Some("production"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Pure validation, applied after construction from any source.
    pub fn validate(&self) -> Result<(), GavelError> {
        if self.auth_secret.len() < MIN_SECRET_BYTES {
            return Err(GavelError::Config(format!(
                "AUTH_SECRET must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        if self.auth_secret == "change-me" || self.auth_secret.bytes().all(|b| b == b'0') {
            return Err(GavelError::Config("AUTH_SECRET is a default value".into()));
        }
        if self.production && self.cors_origin.trim() == "*" {
            return Err(GavelError::Config(
                "CORS_ORIGIN must not be a wildcard in production".into(),
            ));
        }
        if self.sniper_window_secs == 0 {
            return Err(GavelError::Config("SNIPER_WINDOW_SECS must be positive".into()));
        }
        Ok(())
    }
}

fn require(key: &str) -> Result<String, GavelError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GavelError::Config(format!("{key} is required")))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, GavelError> {
    value
        .parse()
        .map_err(|_| GavelError::Config(format!("{key} is not a valid number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            database_url: "postgres://localhost/gavel".into(),
            kv_url: "redis://localhost".into(),
            auth_secret: "0123456789abcdef0123456789abcdefXY".into(),
            auth_issuer: "gavel".into(),
            auth_audience: "gavel-clients".into(),
            sniper_window_secs: 60,
            cors_origin: "https://example.test".into(),
            pos_chaos: false,
            port: 8080,
            production: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn short_secret_is_refused() {
        let mut cfg = valid();
        cfg.auth_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_secret_is_refused() {
        let mut cfg = valid();
        cfg.auth_secret = "0".repeat(40);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wildcard_cors_refused_in_production() {
        let mut cfg = valid();
        cfg.cors_origin = "*".into();
        assert!(cfg.validate().is_ok(), "wildcard allowed outside production");
        cfg.production = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_sniper_window_refused() {
        let mut cfg = valid();
        cfg.sniper_window_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
