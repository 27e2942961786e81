//! Environment-driven configuration. Gateway and SMTP credentials are
//! optional; when absent the corresponding integration is disabled with a
//! warning instead of failing startup.

use anyhow::{Context, Result};

use crate::gateway::GatewayMode;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub store_name: String,
    pub gateway: GatewayConfig,
    pub shipping: ShippingConfig,
    pub smtp: SmtpConfig,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub access_token: Option<String>,
    pub public_key: Option<String>,
    pub base_url: String,
    pub frontend_url: String,
    pub webhook_url: String,
    pub statement_descriptor: String,
    pub currency: String,
}

impl GatewayConfig {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    /// Test mode is signalled by the provider's `TEST-` token prefix.
    pub fn mode(&self) -> GatewayMode {
        match self.access_token.as_deref() {
            Some(token) if token.starts_with("TEST-") => GatewayMode::Test,
            _ => GatewayMode::Production,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShippingConfig {
    /// Flat home-delivery fee, charged below the free-shipping threshold.
    pub flat_fee: i64,
    pub free_threshold: i64,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    /// Internal recipient for the sales notification.
    pub sales_email: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            user: None,
            pass: None,
            from_email: None,
            from_name: None,
            sales_email: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let port = parse_or("PORT", 8080)?;
        let store_name = env_or("STORE_NAME", "Storefront");

        let frontend_url = env_or("FRONTEND_URL", "http://localhost:3000");
        let api_base_url = env_or("API_BASE_URL", "http://localhost:8080");
        let gateway = GatewayConfig {
            access_token: env_opt("MERCADOPAGO_ACCESS_TOKEN"),
            public_key: env_opt("MERCADOPAGO_PUBLIC_KEY"),
            base_url: env_or("MERCADOPAGO_API_URL", "https://api.mercadopago.com"),
            frontend_url,
            webhook_url: env_opt("MERCADOPAGO_WEBHOOK_URL")
                .unwrap_or_else(|| format!("{api_base_url}/api/payments/webhook")),
            statement_descriptor: env_or("STATEMENT_DESCRIPTOR", &store_name),
            currency: env_or("CURRENCY", "CLP"),
        };

        let shipping = ShippingConfig {
            flat_fee: parse_or("SHIPPING_FLAT_FEE", 5_000)?,
            free_threshold: parse_or("FREE_SHIPPING_THRESHOLD", 50_000)?,
        };

        let smtp = SmtpConfig {
            host: env_opt("SMTP_HOST"),
            port: parse_or("SMTP_PORT", 587)?,
            user: env_opt("SMTP_USER"),
            pass: env_opt("SMTP_PASS"),
            from_email: env_opt("SMTP_FROM_EMAIL"),
            from_name: env_opt("SMTP_FROM_NAME"),
            sales_email: env_opt("SALES_EMAIL"),
        };

        Ok(Self {
            database_url,
            port,
            store_name,
            gateway,
            shipping,
            smtp,
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}
