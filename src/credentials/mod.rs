//! Venue credentials.
//!
//! Credentials live in a JSON file with one section per service:
//!
//! ```json
//! {
//!   "ExchangerateSecrets": { "AUTH_KEY": "..." },
//!   "KisSecrets": { "APP_KEY": "...", "APP_SECRET": "..." }
//! }
//! ```
//!
//! The file is read once at startup and never written. Every section is
//! optional; asking for a missing one is an error naming the section, so a
//! portfolio without a brokerage group never needs brokerage keys.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

#[derive(Deserialize)]
struct RawSecrets {
    #[serde(rename = "ExchangerateSecrets")]
    exchange_rate: Option<RawExchangeRateSecrets>,
    #[serde(rename = "KisSecrets")]
    kis: Option<RawKisSecrets>,
}

#[derive(Deserialize)]
struct RawExchangeRateSecrets {
    #[serde(rename = "AUTH_KEY")]
    auth_key: String,
}

#[derive(Deserialize)]
struct RawKisSecrets {
    #[serde(rename = "APP_KEY")]
    app_key: String,
    #[serde(rename = "APP_SECRET")]
    app_secret: String,
}

/// Key for the exchange-rate publisher.
pub struct ExchangeRateSecrets {
    pub auth_key: SecretString,
}

/// App key pair for the brokerage API.
pub struct KisSecrets {
    pub app_key: SecretString,
    pub app_secret: SecretString,
}

#[derive(Default)]
pub struct Secrets {
    exchange_rate: Option<Arc<ExchangeRateSecrets>>,
    kis: Option<Arc<KisSecrets>>,
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawSecrets = serde_json::from_str(content)?;
        Ok(Self {
            exchange_rate: raw.exchange_rate.map(|s| {
                Arc::new(ExchangeRateSecrets {
                    auth_key: SecretString::from(s.auth_key),
                })
            }),
            kis: raw.kis.map(|s| {
                Arc::new(KisSecrets {
                    app_key: SecretString::from(s.app_key),
                    app_secret: SecretString::from(s.app_secret),
                })
            }),
        })
    }

    pub fn exchange_rate(&self) -> Result<Arc<ExchangeRateSecrets>> {
        self.exchange_rate
            .clone()
            .ok_or_else(|| anyhow!("Secrets file has no ExchangerateSecrets section"))
    }

    pub fn kis(&self) -> Result<Arc<KisSecrets>> {
        self.kis
            .clone()
            .ok_or_else(|| anyhow!("Secrets file has no KisSecrets section"))
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("exchange_rate", &self.exchange_rate.is_some())
            .field("kis", &self.kis.is_some())
            .finish()
    }
}
