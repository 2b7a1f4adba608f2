use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::report::VenueKind;

const CONFIG_FILE_NAME: &str = "autoinvest.toml";

fn default_secrets_path() -> PathBuf {
    PathBuf::from("secrets.json")
}

/// HTTP client settings shared by every venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeRateConfig {
    pub base_url: String,
    /// Publisher data set; `AP01` is the daily dealing rate table.
    pub data_code: String,
    /// How many days before today the lookup may roll back.
    pub max_lookback_days: u32,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            base_url: crate::exchange_rate::KOREAEXIM_API_BASE.to_string(),
            data_code: crate::exchange_rate::KOREAEXIM_DATA_CODE.to_string(),
            max_lookback_days: 14,
        }
    }
}

/// Which brokerage environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KisEnvironment {
    #[default]
    Real,
    Paper,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KisConfig {
    /// Overrides the endpoint implied by `environment`.
    pub base_url: Option<String>,
    pub environment: KisEnvironment,
}

impl KisConfig {
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => match self.environment {
                KisEnvironment::Real => crate::sources::kis::KIS_REAL_BASE_URL.to_string(),
                KisEnvironment::Paper => crate::sources::kis::KIS_PAPER_BASE_URL.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    /// Exchanges whose KRW tickers form the domestic price.
    pub domestic_exchanges: Vec<String>,
    /// Domestic/international ratio above which a warning is logged.
    pub premium_warning_ratio: f64,
    /// Symbol to coin id, on top of the built-in mappings.
    pub coin_ids: BTreeMap<String, String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: crate::sources::coingecko::COINGECKO_API_BASE.to_string(),
            domestic_exchanges: ["bithumb", "upbit", "korbit", "coinone"]
                .into_iter()
                .map(String::from)
                .collect(),
            premium_warning_ratio: 1.05,
            coin_ids: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KrxConfig {
    pub otp_url: String,
    pub download_url: String,
    /// Days before today searched for trading sessions.
    pub lookup_window_days: u32,
    /// Exchange holidays, as quoted `"YYYY-MM-DD"` strings.
    pub holidays: Vec<NaiveDate>,
    /// Asset id to KRX issue code.
    pub issue_codes: BTreeMap<String, String>,
}

impl Default for KrxConfig {
    fn default() -> Self {
        Self {
            otp_url: crate::sources::krx::KRX_OTP_URL.to_string(),
            download_url: crate::sources::krx::KRX_DOWNLOAD_URL.to_string(),
            lookup_window_days: 10,
            holidays: Vec::new(),
            issue_codes: BTreeMap::from([("GLD".to_string(), "KRD040200002".to_string())]),
        }
    }
}

/// Display/output formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Decimal places money amounts are rounded to in tables.
    ///
    /// Purely presentational; reports are always written unrounded.
    pub currency_decimals: u32,

    /// Render amounts with thousands separators.
    pub currency_grouping: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            currency_decimals: 2,
            currency_grouping: false,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the secrets JSON file. If relative, resolved from the config file location.
    pub secrets_path: PathBuf,

    pub http: HttpConfig,

    pub exchange_rate: ExchangeRateConfig,

    pub kis: KisConfig,

    pub coingecko: CoinGeckoConfig,

    pub krx: KrxConfig,

    /// Group id to venue, for groups not named after their venue.
    pub venues: BTreeMap<String, VenueKind>,

    pub display: DisplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secrets_path: default_secrets_path(),
            http: HttpConfig::default(),
            exchange_rate: ExchangeRateConfig::default(),
            kis: KisConfig::default(),
            coingecko: CoinGeckoConfig::default(),
            krx: KrxConfig::default(),
            venues: BTreeMap::new(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn resolve_secrets_path(&self, config_dir: &Path) -> PathBuf {
        if self.secrets_path.is_absolute() {
            self.secrets_path.clone()
        } else {
            config_dir.join(&self.secrets_path)
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub secrets_path: PathBuf,
    pub config: Config,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./autoinvest.toml` if it exists in current directory
/// 2. `~/.config/autoinvest/autoinvest.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from(CONFIG_FILE_NAME);
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("autoinvest").join(CONFIG_FILE_NAME);
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self {
            secrets_path: config.resolve_secrets_path(config_dir),
            config,
        })
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Relative paths then resolve against the directory the config file
    /// would live in.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        let config = Config::default();
        Ok(Self {
            secrets_path: config.resolve_secrets_path(config_dir),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.exchange_rate.data_code, "AP01");
        assert_eq!(config.exchange_rate.max_lookback_days, 14);
        assert_eq!(config.coingecko.domestic_exchanges.len(), 4);
        assert_eq!(config.coingecko.premium_warning_ratio, 1.05);
        assert_eq!(config.krx.lookup_window_days, 10);
        assert_eq!(
            config.krx.issue_codes.get("GLD").map(String::as_str),
            Some("KRD040200002")
        );
        assert_eq!(config.display.currency_decimals, 2);
    }

    #[test]
    fn test_load_empty_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("autoinvest.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.secrets_path, PathBuf::from("secrets.json"));
        assert_eq!(config.kis.environment, KisEnvironment::Real);
        Ok(())
    }

    #[test]
    fn test_load_venue_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("autoinvest.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[http]")?;
        writeln!(file, "timeout_secs = 5")?;
        writeln!(file, "[kis]")?;
        writeln!(file, "environment = \"paper\"")?;
        writeln!(file, "[coingecko]")?;
        writeln!(file, "domestic_exchanges = [\"upbit\"]")?;
        writeln!(file, "premium_warning_ratio = 1.1")?;
        writeln!(file, "[coingecko.coin_ids]")?;
        writeln!(file, "SOL = \"solana\"")?;
        writeln!(file, "[krx]")?;
        writeln!(file, "holidays = [\"2024-02-09\", \"2024-02-12\"]")?;
        writeln!(file, "[venues]")?;
        writeln!(file, "Bank = \"manual\"")?;
        writeln!(file, "Upbit = \"crypto\"")?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.kis.environment, KisEnvironment::Paper);
        assert_eq!(
            config.kis.resolved_base_url(),
            crate::sources::kis::KIS_PAPER_BASE_URL
        );
        assert_eq!(config.coingecko.domestic_exchanges, vec!["upbit"]);
        assert_eq!(config.coingecko.premium_warning_ratio, 1.1);
        assert_eq!(config.coingecko.coin_ids["SOL"], "solana");
        assert_eq!(
            config.krx.holidays,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 12).unwrap()
            ]
        );
        assert_eq!(config.venues["Upbit"], VenueKind::Crypto);
        assert_eq!(config.venues["Bank"], VenueKind::Manual);
        Ok(())
    }

    #[test]
    fn test_unknown_venue_kind_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("autoinvest.toml");
        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[venues]")?;
        writeln!(file, "Bank = \"savings\"")?;

        assert!(Config::load(&config_path).is_err());
        Ok(())
    }

    #[test]
    fn test_explicit_base_url_wins_over_environment() {
        let kis = KisConfig {
            base_url: Some("http://localhost:1234".to_string()),
            environment: KisEnvironment::Paper,
        };
        assert_eq!(kis.resolved_base_url(), "http://localhost:1234");
    }

    #[test]
    fn test_resolved_config_resolves_relative_secrets_path() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("autoinvest.toml");
        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "secrets_path = \"keys/secrets.json\"")?;

        let resolved = ResolvedConfig::load(&config_path)?;
        assert_eq!(
            resolved.secrets_path,
            dir.path().canonicalize()?.join("keys/secrets.json")
        );
        Ok(())
    }

    #[test]
    fn test_resolved_config_load_or_default_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("autoinvest.toml");

        let resolved = ResolvedConfig::load_or_default(&config_path)?;
        assert_eq!(resolved.secrets_path, dir.path().join("secrets.json"));
        assert_eq!(resolved.config.display.currency_decimals, 2);
        Ok(())
    }
}
