//! Venue adapters that fill a group's assets with live prices and holdings.
//!
//! Every venue implements [`AssetDataSource`]. On success each listed asset
//! has `price` and `holdings`; any remote failure aborts the whole group.

pub mod coingecko;
pub mod kis;
pub mod krx;
pub mod manual;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::allocation::DeviationBasis;
use crate::calendar::TradingCalendar;
use crate::clock::Clock;
use crate::config::Config;
use crate::credentials::Secrets;
use crate::report::{AssetGroup, Report, VenueKind};

pub use coingecko::CoinGeckoSource;
pub use kis::KisSource;
pub use krx::KrxSource;
pub use manual::ManualSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{venue} returned HTTP {status}: {body}")]
    Status {
        venue: &'static str,
        status: u16,
        body: String,
    },

    #[error("{venue} API error {code}: {message}")]
    Api {
        venue: &'static str,
        code: String,
        message: String,
    },

    #[error("invalid continuation marker '{marker}' while draining {what}")]
    InvalidContinuation { what: &'static str, marker: String },

    #[error("{venue} does not know asset {asset}")]
    UnknownAsset { venue: &'static str, asset: String },
}

/// A venue that can refresh one asset group.
#[async_trait]
pub trait AssetDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> VenueKind;

    /// What this venue's data lets the deviation ledger measure.
    fn deviation_basis(&self) -> DeviationBasis {
        DeviationBasis::Holdings
    }

    /// Populate `price` and `holdings` on every asset of `group`.
    async fn populate(
        &self,
        group_id: &str,
        group: &mut AssetGroup,
        exchange_rate: f64,
    ) -> Result<()>;
}

/// Routes each asset group to the venue that serves it.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<VenueKind, Arc<dyn AssetDataSource>>,
    venue_overrides: BTreeMap<String, VenueKind>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue_overrides(mut self, overrides: BTreeMap<String, VenueKind>) -> Self {
        self.venue_overrides = overrides;
        self
    }

    pub fn register(&mut self, source: Arc<dyn AssetDataSource>) {
        self.sources.insert(source.kind(), source);
    }

    pub fn with_source(mut self, source: Arc<dyn AssetDataSource>) -> Self {
        self.register(source);
        self
    }

    /// Venue for a group: its own `venue`, then the configured override,
    /// then the group id convention.
    pub fn venue_for(&self, group_id: &str, group: &AssetGroup) -> VenueKind {
        group
            .venue
            .or_else(|| self.venue_overrides.get(group_id).copied())
            .unwrap_or_else(|| VenueKind::for_group_id(group_id))
    }

    pub fn resolve(&self, group_id: &str, group: &AssetGroup) -> Result<Arc<dyn AssetDataSource>> {
        let venue = self.venue_for(group_id, group);
        self.sources.get(&venue).cloned().ok_or_else(|| {
            anyhow!("No {venue} data source is configured for asset group '{group_id}'")
        })
    }
}

/// Build a registry holding only the venues `report` actually uses.
///
/// Venues are constructed eagerly so missing credentials surface before any
/// network traffic.
pub fn build_registry(
    config: &Config,
    secrets: &Secrets,
    clock: Arc<dyn Clock>,
    report: &Report,
) -> Result<SourceRegistry> {
    let client = config.http.build_client()?;
    let mut registry = SourceRegistry::new().with_venue_overrides(config.venues.clone());

    let mut needed: Vec<VenueKind> = report
        .asset_groups
        .iter()
        .map(|(group_id, group)| registry.venue_for(group_id, group))
        .collect();
    needed.sort_by_key(|kind| kind.to_string());
    needed.dedup();

    for kind in needed {
        let source: Arc<dyn AssetDataSource> = match kind {
            VenueKind::Brokerage => Arc::new(
                KisSource::with_client(client.clone(), secrets.kis()?)
                    .with_base_url(config.kis.resolved_base_url())
                    .with_environment(config.kis.environment),
            ),
            VenueKind::Crypto => Arc::new(
                CoinGeckoSource::with_client(client.clone())
                    .with_base_url(config.coingecko.base_url.clone())
                    .with_domestic_exchanges(config.coingecko.domestic_exchanges.clone())
                    .with_premium_warning_ratio(config.coingecko.premium_warning_ratio)
                    .with_custom_mappings(config.coingecko.coin_ids.clone()),
            ),
            VenueKind::Commodity => Arc::new(
                KrxSource::with_client(client.clone(), clock.clone())
                    .with_urls(config.krx.otp_url.clone(), config.krx.download_url.clone())
                    .with_calendar(TradingCalendar::new(config.krx.holidays.iter().copied()))
                    .with_lookup_window_days(config.krx.lookup_window_days)
                    .with_issue_codes(config.krx.issue_codes.clone()),
            ),
            VenueKind::Manual => Arc::new(ManualSource::new()),
        };
        debug!(venue = %kind, source = source.name(), "Registered data source");
        registry.register(source);
    }

    Ok(registry)
}

/// Read a response body, logging it and turning a non-success status into [`SourceError::Status`].
pub(crate) async fn read_response(
    venue: &'static str,
    response: reqwest::Response,
) -> Result<(HeaderMap, String)> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;
    debug!(venue, %status, body = %body, "Received response");

    if !status.is_success() {
        return Err(SourceError::Status {
            venue,
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok((headers, body))
}
