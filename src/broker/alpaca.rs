//! Alpaca market data client (stock bars only)

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use super::error::{BrokerError, BrokerResult};
use super::http::{ClientConfig, GuardedClient};
use super::PriceFeed;
use crate::types::PriceBar;

pub const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<Vec<RawBar>>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

impl From<RawBar> for PriceBar {
    fn from(bar: RawBar) -> Self {
        PriceBar {
            timestamp: bar.t,
            open: bar.o,
            high: bar.h,
            low: bar.l,
            close: bar.c,
            volume: bar.v,
        }
    }
}

pub struct AlpacaClient {
    http: GuardedClient,
    base_url: String,
    api_key: String,
    api_secret: String,
    feed: String,
    lookback: Duration,
}

impl AlpacaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> BrokerResult<Self> {
        Self::with_config(base_url, api_key, api_secret, ClientConfig::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        config: ClientConfig,
    ) -> BrokerResult<Self> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.is_empty() {
            return Err(BrokerError::MissingCredentials("ALPACA_API_KEY"));
        }
        if api_secret.is_empty() {
            return Err(BrokerError::MissingCredentials("ALPACA_SECRET_KEY"));
        }

        Ok(Self {
            http: GuardedClient::new(config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            feed: "iex".to_string(),
            lookback: Duration::days(5),
        })
    }

    /// Data feed to query ("iex" for free plans, "sip" for paid)
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = feed.into();
        self
    }

    /// How far back the bar query reaches. Without a start time the API only
    /// returns bars from the current day.
    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = Duration::days(days);
        self
    }
}

#[async_trait]
impl PriceFeed for AlpacaClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> BrokerResult<Vec<PriceBar>> {
        let url = format!("{}/v2/stocks/{}/bars", self.base_url, symbol);
        let start = (Utc::now() - self.lookback).to_rfc3339_opts(SecondsFormat::Secs, true);
        let limit = limit.to_string();

        let response: BarsResponse = self
            .http
            .get_json(|client| {
                client
                    .get(&url)
                    .header("APCA-API-KEY-ID", &self.api_key)
                    .header("APCA-API-SECRET-KEY", &self.api_secret)
                    .query(&[
                        ("timeframe", timeframe),
                        ("limit", limit.as_str()),
                        ("start", start.as_str()),
                        ("sort", "desc"),
                        ("feed", self.feed.as_str()),
                    ])
            })
            .await?;

        // newest first on the wire
        let mut bars: Vec<PriceBar> = response
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(PriceBar::from)
            .collect();
        bars.reverse();

        debug!("Fetched {} {} bars for {}", bars.len(), timeframe, symbol);
        Ok(bars)
    }
}
