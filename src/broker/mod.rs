//! Price feed and brokerage integration
//!
//! The decision loop only talks to the capability traits below. Concrete
//! adapters:
//! - **Alpaca** market data for equity bars
//! - **Tradier** for option chains and option orders
//! - **Paper** gateway that accepts orders locally

pub mod alpaca;
pub mod error;
pub mod http;
pub mod paper;
pub mod tradier;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::selector::OptionChain;
use crate::types::{OrderAck, OrderSide, PriceBar};

pub use alpaca::AlpacaClient;
pub use error::{BrokerError, BrokerResult};
pub use http::ClientConfig;
pub use paper::PaperOrderGateway;
pub use tradier::TradierClient;

/// Source of chronological OHLCV bars; an empty vec means no data right now
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> BrokerResult<Vec<PriceBar>>;
}

#[async_trait]
pub trait OptionChainSource: Send + Sync {
    async fn fetch_chain(&self, symbol: &str, expiration: NaiveDate) -> BrokerResult<OptionChain>;
}

/// Order submission. Rejections come back as `BrokerError::OrderRejected`
/// and are never retried by the gateway.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_order(
        &self,
        underlying: &str,
        contract_symbol: &str,
        side: OrderSide,
    ) -> BrokerResult<OrderAck>;
}

#[async_trait]
impl<T: PriceFeed + ?Sized> PriceFeed for Arc<T> {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> BrokerResult<Vec<PriceBar>> {
        (**self).fetch_bars(symbol, timeframe, limit).await
    }
}

#[async_trait]
impl<T: OptionChainSource + ?Sized> OptionChainSource for Arc<T> {
    async fn fetch_chain(&self, symbol: &str, expiration: NaiveDate) -> BrokerResult<OptionChain> {
        (**self).fetch_chain(symbol, expiration).await
    }
}

#[async_trait]
impl<T: OrderGateway + ?Sized> OrderGateway for Arc<T> {
    async fn submit_order(
        &self,
        underlying: &str,
        contract_symbol: &str,
        side: OrderSide,
    ) -> BrokerResult<OrderAck> {
        (**self).submit_order(underlying, contract_symbol, side).await
    }
}
