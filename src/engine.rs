//! Decision loop: one polling cycle of the EMA crossover options strategy
//!
//! Each cycle ages out old positions, pulls fresh bars, computes the signal,
//! and either opens a position on a crossover or, once per trading day,
//! falls back to the prevailing trend.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerError, OptionChainSource, OrderGateway, PriceFeed};
use crate::clock::{Clock, SystemClock};
use crate::config::StrategyConfig;
use crate::indicators;
use crate::selector::{self, OptionChain};
use crate::store::PositionStore;
use crate::trade_log::TradeLog;
use crate::types::{OptionType, OrderSide, Position, TradeLogEntry, TradeStatus};

// =============================================================================
// Trading-day gate
// =============================================================================

/// Remembers the last calendar date the trend fallback was offered
#[derive(Debug, Clone, Default)]
pub struct DayTracker {
    last_trade_date: Option<NaiveDate>,
}

impl DayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on the first call for a given date; records the date
    pub fn is_new_trading_day(&mut self, today: NaiveDate) -> bool {
        if self.last_trade_date == Some(today) {
            return false;
        }
        self.last_trade_date = Some(today);
        true
    }

    pub fn last_trade_date(&self) -> Option<NaiveDate> {
        self.last_trade_date
    }
}

/// Friday strictly after `date`; a Friday rolls to the following week
pub fn next_friday(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    let friday = Weekday::Fri.num_days_from_monday() as i64;
    let mut days_ahead = friday - weekday;
    if days_ahead <= 0 {
        days_ahead += 7;
    }
    date + Duration::days(days_ahead)
}

// =============================================================================
// Cycle results
// =============================================================================

/// What opened the position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Crossover,
    TrendFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Price feed returned nothing (market closed, feed error)
    NoData,
    ChainUnavailable,
    Opened {
        contract: String,
        option_type: OptionType,
        trigger: Trigger,
    },
    Duplicate {
        contract: String,
    },
    NoContract {
        option_type: OptionType,
    },
    OrderRejected {
        contract: String,
        code: u16,
        message: String,
    },
    /// Fallback ran but the trend gave no direction
    Sideways,
    Idle,
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::NoData => write!(f, "no price data"),
            CycleOutcome::ChainUnavailable => write!(f, "option chain unavailable"),
            CycleOutcome::Opened {
                contract,
                option_type,
                trigger,
            } => write!(f, "opened {} {} ({:?})", option_type, contract, trigger),
            CycleOutcome::Duplicate { contract } => write!(f, "duplicate {}", contract),
            CycleOutcome::NoContract { option_type } => {
                write!(f, "no suitable {} contract", option_type)
            }
            CycleOutcome::OrderRejected {
                contract,
                code,
                message,
            } => write!(f, "order for {} rejected ({}): {}", contract, code, message),
            CycleOutcome::Sideways => write!(f, "sideways trend, no trade"),
            CycleOutcome::Idle => write!(f, "no action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Positions auto-closed at the start of the cycle
    pub closed: usize,
    pub outcome: CycleOutcome,
}

// =============================================================================
// Engine
// =============================================================================

pub struct TradingEngine {
    config: StrategyConfig,
    price_feed: Box<dyn PriceFeed>,
    chains: Box<dyn OptionChainSource>,
    orders: Box<dyn OrderGateway>,
    store: PositionStore,
    trade_log: Box<dyn TradeLog>,
    clock: Box<dyn Clock>,
    day_tracker: DayTracker,
}

impl TradingEngine {
    pub fn new(
        config: StrategyConfig,
        price_feed: Box<dyn PriceFeed>,
        chains: Box<dyn OptionChainSource>,
        orders: Box<dyn OrderGateway>,
        store: PositionStore,
        trade_log: Box<dyn TradeLog>,
    ) -> Self {
        Self {
            config,
            price_feed,
            chains,
            orders,
            store,
            trade_log,
            clock: Box::new(SystemClock),
            day_tracker: DayTracker::new(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_day_tracker(mut self, day_tracker: DayTracker) -> Self {
        self.day_tracker = day_tracker;
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    /// Run one full cycle. Errors are the unclassified kind; expected
    /// conditions come back as a `CycleOutcome`.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let closed = self.auto_close().await?;
        let outcome = self.decide().await?;

        info!("Cycle complete: {} ({} auto-closed)", outcome, closed);
        Ok(CycleReport { closed, outcome })
    }

    async fn auto_close(&mut self) -> Result<usize> {
        let now = self.clock.now();
        let due = self
            .store
            .due_for_close(self.config.holding_threshold_hours, now)
            .context("Failed to load positions")?;

        // a position leaves the store only after its close is logged
        let mut closed = Vec::with_capacity(due.len());
        let mut failure = None;
        for position in due {
            let status = self.close_position(&position).await;
            let logged = self.record(&position.contract_symbol, OrderSide::SellToClose, status);
            if let Err(e) = logged {
                failure = Some(e);
                break;
            }
            closed.push(position);
        }

        if !closed.is_empty() {
            self.store
                .release(&closed)
                .context("Failed to remove closed positions")?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(closed.len()),
        }
    }

    async fn close_position(&self, position: &Position) -> TradeStatus {
        info!(
            "Auto-closing {} after {:.2}h",
            position.contract_symbol,
            position.hours_held(self.clock.now())
        );

        if !self.config.submit_close_orders {
            return TradeStatus::AutoClosed;
        }

        match self
            .orders
            .submit_order(
                &self.config.symbol,
                &position.contract_symbol,
                OrderSide::SellToClose,
            )
            .await
        {
            Ok(ack) => {
                debug!("Close order {} accepted", ack.order_id);
                TradeStatus::AutoClosed
            }
            Err(e) => {
                error!("Close order for {} failed: {}", position.contract_symbol, e);
                TradeStatus::CloseFailed
            }
        }
    }

    async fn decide(&mut self) -> Result<CycleOutcome> {
        let symbol = self.config.symbol.clone();

        let bars = match self
            .price_feed
            .fetch_bars(&symbol, &self.config.bar_timeframe, self.config.bar_limit)
            .await
        {
            Ok(bars) if !bars.is_empty() => bars,
            Ok(_) => {
                warn!("No price data for {}, market may be closed", symbol);
                return Ok(CycleOutcome::NoData);
            }
            Err(e) => {
                warn!("Price fetch for {} failed: {}", symbol, e);
                return Ok(CycleOutcome::NoData);
            }
        };

        let analysis =
            indicators::analyze(&bars, self.config.fast_period, self.config.slow_period)?;
        info!(
            "{} EMA{} {:.4} / EMA{} {:.4}, signal {}, trend {}",
            symbol,
            self.config.fast_period,
            analysis.fast_ema,
            self.config.slow_period,
            analysis.slow_ema,
            analysis.signal,
            analysis.trend
        );

        let today = self.clock.today();
        let expiration = next_friday(today);
        let chain = match self.chains.fetch_chain(&symbol, expiration).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!("Option chain {} {} unavailable: {}", symbol, expiration, e);
                return Ok(CycleOutcome::ChainUnavailable);
            }
        };

        let new_day = self.day_tracker.is_new_trading_day(today);

        if let Some(option_type) = analysis.signal.option_type() {
            return self.open(&chain, option_type, Trigger::Crossover).await;
        }

        if new_day {
            return match analysis.trend.option_type() {
                Some(option_type) => {
                    info!("First cycle of {}, trading trend {}", today, analysis.trend);
                    self.open(&chain, option_type, Trigger::TrendFallback).await
                }
                None => Ok(CycleOutcome::Sideways),
            };
        }

        Ok(CycleOutcome::Idle)
    }

    async fn open(
        &mut self,
        chain: &OptionChain,
        option_type: OptionType,
        trigger: Trigger,
    ) -> Result<CycleOutcome> {
        let contract = match selector::find_contract(chain, option_type) {
            Some(contract) => contract,
            None => {
                info!("No suitable {} contract found", option_type);
                return Ok(CycleOutcome::NoContract { option_type });
            }
        };

        if self.store.is_duplicate(&contract.symbol)? {
            info!("Duplicate trade detected, skipping {}", contract.symbol);
            return Ok(CycleOutcome::Duplicate {
                contract: contract.symbol,
            });
        }

        match self
            .orders
            .submit_order(&self.config.symbol, &contract.symbol, OrderSide::BuyToOpen)
            .await
        {
            Ok(ack) => {
                debug!("Order {} status {}", ack.order_id, ack.status);
            }
            Err(BrokerError::OrderRejected { code, message }) => {
                error!("Order for {} rejected ({}): {}", contract.symbol, code, message);
                return Ok(CycleOutcome::OrderRejected {
                    contract: contract.symbol,
                    code,
                    message,
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Order for {} failed", contract.symbol));
            }
        }

        if !self
            .store
            .track_if_absent(&contract.symbol, OrderSide::BuyToOpen, self.clock.now())
            .with_context(|| format!("Failed to track {}", contract.symbol))?
        {
            warn!("{} was tracked while its order was in flight", contract.symbol);
        }
        self.record(&contract.symbol, OrderSide::BuyToOpen, TradeStatus::Executed)?;

        Ok(CycleOutcome::Opened {
            contract: contract.symbol,
            option_type,
            trigger,
        })
    }

    fn record(&self, contract: &str, action: OrderSide, status: TradeStatus) -> Result<()> {
        self.trade_log
            .append(&TradeLogEntry {
                timestamp: self.clock.now(),
                underlying: self.config.symbol.clone(),
                contract_symbol: contract.to_string(),
                action,
                status,
            })
            .context("Failed to append trade log")
    }
}
