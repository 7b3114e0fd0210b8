//! Core data types used across the trading bot

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// OHLCV price bar for the traded equity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// EMA crossover signal for the latest bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    None,
}

impl Signal {
    /// Option type implied by a crossover, `None` when there was no cross
    pub fn option_type(self) -> Option<OptionType> {
        match self {
            Signal::Buy => Some(OptionType::Call),
            Signal::Sell => Some(OptionType::Put),
            Signal::None => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::None => write!(f, "NONE"),
        }
    }
}

/// Direction of the fast EMA relative to the slow EMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

impl Trend {
    /// Fallback option type; sideways markets get no trade
    pub fn option_type(self) -> Option<OptionType> {
        match self {
            Trend::Up => Some(OptionType::Call),
            Trend::Down => Some(OptionType::Put),
            Trend::Sideways => None,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Up => write!(f, "UP"),
            Trend::Down => write!(f, "DOWN"),
            Trend::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single listed option, validated out of a chain snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub underlying: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub last: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// Order direction as understood by the brokerage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    BuyToOpen,
    SellToClose,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::BuyToOpen => "buy_to_open",
            OrderSide::SellToClose => "sell_to_close",
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy_to_open" => Ok(OrderSide::BuyToOpen),
            "sell_to_close" => Ok(OrderSide::SellToClose),
            other => Err(format!("unknown order side: {}", other)),
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked open position.
///
/// Serialized field names match the on-disk position file:
/// `{"symbol": ..., "side": ..., "timestamp": ...}`. Timestamps are written
/// as RFC 3339; zone-less ISO timestamps from older files read as local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "symbol")]
    pub contract_symbol: String,
    pub side: OrderSide,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub opened_at: DateTime<Utc>,
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` taken as local time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

impl Position {
    pub fn new(contract_symbol: impl Into<String>, side: OrderSide, opened_at: DateTime<Utc>) -> Self {
        Position {
            contract_symbol: contract_symbol.into(),
            side,
            opened_at,
        }
    }

    /// Fractional hours the position has been held at `now`
    pub fn hours_held(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Status recorded alongside each trade log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Executed,
    AutoClosed,
    CloseFailed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Executed => "executed",
            TradeStatus::AutoClosed => "auto-closed",
            TradeStatus::CloseFailed => "close-failed",
        }
    }
}

/// One append-only audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub underlying: String,
    pub contract_symbol: String,
    pub action: OrderSide,
    pub status: TradeStatus,
}

/// Brokerage acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}
