//! Near-the-money contract selection
//!
//! The chain snapshot mirrors the brokerage payload:
//!
//! ```json
//! {"options": {"option": [{"symbol": "...", "option_type": "call", "strike": 8.0, "last": 0.41, "ask": 0.43}]}}
//! ```
//!
//! `options` may be absent or null (no chain for that expiration) and `option`
//! may be a single object instead of a list. Each entry is read leniently
//! (wrong-typed or null fields become `None`, price fields stay raw JSON) so
//! that one malformed quote only disqualifies that contract.
//!
//! Selection is first-match in the chain's own order: the first contract of
//! the requested type whose strike is at or above its reference price. This
//! is not a nearest-strike search.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::{OptionContract, OptionType};

/// Option chain snapshot for one expiration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionChain {
    #[serde(default)]
    pub options: Option<OptionList>,
}

impl OptionChain {
    pub fn from_quotes(quotes: Vec<OptionQuote>) -> Self {
        OptionChain {
            options: Some(OptionList {
                option: OneOrMany::Many(quotes),
            }),
        }
    }

    /// Raw quotes in chain order
    pub fn quotes(&self) -> &[OptionQuote] {
        match &self.options {
            Some(list) => list.option.as_slice(),
            None => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionList {
    pub option: OneOrMany<OptionQuote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }
}

/// One unvalidated chain entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct OptionQuote {
    pub symbol: Option<String>,
    pub underlying: Option<String>,
    pub option_type: Option<String>,
    pub strike: Option<Value>,
    pub last: Option<Value>,
    pub ask: Option<Value>,
}

impl From<Value> for OptionQuote {
    fn from(value: Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let raw = |key: &str| value.get(key).cloned();

        OptionQuote {
            symbol: text("symbol"),
            underlying: text("underlying"),
            option_type: text("option_type"),
            strike: raw("strike"),
            last: raw("last"),
            ask: raw("ask"),
        }
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parse a JSON price that may be a number or a numeric string.
///
/// Null, zero, and unparseable values all come back as `None`.
pub fn parse_price(value: &Value) -> Option<Decimal> {
    parse_decimal(value).filter(|price| !price.is_zero())
}

impl OptionQuote {
    fn option_type(&self) -> Option<OptionType> {
        match self.option_type.as_deref()?.to_ascii_lowercase().as_str() {
            "call" => Some(OptionType::Call),
            "put" => Some(OptionType::Put),
            _ => None,
        }
    }

    /// Validate into a contract; `None` when symbol, type, strike or ask is unusable
    pub fn to_contract(&self) -> Option<OptionContract> {
        let symbol = self.symbol.as_deref().filter(|s| !s.is_empty())?;
        let option_type = self.option_type()?;
        let strike = self.strike.as_ref().and_then(parse_price)?;
        let ask = self.ask.as_ref().and_then(parse_price)?;
        // A present but garbled last price disqualifies the quote
        let last = match &self.last {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_decimal(value)?).filter(|p| !p.is_zero()),
        };

        Some(OptionContract {
            symbol: symbol.to_string(),
            underlying: self.underlying.clone().unwrap_or_default(),
            strike,
            option_type,
            last,
            ask: Some(ask),
        })
    }
}

impl OptionContract {
    /// Last trade price when available, ask otherwise
    pub fn reference_price(&self) -> Option<Decimal> {
        self.last.or(self.ask)
    }
}

/// First contract of `option_type` with `strike >= reference price`
pub fn find_contract(chain: &OptionChain, option_type: OptionType) -> Option<OptionContract> {
    if chain.options.is_none() {
        debug!("Option chain has no options collection");
        return None;
    }

    for quote in chain.quotes() {
        if quote.option_type() != Some(option_type) {
            continue;
        }

        let Some(contract) = quote.to_contract() else {
            debug!(
                "Skipping malformed quote: {}",
                quote.symbol.as_deref().unwrap_or("<no symbol>")
            );
            continue;
        };

        match contract.reference_price() {
            Some(price) if contract.strike >= price => return Some(contract),
            _ => continue,
        }
    }

    None
}
