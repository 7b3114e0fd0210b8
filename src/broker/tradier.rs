//! Tradier brokerage client: option chains and option orders

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{BrokerError, BrokerResult};
use super::http::{ClientConfig, GuardedClient};
use super::{OptionChainSource, OrderGateway};
use crate::selector::OptionChain;
use crate::types::{OrderAck, OrderSide};

pub const SANDBOX_URL: &str = "https://sandbox.tradier.com/v1";
pub const LIVE_URL: &str = "https://api.tradier.com/v1";

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    order: Option<OrderBody>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OrderBody {
    id: Value,
    #[serde(default)]
    status: Option<String>,
}

pub struct TradierClient {
    http: GuardedClient,
    base_url: String,
    account_id: String,
    access_token: String,
    quantity: u32,
}

impl TradierClient {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> BrokerResult<Self> {
        Self::with_config(base_url, account_id, access_token, ClientConfig::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
        config: ClientConfig,
    ) -> BrokerResult<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(BrokerError::MissingCredentials("TRADIER_ACCESS_TOKEN"));
        }

        Ok(Self {
            http: GuardedClient::new(config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account_id: account_id.into(),
            access_token,
            quantity: 1,
        })
    }

    /// Contracts per order
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

#[async_trait]
impl OptionChainSource for TradierClient {
    async fn fetch_chain(&self, symbol: &str, expiration: NaiveDate) -> BrokerResult<OptionChain> {
        let url = format!("{}/markets/options/chains", self.base_url);
        let expiration = expiration.format("%Y-%m-%d").to_string();
        let auth = self.bearer();

        let chain: OptionChain = self
            .http
            .get_json(|client| {
                client
                    .get(&url)
                    .header("Authorization", &auth)
                    .header("Accept", "application/json")
                    .query(&[
                        ("symbol", symbol),
                        ("expiration", expiration.as_str()),
                        ("greeks", "false"),
                    ])
            })
            .await?;

        debug!(
            "Option chain {} {}: {} quotes",
            symbol,
            expiration,
            chain.quotes().len()
        );
        Ok(chain)
    }
}

#[async_trait]
impl OrderGateway for TradierClient {
    async fn submit_order(
        &self,
        underlying: &str,
        contract_symbol: &str,
        side: OrderSide,
    ) -> BrokerResult<OrderAck> {
        if self.account_id.is_empty() {
            return Err(BrokerError::MissingCredentials("TRADIER_ACCOUNT_ID"));
        }

        let url = format!("{}/accounts/{}/orders", self.base_url, self.account_id);
        let quantity = self.quantity.to_string();
        let params = [
            ("class", "option"),
            ("symbol", underlying),
            ("option_symbol", contract_symbol),
            ("side", side.as_str()),
            ("quantity", quantity.as_str()),
            ("type", "market"),
            ("duration", "gtc"),
        ];

        let request = self
            .http
            .http()
            .post(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/json")
            .form(&params);

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(BrokerError::Api { status, message }) => {
                warn!("Order {} {} rejected ({}): {}", side, contract_symbol, status, message);
                return Err(BrokerError::OrderRejected {
                    code: status,
                    message,
                });
            }
            Err(e) => return Err(e),
        };

        let status = response.status().as_u16();
        let body: OrderResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Parse(e.to_string()))?;

        // Validation failures can come back as 200 with an `errors` object
        if let Some(errors) = body.errors {
            return Err(BrokerError::OrderRejected {
                code: status,
                message: errors.to_string(),
            });
        }

        let order = body
            .order
            .ok_or_else(|| BrokerError::Parse("order response missing `order`".to_string()))?;
        let order_id = match order.id {
            Value::String(s) => s,
            other => other.to_string(),
        };

        info!(
            "Order submitted: {} {} x{} (id {})",
            side, contract_symbol, self.quantity, order_id
        );
        Ok(OrderAck {
            order_id,
            status: order.status.unwrap_or_else(|| "ok".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_rejected() {
        let err = TradierClient::new(SANDBOX_URL, "acct", "").err().unwrap();
        assert!(matches!(err, BrokerError::MissingCredentials("TRADIER_ACCESS_TOKEN")));
    }

    #[test]
    fn test_order_response_shapes() {
        let ok: OrderResponse =
            serde_json::from_str(r#"{"order":{"id":257459,"status":"ok"}}"#).unwrap();
        assert_eq!(ok.order.unwrap().id, Value::from(257459));

        let rejected: OrderResponse =
            serde_json::from_str(r#"{"errors":{"error":["Invalid option symbol"]}}"#).unwrap();
        assert!(rejected.order.is_none());
        assert!(rejected.errors.is_some());
    }
}
