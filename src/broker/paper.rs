//! Paper order gateway: accepts every order without touching a brokerage

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use super::error::BrokerResult;
use super::OrderGateway;
use crate::types::{OrderAck, OrderSide};

/// Order recorded by the paper gateway
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub order_id: String,
    pub underlying: String,
    pub contract_symbol: String,
    pub side: OrderSide,
}

#[derive(Default)]
pub struct PaperOrderGateway {
    next_id: AtomicU64,
    orders: Mutex<Vec<PaperOrder>>,
}

impl PaperOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.orders.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OrderGateway for PaperOrderGateway {
    async fn submit_order(
        &self,
        underlying: &str,
        contract_symbol: &str,
        side: OrderSide,
    ) -> BrokerResult<OrderAck> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("PAPER-{}", id);

        info!("[PAPER] {} {} ({})", side, contract_symbol, order_id);

        if let Ok(mut orders) = self.orders.lock() {
            orders.push(PaperOrder {
                order_id: order_id.clone(),
                underlying: underlying.to_string(),
                contract_symbol: contract_symbol.to_string(),
                side,
            });
        }

        Ok(OrderAck {
            order_id,
            status: "ok".to_string(),
        })
    }
}
