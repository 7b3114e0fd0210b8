//! Shared HTTP plumbing for the REST adapters
//!
//! Every request goes through the circuit breaker. Reads can be retried with
//! exponential backoff; writes are sent exactly once.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{BrokerError, BrokerResult};
use crate::common::{CircuitBreaker, CircuitBreakerConfig};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_retries: u32,
    pub timeout: Duration,
    pub retry_backoff: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

pub(crate) struct GuardedClient {
    client: Client,
    config: ClientConfig,
    circuit_breaker: Mutex<CircuitBreaker>,
}

impl GuardedClient {
    pub fn new(config: ClientConfig) -> BrokerResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let circuit_breaker = Mutex::new(CircuitBreaker::new(config.circuit_breaker.clone()));

        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Single attempt. Non-2xx responses become `BrokerError::Api`.
    pub async fn send(&self, request: RequestBuilder) -> BrokerResult<Response> {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(BrokerError::CircuitBreakerOpen);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.circuit_breaker.lock().await.record_failure();
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            self.circuit_breaker.lock().await.record_success();
            return Ok(response);
        }

        let err = BrokerError::Api {
            status: status.as_u16(),
            message: response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string()),
        };

        // 4xx means the request was bad, not that the endpoint is down
        let mut cb = self.circuit_breaker.lock().await;
        if err.is_retryable() {
            cb.record_failure();
        } else {
            cb.record_success();
        }
        Err(err)
    }

    /// GET with retries; `build` is called once per attempt
    pub async fn get_json<T, F>(&self, build: F) -> BrokerResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let result = match self.send(build(&self.client)).await {
                Ok(response) => response
                    .json::<T>()
                    .await
                    .map_err(|e| BrokerError::Parse(e.to_string())),
                Err(e) => Err(e),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        "Request failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.config.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => {
                    if other.is_ok() && attempt > 0 {
                        debug!("Request succeeded after {} retries", attempt);
                    }
                    return other;
                }
            }
        }
    }
}
