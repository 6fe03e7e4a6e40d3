/// Live order execution adapter. Authentication and token refresh are an
/// external collaborator's concern (spec §1); this module only submits
/// orders and parses acknowledgements over an already-authenticated bearer
/// credential.
use std::future::Future;
use std::pin::Pin;

use crate::error::{Result, TradingError};
use crate::types::{Ack, Order, OrderStatus};
use crate::utils::RateLimiter;

/// Conservative ceiling on order-placement calls to the broker's REST
/// endpoint; exceeding it server-side is what the spec's "rate-limit
/// responses" (§7) describe, so the client throttles itself first.
const ORDER_ENDPOINT_REQUESTS_PER_SECOND: u32 = 10;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Contract a live order backend must satisfy. A real deployment implements
/// this against the broker's order-placement API; tests use an in-memory
/// stand-in. Hand-boxed rather than using an async-fn-in-trait so the Order
/// Manager can hold it as `Box<dyn LiveBrokerAdapter>`.
pub trait LiveBrokerAdapter: Send + Sync {
    fn submit<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<Ack>>;
}

#[derive(serde::Serialize)]
struct OrderRequest<'a> {
    instrument_key: &'a str,
    side: &'a str,
    order_type: &'a str,
    quantity: i32,
    limit_price: Option<f64>,
    client_order_id: &'a str,
}

#[derive(serde::Deserialize)]
struct OrderResponse {
    order_id: String,
    fill_price: f64,
    status: String,
}

/// HTTP adapter over the broker's REST order API.
pub struct HttpBrokerAdapter {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    order_endpoint_limiter: RateLimiter,
}

impl HttpBrokerAdapter {
    pub fn new(base_url: String, bearer_token: String) -> Self {
        HttpBrokerAdapter {
            client: reqwest::Client::new(),
            base_url,
            bearer_token,
            order_endpoint_limiter: RateLimiter::new(ORDER_ENDPOINT_REQUESTS_PER_SECOND),
        }
    }

    async fn submit_impl(&self, order: &Order) -> Result<Ack> {
        if !self.order_endpoint_limiter.try_acquire().await {
            return Err(TradingError::RateLimitExceeded(
                "order-placement endpoint throttled; backing off".to_string(),
            ));
        }

        let body = OrderRequest {
            instrument_key: &order.instrument_key,
            side: match order.side {
                crate::types::Side::Buy => "BUY",
                crate::types::Side::Sell => "SELL",
            },
            order_type: match order.kind {
                crate::types::OrderKind::Market => "MARKET",
                crate::types::OrderKind::Limit => "LIMIT",
            },
            quantity: order.qty,
            limit_price: order.limit_price,
            client_order_id: &order.idempotency_token,
        };

        let response = self
            .client
            .post(format!("{}/place", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TradingError::RateLimitExceeded(
                "broker order endpoint returned 429".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(TradingError::OrderPlacementFailed(format!(
                "broker responded with status {}",
                response.status()
            )));
        }

        let parsed: OrderResponse = response.json().await?;
        let status = match parsed.status.as_str() {
            "FILLED" => OrderStatus::Filled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Unknown,
        };

        Ok(Ack {
            order_id: parsed.order_id,
            fill_price: parsed.fill_price,
            fill_ts: chrono::Utc::now(),
            status,
        })
    }
}

impl LiveBrokerAdapter for HttpBrokerAdapter {
    fn submit<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<Ack>> {
        Box::pin(self.submit_impl(order))
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory adapter returning a fixed fill, for order-manager tests.
    pub struct FakeBrokerAdapter {
        pub fill_price: f64,
        pub status: OrderStatus,
        pub calls: AtomicUsize,
    }

    impl FakeBrokerAdapter {
        pub fn new(fill_price: f64, status: OrderStatus) -> Self {
            FakeBrokerAdapter { fill_price, status, calls: AtomicUsize::new(0) }
        }
    }

    impl LiveBrokerAdapter for FakeBrokerAdapter {
        fn submit<'a>(&'a self, order: &'a Order) -> BoxFuture<'a, Result<Ack>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ack = Ack {
                order_id: format!("FAKE_{}", order.idempotency_token),
                fill_price: self.fill_price,
                fill_ts: chrono::Utc::now(),
                status: self.status,
            };
            Box::pin(async move { Ok(ack) })
        }
    }
}
