/// Order Manager: one `submit()` contract shared by the Paper and Live
/// back-ends (spec §4.9). Submissions are deduplicated by idempotency
/// token within a 60s window so a caller retry never double-fills.
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::broker::LiveBrokerAdapter;
use crate::error::Result;
use crate::persistence::{read_atomic, write_atomic};
use crate::types::{Ack, Mode, Order, OrderKind, OrderStatus, Side};

const IDEMPOTENCY_WINDOW_SECONDS: i64 = 60;
const LIVE_FILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-local cash ledger for the Paper backend, persisted to disk on
/// every change.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaperLedger {
    pub cash: f64,
}

impl PaperLedger {
    pub fn new(initial_capital: f64) -> Self {
        PaperLedger { cash: initial_capital }
    }

    pub async fn load_or_new(path: &std::path::Path, initial_capital: f64) -> Result<Self> {
        match read_atomic::<PaperLedger>(path).await? {
            Some(ledger) => Ok(ledger),
            None => Ok(PaperLedger::new(initial_capital)),
        }
    }

    fn apply_fill(&mut self, side: Side, qty: i32, fill_price: f64) {
        let notional = qty as f64 * fill_price;
        match side {
            Side::Buy => self.cash -= notional,
            Side::Sell => self.cash += notional,
        }
    }
}

struct CachedAck {
    ack: Ack,
    recorded_at: DateTime<Utc>,
}

pub struct OrderManager {
    mode: Mode,
    slippage_pct: f64,
    paper_ledger: PaperLedger,
    paper_ledger_path: PathBuf,
    live_adapter: Option<Box<dyn LiveBrokerAdapter>>,
    idempotency_cache: HashMap<String, CachedAck>,
}

impl OrderManager {
    pub fn new(
        mode: Mode,
        slippage_pct: f64,
        paper_ledger: PaperLedger,
        paper_ledger_path: PathBuf,
        live_adapter: Option<Box<dyn LiveBrokerAdapter>>,
    ) -> Self {
        OrderManager {
            mode,
            slippage_pct,
            paper_ledger,
            paper_ledger_path,
            live_adapter,
            idempotency_cache: HashMap::new(),
        }
    }

    fn cached_ack(&self, token: &str, now: DateTime<Utc>) -> Option<Ack> {
        self.idempotency_cache.get(token).and_then(|cached| {
            if (now - cached.recorded_at).num_seconds() < IDEMPOTENCY_WINDOW_SECONDS {
                Some(cached.ack.clone())
            } else {
                None
            }
        })
    }

    fn remember(&mut self, token: String, ack: Ack, now: DateTime<Utc>) {
        self.idempotency_cache.insert(token, CachedAck { ack, recorded_at: now });
        self.idempotency_cache
            .retain(|_, cached| (now - cached.recorded_at).num_seconds() < IDEMPOTENCY_WINDOW_SECONDS);
    }

    async fn submit_paper(&mut self, order: &Order, market_price: f64) -> Result<Ack> {
        let fill_price = match order.side {
            Side::Buy => market_price * (1.0 + self.slippage_pct),
            Side::Sell => market_price * (1.0 - self.slippage_pct),
        };
        self.paper_ledger.apply_fill(order.side, order.qty, fill_price);
        write_atomic(&self.paper_ledger_path, &self.paper_ledger).await?;

        Ok(Ack {
            order_id: format!("PAPER_{}", uuid::Uuid::new_v4()),
            fill_price,
            fill_ts: Utc::now(),
            status: OrderStatus::Filled,
        })
    }

    async fn submit_live(&self, order: &Order) -> Result<Ack> {
        let adapter = self
            .live_adapter
            .as_ref()
            .expect("live mode requires a configured broker adapter");

        match tokio::time::timeout(LIVE_FILL_TIMEOUT, adapter.submit(order)).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(e)) => {
                error!("live order submission failed: {e}");
                Err(e)
            }
            Err(_) => {
                warn!(
                    "order {} did not reach a terminal state within {:?}; flagging UNKNOWN",
                    order.idempotency_token, LIVE_FILL_TIMEOUT
                );
                Ok(Ack {
                    order_id: format!("UNKNOWN_{}", order.idempotency_token),
                    fill_price: f64::NAN,
                    fill_ts: Utc::now(),
                    status: OrderStatus::Unknown,
                })
            }
        }
    }

    /// Submits an order, deduplicating on `order.idempotency_token` within a
    /// 60s window. `market_price` is only consulted by the Paper backend.
    pub async fn submit(&mut self, order: &Order, market_price: f64, now: DateTime<Utc>) -> Result<Ack> {
        if let Some(cached) = self.cached_ack(&order.idempotency_token, now) {
            return Ok(cached);
        }

        let ack = match self.mode {
            Mode::Paper => self.submit_paper(order, market_price).await?,
            Mode::Live => self.submit_live(order).await?,
        };

        self.remember(order.idempotency_token.clone(), ack.clone(), now);
        Ok(ack)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn paper_cash(&self) -> f64 {
        self.paper_ledger.cash
    }

    pub fn add_funds(&mut self, amount: f64) {
        self.paper_ledger.cash += amount;
    }
}

#[cfg(test)]
fn market_order(instrument_key: &str, side: Side, qty: i32, token: &str) -> Order {
    Order {
        instrument_key: instrument_key.to_string(),
        side,
        kind: OrderKind::Market,
        qty,
        limit_price: None,
        idempotency_token: token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::FakeBrokerAdapter;

    fn paper_manager() -> OrderManager {
        OrderManager::new(
            Mode::Paper,
            0.001,
            PaperLedger::new(1_000_000.0),
            std::env::temp_dir().join(format!("paper_ledger_test_{}.json", uuid::Uuid::new_v4())),
            None,
        )
    }

    #[tokio::test]
    async fn paper_fill_applies_slippage_in_the_buyers_favour() {
        let mut manager = paper_manager();
        let order = market_order("NIFTY|25000|CE", Side::Buy, 50, "tok-1");
        let ack = manager.submit(&order, 100.0, Utc::now()).await.unwrap();
        assert!(ack.fill_price > 100.0);
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn duplicate_token_within_window_returns_cached_ack() {
        let mut manager = paper_manager();
        let order = market_order("NIFTY|25000|CE", Side::Buy, 50, "tok-2");
        let now = Utc::now();
        let first = manager.submit(&order, 100.0, now).await.unwrap();
        let second = manager.submit(&order, 999.0, now + chrono::Duration::seconds(10)).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.fill_price, second.fill_price);
    }

    #[tokio::test]
    async fn duplicate_token_after_window_resubmits() {
        let mut manager = paper_manager();
        let order = market_order("NIFTY|25000|CE", Side::Buy, 50, "tok-3");
        let now = Utc::now();
        let first = manager.submit(&order, 100.0, now).await.unwrap();
        let second = manager
            .submit(&order, 100.0, now + chrono::Duration::seconds(61))
            .await
            .unwrap();
        assert_ne!(first.order_id, second.order_id);
    }

    #[tokio::test]
    async fn live_backend_delegates_to_adapter() {
        let adapter = FakeBrokerAdapter::new(123.0, OrderStatus::Filled);
        let mut manager = OrderManager::new(
            Mode::Live,
            0.0,
            PaperLedger::new(0.0),
            std::env::temp_dir().join("unused_ledger.json"),
            Some(Box::new(adapter)),
        );
        let order = market_order("NIFTY|25000|CE", Side::Buy, 50, "tok-4");
        let ack = manager.submit(&order, 0.0, Utc::now()).await.unwrap();
        assert_eq!(ack.fill_price, 123.0);
        assert_eq!(ack.status, OrderStatus::Filled);
    }
}
