/// Position Manager: holds every open position and the append-only trade
/// log, advances the exit state machine on each tick, and writes through to
/// disk after every state transition (spec §4.10).
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::persistence::{append_line, read_atomic, write_atomic, DataPaths};
use crate::types::{ExitReason, InstrumentKey, OptionType, Position, PositionStatus, RiskState, Trade};

pub struct PositionManager {
    open_positions: Vec<Position>,
    data_paths: DataPaths,
    trailing_activation_pct: f64,
    trailing_lock_fraction: f64,
    trail_offset: f64,
    square_off_window_min: i64,
}

impl PositionManager {
    pub fn new(config: &Config) -> Self {
        PositionManager {
            open_positions: Vec::new(),
            data_paths: DataPaths::new(config.data_dir.clone()),
            trailing_activation_pct: config.trailing_activation_pct,
            trailing_lock_fraction: config.trailing_lock_fraction,
            trail_offset: config.trail_offset,
            square_off_window_min: config.square_off_window_min,
        }
    }

    /// Loads the previously persisted open-position list. The caller must
    /// still request a fresh quote per instrument and call [`Self::update_price`]
    /// on every loaded position before accepting further ticks (spec §4.10
    /// reconciliation-on-startup).
    pub async fn load_from_disk(&mut self) -> Result<()> {
        if let Some(positions) = read_atomic::<Vec<Position>>(&self.data_paths.positions_journal()).await? {
            let open_count = positions.iter().filter(|p| p.status == PositionStatus::Open).count();
            info!("reconciling {open_count} open position(s) from disk");
            self.open_positions = positions;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        write_atomic(&self.data_paths.positions_journal(), &self.open_positions).await
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open_positions
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &mut self,
        id: String,
        option_type: OptionType,
        instrument_key: InstrumentKey,
        strike: f64,
        qty: i32,
        entry_price: f64,
        stop_loss: f64,
        target: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let position = Position {
            id,
            option_type,
            instrument_key,
            strike,
            entry_ts: now,
            entry_price,
            qty,
            stop_loss,
            target,
            trailing_sl: None,
            trailing_active: false,
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            exit_ts: None,
            realised_pnl: None,
            last_price: entry_price,
            high_since_entry: entry_price,
            low_since_entry: entry_price,
        };
        self.open_positions.push(position);
        self.persist().await
    }

    /// Updates the last-seen premium for every open position on this
    /// instrument, and ratchets the trailing stop. Does not itself close
    /// positions; call [`Self::evaluate_exits`] for that.
    pub fn update_price(&mut self, instrument_key: &str, price: f64) {
        for position in self.open_positions.iter_mut() {
            if position.status != PositionStatus::Open || position.instrument_key != instrument_key {
                continue;
            }
            position.last_price = price;
            position.high_since_entry = position.high_since_entry.max(price);
            position.low_since_entry = position.low_since_entry.min(price);

            if !position.trailing_active && position.unrealised_pnl_pct() >= self.trailing_activation_pct {
                position.trailing_active = true;
                position.trailing_sl =
                    Some(position.entry_price + (price - position.entry_price) * self.trailing_lock_fraction);
            }
            if position.trailing_active {
                let candidate = price - self.trail_offset;
                position.trailing_sl = Some(match position.trailing_sl {
                    Some(existing) => existing.max(candidate),
                    None => candidate,
                });
            }
        }
    }

    /// Determines which open positions must exit right now, in priority
    /// order stop > target > trail > EOD. Does not mutate state; the
    /// caller passes the result to [`Self::close_position`].
    pub fn evaluate_exits(&self, now: DateTime<Utc>, session_end: DateTime<Utc>) -> Vec<(String, ExitReason, f64)> {
        let eod_cutoff = session_end - chrono::Duration::minutes(self.square_off_window_min);
        let mut exits = Vec::new();

        for position in self.open_positions.iter().filter(|p| p.status == PositionStatus::Open) {
            let trail_hit = position.trailing_active
                && position.trailing_sl.map_or(false, |sl| position.last_price <= sl);

            if position.last_price <= position.stop_loss {
                exits.push((position.id.clone(), ExitReason::Stop, position.stop_loss));
            } else if position.last_price >= position.target {
                exits.push((position.id.clone(), ExitReason::Target, position.last_price));
            } else if trail_hit {
                exits.push((position.id.clone(), ExitReason::Trail, position.trailing_sl.unwrap()));
            } else if now >= eod_cutoff {
                exits.push((position.id.clone(), ExitReason::EodSquareOff, position.last_price));
            }
        }

        exits
    }

    /// Closes one position at `exit_price`, appends the trade to the
    /// journal, persists the open-position list, and reports the realised
    /// P&L so the caller can update [`RiskState`].
    pub async fn close_position(
        &mut self,
        id: &str,
        exit_price: f64,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
        risk_state: &mut RiskState,
    ) -> Result<Trade> {
        let position = self
            .open_positions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| crate::error::TradingError::PositionNotFound(id.to_string()))?;

        let realised_pnl = (exit_price - position.entry_price) * position.qty as f64;
        position.status = PositionStatus::Closed;
        position.exit_reason = Some(exit_reason);
        position.exit_price = Some(exit_price);
        position.exit_ts = Some(now);
        position.realised_pnl = Some(realised_pnl);

        let trade = Trade {
            trade_id: uuid::Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            instrument_key: position.instrument_key.clone(),
            option_type: position.option_type,
            strike: position.strike,
            qty: position.qty,
            entry_ts: position.entry_ts,
            entry_price: position.entry_price,
            exit_ts: now,
            exit_price,
            exit_reason,
            realised_pnl,
        };

        append_line(&self.data_paths.trade_history(), &trade).await?;
        self.persist().await?;

        risk_state.daily_pnl += realised_pnl;
        if risk_state.daily_pnl <= -risk_state.daily_loss_limit {
            warn!("daily loss limit breached ({:.2}); disabling further entries", risk_state.daily_pnl);
            risk_state.trading_allowed = false;
        }

        Ok(trade)
    }

    pub async fn close_all_at_market(
        &mut self,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
        risk_state: &mut RiskState,
    ) -> Result<Vec<Trade>> {
        let ids: Vec<(String, f64)> = self
            .open_positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .map(|p| (p.id.clone(), p.last_price))
            .collect();

        let mut trades = Vec::with_capacity(ids.len());
        for (id, last_price) in ids {
            trades.push(self.close_position(&id, last_price, exit_reason, now, risk_state).await?);
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    fn risk_state() -> RiskState {
        RiskState {
            initial_capital: 1_000_000.0,
            current_balance: 1_000_000.0,
            daily_pnl: 0.0,
            daily_loss_limit: 5_000.0,
            max_concurrent_positions: 3,
            risk_per_trade_pct: 2.0,
            trading_allowed: true,
            session_start: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stop_loss_breach_is_detected() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p1".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 84.0, 192.0, Utc::now())
            .await
            .unwrap();
        manager.update_price("NIFTY|25000|CE", 80.0);
        let exits = manager.evaluate_exits(Utc::now(), Utc::now() + chrono::Duration::hours(2));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, ExitReason::Stop);
    }

    #[tokio::test]
    async fn trailing_stop_activates_and_never_relaxes() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p2".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 70.0, 160.0, Utc::now())
            .await
            .unwrap();
        manager.update_price("NIFTY|25000|CE", 125.0); // 25% up: activates trailing
        let sl_1 = manager.open_positions()[0].trailing_sl.unwrap();
        manager.update_price("NIFTY|25000|CE", 140.0);
        let sl_2 = manager.open_positions()[0].trailing_sl.unwrap();
        assert!(sl_2 >= sl_1);
        manager.update_price("NIFTY|25000|CE", 130.0); // retrace: must not relax
        let sl_3 = manager.open_positions()[0].trailing_sl.unwrap();
        assert_eq!(sl_3, sl_2);
    }

    #[tokio::test]
    async fn trail_exit_fills_at_the_trailing_stop_level_not_the_tick() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p4".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 70.0, 160.0, Utc::now())
            .await
            .unwrap();
        manager.update_price("NIFTY|25000|CE", 120.0); // activates trailing, trailingSL=110
        manager.update_price("NIFTY|25000|CE", 135.0); // trailingSL=125
        manager.update_price("NIFTY|25000|CE", 150.0); // trailingSL=140
        manager.update_price("NIFTY|25000|CE", 110.0); // gaps straight through trailingSL
        let exits = manager.evaluate_exits(Utc::now(), Utc::now() + chrono::Duration::hours(2));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, ExitReason::Trail);
        assert!((exits[0].2 - 140.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stop_exit_fills_at_the_stop_loss_level_not_the_tick() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p5".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 84.0, 192.0, Utc::now())
            .await
            .unwrap();
        manager.update_price("NIFTY|25000|CE", 50.0); // gaps straight through stop loss
        let exits = manager.evaluate_exits(Utc::now(), Utc::now() + chrono::Duration::hours(2));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, ExitReason::Stop);
        assert!((exits[0].2 - 84.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn eod_square_off_still_fires_once_trailing_has_activated() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p6".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 70.0, 160.0, Utc::now())
            .await
            .unwrap();
        manager.update_price("NIFTY|25000|CE", 125.0); // activates trailing, price pulls back but stays above trailingSL
        manager.update_price("NIFTY|25000|CE", 122.0);
        let now = Utc::now();
        let session_end = now; // now >= session_end - squareOffWindow for any positive window
        let exits = manager.evaluate_exits(now, session_end);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].1, ExitReason::EodSquareOff);
    }

    #[tokio::test]
    async fn closing_updates_daily_pnl_and_trips_loss_limit() {
        let mut manager = PositionManager::new(&config());
        manager
            .open_position("p3".into(), OptionType::CE, "NIFTY|25000|CE".into(), 25000.0, 50, 100.0, 70.0, 160.0, Utc::now())
            .await
            .unwrap();
        let mut risk = risk_state();
        risk.daily_loss_limit = 1000.0;
        let trade = manager.close_position("p3", 80.0, ExitReason::Stop, Utc::now(), &mut risk).await.unwrap();
        assert_eq!(trade.realised_pnl, -1000.0);
        assert!(!risk.trading_allowed);
    }
}
