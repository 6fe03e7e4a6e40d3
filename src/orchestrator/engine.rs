/// Orchestrator engine: owns every component, routes ticks through
/// per-instrument lanes fed by bounded queues, and drives the periodic
/// sweep/snapshot/registry-refresh cycle (spec §5). Trading is scoped to a
/// single index/symbol; multi-symbol trading is an explicit non-goal.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::broker::{HttpBrokerAdapter, LiveBrokerAdapter};
use crate::candles::CandleManager;
use crate::config::Config;
use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, EventType};
use crate::feed::{FeedClient, FeedMessage, FeedMode};
use crate::greeks::GreeksEngine;
use crate::indicators::IndicatorStack;
use crate::orders::{OrderManager, PaperLedger};
use crate::pcr::PcrAggregator;
use crate::persistence::DataPaths;
use crate::positions::PositionManager;
use crate::registry::{InstrumentRegistry, RegistryData};
use crate::risk::RiskGate;
use crate::signal::{SignalEngine, SignalInputs};
use crate::time::get_market_timings;
use crate::types::*;
use crate::utils::generate_idempotency_key;

const INDEX_KEY: &str = "NSE_INDEX|Nifty 50";
const SYMBOL: &str = "NIFTY";
const SUPERTREND_PERIOD: usize = 10;
const SUPERTREND_MULTIPLIER: f64 = 3.0;

const TICK_QUEUE_CAPACITY: usize = 10_000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
const REGISTRY_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Mutable, frequently-read state that doesn't belong to any one component:
/// the last observed spot, the last emitted signal/PCR/Greeks, and auth
/// health. Held behind its own lock so a snapshot read never blocks on the
/// candle/indicator pipeline.
struct LatestState {
    spot: f64,
    signal: Signal,
    pcr: Option<PcrState>,
    greeks: Option<GreeksSnapshot>,
    auth: AuthState,
}

impl LatestState {
    fn new(authenticated: bool) -> Self {
        LatestState {
            spot: 0.0,
            signal: Signal {
                kind: SignalKind::Hold,
                reason: "no evaluation yet".to_string(),
                filters: FilterResults::default(),
                reasoning: Vec::new(),
                confidence: 0.0,
                issued_at: Utc::now(),
            },
            pcr: None,
            greeks: None,
            auth: AuthState {
                authenticated,
                token_remaining_seconds: None,
                error_message: None,
            },
        }
    }
}

pub struct Orchestrator {
    config: Config,
    event_bus: Arc<EventBus>,
    registry: Arc<InstrumentRegistry>,

    candle: Mutex<CandleManager>,
    indicators: Mutex<IndicatorStack>,
    signal_engine: Mutex<SignalEngine>,
    greeks_engine: Mutex<GreeksEngine>,
    pcr: Mutex<PcrAggregator>,
    option_cache: Mutex<HashMap<InstrumentKey, OptionContractState>>,
    current_atm: Mutex<Option<f64>>,

    risk_gate: RiskGate,
    risk_state: Mutex<RiskState>,
    order_manager: Mutex<OrderManager>,
    position_manager: Mutex<PositionManager>,

    latest: Mutex<LatestState>,

    snapshot_tx: watch::Sender<Snapshot>,
    shutdown_tx: broadcast::Sender<()>,
    resubscribe: Notify,
}

impl Orchestrator {
    /// Builds every component, reconciling open positions and the paper
    /// ledger from disk and taking one best-effort instrument master
    /// refresh before the first tick is ever routed.
    pub async fn new(config: Config) -> Result<Self> {
        let data_paths = DataPaths::new(config.data_dir.clone());
        let event_log_path = data_paths.root.join("events.jsonl").to_string_lossy().into_owned();
        let event_bus = Arc::new(EventBus::new(event_log_path));
        event_bus.start_processing().await;
        event_bus
            .publish(Event::new(
                EventType::ConfigLoaded,
                EventPayload::ConfigLoaded { data_dir: config.data_dir.clone() },
            ))
            .await
            .ok();

        let registry = Arc::new(InstrumentRegistry::new(config.instrument_master_url.clone()));
        match registry.refresh().await {
            Ok(()) => {
                let count = registry.current().await.by_key.len();
                event_bus
                    .publish(Event::new(
                        EventType::RegistryRefreshed,
                        EventPayload::RegistryRefreshed { instrument_count: count },
                    ))
                    .await
                    .ok();
            }
            Err(e) => warn!("initial instrument registry refresh failed, starting empty: {e}"),
        }

        let paper_ledger = PaperLedger::load_or_new(&data_paths.paper_ledger(), config.initial_capital).await?;
        let live_adapter: Option<Box<dyn LiveBrokerAdapter>> = if config.broker_bearer_token.is_empty() {
            None
        } else {
            Some(Box::new(HttpBrokerAdapter::new(
                config.order_submit_url.clone(),
                config.broker_bearer_token.clone(),
            )))
        };
        let order_manager = OrderManager::new(
            Mode::Paper,
            config.paper_slippage_pct,
            paper_ledger,
            data_paths.paper_ledger(),
            live_adapter,
        );

        let mut position_manager = PositionManager::new(&config);
        position_manager.load_from_disk().await?;

        let risk_state = RiskState {
            initial_capital: config.initial_capital,
            current_balance: config.initial_capital,
            daily_pnl: 0.0,
            daily_loss_limit: config.initial_capital * config.daily_loss_limit_pct / 100.0,
            max_concurrent_positions: config.max_concurrent_positions,
            risk_per_trade_pct: config.risk_per_trade_pct,
            trading_allowed: true,
            session_start: Utc::now(),
        };

        let authenticated = !config.broker_bearer_token.is_empty();
        let (snapshot_tx, _) = watch::channel(empty_snapshot(&risk_state, authenticated));
        let (shutdown_tx, _) = broadcast::channel(8);
        let risk_gate = RiskGate::new(&config);

        Ok(Orchestrator {
            event_bus,
            registry,
            candle: Mutex::new(CandleManager::new(config.timeframe_minutes)),
            indicators: Mutex::new(IndicatorStack::new(SUPERTREND_PERIOD, SUPERTREND_MULTIPLIER)),
            signal_engine: Mutex::new(SignalEngine::new(config.signal_cooldown_sec)),
            greeks_engine: Mutex::new(GreeksEngine::new(config.risk_free_rate)),
            pcr: Mutex::new(PcrAggregator::new()),
            option_cache: Mutex::new(HashMap::new()),
            current_atm: Mutex::new(None),
            risk_gate,
            risk_state: Mutex::new(risk_state),
            order_manager: Mutex::new(order_manager),
            position_manager: Mutex::new(position_manager),
            latest: Mutex::new(LatestState::new(authenticated)),
            snapshot_tx,
            shutdown_tx,
            resubscribe: Notify::new(),
            config,
        })
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Signals every spawned task to stop. Does not itself wait for them;
    /// the caller holding the [`Self::run`] join handle bounds the drain.
    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown");
        self.event_bus
            .publish(Event::new(EventType::ShutdownInitiated, EventPayload::ShutdownInitiated))
            .await
            .ok();
        let _ = self.shutdown_tx.send(());
    }

    /// Spawns the feed supervisor, router, per-lane workers, and the
    /// periodic sweep/snapshot/registry tasks, and blocks until every one
    /// of them has observed a shutdown signal and returned.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (feed_tx, feed_rx) = mpsc::channel::<FeedMessage>(TICK_QUEUE_CAPACITY);
        let (index_tx, index_rx) = mpsc::channel::<Tick>(TICK_QUEUE_CAPACITY);
        let (option_tx, option_rx) = mpsc::channel::<Tick>(TICK_QUEUE_CAPACITY);

        let feed_task = tokio::spawn(Arc::clone(&self).run_feed_supervisor(feed_tx, self.shutdown_tx.subscribe()));
        let router_task = tokio::spawn(Arc::clone(&self).route_messages(
            feed_rx,
            index_tx,
            option_tx,
            self.shutdown_tx.subscribe(),
        ));
        let index_task = tokio::spawn(Arc::clone(&self).index_lane(index_rx, self.shutdown_tx.subscribe()));
        let option_task = tokio::spawn(Arc::clone(&self).option_lane(option_rx, self.shutdown_tx.subscribe()));
        let sweep_task = tokio::spawn(Arc::clone(&self).sweep_loop(self.shutdown_tx.subscribe()));
        let snapshot_task = tokio::spawn(Arc::clone(&self).snapshot_loop(self.shutdown_tx.subscribe()));
        let registry_task = tokio::spawn(Arc::clone(&self).registry_refresh_loop(self.shutdown_tx.subscribe()));

        let _ = tokio::join!(
            feed_task,
            router_task,
            index_task,
            option_task,
            sweep_task,
            snapshot_task,
            registry_task,
        );
        Ok(())
    }

    /// Resolves the current subscribe list: the index plus the PCR window
    /// around the last known ATM strike for the nearest expiry. Falls back
    /// to the index alone until a first spot price has been observed.
    async fn desired_subscribe_keys(&self) -> Vec<String> {
        let mut keys = vec![INDEX_KEY.to_string()];
        let spot = self.latest.lock().await.spot;
        if spot <= 0.0 {
            return keys;
        }
        let data = self.registry.current().await;
        let today = Utc::now().date_naive();
        if let Some(expiry) = data.nearest_expiry(SYMBOL, today) {
            let atm = Instrument::atm_strike(spot, self.config.strike_step);
            keys.extend(data.pcr_window(SYMBOL, expiry, atm, self.config.pcr_range));
        }
        keys
    }

    /// Restarts the feed session whenever the subscribed ATM window changes
    /// or the prior session ends; never returns except on shutdown.
    /// `FeedClient::run` owns reconnect/backoff internally and otherwise
    /// loops forever, so a return from it is treated as a restart signal.
    async fn run_feed_supervisor(
        self: Arc<Self>,
        tx: mpsc::Sender<FeedMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let feed_client = FeedClient::new(self.config.feed_ws_url.clone(), self.config.broker_bearer_token.clone());

        loop {
            let keys = self.desired_subscribe_keys().await;
            info!("feed supervisor starting session with {} subscribed instrument(s)", keys.len());

            let run_fut = feed_client.run(keys, FeedMode::Full, tx.clone());
            tokio::pin!(run_fut);

            tokio::select! {
                res = &mut run_fut => {
                    if let Err(e) = res {
                        error!("feed session ended: {e}");
                    }
                }
                _ = self.resubscribe.notified() => {
                    info!("resubscribing: ATM window or expiry changed");
                }
                _ = shutdown_rx.recv() => {
                    info!("feed supervisor shutting down");
                    return;
                }
            }
        }
    }

    /// Splits decoded feed messages onto the index or option lane by
    /// instrument key, so slow downstream work on one lane never blocks
    /// ingestion for the other.
    async fn route_messages(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<FeedMessage>,
        index_tx: mpsc::Sender<Tick>,
        option_tx: mpsc::Sender<Tick>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(FeedMessage::Ticks(ticks)) => {
                            for tick in ticks {
                                let send = if tick.instrument == INDEX_KEY { &index_tx } else { &option_tx };
                                if send.send(tick).await.is_err() {
                                    warn!("lane closed while routing tick; dropping");
                                }
                            }
                        }
                        Some(FeedMessage::MarketStatus(status)) => {
                            self.handle_market_status(status).await;
                        }
                        None => {
                            warn!("feed message channel closed");
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn handle_market_status(&self, status: crate::feed::MarketStatusEvent) {
        info!("market status update: {}", status.status);
        let mut latest = self.latest.lock().await;
        latest.auth.authenticated = true;
        latest.auth.error_message = None;
    }

    async fn index_lane(self: Arc<Self>, mut rx: mpsc::Receiver<Tick>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                tick = rx.recv() => {
                    match tick {
                        Some(tick) => self.handle_index_tick(tick).await,
                        None => return,
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn option_lane(self: Arc<Self>, mut rx: mpsc::Receiver<Tick>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                tick = rx.recv() => {
                    match tick {
                        Some(tick) => self.handle_option_tick(tick).await,
                        None => return,
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn handle_index_tick(&self, tick: Tick) {
        let now = DateTime::from_timestamp_millis(tick.ts).unwrap_or_else(Utc::now);
        self.latest.lock().await.spot = tick.ltp;

        let newly_finalised: Vec<Candle> = {
            let mut candle = self.candle.lock().await;
            let before = candle.finalised().len();
            candle.on_tick(&tick);
            let after = candle.finalised().len();
            if after > before {
                candle.last_n_finalised(after - before).into_iter().rev().cloned().collect()
            } else {
                Vec::new()
            }
        };
        if !newly_finalised.is_empty() {
            let mut indicators = self.indicators.lock().await;
            for c in &newly_finalised {
                indicators.on_finalised(c, now.date_naive());
            }
            drop(indicators);
            for c in &newly_finalised {
                self.event_bus
                    .publish(Event::new(
                        EventType::CandleFinalised,
                        EventPayload::CandleFinalised { instrument_key: INDEX_KEY.to_string(), close: c.close },
                    ))
                    .await
                    .ok();
            }
        }

        self.maybe_resubscribe_for_atm(tick.ltp).await;
        self.evaluate_and_maybe_trade(now).await;
    }

    async fn maybe_resubscribe_for_atm(&self, spot: f64) {
        if spot <= 0.0 {
            return;
        }
        let atm = Instrument::atm_strike(spot, self.config.strike_step);
        let mut current = self.current_atm.lock().await;
        if *current != Some(atm) {
            *current = Some(atm);
            drop(current);
            self.resubscribe.notify_one();
        }
    }

    async fn handle_option_tick(&self, tick: Tick) {
        let now = DateTime::from_timestamp_millis(tick.ts).unwrap_or_else(Utc::now);
        let data = self.registry.current().await;
        let Some(instrument) = data.get(&tick.instrument).cloned() else {
            return;
        };
        let (Some(option_type), Some(strike), Some(expiry)) =
            (instrument.option_type, instrument.strike, instrument.expiry)
        else {
            return;
        };

        {
            let mut cache = self.option_cache.lock().await;
            cache.insert(
                tick.instrument.clone(),
                OptionContractState {
                    instrument_key: tick.instrument.clone(),
                    strike,
                    option_type,
                    expiry,
                    last_price: tick.ltp,
                    oi: tick.oi.unwrap_or(0),
                    last_update: now,
                },
            );
        }

        if let Some(oi) = tick.oi {
            let emitted = {
                let mut pcr = self.pcr.lock().await;
                pcr.update_oi(tick.instrument.clone(), option_type, oi);
                pcr.maybe_emit(now)
            };
            if let Some(state) = emitted {
                self.event_bus
                    .publish(Event::new(EventType::PcrEmitted, EventPayload::PcrEmitted { pcr: state.pcr }))
                    .await
                    .ok();
                self.latest.lock().await.pcr = Some(state);
            }
        }

        self.position_manager.lock().await.update_price(&tick.instrument, tick.ltp);
        self.process_exits(now).await;
    }

    /// Evaluates stop/target/trail/EOD exits for every open position and
    /// closes whichever qualify, in the order [`PositionManager::evaluate_exits`]
    /// returns them.
    async fn process_exits(&self, now: DateTime<Utc>) {
        let (_, session_end) = get_market_timings(now);
        let exits = {
            let position_manager = self.position_manager.lock().await;
            position_manager.evaluate_exits(now, session_end)
        };
        if exits.is_empty() {
            return;
        }

        for (id, reason, exit_price) in exits {
            let trade = {
                let mut risk_state = self.risk_state.lock().await;
                let mut position_manager = self.position_manager.lock().await;
                position_manager.close_position(&id, exit_price, reason, now, &mut risk_state).await
            };
            match trade {
                Ok(trade) => {
                    self.event_bus
                        .publish(Event::new(
                            EventType::PositionClosed,
                            EventPayload::PositionClosed {
                                position_id: trade.position_id,
                                exit_reason: reason,
                                realised_pnl: trade.realised_pnl,
                            },
                        ))
                        .await
                        .ok();

                    let (trading_allowed, daily_pnl) = {
                        let risk_state = self.risk_state.lock().await;
                        (risk_state.trading_allowed, risk_state.daily_pnl)
                    };
                    if !trading_allowed {
                        self.event_bus
                            .publish(Event::new(
                                EventType::DailyLossLimitBreached,
                                EventPayload::DailyLossLimitBreached { daily_pnl },
                            ))
                            .await
                            .ok();
                    }
                }
                Err(e) => error!("failed to close position {id}: {e}"),
            }
        }
        self.publish_snapshot().await;
    }

    /// Finds the CE/PE pair whose strike is nearest `atm` for `expiry`.
    fn atm_pair(data: &RegistryData, expiry: NaiveDate, atm: f64) -> Option<(Instrument, Instrument)> {
        let pairs = data.options_by_symbol_expiry.get(&(SYMBOL.to_string(), expiry))?;
        let pair = pairs
            .iter()
            .min_by(|a, b| (a.strike - atm).abs().partial_cmp(&(b.strike - atm).abs()).unwrap())?;
        Some((pair.ce.clone()?, pair.pe.clone()?))
    }

    /// Recomputes Greeks if due, builds the current filter inputs from the
    /// candle/indicator/PCR/Greeks state, evaluates the signal engine, and
    /// routes a qualifying BUY through the risk gate and order manager.
    async fn evaluate_and_maybe_trade(&self, now: DateTime<Utc>) {
        let spot = self.latest.lock().await.spot;
        if spot <= 0.0 {
            return;
        }

        let data = self.registry.current().await;
        let today = now.date_naive();
        let Some(expiry) = data.nearest_expiry(SYMBOL, today) else {
            return;
        };
        let atm = Instrument::atm_strike(spot, self.config.strike_step);
        let Some((ce_instrument, pe_instrument)) = Self::atm_pair(&data, expiry, atm) else {
            return;
        };

        let (ce_price, pe_price) = {
            let cache = self.option_cache.lock().await;
            (
                cache.get(&ce_instrument.key).map(|s| s.last_price),
                cache.get(&pe_instrument.key).map(|s| s.last_price),
            )
        };

        if let (Some(ce), Some(pe)) = (ce_price, pe_price) {
            let recomputed = self.greeks_engine.lock().await.maybe_recompute(now, spot, atm, expiry, ce, pe);
            if let Some(snapshot) = recomputed {
                self.event_bus
                    .publish(Event::new(EventType::GreeksComputed, EventPayload::GreeksComputed { atm_strike: atm }))
                    .await
                    .ok();
                self.latest.lock().await.greeks = Some(snapshot);
            }
        }

        let greeks_snapshot = self.latest.lock().await.greeks.clone();
        let pcr_snapshot = self.latest.lock().await.pcr.clone();

        let (live_close, live_volume) = {
            let candle = self.candle.lock().await;
            match candle.incomplete() {
                Some(inc) => (inc.close, inc.volume),
                None => return,
            }
        };

        let inputs = {
            let indicators = self.indicators.lock().await;
            let (ema5_intra, ema20_intra) = indicators.intra_candle_emas(live_close);
            let ema5 = ema5_intra.or_else(|| indicators.ema5.value());
            let ema20 = ema20_intra.or_else(|| indicators.ema20.value());
            let ema_crossed_bullish = match (ema5, ema20) {
                (Some(a), Some(b)) => indicators.ema_crossed_bullish(a, b),
                _ => false,
            };
            let ema_crossed_bearish = match (ema5, ema20) {
                (Some(a), Some(b)) => indicators.ema_crossed_bearish(a, b),
                _ => false,
            };
            let supertrend_bullish = indicators.supertrend.bullish();
            let entry_confirmation_bullish = supertrend_bullish == Some(true) && indicators.supertrend_confirms(true);
            let entry_confirmation_bearish = supertrend_bullish == Some(false) && indicators.supertrend_confirms(false);

            SignalInputs {
                supertrend_bullish,
                ema5,
                ema20,
                ema_crossed_bullish,
                ema_crossed_bearish,
                rsi: indicators.rsi.value(),
                atr_pct: indicators.atr_pct(live_close),
                entry_confirmation_bullish,
                entry_confirmation_bearish,
                greeks: greeks_snapshot,
                pcr: pcr_snapshot,
                current_volume: Some(live_volume as f64),
                avg_volume: indicators.avg_volume(),
            }
        };

        let signal = self.signal_engine.lock().await.evaluate(&inputs, now);

        self.event_bus
            .publish(Event::new(
                EventType::SignalEvaluated,
                EventPayload::SignalEvaluated { kind: signal.kind, confidence: signal.confidence },
            ))
            .await
            .ok();
        self.latest.lock().await.signal = signal.clone();
        self.publish_snapshot().await;

        if signal.kind == SignalKind::Hold {
            return;
        }

        let (option_type, instrument, entry_price) = match signal.kind {
            SignalKind::BuyCe => (OptionType::CE, ce_instrument, ce_price),
            SignalKind::BuyPe => (OptionType::PE, pe_instrument, pe_price),
            SignalKind::Hold => return,
        };
        let Some(entry_price) = entry_price else {
            warn!("{:?} qualified but no observed market price for {}", signal.kind, instrument.key);
            return;
        };

        self.event_bus
            .publish(Event::new(
                EventType::SignalEmitted,
                EventPayload::SignalEmitted { kind: signal.kind, reason: signal.reason.clone() },
            ))
            .await
            .ok();
        self.try_enter_position(option_type, instrument, entry_price, now).await;
    }

    async fn try_enter_position(&self, option_type: OptionType, instrument: Instrument, entry_price: f64, now: DateTime<Utc>) {
        let decision = {
            let risk_state = self.risk_state.lock().await.clone();
            let open_positions = self.position_manager.lock().await.open_positions().to_vec();
            self.risk_gate.evaluate(entry_price, &instrument, &risk_state, &open_positions, now)
        };

        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                self.event_bus
                    .publish(Event::new(
                        EventType::RiskRejected,
                        EventPayload::RiskRejected { reason_code: e.error_code().to_string(), detail: e.to_string() },
                    ))
                    .await
                    .ok();
                warn!("risk gate rejected entry for {}: {e}", instrument.key);
                return;
            }
        };

        let entry_ts = now.timestamp().to_string();
        let idempotency_token =
            generate_idempotency_key(&[instrument.key.as_str(), option_type.as_str(), entry_ts.as_str()]);
        let order = Order {
            instrument_key: instrument.key.clone(),
            side: Side::Buy,
            kind: OrderKind::Market,
            qty: decision.qty,
            limit_price: None,
            idempotency_token,
        };

        let ack = self.order_manager.lock().await.submit(&order, entry_price, now).await;
        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                error!("order submission failed for {}: {e}", instrument.key);
                return;
            }
        };

        match ack.status {
            OrderStatus::Unknown => {
                self.event_bus
                    .publish(Event::new(EventType::OrderUnknown, EventPayload::OrderUnknown { order_id: ack.order_id.clone() }))
                    .await
                    .ok();
                warn!("order {} is UNKNOWN after timeout; not opening a position", ack.order_id);
                return;
            }
            OrderStatus::Rejected => {
                warn!("order {} rejected by broker", ack.order_id);
                return;
            }
            OrderStatus::Filled => {}
        }

        self.event_bus
            .publish(Event::new(
                EventType::OrderSubmitted,
                EventPayload::OrderSubmitted { order_id: ack.order_id.clone(), fill_price: ack.fill_price },
            ))
            .await
            .ok();

        let position_id = uuid::Uuid::new_v4().to_string();
        let strike = instrument.strike.unwrap_or(0.0);
        let opened = {
            let mut position_manager = self.position_manager.lock().await;
            position_manager
                .open_position(
                    position_id.clone(),
                    option_type,
                    instrument.key.clone(),
                    strike,
                    decision.qty,
                    ack.fill_price,
                    decision.stop_loss,
                    decision.target,
                    now,
                )
                .await
        };
        if let Err(e) = opened {
            error!("failed to persist new position {position_id}: {e}");
            return;
        }

        self.event_bus
            .publish(Event::new(
                EventType::PositionOpened,
                EventPayload::PositionOpened { position_id, option_type, strike, qty: decision.qty },
            ))
            .await
            .ok();
        self.publish_snapshot().await;
    }

    async fn sweep_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let newly_finalised: Vec<Candle> = {
                        let mut candle = self.candle.lock().await;
                        let before = candle.finalised().len();
                        candle.tick(now);
                        let after = candle.finalised().len();
                        if after > before {
                            candle.last_n_finalised(after - before).into_iter().rev().cloned().collect()
                        } else {
                            Vec::new()
                        }
                    };
                    if !newly_finalised.is_empty() {
                        let mut indicators = self.indicators.lock().await;
                        for c in &newly_finalised {
                            indicators.on_finalised(c, now.date_naive());
                        }
                    }
                    self.process_exits(now).await;
                    self.evaluate_and_maybe_trade(now).await;
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn snapshot_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(SNAPSHOT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish_snapshot().await,
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn registry_refresh_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(REGISTRY_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.registry.needs_refresh().await {
                        match self.registry.refresh().await {
                            Ok(()) => {
                                let count = self.registry.current().await.by_key.len();
                                self.event_bus
                                    .publish(Event::new(
                                        EventType::RegistryRefreshed,
                                        EventPayload::RegistryRefreshed { instrument_count: count },
                                    ))
                                    .await
                                    .ok();
                            }
                            Err(e) => warn!("scheduled registry refresh failed: {e}"),
                        }
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn publish_snapshot(&self) {
        let snapshot = self.assemble_snapshot().await;
        let _ = self.snapshot_tx.send(snapshot);
    }

    async fn assemble_snapshot(&self) -> Snapshot {
        let (spot, signal, greeks, pcr_state, auth) = {
            let latest = self.latest.lock().await;
            (latest.spot, latest.signal.clone(), latest.greeks.clone(), latest.pcr.clone(), latest.auth.clone())
        };

        let open_positions: Vec<Position> = {
            let position_manager = self.position_manager.lock().await;
            position_manager
                .open_positions()
                .iter()
                .filter(|p| p.status == PositionStatus::Open)
                .cloned()
                .collect()
        };
        let risk_state = self.risk_state.lock().await.clone();

        let indicators = {
            let ind = self.indicators.lock().await;
            IndicatorsSnapshot {
                rsi: ind.rsi.value().unwrap_or(f64::NAN),
                ema5: ind.ema5.value().unwrap_or(f64::NAN),
                ema20: ind.ema20.value().unwrap_or(f64::NAN),
                atr_pct: ind.atr_pct(spot).unwrap_or(f64::NAN),
                vwap: ind.vwap.value().unwrap_or(f64::NAN),
                supertrend_bullish: ind.supertrend.bullish().unwrap_or(false),
            }
        };

        let pcr_snapshot = match pcr_state {
            Some(p) => PcrSnapshot {
                value: p.pcr,
                sentiment: p.sentiment,
                trend: p.trend,
                ce_oi: p.total_ce_oi,
                pe_oi: p.total_pe_oi,
                samples: p.sample_count,
            },
            None => empty_pcr_snapshot(),
        };

        Snapshot {
            ts: Utc::now(),
            spot,
            positions: open_positions.clone(),
            signal,
            indicators,
            pcr: pcr_snapshot,
            greeks,
            risk: RiskSnapshot {
                daily_pnl: risk_state.daily_pnl,
                loss_limit: risk_state.daily_loss_limit,
                trading_allowed: risk_state.trading_allowed,
                open_count: open_positions.len(),
            },
            auth,
        }
    }

    /// Operator command interface (spec §6): start/stop trading, close a
    /// position out of band, switch Paper/Live, top up the paper ledger, or
    /// just pull the current snapshot. Every command is logged.
    pub async fn handle_command(&self, command: OperatorCommand) -> std::result::Result<Snapshot, CommandError> {
        self.event_bus
            .publish(Event::new(
                EventType::OperatorCommandReceived,
                EventPayload::OperatorCommandReceived { command: format!("{command:?}") },
            ))
            .await
            .ok();

        match command {
            OperatorCommand::Start => {
                self.risk_state.lock().await.trading_allowed = true;
            }
            OperatorCommand::Stop => {
                self.risk_state.lock().await.trading_allowed = false;
            }
            OperatorCommand::ClosePosition { id, exit_price } => {
                let now = Utc::now();
                let trade = {
                    let mut risk_state = self.risk_state.lock().await;
                    let mut position_manager = self.position_manager.lock().await;
                    position_manager.close_position(&id, exit_price, ExitReason::Manual, now, &mut risk_state).await
                };
                match trade {
                    Ok(trade) => {
                        self.event_bus
                            .publish(Event::new(
                                EventType::PositionClosed,
                                EventPayload::PositionClosed {
                                    position_id: trade.position_id,
                                    exit_reason: ExitReason::Manual,
                                    realised_pnl: trade.realised_pnl,
                                },
                            ))
                            .await
                            .ok();
                    }
                    Err(e) => return Err(CommandError { code: e.error_code().to_string(), message: e.to_string() }),
                }
            }
            OperatorCommand::SetMode(mode) => {
                self.order_manager.lock().await.set_mode(mode);
            }
            OperatorCommand::AddFunds(amount) => {
                self.order_manager.lock().await.add_funds(amount);
                self.risk_state.lock().await.current_balance += amount;
            }
            OperatorCommand::GetStatus => {}
        }

        Ok(self.assemble_snapshot().await)
    }
}

fn empty_pcr_snapshot() -> PcrSnapshot {
    PcrSnapshot { value: None, sentiment: PcrSentiment::Neutral, trend: PcrTrend::Flat, ce_oi: 0, pe_oi: 0, samples: 0 }
}

fn empty_snapshot(risk_state: &RiskState, authenticated: bool) -> Snapshot {
    Snapshot {
        ts: Utc::now(),
        spot: 0.0,
        positions: Vec::new(),
        signal: Signal {
            kind: SignalKind::Hold,
            reason: "startup".to_string(),
            filters: FilterResults::default(),
            reasoning: Vec::new(),
            confidence: 0.0,
            issued_at: Utc::now(),
        },
        indicators: IndicatorsSnapshot {
            rsi: f64::NAN,
            ema5: f64::NAN,
            ema20: f64::NAN,
            atr_pct: f64::NAN,
            vwap: f64::NAN,
            supertrend_bullish: false,
        },
        pcr: empty_pcr_snapshot(),
        greeks: None,
        risk: RiskSnapshot {
            daily_pnl: risk_state.daily_pnl,
            loss_limit: risk_state.daily_loss_limit,
            trading_allowed: risk_state.trading_allowed,
            open_count: 0,
        },
        auth: AuthState { authenticated, token_remaining_seconds: None, error_message: None },
    }
}
