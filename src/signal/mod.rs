/// Signal Engine: evaluates the eight-filter conjunction table against the
/// current indicator/greeks/PCR state and emits BUY_CE, BUY_PE or HOLD with
/// a deterministic reasoning trail (spec §4.7).
use chrono::{DateTime, Utc};

use crate::types::{FilterName, FilterOutcome, FilterResults, GreeksSnapshot, PcrState, Signal, SignalKind};

const RSI_MIDLINE: f64 = 50.0;
const ATR_PCT_MIN: f64 = 0.01;
const ATR_PCT_MAX: f64 = 2.5;
const GREEKS_QUALITY_MIN: f64 = 50.0;
const GREEKS_DELTA_MIN_ABS: f64 = 0.2;
const GREEKS_THETA_MIN: f64 = -150.0;
const PCR_BULLISH_MAX: f64 = 1.0;
const PCR_BEARISH_MIN: f64 = 1.0;
const VOLUME_RATIO_MIN: f64 = 0.7;

/// Everything the conjunction table needs for one evaluation. Built fresh by
/// the orchestrator from the candle/indicator/greeks/PCR state each tick.
pub struct SignalInputs {
    pub supertrend_bullish: Option<bool>,
    pub ema5: Option<f64>,
    pub ema20: Option<f64>,
    pub ema_crossed_bullish: bool,
    pub ema_crossed_bearish: bool,
    pub rsi: Option<f64>,
    pub atr_pct: Option<f64>,
    pub entry_confirmation_bullish: bool,
    pub entry_confirmation_bearish: bool,
    pub greeks: Option<GreeksSnapshot>,
    pub pcr: Option<PcrState>,
    pub current_volume: Option<f64>,
    pub avg_volume: Option<f64>,
}

fn evaluate_ce(inputs: &SignalInputs) -> Vec<FilterOutcome> {
    let supertrend = inputs.supertrend_bullish == Some(true);
    let ema = match (inputs.ema5, inputs.ema20) {
        (Some(e5), Some(e20)) => e5 > e20 || inputs.ema_crossed_bullish,
        _ => false,
    };
    let rsi = inputs.rsi.map(|v| v >= RSI_MIDLINE).unwrap_or(false);
    let volatility = inputs
        .atr_pct
        .map(|v| (ATR_PCT_MIN..=ATR_PCT_MAX).contains(&v))
        .unwrap_or(false);
    let entry_confirmation = inputs.entry_confirmation_bullish;
    let greeks = inputs
        .greeks
        .as_ref()
        .map(|g| g.ce.quality_score >= GREEKS_QUALITY_MIN && g.ce.delta > GREEKS_DELTA_MIN_ABS && g.ce.theta > GREEKS_THETA_MIN)
        .unwrap_or(false);
    let pcr = inputs
        .pcr
        .as_ref()
        .and_then(|p| p.pcr)
        .map(|v| v < PCR_BULLISH_MAX)
        .unwrap_or(false);
    let volume = match (inputs.current_volume, inputs.avg_volume) {
        (Some(cv), Some(av)) if av > 0.0 => cv > VOLUME_RATIO_MIN * av,
        _ => false,
    };

    vec![
        FilterOutcome { name: FilterName::Supertrend, passed: supertrend, observed: format!("{:?}", inputs.supertrend_bullish) },
        FilterOutcome { name: FilterName::Ema, passed: ema, observed: format!("ema5={:?} ema20={:?} crossed={}", inputs.ema5, inputs.ema20, inputs.ema_crossed_bullish) },
        FilterOutcome { name: FilterName::Rsi, passed: rsi, observed: format!("{:?}", inputs.rsi) },
        FilterOutcome { name: FilterName::Volatility, passed: volatility, observed: format!("{:?}", inputs.atr_pct) },
        FilterOutcome { name: FilterName::EntryConfirmation, passed: entry_confirmation, observed: format!("bullish={}", inputs.entry_confirmation_bullish) },
        FilterOutcome { name: FilterName::Greeks, passed: greeks, observed: inputs.greeks.as_ref().map(|g| format!("quality={:.1} delta={:.2} theta={:.2}", g.ce.quality_score, g.ce.delta, g.ce.theta)).unwrap_or_else(|| "undefined".to_string()) },
        FilterOutcome { name: FilterName::Pcr, passed: pcr, observed: inputs.pcr.as_ref().and_then(|p| p.pcr).map(|v| format!("{v:.3}")).unwrap_or_else(|| "undefined".to_string()) },
        FilterOutcome { name: FilterName::Volume, passed: volume, observed: format!("current={:?} avg={:?}", inputs.current_volume, inputs.avg_volume) },
    ]
}

fn evaluate_pe(inputs: &SignalInputs) -> Vec<FilterOutcome> {
    let supertrend = inputs.supertrend_bullish == Some(false);
    let ema = match (inputs.ema5, inputs.ema20) {
        (Some(e5), Some(e20)) => e5 < e20 || inputs.ema_crossed_bearish,
        _ => false,
    };
    let rsi = inputs.rsi.map(|v| v <= RSI_MIDLINE).unwrap_or(false);
    let volatility = inputs
        .atr_pct
        .map(|v| (ATR_PCT_MIN..=ATR_PCT_MAX).contains(&v))
        .unwrap_or(false);
    let entry_confirmation = inputs.entry_confirmation_bearish;
    let greeks = inputs
        .greeks
        .as_ref()
        .map(|g| g.pe.quality_score >= GREEKS_QUALITY_MIN && g.pe.delta < -GREEKS_DELTA_MIN_ABS && g.pe.theta > GREEKS_THETA_MIN)
        .unwrap_or(false);
    let pcr = inputs
        .pcr
        .as_ref()
        .and_then(|p| p.pcr)
        .map(|v| v > PCR_BEARISH_MIN)
        .unwrap_or(false);
    let volume = match (inputs.current_volume, inputs.avg_volume) {
        (Some(cv), Some(av)) if av > 0.0 => cv > VOLUME_RATIO_MIN * av,
        _ => false,
    };

    vec![
        FilterOutcome { name: FilterName::Supertrend, passed: supertrend, observed: format!("{:?}", inputs.supertrend_bullish) },
        FilterOutcome { name: FilterName::Ema, passed: ema, observed: format!("ema5={:?} ema20={:?} crossed={}", inputs.ema5, inputs.ema20, inputs.ema_crossed_bearish) },
        FilterOutcome { name: FilterName::Rsi, passed: rsi, observed: format!("{:?}", inputs.rsi) },
        FilterOutcome { name: FilterName::Volatility, passed: volatility, observed: format!("{:?}", inputs.atr_pct) },
        FilterOutcome { name: FilterName::EntryConfirmation, passed: entry_confirmation, observed: format!("bearish={}", inputs.entry_confirmation_bearish) },
        FilterOutcome { name: FilterName::Greeks, passed: greeks, observed: inputs.greeks.as_ref().map(|g| format!("quality={:.1} delta={:.2} theta={:.2}", g.pe.quality_score, g.pe.delta, g.pe.theta)).unwrap_or_else(|| "undefined".to_string()) },
        FilterOutcome { name: FilterName::Pcr, passed: pcr, observed: inputs.pcr.as_ref().and_then(|p| p.pcr).map(|v| format!("{v:.3}")).unwrap_or_else(|| "undefined".to_string()) },
        FilterOutcome { name: FilterName::Volume, passed: volume, observed: format!("current={:?} avg={:?}", inputs.current_volume, inputs.avg_volume) },
    ]
}

fn results_from(outcomes: &[FilterOutcome]) -> FilterResults {
    let mut results = FilterResults::default();
    for outcome in outcomes {
        let passed = outcome.passed;
        match outcome.name {
            FilterName::Supertrend => results.supertrend = passed,
            FilterName::Ema => results.ema = passed,
            FilterName::Rsi => results.rsi = passed,
            FilterName::Volatility => results.volatility = passed,
            FilterName::EntryConfirmation => results.entry_confirmation = passed,
            FilterName::Greeks => results.greeks = passed,
            FilterName::Pcr => results.pcr = passed,
            FilterName::Volume => results.volume = passed,
        }
    }
    results
}

/// Tracks the last non-HOLD signal emitted per kind to enforce the
/// per-kind cooldown (spec §6 `signal_cooldown_sec`, default 120s).
pub struct SignalEngine {
    last_emitted: Option<(SignalKind, DateTime<Utc>)>,
    cooldown_seconds: i64,
}

impl SignalEngine {
    pub fn new(cooldown_seconds: i64) -> Self {
        SignalEngine { last_emitted: None, cooldown_seconds }
    }

    fn in_cooldown(&self, kind: SignalKind, now: DateTime<Utc>) -> bool {
        match self.last_emitted {
            Some((last_kind, last_at)) if last_kind == kind => (now - last_at).num_seconds() < self.cooldown_seconds,
            _ => false,
        }
    }

    /// Runs the full conjunction table and returns the resulting signal.
    /// A would-be BUY that is still in cooldown is reported as HOLD with the
    /// would-be kind noted in the reason string, but the full reasoning
    /// trail for that would-be direction is still attached.
    pub fn evaluate(&mut self, inputs: &SignalInputs, now: DateTime<Utc>) -> Signal {
        let ce_outcomes = evaluate_ce(inputs);
        let pe_outcomes = evaluate_pe(inputs);
        let ce_results = results_from(&ce_outcomes);
        let pe_results = results_from(&pe_outcomes);
        let ce_all_pass = ce_results.all_pass();
        let pe_all_pass = pe_results.all_pass();

        let (kind, reason, results, reasoning) = if ce_all_pass && pe_all_pass {
            (
                SignalKind::Hold,
                "both BUY_CE and BUY_PE conditions held simultaneously; holding".to_string(),
                ce_results,
                ce_outcomes,
            )
        } else if ce_all_pass {
            if self.in_cooldown(SignalKind::BuyCe, now) {
                (SignalKind::Hold, "BUY_CE qualified but in cooldown".to_string(), ce_results, ce_outcomes)
            } else {
                (SignalKind::BuyCe, "all CE filters passed".to_string(), ce_results, ce_outcomes)
            }
        } else if pe_all_pass {
            if self.in_cooldown(SignalKind::BuyPe, now) {
                (SignalKind::Hold, "BUY_PE qualified but in cooldown".to_string(), pe_results, pe_outcomes)
            } else {
                (SignalKind::BuyPe, "all PE filters passed".to_string(), pe_results, pe_outcomes)
            }
        } else {
            // Neither side passes outright: report whichever side is closer
            // to qualifying so the reasoning trail stays informative.
            if ce_results.passed_count() >= pe_results.passed_count() {
                (SignalKind::Hold, "not all CE filters passed".to_string(), ce_results, ce_outcomes)
            } else {
                (SignalKind::Hold, "not all PE filters passed".to_string(), pe_results, pe_outcomes)
            }
        };

        if kind != SignalKind::Hold {
            self.last_emitted = Some((kind, now));
        }

        Signal {
            kind,
            reason,
            filters: results,
            reasoning,
            confidence: results.confidence(),
            issued_at: now,
        }
    }
}

impl Default for SignalEngine {
    fn default() -> Self {
        SignalEngine::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Leg, PcrSentiment, PcrTrend};

    fn qualifying_ce_inputs() -> SignalInputs {
        SignalInputs {
            supertrend_bullish: Some(true),
            ema5: Some(105.0),
            ema20: Some(100.0),
            ema_crossed_bullish: false,
            ema_crossed_bearish: false,
            rsi: Some(60.0),
            atr_pct: Some(1.0),
            entry_confirmation_bullish: true,
            entry_confirmation_bearish: false,
            greeks: Some(GreeksSnapshot {
                atm_strike: 25000.0,
                expiry: chrono::NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
                ce: Leg { delta: 0.5, gamma: 0.001, theta: -50.0, vega: 10.0, rho: 1.0, iv: 0.2, price: 120.0, quality_score: 80.0 },
                pe: Leg::undefined(),
                computed_at: Utc::now(),
            }),
            pcr: Some(PcrState {
                total_ce_oi: 1000,
                total_pe_oi: 700,
                pcr: Some(0.7),
                sentiment: PcrSentiment::Bullish,
                trend: PcrTrend::Flat,
                sample_count: 1,
                last_update: Utc::now(),
            }),
            current_volume: Some(2000.0),
            avg_volume: Some(1000.0),
        }
    }

    #[test]
    fn all_ce_filters_passing_emits_buy_ce() {
        let mut engine = SignalEngine::new(120);
        let signal = engine.evaluate(&qualifying_ce_inputs(), Utc::now());
        assert_eq!(signal.kind, SignalKind::BuyCe);
        assert_eq!(signal.confidence, 100.0);
    }

    #[test]
    fn cooldown_suppresses_repeat_signal_within_120_seconds() {
        let mut engine = SignalEngine::new(120);
        let t0 = Utc::now();
        let first = engine.evaluate(&qualifying_ce_inputs(), t0);
        assert_eq!(first.kind, SignalKind::BuyCe);
        let second = engine.evaluate(&qualifying_ce_inputs(), t0 + chrono::Duration::seconds(30));
        assert_eq!(second.kind, SignalKind::Hold);
        let third = engine.evaluate(&qualifying_ce_inputs(), t0 + chrono::Duration::seconds(121));
        assert_eq!(third.kind, SignalKind::BuyCe);
    }

    #[test]
    fn missing_inputs_fail_closed_to_hold() {
        let mut engine = SignalEngine::new(120);
        let inputs = SignalInputs {
            supertrend_bullish: None,
            ema5: None,
            ema20: None,
            ema_crossed_bullish: false,
            ema_crossed_bearish: false,
            rsi: None,
            atr_pct: None,
            entry_confirmation_bullish: false,
            entry_confirmation_bearish: false,
            greeks: None,
            pcr: None,
            current_volume: None,
            avg_volume: None,
        };
        let signal = engine.evaluate(&inputs, Utc::now());
        assert_eq!(signal.kind, SignalKind::Hold);
        assert_eq!(signal.confidence, 0.0);
    }
}
