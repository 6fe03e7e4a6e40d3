/// Put-Call Ratio Aggregator: maintains the running CE/PE open-interest
/// totals over the subscribed strike window and classifies sentiment
/// (spec §4.6). Every contract's last-seen OI is tracked so a later tick
/// replaces, rather than adds to, that contract's contribution.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{InstrumentKey, OptionType, PcrSentiment, PcrState, PcrTrend};

const EMISSION_INTERVAL_MS: i64 = 5000;
const TREND_WINDOW: usize = 12;
const NEUTRAL_EPSILON: f64 = 0.02;

const EXTREME_BEARISH_THRESHOLD: f64 = 1.5;
const BEARISH_THRESHOLD: f64 = 1.0;
const BULLISH_THRESHOLD: f64 = 0.5;

fn classify(pcr: f64) -> PcrSentiment {
    if (pcr - 1.0).abs() <= NEUTRAL_EPSILON {
        PcrSentiment::Neutral
    } else if pcr > EXTREME_BEARISH_THRESHOLD {
        PcrSentiment::ExtremeBearish
    } else if pcr > BEARISH_THRESHOLD {
        PcrSentiment::Bearish
    } else if pcr >= BULLISH_THRESHOLD {
        PcrSentiment::Bullish
    } else {
        PcrSentiment::ExtremeBullish
    }
}

fn trend_from_samples(samples: &[f64]) -> PcrTrend {
    if samples.len() < 2 {
        return PcrTrend::Flat;
    }
    let n = samples.len() as f64;
    let xs: Vec<f64> = (0..samples.len()).map(|i| i as f64).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = samples.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(samples.iter()) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x) * (x - mean_x);
    }
    if den.abs() < 1e-12 {
        return PcrTrend::Flat;
    }
    let slope = num / den;
    if slope > 1e-4 {
        PcrTrend::Rising
    } else if slope < -1e-4 {
        PcrTrend::Falling
    } else {
        PcrTrend::Flat
    }
}

/// Tracks CE/PE OI across the active strike window as an incremental sum:
/// each contract's latest reported OI overwrites its previous contribution,
/// so a single late or repeated tick never double-counts.
pub struct PcrAggregator {
    last_oi: HashMap<InstrumentKey, (OptionType, i64)>,
    total_ce_oi: i64,
    total_pe_oi: i64,
    samples: Vec<f64>,
    sample_count: u64,
    last_emitted_at: Option<DateTime<Utc>>,
    dirty: bool,
}

impl PcrAggregator {
    pub fn new() -> Self {
        PcrAggregator {
            last_oi: HashMap::new(),
            total_ce_oi: 0,
            total_pe_oi: 0,
            samples: Vec::with_capacity(TREND_WINDOW + 1),
            sample_count: 0,
            last_emitted_at: None,
            dirty: false,
        }
    }

    /// Registers (or replaces) a contract's OI contribution. Atomic from the
    /// caller's point of view: the totals only ever reflect a fully-applied
    /// update, never a half-subtracted one.
    pub fn update_oi(&mut self, key: InstrumentKey, option_type: OptionType, oi: i64) {
        let previous = self.last_oi.insert(key, (option_type, oi));
        match option_type {
            OptionType::CE => {
                if let Some((_, prev_oi)) = previous {
                    self.total_ce_oi -= prev_oi;
                }
                self.total_ce_oi += oi;
            }
            OptionType::PE => {
                if let Some((_, prev_oi)) = previous {
                    self.total_pe_oi -= prev_oi;
                }
                self.total_pe_oi += oi;
            }
        }
        self.dirty = true;
    }

    /// Removes a contract that has rolled out of the strike window so its
    /// stale OI no longer contributes to the totals.
    pub fn remove_contract(&mut self, key: &InstrumentKey) {
        if let Some((option_type, oi)) = self.last_oi.remove(key) {
            match option_type {
                OptionType::CE => self.total_ce_oi -= oi,
                OptionType::PE => self.total_pe_oi -= oi,
            }
            self.dirty = true;
        }
    }

    fn current_pcr(&self) -> Option<f64> {
        if self.total_ce_oi == 0 {
            None
        } else {
            Some(self.total_pe_oi as f64 / self.total_ce_oi as f64)
        }
    }

    /// Emits a fresh [`PcrState`] at most once per [`EMISSION_INTERVAL_MS`],
    /// and only when the totals changed since the last emission.
    pub fn maybe_emit(&mut self, now: DateTime<Utc>) -> Option<PcrState> {
        if !self.dirty {
            return None;
        }
        if let Some(last) = self.last_emitted_at {
            if (now - last).num_milliseconds() < EMISSION_INTERVAL_MS {
                return None;
            }
        }

        let pcr = self.current_pcr();
        if let Some(value) = pcr {
            self.samples.push(value);
            if self.samples.len() > TREND_WINDOW {
                self.samples.remove(0);
            }
        }
        self.sample_count += 1;
        self.last_emitted_at = Some(now);
        self.dirty = false;

        Some(PcrState {
            total_ce_oi: self.total_ce_oi,
            total_pe_oi: self.total_pe_oi,
            pcr,
            sentiment: pcr.map(classify).unwrap_or(PcrSentiment::Neutral),
            trend: trend_from_samples(&self.samples),
            sample_count: self.sample_count,
            last_update: now,
        })
    }
}

impl Default for PcrAggregator {
    fn default() -> Self {
        PcrAggregator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn classification_thresholds_match_spec_bands() {
        assert_eq!(classify(1.8), PcrSentiment::ExtremeBearish);
        assert_eq!(classify(1.2), PcrSentiment::Bearish);
        assert_eq!(classify(0.7), PcrSentiment::Bullish);
        assert_eq!(classify(0.3), PcrSentiment::ExtremeBullish);
        assert_eq!(classify(1.0), PcrSentiment::Neutral);
        assert_eq!(classify(1.01), PcrSentiment::Neutral);
    }

    #[test]
    fn repeated_update_for_same_contract_overwrites_not_accumulates() {
        let mut agg = PcrAggregator::new();
        agg.update_oi("NIFTY|25000|CE".to_string(), OptionType::CE, 1000);
        agg.update_oi("NIFTY|25000|CE".to_string(), OptionType::CE, 1200);
        assert_eq!(agg.total_ce_oi, 1200);
    }

    #[test]
    fn emission_is_rate_limited_to_5_seconds() {
        let mut agg = PcrAggregator::new();
        let t0 = Utc::now();
        agg.update_oi("NIFTY|25000|CE".to_string(), OptionType::CE, 1000);
        agg.update_oi("NIFTY|25000|PE".to_string(), OptionType::PE, 500);
        assert!(agg.maybe_emit(t0).is_some());
        agg.update_oi("NIFTY|25000|CE".to_string(), OptionType::CE, 1100);
        assert!(agg.maybe_emit(t0 + Duration::seconds(1)).is_none());
        assert!(agg.maybe_emit(t0 + Duration::seconds(6)).is_some());
    }

    #[test]
    fn removing_a_contract_drops_its_contribution() {
        let mut agg = PcrAggregator::new();
        agg.update_oi("NIFTY|25000|CE".to_string(), OptionType::CE, 1000);
        agg.remove_contract(&"NIFTY|25000|CE".to_string());
        assert_eq!(agg.total_ce_oi, 0);
    }

    #[test]
    fn zero_ce_oi_yields_undefined_pcr() {
        let mut agg = PcrAggregator::new();
        agg.update_oi("NIFTY|25000|PE".to_string(), OptionType::PE, 500);
        let state = agg.maybe_emit(Utc::now()).unwrap();
        assert!(state.pcr.is_none());
    }
}
