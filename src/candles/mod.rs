/// Candle Manager: per instrument+interval, maintains a live incomplete
/// candle plus a bounded ring of finalised candles, bucket-aligned to IST
/// wall-clock per the configured interval.
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use tracing::debug;

use crate::types::{Candle, InstrumentKey, Tick};

const MAX_FINALISED: usize = 300;

fn bucket_align(ts: DateTime<Utc>, interval_minutes: i64) -> DateTime<Utc> {
    let ist = ts.with_timezone(&Kolkata);
    let midnight = Kolkata
        .with_ymd_and_hms(ist.year(), ist.month(), ist.day(), 0, 0, 0)
        .unwrap();
    let minutes_since_midnight = (ist - midnight).num_minutes();
    let bucket_minutes = (minutes_since_midnight / interval_minutes) * interval_minutes;
    (midnight + Duration::minutes(bucket_minutes)).with_timezone(&Utc)
}

fn empty_bridge_candle(start: DateTime<Utc>, end: DateTime<Utc>, prev_close: f64) -> Candle {
    Candle {
        start,
        end,
        open: prev_close,
        high: prev_close,
        low: prev_close,
        close: prev_close,
        volume: 0,
        complete: true,
    }
}

/// Single instrument, single interval candle state machine.
pub struct CandleManager {
    interval_minutes: i64,
    incomplete: Option<Candle>,
    finalised: VecDeque<Candle>,
}

impl CandleManager {
    pub fn new(interval_minutes: i64) -> Self {
        CandleManager {
            interval_minutes,
            incomplete: None,
            finalised: VecDeque::with_capacity(MAX_FINALISED),
        }
    }

    pub fn incomplete(&self) -> Option<&Candle> {
        self.incomplete.as_ref()
    }

    pub fn finalised(&self) -> &VecDeque<Candle> {
        &self.finalised
    }

    pub fn last_n_finalised(&self, n: usize) -> Vec<&Candle> {
        self.finalised.iter().rev().take(n).collect()
    }

    fn push_finalised(&mut self, candle: Candle) {
        if self.finalised.len() >= MAX_FINALISED {
            self.finalised.pop_front();
        }
        self.finalised.push_back(candle);
    }

    /// Bridge from the end of the current incomplete candle up to (but not
    /// including) `new_bucket_start`, backfilling empty candles for any
    /// buckets with no data, then open a fresh incomplete candle.
    fn roll_forward(&mut self, new_bucket_start: DateTime<Utc>, open_price: f64, opening_volume: i64) {
        if let Some(mut inc) = self.incomplete.take() {
            let prev_close = inc.close;
            inc.complete = true;
            let mut next_start = inc.end;
            self.push_finalised(inc);

            while next_start < new_bucket_start {
                let next_end = next_start + Duration::minutes(self.interval_minutes);
                self.push_finalised(empty_bridge_candle(next_start, next_end, prev_close));
                next_start = next_end;
            }
        }

        let end = new_bucket_start + Duration::minutes(self.interval_minutes);
        self.incomplete = Some(Candle {
            start: new_bucket_start,
            end,
            open: open_price,
            high: open_price,
            low: open_price,
            close: open_price,
            volume: opening_volume,
            complete: false,
        });
    }

    /// Update from a tick. Ticks older than the current incomplete candle's
    /// start are ignored for candle purposes (the last-price/OI cache may
    /// still use them elsewhere). A tick at or after `inc.end` belongs to
    /// the next bucket — this is also the tie-break rule for simultaneous
    /// ticks exactly at the boundary.
    pub fn on_tick(&mut self, tick: &Tick) {
        let Some(ts) = DateTime::from_timestamp_millis(tick.ts) else {
            return;
        };
        let ltq = tick.ltq.unwrap_or(0);

        match &mut self.incomplete {
            None => {
                let start = bucket_align(ts, self.interval_minutes);
                let end = start + Duration::minutes(self.interval_minutes);
                self.incomplete = Some(Candle {
                    start,
                    end,
                    open: tick.ltp,
                    high: tick.ltp,
                    low: tick.ltp,
                    close: tick.ltp,
                    volume: ltq,
                    complete: false,
                });
            }
            Some(inc) => {
                if ts < inc.start {
                    debug!("dropping out-of-order tick for candle building");
                    return;
                }
                if ts < inc.end {
                    inc.high = inc.high.max(tick.ltp);
                    inc.low = inc.low.min(tick.ltp);
                    inc.close = tick.ltp;
                    inc.volume += ltq;
                } else {
                    let new_bucket_start = bucket_align(ts, self.interval_minutes);
                    self.roll_forward(new_bucket_start, tick.ltp, ltq);
                }
            }
        }
    }

    /// Timer-driven sweep: finalise the incomplete candle if `now` has
    /// reached its end even though no tick arrived, bridging empty candles
    /// for any fully-skipped buckets in between.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let Some(inc) = &self.incomplete else {
            return;
        };
        if now < inc.end {
            return;
        }
        let prev_close = inc.close;
        let new_bucket_start = bucket_align(now, self.interval_minutes);
        self.roll_forward(new_bucket_start, prev_close, 0);
    }
}

/// One `CandleManager` per subscribed instrument, sharing an interval.
pub struct MultiCandleManager {
    interval_minutes: i64,
    managers: HashMap<InstrumentKey, CandleManager>,
}

impl MultiCandleManager {
    pub fn new(interval_minutes: i64) -> Self {
        MultiCandleManager {
            interval_minutes,
            managers: HashMap::new(),
        }
    }

    pub fn on_tick(&mut self, tick: &Tick) {
        self.managers
            .entry(tick.instrument.clone())
            .or_insert_with(|| CandleManager::new(self.interval_minutes))
            .on_tick(tick);
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) {
        for manager in self.managers.values_mut() {
            manager.tick(now);
        }
    }

    pub fn get(&self, instrument: &str) -> Option<&CandleManager> {
        self.managers.get(instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist_ts(hour: u32, minute: u32, second: u32) -> i64 {
        Kolkata
            .with_ymd_and_hms(2026, 7, 27, hour, minute, second)
            .unwrap()
            .with_timezone(&Utc)
            .timestamp_millis()
    }

    fn tick(ts_ms: i64, ltp: f64, ltq: i64) -> Tick {
        Tick {
            instrument: "NSE_INDEX|Nifty 50".to_string(),
            ts: ts_ms,
            ltp,
            ltq: Some(ltq),
            oi: None,
            volume: None,
            bid: None,
            ask: None,
        }
    }

    #[test]
    fn first_tick_opens_incomplete_candle_on_aligned_boundary() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 17, 12), 25000.0, 10));
        let inc = mgr.incomplete().unwrap();
        assert!(!inc.complete);
        assert_eq!(inc.open, 25000.0);
    }

    #[test]
    fn ticks_within_bucket_update_ohlc_and_volume() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 15, 0), 100.0, 10));
        mgr.on_tick(&tick(ist_ts(9, 16, 0), 105.0, 5));
        mgr.on_tick(&tick(ist_ts(9, 17, 0), 95.0, 5));
        let inc = mgr.incomplete().unwrap();
        assert_eq!(inc.high, 105.0);
        assert_eq!(inc.low, 95.0);
        assert_eq!(inc.close, 95.0);
        assert_eq!(inc.volume, 20);
    }

    #[test]
    fn tick_at_exact_boundary_belongs_to_next_bucket() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 15, 0), 100.0, 10));
        mgr.on_tick(&tick(ist_ts(9, 20, 0), 110.0, 5)); // exactly inc.end
        assert_eq!(mgr.finalised().len(), 1);
        let inc = mgr.incomplete().unwrap();
        assert_eq!(inc.open, 110.0);
    }

    #[test]
    fn skipped_buckets_are_backfilled_with_prev_close_and_zero_volume() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 15, 0), 100.0, 10));
        // jump three buckets ahead (15 minutes)
        mgr.on_tick(&tick(ist_ts(9, 30, 0), 102.0, 5));
        assert_eq!(mgr.finalised().len(), 3);
        for bridged in mgr.last_n_finalised(2) {
            assert_eq!(bridged.volume, 0);
            assert_eq!(bridged.open, 100.0);
            assert_eq!(bridged.close, 100.0);
        }
    }

    #[test]
    fn out_of_order_tick_before_bucket_start_is_ignored() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 20, 0), 100.0, 10));
        mgr.on_tick(&tick(ist_ts(9, 18, 0), 999.0, 10)); // before inc.start
        let inc = mgr.incomplete().unwrap();
        assert_eq!(inc.high, 100.0);
    }

    #[test]
    fn timer_sweep_finalises_without_a_tick() {
        let mut mgr = CandleManager::new(5);
        mgr.on_tick(&tick(ist_ts(9, 15, 0), 100.0, 10));
        let now = DateTime::from_timestamp_millis(ist_ts(9, 21, 0)).unwrap();
        mgr.tick(now);
        assert_eq!(mgr.finalised().len(), 1);
        assert!(mgr.finalised().back().unwrap().complete);
    }

    #[test]
    fn ring_buffer_is_bounded_to_300() {
        let mut mgr = CandleManager::new(1);
        mgr.on_tick(&tick(ist_ts(9, 15, 0), 100.0, 1));
        for i in 1..=310 {
            let minute = 15 + i;
            let hour = 9 + (minute / 60);
            let minute = minute % 60;
            mgr.on_tick(&tick(ist_ts(hour as u32, minute as u32, 0), 100.0 + i as f64, 1));
        }
        assert!(mgr.finalised().len() <= 300);
    }
}
