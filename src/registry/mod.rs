/// Instrument Registry: loads and indexes the contract master, exposing
/// lookup by key, options-by-symbol-and-expiry, nearest expiry, and the PCR
/// subscription window. Refreshed at least every 24h; a failed refresh keeps
/// serving the previous registry.
pub mod master;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{Instrument, InstrumentKey, OptionType};
use crate::utils::RateLimiter;

const REFRESH_INTERVAL_HOURS: i64 = 24;

/// One strike's CE/PE pair within an expiry's option chain.
#[derive(Debug, Clone)]
pub struct StrikePair {
    pub strike: f64,
    pub ce: Option<Instrument>,
    pub pe: Option<Instrument>,
}

/// Immutable snapshot of the indexed instrument master. Swapped as a whole
/// on refresh so readers never observe a partially-built registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryData {
    pub by_key: HashMap<InstrumentKey, Instrument>,
    pub options_by_symbol_expiry: HashMap<(String, NaiveDate), Vec<StrikePair>>,
}

impl RegistryData {
    fn build(instruments: Vec<Instrument>) -> Self {
        let mut by_key = HashMap::new();
        let mut grouped: HashMap<(String, NaiveDate), HashMap<i64, StrikePair>> = HashMap::new();

        for instrument in instruments {
            if let (Some(option_type), Some(strike), Some(expiry)) =
                (instrument.option_type, instrument.strike, instrument.expiry)
            {
                // Strikes are stored keyed by integer paise/points to avoid
                // float-equality hazards when pairing CE and PE rows.
                let strike_key = (strike * 100.0).round() as i64;
                let entry = grouped
                    .entry((instrument.symbol.clone(), expiry))
                    .or_default()
                    .entry(strike_key)
                    .or_insert_with(|| StrikePair {
                        strike,
                        ce: None,
                        pe: None,
                    });
                match option_type {
                    OptionType::CE => entry.ce = Some(instrument.clone()),
                    OptionType::PE => entry.pe = Some(instrument.clone()),
                }
            }
            by_key.insert(instrument.key.clone(), instrument);
        }

        let options_by_symbol_expiry = grouped
            .into_iter()
            .map(|(key, strikes)| {
                let mut pairs: Vec<StrikePair> = strikes.into_values().collect();
                pairs.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap());
                (key, pairs)
            })
            .collect();

        RegistryData {
            by_key,
            options_by_symbol_expiry,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Instrument> {
        self.by_key.get(key)
    }

    pub fn nearest_expiry(&self, symbol: &str, now: NaiveDate) -> Option<NaiveDate> {
        self.options_by_symbol_expiry
            .keys()
            .filter(|(s, _)| s == symbol)
            .map(|(_, expiry)| *expiry)
            .filter(|expiry| *expiry >= now)
            .min()
    }

    /// Enumerate CE/PE instrument keys within `[atm-range, atm+range]`,
    /// strike-sorted then CE-before-PE, so subscriptions are stable across
    /// reloads.
    pub fn pcr_window(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        atm: f64,
        range: f64,
    ) -> Vec<InstrumentKey> {
        let Some(pairs) = self.options_by_symbol_expiry.get(&(symbol.to_string(), expiry)) else {
            return Vec::new();
        };
        let lo = atm - range;
        let hi = atm + range;
        let mut keys = Vec::new();
        for pair in pairs.iter().filter(|p| p.strike >= lo && p.strike <= hi) {
            if let Some(ce) = &pair.ce {
                keys.push(ce.key.clone());
            }
            if let Some(pe) = &pair.pe {
                keys.push(pe.key.clone());
            }
        }
        keys
    }
}

pub struct InstrumentRegistry {
    http: reqwest::Client,
    source_url: String,
    data: RwLock<Arc<RegistryData>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    refresh_limiter: RateLimiter,
}

impl InstrumentRegistry {
    pub fn new(source_url: impl Into<String>) -> Self {
        InstrumentRegistry {
            http: reqwest::Client::new(),
            source_url: source_url.into(),
            data: RwLock::new(Arc::new(RegistryData::default())),
            last_refresh: RwLock::new(None),
            refresh_limiter: RateLimiter::new(1),
        }
    }

    pub async fn current(&self) -> Arc<RegistryData> {
        self.data.read().await.clone()
    }

    pub async fn needs_refresh(&self) -> bool {
        match *self.last_refresh.read().await {
            None => true,
            Some(last) => (Utc::now() - last).num_hours() >= REFRESH_INTERVAL_HOURS,
        }
    }

    /// Download, decompress and index the instrument master, atomically
    /// swapping it in on success. On failure the previous registry remains
    /// in place and the failure is logged as a warning, never propagated as
    /// a fatal condition.
    pub async fn refresh(&self) -> Result<()> {
        self.refresh_limiter.acquire().await;

        match self.fetch_and_parse().await {
            Ok(instruments) => {
                let count = instruments.len();
                let fresh = Arc::new(RegistryData::build(instruments));
                *self.data.write().await = fresh;
                *self.last_refresh.write().await = Some(Utc::now());
                info!("instrument registry refreshed: {count} instruments");
                Ok(())
            }
            Err(e) => {
                warn!("instrument registry refresh failed, keeping previous registry: {e}");
                Err(e)
            }
        }
    }

    async fn fetch_and_parse(&self) -> Result<Vec<Instrument>> {
        let bytes = self.http.get(&self.source_url).send().await?.bytes().await?;
        master::parse_gzip_csv(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;

    fn option(symbol: &str, strike: f64, option_type: OptionType, expiry: NaiveDate) -> Instrument {
        Instrument {
            key: format!("{symbol}|{strike}|{}", option_type.as_str()),
            symbol: symbol.to_string(),
            segment: Segment::Option,
            option_type: Some(option_type),
            strike: Some(strike),
            expiry: Some(expiry),
            lot_size: Some(75),
            tick_size: 0.05,
            exchange_segment: "NFO".to_string(),
        }
    }

    #[test]
    fn pcr_window_is_deterministic_and_strike_sorted() {
        let expiry = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let instruments = vec![
            option("NIFTY", 25100.0, OptionType::PE, expiry),
            option("NIFTY", 24900.0, OptionType::CE, expiry),
            option("NIFTY", 25000.0, OptionType::CE, expiry),
            option("NIFTY", 25000.0, OptionType::PE, expiry),
            option("NIFTY", 25500.0, OptionType::CE, expiry), // outside range
        ];
        let data = RegistryData::build(instruments);
        let keys = data.pcr_window("NIFTY", expiry, 25000.0, 200.0);
        assert_eq!(
            keys,
            vec![
                "NIFTY|24900|CE".to_string(),
                "NIFTY|25000|CE".to_string(),
                "NIFTY|25000|PE".to_string(),
                "NIFTY|25100|PE".to_string(),
            ]
        );
    }

    #[test]
    fn nearest_expiry_skips_past_dates() {
        let past = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let soon = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let later = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let instruments = vec![
            option("NIFTY", 25000.0, OptionType::CE, past),
            option("NIFTY", 25000.0, OptionType::CE, soon),
            option("NIFTY", 25000.0, OptionType::CE, later),
        ];
        let data = RegistryData::build(instruments);
        let now = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        assert_eq!(data.nearest_expiry("NIFTY", now), Some(soon));
    }
}
